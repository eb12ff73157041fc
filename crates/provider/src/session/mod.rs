/// Remote session layer
///
/// One authenticated channel per command against the ESXi host, with bounded retries.

pub mod host;
pub mod ssh;
pub mod testing;

pub use host::{CommandOutput, Host};
pub use ssh::SshShell;

use async_trait::async_trait;
use common::Result;
use std::path::Path;

/// Transport seam between [`Host`] and the wire.
///
/// Implementations perform exactly one attempt per call. A failure to open an
/// authenticated channel must be reported as `Error::Connection` so that the caller
/// can retry; any other error is final.
#[async_trait]
pub trait RemoteShell: Send + Sync + 'static {
    /// Run `command` on the host, returning combined stdout/stderr and the exit status.
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Copy a local file to `remote_path` over SCP.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Run `command` through bash on the machine hosting the provider.
    async fn exec_local(&self, command: &str) -> Result<CommandOutput> {
        let output = tokio::process::Command::new("/bin/bash")
            .arg("-c")
            .arg(command)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            output: combined.trim().to_string(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}
