/// ESXi host handle
///
/// Wraps a [`RemoteShell`] with retry, sentinel detection, file transfer and
/// cancellable sleeps. Cheap to clone; every clone shares one transport.

use common::models::ConnectionInfo;
use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{RemoteShell, SshShell};

const CONNECTIVITY_PROBE: &str = "vmware --version";
const PROBE_ATTEMPTS: u32 = 3;
const COMMAND_ATTEMPTS: u32 = 10;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const UNSET_SENTINEL: &str = "<unset>";

static CREDENTIALS_IN_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"vi://.*?@").expect("static regex"));

/// Replace `vi://user:pass@` credentials with a fixed mask.
pub fn mask_credentials(text: &str) -> String {
    CREDENTIALS_IN_URI
        .replace_all(text, "vi://****:******@")
        .into_owned()
}

/// Trimmed combined output and exit status of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Clone)]
pub struct Host {
    connection: Arc<ConnectionInfo>,
    shell: Arc<dyn RemoteShell>,
    cancel: CancellationToken,
}

impl Host {
    /// Host backed by a real SSH transport.
    pub fn connect(connection: ConnectionInfo) -> Self {
        let connection = Arc::new(connection);
        let shell = Arc::new(SshShell::new(connection.clone()));
        Self {
            connection,
            shell,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_shell(connection: ConnectionInfo, shell: Arc<dyn RemoteShell>) -> Self {
        Self {
            connection: Arc::new(connection),
            shell,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleep that aborts with `Error::Cancelled` once the token fires.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run a command and hand back its output regardless of exit status.
    pub async fn run(&self, command: &str, purpose: &str) -> Result<CommandOutput> {
        tracing::debug!("{}: {}", purpose, command);

        let max_attempts = if command == CONNECTIVITY_PROBE {
            PROBE_ATTEMPTS
        } else {
            COMMAND_ATTEMPTS
        };
        let mut attempt = 0;
        let mut sentinel_seen = false;

        loop {
            attempt += 1;
            match self.shell.exec(command).await {
                Ok(output) if output.output == UNSET_SENTINEL => {
                    if sentinel_seen {
                        return Err(Error::HostUnavailable);
                    }
                    tracing::warn!("{}: host answered {}, reconnecting", purpose, UNSET_SENTINEL);
                    sentinel_seen = true;
                }
                Ok(output) => {
                    if !output.output.is_empty() {
                        tracing::debug!("{}: output => {}", purpose, output.output);
                    }
                    return Ok(output);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::debug!("{}: connect attempt {} failed: {}", purpose, attempt, e);
                    self.sleep(RETRY_BACKOFF).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a command, failing with `Error::Command` on a non-zero exit.
    pub async fn execute(&self, command: &str, purpose: &str) -> Result<String> {
        let result = self.run(command, purpose).await?;
        if result.success() {
            Ok(result.output)
        } else {
            Err(Error::command(purpose, command, result.output, result.status))
        }
    }

    /// Write `content` plus a trailing newline to `remote_path`.
    pub async fn write_file(&self, content: &str, remote_path: &str, purpose: &str) -> Result<()> {
        tracing::debug!("{}: write {}", purpose, remote_path);

        // Removed on drop, on every path out of this function.
        let mut staged = tempfile::NamedTempFile::new()?;
        writeln!(staged, "{}", content)?;
        staged.flush()?;

        self.upload(staged.path(), remote_path, purpose).await
    }

    /// Copy an existing local file to the host.
    pub async fn copy_file(&self, local_path: &Path, remote_path: &str, purpose: &str) -> Result<()> {
        tracing::debug!("{}: copy {} -> {}", purpose, local_path.display(), remote_path);
        self.upload(local_path, remote_path, purpose).await
    }

    async fn upload(&self, local_path: &Path, remote_path: &str, purpose: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.shell.upload(local_path, remote_path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < COMMAND_ATTEMPTS => {
                    tracing::debug!("{}: upload attempt {} failed: {}", purpose, attempt, e);
                    self.sleep(RETRY_BACKOFF).await?;
                }
                Err(e) => {
                    return Err(Error::Internal(format!(
                        "{}: failed to copy file to esxi host: {}",
                        purpose, e
                    )))
                }
            }
        }
    }

    /// Connectivity probe followed by making sure the login home exists.
    pub async fn validate_creds(&self) -> Result<()> {
        self.execute(CONNECTIVITY_PROBE, "connectivity test, get vmware version")
            .await
            .map_err(|e| match e {
                Error::Connection(_) | Error::HostUnavailable => e,
                other => Error::Connection(other.to_string()),
            })?;
        self.execute("mkdir -p ~", "create home directory if missing")
            .await?;
        Ok(())
    }

    /// Run a command on the local machine. Credentials in `vi://` locators are masked
    /// in logs and errors.
    pub async fn execute_local(&self, command: &str, purpose: &str) -> Result<String> {
        let masked = mask_credentials(command);
        tracing::debug!("{}: {}", purpose, masked);

        let result = self.shell.exec_local(command).await?;
        if result.success() {
            Ok(result.output)
        } else {
            Err(Error::command(
                purpose,
                masked,
                mask_credentials(&result.output),
                result.status,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{connection_info, ScriptedShell};

    #[test]
    fn test_mask_credentials() {
        assert_eq!(
            mask_credentials("ovftool 'src' 'vi://root:p%40ss@esxi:443/pool'"),
            "ovftool 'src' 'vi://****:******@esxi:443/pool'"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_connection_failures() {
        let shell = ScriptedShell::new();
        shell.fail_connect("ls /", 4);
        shell.on("ls /", "bin");
        let host = Host::with_shell(connection_info(), shell.clone());

        assert_eq!(host.execute("ls /", "list root").await.unwrap(), "bin");
        assert_eq!(shell.count("ls /"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_gives_up_after_three_attempts() {
        let shell = ScriptedShell::new();
        shell.fail_connect("vmware --version", 5);
        let host = Host::with_shell(connection_info(), shell.clone());

        let err = host.validate_creds().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(shell.count("vmware --version"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unset_sentinel_retried_once() {
        let shell = ScriptedShell::new();
        shell.on("vim-cmd vmsvc/getallvms", "<unset>");
        let host = Host::with_shell(connection_info(), shell.clone());

        let err = host.run("vim-cmd vmsvc/getallvms", "list vms").await.unwrap_err();
        assert!(matches!(err, Error::HostUnavailable));
        assert_eq!(shell.count("vim-cmd vmsvc/getallvms"), 2);
    }

    #[tokio::test]
    async fn test_execute_reports_non_zero_exit() {
        let shell = ScriptedShell::new();
        shell.on_status("false", "nope", 1);
        let host = Host::with_shell(connection_info(), shell);

        let err = host.execute("false", "run false").await.unwrap_err();
        assert_eq!(err.output(), Some("nope"));

        let result = host.run("false", "run false").await.unwrap();
        assert_eq!(result.status, 1);
    }

    #[tokio::test]
    async fn test_write_file_appends_newline() {
        let shell = ScriptedShell::new();
        let host = Host::with_shell(connection_info(), shell.clone());

        host.write_file("a = \"1\"", "/tmp/x.vmx", "write vmx").await.unwrap();
        assert_eq!(shell.uploaded("/tmp/x.vmx").as_deref(), Some("a = \"1\"\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sleep() {
        let shell = ScriptedShell::new();
        let cancel = CancellationToken::new();
        let host = Host::with_shell(connection_info(), shell).with_cancellation(cancel.clone());

        cancel.cancel();
        let err = host.sleep(Duration::from_secs(3)).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_execute_local_masks_password() {
        let shell = ScriptedShell::new();
        shell.on_local_status("ovftool", "bad vi://root:secret@esxi", 1);
        let host = Host::with_shell(connection_info(), shell);

        let err = host
            .execute_local("ovftool 'vi://root:secret@esxi:443/'", "import")
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("secret"));
    }
}
