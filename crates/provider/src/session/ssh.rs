/// ssh2-backed transport
///
/// libssh2 is blocking, so every call runs on the blocking pool.

use common::models::ConnectionInfo;
use common::{Error, Result};
use async_trait::async_trait;
use ssh2::{ExtendedData, KeyboardInteractivePrompt, Prompt, Session};
use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CommandOutput, RemoteShell};

pub struct SshShell {
    connection: Arc<ConnectionInfo>,
}

impl SshShell {
    pub fn new(connection: Arc<ConnectionInfo>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let connection = self.connection.clone();
        let command = command.to_string();

        tokio::task::spawn_blocking(move || exec_blocking(&connection, &command))
            .await
            .map_err(|e| Error::Internal(format!("ssh task failed: {}", e)))?
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let connection = self.connection.clone();
        let local_path = local_path.to_path_buf();
        let remote_path = PathBuf::from(remote_path);

        tokio::task::spawn_blocking(move || upload_blocking(&connection, &local_path, &remote_path))
            .await
            .map_err(|e| Error::Internal(format!("scp task failed: {}", e)))?
    }
}

/// Answers every keyboard-interactive question with the password.
struct PasswordPrompt<'a> {
    password: &'a str,
}

impl KeyboardInteractivePrompt for PasswordPrompt<'_> {
    fn prompt<'b>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[Prompt<'b>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.to_string()).collect()
    }
}

fn connection_error(address: &str, e: impl std::fmt::Display) -> Error {
    Error::Connection(format!("{}: {}", address, e))
}

/// Dial, handshake and authenticate. The host key is not checked; ESXi ships self-signed keys.
fn open_session(connection: &ConnectionInfo) -> Result<Session> {
    let address = connection.ssh_address();

    let tcp = TcpStream::connect(&address).map_err(|e| connection_error(&address, e))?;
    let mut session = Session::new().map_err(|e| connection_error(&address, e))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|e| connection_error(&address, e))?;

    let mut prompt = PasswordPrompt {
        password: &connection.password,
    };
    if let Err(e) = session.userauth_keyboard_interactive(&connection.username, &mut prompt) {
        tracing::debug!("keyboard-interactive auth rejected ({}), trying password", e);
    }
    if !session.authenticated() {
        session
            .userauth_password(&connection.username, &connection.password)
            .map_err(|e| connection_error(&address, e))?;
    }
    if !session.authenticated() {
        return Err(connection_error(&address, "authentication rejected"));
    }

    Ok(session)
}

fn exec_blocking(connection: &ConnectionInfo, command: &str) -> Result<CommandOutput> {
    let address = connection.ssh_address();
    let session = open_session(connection)?;

    let mut channel = session
        .channel_session()
        .map_err(|e| connection_error(&address, e))?;
    channel
        .handle_extended_data(ExtendedData::Merge)
        .map_err(|e| connection_error(&address, e))?;
    channel
        .exec(command)
        .map_err(|e| connection_error(&address, e))?;

    // From here on the command has started, so failures are not retryable.
    let mut raw = Vec::new();
    channel.read_to_end(&mut raw)?;
    channel
        .wait_close()
        .map_err(|e| Error::Internal(format!("failed to close channel: {}", e)))?;
    let status = channel
        .exit_status()
        .map_err(|e| Error::Internal(format!("failed to read exit status: {}", e)))?;

    Ok(CommandOutput {
        output: String::from_utf8_lossy(&raw).trim().to_string(),
        status,
    })
}

fn upload_blocking(connection: &ConnectionInfo, local_path: &Path, remote_path: &Path) -> Result<()> {
    let address = connection.ssh_address();
    let mut file = File::open(local_path)?;
    let size = file.metadata()?.len();

    let session = open_session(connection)?;
    let mut remote = session
        .scp_send(remote_path, 0o644, size, None)
        .map_err(|e| connection_error(&address, e))?;

    let mut buffer = Vec::with_capacity(size as usize);
    file.read_to_end(&mut buffer)?;
    remote.write_all(&buffer)?;

    let scp_error = |e: ssh2::Error| Error::Internal(format!("scp to {} failed: {}", remote_path.display(), e));
    remote.send_eof().map_err(scp_error)?;
    remote.wait_eof().map_err(scp_error)?;
    remote.close().map_err(scp_error)?;
    remote.wait_close().map_err(scp_error)?;

    Ok(())
}
