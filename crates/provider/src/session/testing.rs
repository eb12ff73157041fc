/// Scripted shell for exercising drivers without a host
///
/// Responses are matched by substring. Limited rules (`once`, `fail_connect`) are
/// consumed first in registration order; otherwise the most recently registered
/// permanent rule wins. Unmatched commands succeed with empty output.

use common::models::ConnectionInfo;
use common::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CommandOutput, RemoteShell};

#[derive(Clone)]
enum Response {
    Output(CommandOutput),
    ConnectFailure,
}

struct Rule {
    pattern: String,
    response: Response,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    rules: Vec<Rule>,
    local_rules: Vec<Rule>,
    commands: Vec<String>,
    local_commands: Vec<String>,
    uploads: HashMap<String, String>,
}

#[derive(Default)]
pub struct ScriptedShell {
    state: Mutex<State>,
}

/// Connection details used by tests.
pub fn connection_info() -> ConnectionInfo {
    ConnectionInfo {
        host: "esxi.local".to_string(),
        ssh_port: 22,
        ssl_port: 443,
        username: "root".to_string(),
        password: "secret".to_string(),
        ovf_tool_location: "ovftool".to_string(),
    }
}

fn respond(rules: &mut [Rule], command: &str) -> Option<Response> {
    if let Some(rule) = rules.iter_mut().find(|rule| {
        matches!(rule.remaining, Some(n) if n > 0) && command.contains(&rule.pattern)
    }) {
        rule.remaining = rule.remaining.map(|n| n - 1);
        return Some(rule.response.clone());
    }

    rules
        .iter()
        .rev()
        .find(|rule| rule.remaining.is_none() && command.contains(&rule.pattern))
        .map(|rule| rule.response.clone())
}

impl ScriptedShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, pattern: &str, response: Response, remaining: Option<usize>) {
        self.state().rules.push(Rule {
            pattern: pattern.to_string(),
            response,
            remaining,
        });
    }

    /// Answer every matching command with `output` and exit status 0.
    pub fn on(&self, pattern: &str, output: &str) {
        self.on_status(pattern, output, 0);
    }

    pub fn on_status(&self, pattern: &str, output: &str, status: i32) {
        let response = Response::Output(CommandOutput {
            output: output.to_string(),
            status,
        });
        self.push(pattern, response, None);
    }

    /// Answer the next matching command only.
    pub fn once(&self, pattern: &str, output: &str) {
        self.once_status(pattern, output, 0);
    }

    pub fn once_status(&self, pattern: &str, output: &str, status: i32) {
        let response = Response::Output(CommandOutput {
            output: output.to_string(),
            status,
        });
        self.push(pattern, response, Some(1));
    }

    /// Refuse the connection for the next `times` matching commands.
    pub fn fail_connect(&self, pattern: &str, times: usize) {
        self.push(pattern, Response::ConnectFailure, Some(times));
    }

    pub fn on_local_status(&self, pattern: &str, output: &str, status: i32) {
        self.state().local_rules.push(Rule {
            pattern: pattern.to_string(),
            response: Response::Output(CommandOutput {
                output: output.to_string(),
                status,
            }),
            remaining: None,
        });
    }

    /// Every remote command issued so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn local_commands(&self) -> Vec<String> {
        self.state().local_commands.clone()
    }

    /// Number of issued remote commands containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|command| command.contains(pattern))
            .count()
    }

    pub fn uploaded(&self, remote_path: &str) -> Option<String> {
        self.state().uploads.get(remote_path).cloned()
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let mut state = self.state();
        state.commands.push(command.to_string());
        match respond(&mut state.rules, command) {
            Some(Response::Output(output)) => Ok(output),
            Some(Response::ConnectFailure) => {
                Err(Error::Connection("scripted connection refused".to_string()))
            }
            None => Ok(CommandOutput::default()),
        }
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let content = std::fs::read_to_string(local_path)?;
        self.state().uploads.insert(remote_path.to_string(), content);
        Ok(())
    }

    async fn exec_local(&self, command: &str) -> Result<CommandOutput> {
        let mut state = self.state();
        state.local_commands.push(command.to_string());
        match respond(&mut state.local_rules, command) {
            Some(Response::Output(output)) => Ok(output),
            Some(Response::ConnectFailure) => Err(Error::Internal("local command refused".into())),
            None => Ok(CommandOutput::default()),
        }
    }
}
