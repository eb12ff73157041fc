use thiserror::Error;

/// Unified error type for the provider core.
#[derive(Error, Debug)]
pub enum Error {
    /// Could not establish an authenticated channel, even after retrying.
    #[error("failed to connect to esxi host: {0}")]
    Connection(String),

    /// The host answered `<unset>`: it is unreachable or its management agent restarted.
    #[error("failed to connect to esxi host or management agent has been restarted")]
    HostUnavailable,

    /// A remote command ran but reported failure.
    #[error("{purpose} failed (exit status {status}): {output}")]
    Command {
        purpose: String,
        command: String,
        output: String,
        status: i32,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("{0}")]
    Hypervisor(String),

    #[error("{0}")]
    Storage(String),

    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    UnknownOperation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Builds a command failure carrying the purpose and the raw host output.
    pub fn command(
        purpose: impl Into<String>,
        command: impl Into<String>,
        output: impl Into<String>,
        status: i32,
    ) -> Self {
        Self::Command {
            purpose: purpose.into(),
            command: command.into(),
            output: output.into(),
            status,
        }
    }

    /// Raw host output attached to a command failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Command { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for failures worth another connection attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::HostUnavailable)
    }
}

/// Unified result type.
pub type Result<T> = std::result::Result<T, Error>;
