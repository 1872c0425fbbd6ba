//! Error types for remote execution

use thiserror::Error;

use crate::ssh::CommandOutput;

/// Main error type for remote and local execution
#[derive(Debug, Error)]
pub enum ExecError {
    /// The connection attempt did not finish within the connect deadline
    #[error("SSH connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// The remote side rejected the credentials, or none were usable
    #[error("Invalid credentials for connection: {0}")]
    BadAuthData(String),

    /// Unreachable host, closed port, malformed address or handshake failure
    #[error("Invalid ip or port for connection: {0}")]
    BadIpOrPort(String),

    /// The running phase did not finish within the command deadline
    #[error("Command deadline exceeded after {0}ms")]
    CommandDeadlineExceeded(u64),

    /// The remote command or protocol exited with a fault
    #[error("Remote execution error: {message}")]
    RemoteExecution {
        message: String,
        output: Box<CommandOutput>,
    },

    /// The caller cancelled the operation before it finished
    #[error("Remote execution cancelled")]
    Cancelled { output: Box<CommandOutput> },

    /// Local command failed to spawn or exited non-zero
    #[error("Local command error: {message}")]
    LocalExecution { message: String, output: Vec<u8> },

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// An operation task panicked
    #[error("Internal fault: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using ExecError
pub type Result<T> = std::result::Result<T, ExecError>;

impl ExecError {
    /// Create a bad-auth-data error from a string
    pub fn bad_auth(msg: impl Into<String>) -> Self {
        ExecError::BadAuthData(msg.into())
    }

    /// Create a bad-ip-or-port error from a string
    pub fn bad_address(msg: impl Into<String>) -> Self {
        ExecError::BadIpOrPort(msg.into())
    }

    /// Create a remote execution error carrying the output captured so far
    pub fn remote(msg: impl Into<String>, output: CommandOutput) -> Self {
        ExecError::RemoteExecution {
            message: msg.into(),
            output: Box::new(output),
        }
    }

    /// Create a remote execution error for a failure before any output
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::remote(msg, CommandOutput::default())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        ExecError::InvalidParams(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        ExecError::Config(msg.into())
    }

    /// Output captured before the failure, if the error carries any
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            ExecError::RemoteExecution { output, .. } | ExecError::Cancelled { output } => {
                Some(&**output)
            }
            _ => None,
        }
    }

    /// Whether the failure happened while establishing the session
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionTimeout(_) | ExecError::BadAuthData(_) | ExecError::BadIpOrPort(_)
        )
    }
}
