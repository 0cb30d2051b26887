//! Transport-level errors of the manager connection

use callbridge_core::AppError;
use thiserror::Error;

/// Errors raised while talking to the manager interface
#[derive(Error, Debug)]
pub enum AmiError {
    #[error("could not connect to {0}")]
    Connect(String),

    #[error("login rejected: {0}")]
    Auth(String),

    #[error("unexpected reply: {0}")]
    Protocol(String),

    #[error("no reply within {0} ms")]
    Timeout(u64),

    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl AmiError {
    /// Whether the connection is unusable after this error
    ///
    /// A timeout is not fatal to the socket, but the connection still closes
    /// itself after one since the reply may arrive later.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AmiError::Closed | AmiError::Io(_) | AmiError::Auth(_))
    }
}

impl From<AmiError> for AppError {
    fn from(err: AmiError) -> Self {
        match err {
            AmiError::Auth(msg) => AppError::AmiAuth(msg),
            AmiError::Protocol(msg) => AppError::AmiProtocol(msg),
            AmiError::InvalidArgument(msg) => AppError::Validation(msg),
            other => AppError::AmiConnect(other.to_string()),
        }
    }
}
