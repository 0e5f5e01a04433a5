//! Network error types

use std::io;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Timed out")]
    Timeout,

    #[error("Server full")]
    ServerFull,
}

impl Error {
    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ConnectionClosed | Error::NotConnected | Error::Timeout
        )
    }
}

impl From<Error> for poker_core::Error {
    fn from(e: Error) -> Self {
        if e.is_transient() {
            poker_core::Error::Unavailable(e.to_string())
        } else {
            poker_core::Error::Rejected(e.to_string())
        }
    }
}
