//! Error types for Poker Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid display name: {0}")]
    InvalidName(String),

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Invalid ticket: {0}")]
    InvalidTicket(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store rejected request: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, Error>;
