//! Error types for fieldwork.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("task source error: {0}")]
    TaskSource(String),

    #[error("claim resolution failed: {0}")]
    Resolution(String),

    #[error("unknown work kind: {0}")]
    UnknownKind(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
