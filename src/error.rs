//! Error types of the cache pipeline.
//!
//! Nothing here is fatal for the host process. Log and decode errors are surfaced to whoever drives the failed
//! operation; the worker pool only logs them and keeps going.

use thiserror::Error;

/// Failures reported by a [`DurableLog`](crate::traits::DurableLog) provider.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log can't be reached or rejected the request.
    #[error("log is unavailable: {0}")]
    Unavailable(String),

    #[error("consumer group '{group}' does not exist on stream '{stream}'")]
    NoGroup { stream: String, group: String },

    #[error("invalid log position '{0}'")]
    InvalidPosition(String),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// A log record that can't be turned back into a command. Such records are poison messages.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record carries no method tag")]
    MissingMethod,

    #[error("unknown method tag '{0}'")]
    UnknownMethod(String),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors of the cache facade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to build {what}: {message}")]
    Builder { what: &'static str, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn builder<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> Self {
        move |err| Self::Builder {
            what,
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Failures of the system of record.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record '{0}' not found")]
    NotFound(String),

    #[error("record '{0}' already exists")]
    AlreadyExists(String),

    #[error("repository failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
