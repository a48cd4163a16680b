//! Engine error taxonomy.
//!
//! Errors fall into five classes with different recovery behavior:
//! validation errors are surfaced immediately and never retried; provider
//! errors are recovered by advancing the embedding fallback chain; timeouts
//! are absorbed by the façade as an empty leg; storage errors abort the
//! current operation without partial writes; sync errors are isolated per
//! file during bulk indexing.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Caller-supplied data is malformed (dimension mismatch, bad filter).
    /// Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// A remote embedding provider failed. Recovered by the fallback chain;
    /// surfaced only when every provider in the chain has failed.
    #[error("embedding provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// All providers in the embedding chain failed.
    #[error("all {attempted} embedding providers failed, last error: {last}")]
    ChainExhausted { attempted: usize, last: String },

    /// A search leg exceeded its configured deadline.
    #[error("{leg} search timed out after {millis}ms")]
    Timeout { leg: &'static str, millis: u64 },

    /// Transactional write or read against the local store failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A single file could not be indexed during a sync pass.
    #[error("sync error for {path}: {message}")]
    Sync { path: PathBuf, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn sync(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Sync {
            path: path.into(),
            message: msg.into(),
        }
    }
}
