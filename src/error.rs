//! Error types for the replica exchange coordinator
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error kinds that can occur while coordinating a campaign
#[derive(Debug, Error)]
pub enum AsyncReError {
    /// Missing or invalid configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Checkpoint could not be parsed or has the wrong version
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    /// The pilot could not be reached or rejected a request
    #[error("pilot unavailable: {0}")]
    Pilot(String),

    /// A subjob terminated without producing its cycle artifact
    #[error("subjob failure for replica {replica} cycle {cycle}: {reason}")]
    Subjob {
        replica: usize,
        cycle: u64,
        reason: String,
    },

    /// The exchange plug-in failed; the round is aborted
    #[error("exchange plug-in error: {0}")]
    ExchangePlugin(String),

    /// An input template left a placeholder unresolved
    #[error("unresolved template placeholder: {0}")]
    Template(String),

    /// Status store bookkeeping error (lock poisoning, bad replica id)
    #[error("status store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, AsyncReError>;
