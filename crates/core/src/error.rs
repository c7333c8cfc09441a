//! Error types for the outreach engine.

use thiserror::Error;

/// The main error type for the outreach engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job store error (persistence layer unavailable or rejected an update).
    #[error("Store error: {0}")]
    Store(String),

    /// Job not found in the store.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Invalid campaign configuration (missing message body, bad delay bounds, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger error during billing reconciliation.
    #[error("Ledger error: {0}")]
    Ledger(String),
}

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
