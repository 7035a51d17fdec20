//! Error types for the store layer.
//!
//! All errors are propagated via [`StoreError`] which wraps the underlying
//! [`fred`] errors with additional context about which operation failed.

/// Errors that can occur in the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A key was still readable right after a successful delete.
    #[error("key {0} still present after delete")]
    NotDeleted(String),

    /// The backend connection is down.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
