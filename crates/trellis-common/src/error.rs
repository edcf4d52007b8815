//! Error kinds shared across the Trellis crates
//!
//! Every fallible framework operation returns either a typed outcome enum or
//! a `TrellisError`. Lookups that can legitimately miss use `NotFound`
//! variants rather than being treated as failures by callers.

/// Framework-wide error type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrellisError {
    /// Null / out-of-range / wrong-size input rejected at an API boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A bounded table or buffer is full.
    #[error("{0} is full")]
    Capacity(&'static str),

    /// Lookup by key, name, or token failed.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// An entry with the same identity already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Flash erase or program failed; the previous valid state remains.
    #[error("storage error: {0}")]
    Storage(String),

    /// The transport refused or dropped a message; no application retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation was invoked before the owning component was initialized.
    #[error("not initialized: {0}")]
    NotInitialized(&'static str),
}

impl TrellisError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TrellisError::InvalidArgument(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        TrellisError::Storage(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        TrellisError::Transport(msg.into())
    }
}
