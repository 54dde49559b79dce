//! Structured error types for turnstile primitives.
//!
//! Each primitive gets its own pattern-matchable enum so callers can
//! distinguish "the resource is busy" (a normal scheduling outcome) from
//! "the store is broken" (an operational failure).

use thiserror::Error;

/// Errors from the shared key-value store backend.
#[derive(Debug, Error)]
pub enum KvError {
    /// The backend rejected or failed the operation.
    #[error("key-value backend error: {0}")]
    Backend(String),
}

/// Errors from [`DistributedLock`](crate::DistributedLock) operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another holder currently owns the lock for this key.
    ///
    /// This is a scheduling outcome, not a failure: callers decide whether
    /// to skip or defer.
    #[error("lock {key} is already held")]
    AlreadyHeld { key: String },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] KvError),
}

impl LockError {
    /// Returns true for the busy (non-failure) outcome.
    pub fn is_already_held(&self) -> bool {
        matches!(self, LockError::AlreadyHeld { .. })
    }
}

/// Errors from [`ResourcePool`](crate::ResourcePool) operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool stayed empty through every bounded acquisition attempt.
    #[error("pool {key} exhausted after {attempts} attempts")]
    Unavailable { key: String, attempts: u32 },

    /// A pooled value could not be encoded or decoded.
    #[error("pool item codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] KvError),
}

impl PoolError {
    /// Returns true for the exhausted (non-failure) outcome.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PoolError::Unavailable { .. })
    }
}
