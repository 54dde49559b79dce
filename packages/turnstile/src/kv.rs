//! The key-value store seam.
//!
//! Every turnstile primitive mutates shared state through single-key atomic
//! operations only, so the whole coordination layer scales horizontally
//! without a transaction coordinator. This trait names exactly those
//! operations; [`RedisKv`](crate::RedisKv) implements them against a real
//! store and [`MemoryKv`](crate::MemoryKv) in-process for tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;

/// Single-key atomic primitives over a shared store.
///
/// String values and string list entries are the only shapes: callers encode
/// richer values themselves (the pool uses JSON).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` to `value` with a ttl, only if the key is absent.
    ///
    /// Returns true when the key was created. Atomic: two concurrent calls
    /// for the same absent key yield exactly one true.
    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Read a key. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), KvError>;

    /// Refresh the ttl of an existing key.
    ///
    /// Returns false when the key no longer exists; the key is never
    /// recreated.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Append a value to the tail of a list.
    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Pop the head of a list, if any.
    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Read the whole list without mutating it.
    async fn lrange(&self, key: &str) -> Result<Vec<String>, KvError>;

    /// Remove every occurrence of `value` from a list.
    ///
    /// Returns the number of entries removed.
    async fn lrem(&self, key: &str, value: &str) -> Result<u64, KvError>;
}
