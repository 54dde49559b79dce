//! # Turnstile
//!
//! Coordination primitives for fleets of workers sharing one key-value
//! store: distributed per-key locks, FIFO resource pools, and
//! incremental-crawl watermarks.
//!
//! Every mutation is a single-key atomic store operation (create-if-absent
//! with expiry, delete, expiry refresh, list push/pop/remove), so nothing
//! here needs a transaction coordinator and every primitive scales
//! horizontally with the store.
//!
//! ```text
//! worker A ──┐
//! worker B ──┼──► KvStore (Redis) ──► lock entries   {prefix}_{key}
//! worker C ──┘                        resource lists  proxy
//!
//! WatermarkTracker ──► WatermarkStore (your database)
//! ```
//!
//! ## Safety model
//!
//! - [`DistributedLock`]: acquisition is atomic create-if-absent; the ttl is
//!   the crash backstop, auto-extension covers unbounded work, and the
//!   extender self-cancels when the entry vanishes.
//! - [`ResourcePool`]: the total item set is conserved across add/acquire;
//!   acquisition retries are bounded, never an unbounded spin.
//! - [`WatermarkTracker`]: boundaries are idempotently re-derivable, so
//!   re-running a key with a fresh boundary is always safe.

pub mod error;
pub mod kv;
pub mod lock;
pub mod memory;
pub mod pool;
pub mod redis_kv;
pub mod watermark;

pub use error::{KvError, LockError, PoolError};
pub use kv::KvStore;
pub use lock::{DistributedLock, LockGuard};
pub use memory::MemoryKv;
pub use pool::{ResourcePool, RetryPolicy};
pub use redis_kv::RedisKv;
pub use watermark::{
    MemoryWatermarkStore, Watermark, WatermarkStore, WatermarkTracker, Watermarked,
};
