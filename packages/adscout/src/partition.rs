//! Stable partition assignment for queue subjects.
//!
//! Jobs for the same key should land on the same partition across every
//! dispatcher replica and restart, so the hash must be stable across
//! processes, and `DefaultHasher` is not. This is an ordering aid only; the
//! distributed lock is the correctness guarantee.

use sha2::{Digest, Sha256};

/// Map a partition key to `0..partitions`.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let partitions = partitions.max(1);
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(partitions)) as u32
}

/// The queue subject for a topic + partition key pair.
pub fn partition_subject(topic: &str, key: &str, partitions: u32) -> String {
    format!("{topic}.{}", partition_for(key, partitions))
}
