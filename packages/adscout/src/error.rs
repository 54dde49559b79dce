//! Job-level error taxonomy.
//!
//! Everything here is a per-job failure: the handler releases whatever it
//! holds, the error goes back to the queue transport, and the transport's
//! redelivery plus the next dispatch tick are the only retries. Lock
//! contention is deliberately NOT an error; it surfaces as a `Blocked`
//! outcome instead.

use thiserror::Error;
use turnstile::{LockError, PoolError};

use crate::provider::ProviderError;
use crate::types::{SourceId, SubscriberId, WorkKey};

#[derive(Debug, Error)]
pub enum JobError {
    /// No provider is registered for the job's source.
    #[error("no provider registered for source {0}")]
    UnknownSource(SourceId),

    /// The notify job references a subscriber that does not exist.
    #[error("unknown subscriber {0}")]
    UnknownSubscriber(SubscriberId),

    /// The proxy pool stayed empty through every bounded attempt; the crawl
    /// is aborted rather than attempted proxy-less.
    #[error("no proxy available: {0}")]
    ProxyUnavailable(#[source] PoolError),

    /// The provider run failed.
    #[error("provider failed for {key}")]
    Provider {
        key: WorkKey,
        #[source]
        source: ProviderError,
    },

    /// Outbound notification delivery failed; watch state is not advanced.
    #[error("notification delivery failed: {0}")]
    Delivery(#[source] anyhow::Error),

    /// A storage operation failed; the watermark is never advanced past
    /// unpersisted records.
    #[error("persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),

    /// The lock store itself failed (distinct from the lock being held).
    #[error("lock store failure: {0}")]
    LockStore(#[source] LockError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_key() {
        let err = JobError::Provider {
            key: WorkKey::new("avito".into(), "spb".into()),
            source: ProviderError::ProxyBanned,
        };
        assert!(err.to_string().contains("avito:spb"));
    }
}
