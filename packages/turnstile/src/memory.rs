//! In-process [`KvStore`] for tests and single-node setups.
//!
//! Behaves like the Redis subset turnstile uses: ttls are honored (lazily,
//! on access), `expire` never recreates a key, `lrem` removes all matching
//! entries. Time is `tokio::time`, so paused-clock tests can drive expiry
//! deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::KvError;
use crate::kv::KvStore;

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, ValueEntry>,
    lists: HashMap<String, VecDeque<String>>,
}

impl MemoryState {
    /// Drop the entry for `key` if its ttl has elapsed.
    fn purge(&mut self, key: &str, now: Instant) {
        if self.values.get(key).is_some_and(|e| e.expired(now)) {
            self.values.remove(key);
        }
    }
}

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryKv {
    state: Mutex<MemoryState>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.purge(key, now);
        if state.values.contains_key(key) {
            return Ok(false);
        }
        state.values.insert(
            key.to_owned(),
            ValueEntry {
                value: value.to_owned(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.purge(key, now);
        Ok(state.values.get(key).map(|e| e.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.values.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.purge(key, now);
        match state.values.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .lists
            .entry(key.to_owned())
            .or_default()
            .push_back(value.to_owned());
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.lists.get_mut(key).and_then(|list| list.pop_front()))
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, KvError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|entry| entry != value);
        Ok((before - list.len()) as u64)
    }
}
