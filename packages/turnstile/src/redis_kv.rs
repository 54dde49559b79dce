//! Redis-backed [`KvStore`].
//!
//! Uses a single multiplexed async connection; clones of the connection are
//! cheap handles onto the same socket, so every operation clones rather than
//! pooling.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::KvError;
use crate::kv::KvStore;

/// [`KvStore`] over a Redis instance.
#[derive(Clone)]
pub struct RedisKv {
    con: MultiplexedConnection,
}

impl RedisKv {
    /// Connect to the Redis instance at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(to_kv)?;
        let con = client
            .get_multiplexed_async_connection()
            .await
            .map_err(to_kv)?;
        Ok(Self { con })
    }

    /// Wrap an existing multiplexed connection.
    pub fn new(con: MultiplexedConnection) -> Self {
        Self { con }
    }
}

fn to_kv(err: redis::RedisError) -> KvError {
    KvError::Backend(err.to_string())
}

/// Redis EX takes whole seconds; sub-second ttls round up to one.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut con = self.con.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut con)
            .await
            .map_err(to_kv)?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut con = self.con.clone();
        con.get(key).await.map_err(to_kv)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut con = self.con.clone();
        let _: i64 = con.del(key).await.map_err(to_kv)?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut con = self.con.clone();
        con.expire(key, ttl_secs(ttl) as i64).await.map_err(to_kv)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut con = self.con.clone();
        let _: i64 = con.rpush(key, value).await.map_err(to_kv)?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut con = self.con.clone();
        con.lpop(key, None).await.map_err(to_kv)
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, KvError> {
        let mut con = self.con.clone();
        con.lrange(key, 0, -1).await.map_err(to_kv)
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<u64, KvError> {
        let mut con = self.con.clone();
        let removed: i64 = con.lrem(key, 0, value).await.map_err(to_kv)?;
        Ok(removed as u64)
    }
}
