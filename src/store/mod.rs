pub mod keys;
pub mod scripts;

#[cfg(test)]
mod tests;

use crate::error::RelayError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use scripts::ScriptRegistry;
use std::sync::Arc;

/// Thin abstraction over the key-value store: a cheaply-cloneable connection
/// manager (auto-reconnecting) plus the cached atomic script registry.
///
/// Every multi-step mutation goes through `scripts` — this type intentionally
/// does not expose a way to compose e.g. ZCARD+ZADD as two separate client
/// calls for anything that §6 requires to be atomic.
#[derive(Clone)]
pub struct StoreClient {
    conn: ConnectionManager,
    pub scripts: Arc<ScriptRegistry>,
}

impl StoreClient {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = redis::Client::open(url)
            .map_err(|e| RelayError::Internal(format!("invalid store url: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            scripts: Arc::new(ScriptRegistry::new()),
        })
    }

    /// A second, independent connection for pub/sub subscription — the
    /// multiplexed `ConnectionManager` does not support entering subscriber
    /// mode, so the wake-signal listener opens its own.
    pub async fn open_pubsub(url: &str) -> Result<redis::aio::PubSub, RelayError> {
        let client = redis::Client::open(url)
            .map_err(|e| RelayError::Internal(format!("invalid store url: {e}")))?;
        let conn = client.get_async_pubsub().await?;
        Ok(conn)
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>, RelayError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, RelayError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    pub async fn hget_f64(&self, key: &str, field: &str) -> Result<f64, RelayError> {
        let raw: Option<String> = self.hget(key, field).await?;
        Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0.0))
    }

    pub async fn get_f64(&self, key: &str) -> Result<f64, RelayError> {
        let raw = self.get_string(key).await?;
        Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0.0))
    }

    pub async fn hgetall_f64(&self, key: &str) -> Result<Vec<(String, f64)>, RelayError> {
        let mut conn = self.conn.clone();
        let map: std::collections::HashMap<String, String> = conn.hgetall(key).await?;
        Ok(map
            .into_iter()
            .filter_map(|(k, v)| v.parse::<f64>().ok().map(|v| (k, v)))
            .collect())
    }

    pub async fn llen(&self, key: &str) -> Result<i64, RelayError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }

    pub async fn rpush(&self, key: &str, member: &str) -> Result<(), RelayError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(key, member).await?;
        Ok(())
    }

    pub async fn lrem(&self, key: &str, member: &str) -> Result<(), RelayError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lrem(key, 0, member).await?;
        Ok(())
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), RelayError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, message).await?;
        Ok(())
    }

    /// Atomic increment-with-expiry for fixed-window counters (§4.4). Plain
    /// `INCR` is already atomic; the conditional `EXPIRE` only needs to run
    /// once per window and a benign race between replicas on the very first
    /// increment is acceptable — the same trade-off the counter's own fixed
    /// window already makes at window boundaries.
    pub async fn incr_with_expiry(&self, key: &str, ttl_secs: i64) -> Result<i64, RelayError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1).await?;
        if count == 1 {
            let _: bool = conn.expire(key, ttl_secs).await?;
        }
        Ok(count)
    }

    pub async fn raw_hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, RelayError> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(key, field, delta).await?)
    }

    /// Push a value onto a list and trim it to the most recent `cap` entries
    /// (used for the bounded queue-wait sample window feeding the P90 probe).
    pub async fn raw_list_push_capped(
        &self,
        key: &str,
        value: &str,
        cap: usize,
    ) -> Result<(), RelayError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(key, value).await?;
        let _: () = conn.ltrim(key, -(cap as isize), -1).await?;
        Ok(())
    }

    pub async fn raw_list_all(&self, key: &str) -> Result<Vec<String>, RelayError> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, 0, -1).await?)
    }

    pub fn raw(&self) -> ConnectionManager {
        self.conn.clone()
    }
}
