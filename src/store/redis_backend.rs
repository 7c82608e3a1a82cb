//! Redis-backed `VolatileStore`.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, info};

use super::redact_url;
use super::traits::VolatileStore;
use crate::error::StoreError;

/// Store over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: u32 = 200;

/// Escape the `MATCH` glob metacharacters so `prefix` matches literally.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn backend(op: &str, e: redis::RedisError) -> StoreError {
    StoreError::Backend(format!("Redis {op} failed: {e}"))
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        info!(url = %redact_url(redis_url), "Connecting to Redis");

        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Backend(format!("Failed to create Redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to Redis: {e}")))?;

        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl VolatileStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| backend("GET", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        debug!(key, ttl = ?ttl, "Store SET");
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| backend("SETEX", e)),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| backend("SET", e)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<bool>(&mut conn)
            .await
            .map_err(|e| backend("EXPIRE", e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| backend("DEL", e))
    }

    async fn push(&self, list: &str, value: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let (len,): (u64,) = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(list)
            .arg(value)
            .cmd("EXPIRE")
            .arg(list)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("LPUSH", e))?;
        Ok(len)
    }

    async fn pop(&self, list: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("RPOP")
            .arg(list)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| backend("RPOP", e))
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.llen(list).await.map_err(|e| backend("LLEN", e))
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", glob_escape(prefix));
        // SCAN may repeat a key across batches.
        let mut seen = HashSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend("SCAN", e))?;
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(seen.len() as u64)
    }
}
