//! Fail-soft key-value cache store.
//!
//! Two variants behind one API, in the spirit of a two-mode backend:
//!
//! - **Memory**: single-instance mode over a `DashMap`, lazy TTL expiry
//! - **Redis**: multi-instance mode over a `deadpool-redis` pool
//!
//! Every operation is safe to call from unbounded concurrent tasks, and no
//! operation ever returns an error to the caller: transport, pool and codec
//! failures are logged at `warn` and degrade to the miss value (`None`,
//! `false`, `0`). Each Redis round trip is bounded by the configured
//! per-operation timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A cached entry in the in-process variant.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// Shared cache store; cheap to clone.
#[derive(Clone)]
pub enum CacheStore {
    /// Single-instance: in-process map only.
    Memory(Arc<DashMap<String, CacheEntry>>),

    /// Multi-instance: pooled Redis connections.
    Redis { pool: Pool, op_timeout: Duration },
}

/// Await a Redis command with a bounded timeout, degrading to `None`.
async fn bounded<T>(
    op: &str,
    key: &str,
    timeout: Duration,
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Option<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(key = %key, op = %op, error = %e, "Redis command failed");
            None
        }
        Err(_) => {
            tracing::warn!(key = %key, op = %op, timeout_ms = timeout.as_millis() as u64, "Redis command timed out");
            None
        }
    }
}

impl CacheStore {
    pub fn new_memory() -> Self {
        CacheStore::Memory(Arc::new(DashMap::new()))
    }

    pub fn new_redis(pool: Pool, op_timeout: Duration) -> Self {
        CacheStore::Redis { pool, op_timeout }
    }

    async fn checkout(pool: &Pool) -> Option<deadpool_redis::Connection> {
        match pool.get().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get Redis connection from pool");
                None
            }
        }
    }

    fn encode<T: Serialize>(key: &str, value: &T) -> Option<Vec<u8>> {
        match serde_json::to_vec(value) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize value for cache");
                None
            }
        }
    }

    fn decode<T: DeserializeOwned>(key: &str, data: &[u8]) -> Option<T> {
        match serde_json::from_slice(data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to deserialize cached value");
                None
            }
        }
    }

    /// Store a serialized snapshot with an expiration.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let Some(data) = Self::encode(key, value) else {
            return false;
        };
        match self {
            CacheStore::Memory(map) => {
                map.insert(key.to_string(), CacheEntry::new(data, Some(ttl)));
                true
            }
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return false;
                };
                bounded(
                    "SET",
                    key,
                    *op_timeout,
                    conn.set_ex::<_, _, ()>(key, data, ttl.as_secs()),
                )
                .await
                .is_some()
            }
        }
    }

    /// Atomic create-if-absent with expiration, in a single round trip
    /// (`SET key value NX EX ttl`). This is the lock-acquire primitive.
    pub async fn set_if_absent<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let Some(data) = Self::encode(key, value) else {
            return false;
        };
        match self {
            CacheStore::Memory(map) => match map.entry(key.to_string()) {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().is_expired() {
                        occupied.insert(CacheEntry::new(data, Some(ttl)));
                        true
                    } else {
                        false
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(CacheEntry::new(data, Some(ttl)));
                    true
                }
            },
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return false;
                };
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(data).arg("NX").arg("EX").arg(ttl.as_secs());
                let fut = cmd.query_async::<Option<String>>(&mut conn);
                matches!(bounded("SET NX", key, *op_timeout, fut).await, Some(Some(_)))
            }
        }
    }

    /// Fetch and deserialize a snapshot. `None` on miss, on codec failure
    /// (the entry is dropped so the next read repopulates) and on
    /// transport failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self {
            CacheStore::Memory(map) => {
                let data = {
                    let entry = map.get(key)?;
                    if entry.is_expired() {
                        drop(entry);
                        map.remove(key);
                        return None;
                    }
                    entry.data.clone()
                };
                let decoded = Self::decode(key, &data);
                if decoded.is_none() {
                    map.remove(key);
                }
                decoded
            }
            CacheStore::Redis { pool, op_timeout } => {
                let mut conn = Self::checkout(pool).await?;
                let data = bounded(
                    "GET",
                    key,
                    *op_timeout,
                    conn.get::<_, Option<Vec<u8>>>(key),
                )
                .await??;
                let decoded = Self::decode(key, &data);
                if decoded.is_none() {
                    // Drop the poisoned entry so a later read repopulates.
                    let _ = bounded("DEL", key, *op_timeout, conn.del::<_, i64>(key)).await;
                }
                decoded
            }
        }
    }

    /// Same contract as [`get`](Self::get) for collection-shaped entries.
    pub async fn get_list<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
        self.get(key).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self {
            CacheStore::Memory(map) => map.get(key).is_some_and(|entry| !entry.is_expired()),
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return false;
                };
                bounded("EXISTS", key, *op_timeout, conn.exists::<_, bool>(key))
                    .await
                    .unwrap_or(false)
            }
        }
    }

    /// Idempotent delete; removing an absent key is a no-op, not an error.
    pub async fn delete(&self, key: &str) -> bool {
        match self {
            CacheStore::Memory(map) => map.remove(key).is_some(),
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return false;
                };
                bounded("DEL", key, *op_timeout, conn.del::<_, i64>(key))
                    .await
                    .is_some_and(|n| n > 0)
            }
        }
    }

    /// Delete a batch of keys in one round trip; returns how many existed.
    pub async fn delete_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        match self {
            CacheStore::Memory(map) => keys
                .iter()
                .filter(|key| map.remove(key.as_str()).is_some())
                .count() as u64,
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return 0;
                };
                bounded(
                    "DEL",
                    &keys[0],
                    *op_timeout,
                    conn.del::<_, u64>(keys.to_vec()),
                )
                .await
                .unwrap_or(0)
            }
        }
    }

    /// Reset a key's remaining lifetime; used to extend lock leases.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        match self {
            CacheStore::Memory(map) => match map.get_mut(key) {
                Some(mut entry) if !entry.is_expired() => {
                    entry.expires_at = Some(Instant::now() + ttl);
                    true
                }
                _ => false,
            },
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return false;
                };
                bounded(
                    "EXPIRE",
                    key,
                    *op_timeout,
                    conn.expire::<_, bool>(key, ttl.as_secs() as i64),
                )
                .await
                .unwrap_or(false)
            }
        }
    }

    /// Atomic counter increment; creates the key at `amount` when absent.
    /// Returns 0 on cache-tier failure.
    pub async fn increment(&self, key: &str) -> i64 {
        self.increment_by(key, 1).await
    }

    pub async fn increment_by(&self, key: &str, amount: i64) -> i64 {
        match self {
            CacheStore::Memory(map) => {
                let mut entry = map
                    .entry(key.to_string())
                    .or_insert_with(|| CacheEntry::new(b"0".to_vec(), None));
                if entry.is_expired() {
                    *entry = CacheEntry::new(b"0".to_vec(), None);
                }
                let current = std::str::from_utf8(&entry.data)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + amount;
                entry.data = next.to_string().into_bytes();
                next
            }
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return 0;
                };
                bounded("INCRBY", key, *op_timeout, conn.incr::<_, _, i64>(key, amount))
                    .await
                    .unwrap_or(0)
            }
        }
    }

    /// Store one field of a hash entry. Returns true when the field was
    /// newly created.
    pub async fn hash_set<T: Serialize>(&self, key: &str, field: &str, value: &T) -> bool {
        let Some(data) = Self::encode(key, value) else {
            return false;
        };
        match self {
            CacheStore::Memory(map) => map
                .insert(Self::hash_entry_key(key, field), CacheEntry::new(data, None))
                .is_none(),
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return false;
                };
                bounded(
                    "HSET",
                    key,
                    *op_timeout,
                    conn.hset::<_, _, _, i64>(key, field, data),
                )
                .await
                .is_some_and(|created| created == 1)
            }
        }
    }

    pub async fn hash_get<T: DeserializeOwned>(&self, key: &str, field: &str) -> Option<T> {
        match self {
            CacheStore::Memory(map) => {
                let entry = map.get(&Self::hash_entry_key(key, field))?;
                Self::decode(key, &entry.data)
            }
            CacheStore::Redis { pool, op_timeout } => {
                let mut conn = Self::checkout(pool).await?;
                let data = bounded(
                    "HGET",
                    key,
                    *op_timeout,
                    conn.hget::<_, _, Option<Vec<u8>>>(key, field),
                )
                .await??;
                Self::decode(key, &data)
            }
        }
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> bool {
        match self {
            CacheStore::Memory(map) => map.remove(&Self::hash_entry_key(key, field)).is_some(),
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return false;
                };
                bounded(
                    "HDEL",
                    key,
                    *op_timeout,
                    conn.hdel::<_, _, i64>(key, field),
                )
                .await
                .is_some_and(|n| n > 0)
            }
        }
    }

    // Memory variant stores hash fields as flat entries under a
    // separator-joined key; U+001F never appears in namespace keys.
    fn hash_entry_key(key: &str, field: &str) -> String {
        format!("{key}\u{1f}{field}")
    }

    /// Health probe; the in-process variant is always healthy.
    pub async fn ping(&self) -> bool {
        match self {
            CacheStore::Memory(_) => true,
            CacheStore::Redis { pool, op_timeout } => {
                let Some(mut conn) = Self::checkout(pool).await else {
                    return false;
                };
                let cmd = redis::cmd("PING");
                let fut = cmd.query_async::<String>(&mut conn);
                bounded("PING", "-", *op_timeout, fut).await.is_some()
            }
        }
    }

    /// The underlying pool, when running against Redis. Used by the
    /// pub/sub hub for publishing.
    pub fn redis_pool(&self) -> Option<&Pool> {
        match self {
            CacheStore::Memory(_) => None,
            CacheStore::Redis { pool, .. } => Some(pool),
        }
    }
}
