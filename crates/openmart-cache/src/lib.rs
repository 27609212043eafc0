//! Cache-coherence and concurrency-control tier for the OpenMart backend.
//!
//! ## Architecture
//!
//! - [`CacheStore`]: fail-soft key-value cache over a pooled Redis
//!   connection (or an in-process map for single-instance/dev runs)
//! - [`keys`]: deterministic key namespace shared by readers and the
//!   invalidation path
//! - [`InvalidationCoordinator`]: computes and executes the set of keys a
//!   committed entity mutation makes stale
//! - [`InventoryLock`]: lease-based distributed mutex per product
//! - [`RateLimiter`]: fixed-window request counter per identity+endpoint
//! - [`NotificationHub`]: owned pub/sub registry for cross-instance events
//!
//! ## Failure model
//!
//! Every cache-tier failure (connection, timeout, codec) is caught inside
//! [`CacheStore`], logged at `warn`, and surfaced as a miss/false/zero
//! result. The authoritative data path never blocks on the cache and never
//! fails because of it; staleness is bounded by each entry's TTL.

pub mod config;
pub mod invalidation;
pub mod keys;
pub mod lock;
pub mod notify;
pub mod rate_limit;
pub mod store;

pub use config::{
    CacheSettings, InvalidationConfig, LockConfig, RateLimitConfig, RedisConfig, TtlConfig,
};
pub use invalidation::{EntityChange, InvalidationCoordinator};
pub use lock::{InventoryLock, LockToken};
pub use notify::NotificationHub;
pub use rate_limit::RateLimiter;
pub use store::CacheStore;

/// Create a cache store based on configuration.
///
/// With Redis disabled this returns the in-process variant. With Redis
/// enabled it builds the connection pool, verifies it with a test
/// checkout, and falls back to the in-process variant with a warning if
/// the server is unreachable — the cache tier degrading must never stop
/// the application from starting.
pub async fn connect(config: &RedisConfig) -> CacheStore {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-process cache");
        return CacheStore::new_memory();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(config.connection_url());
    let mut pool_config = redis_config.pool.unwrap_or_default();
    pool_config.max_size = config.pool_size;
    // Exhausted pools block and wait (bounded) instead of failing, so lock
    // and rate-limit traffic stays available under load spikes.
    pool_config.timeouts.wait = Some(config.wait_timeout());
    pool_config.timeouts.create = Some(config.op_timeout());
    pool_config.timeouts.recycle = Some(config.op_timeout());
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Redis pool, falling back to in-process cache");
            return CacheStore::new_memory();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            CacheStore::new_redis(pool, config.op_timeout())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to connect to Redis, falling back to in-process cache");
            CacheStore::new_memory()
        }
    }
}
