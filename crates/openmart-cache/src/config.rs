//! Configuration surface of the cache tier.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use openmart_core::CoreError;

/// Everything the cache tier reads from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
}

impl CacheSettings {
    /// Load settings from an optional TOML file plus environment
    /// overrides. The prefix joins with a single underscore and nested
    /// fields with a double one, e.g. `OPENMART_REDIS__URL`.
    pub fn load(path: Option<&str>) -> Result<Self, CoreError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix("OPENMART")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| CoreError::configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CoreError::configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.redis.enabled && self.redis.url.is_empty() {
            return Err(CoreError::configuration("redis.url must not be empty"));
        }
        if self.redis.pool_size == 0 {
            return Err(CoreError::configuration("redis.pool_size must be > 0"));
        }
        if self.redis.timeout_ms == 0 {
            return Err(CoreError::configuration("redis.timeout_ms must be > 0"));
        }
        if self.lock.lease_secs == 0 {
            return Err(CoreError::configuration("lock.lease_secs must be > 0"));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(CoreError::configuration("rate_limit.window_secs must be > 0"));
        }
        if self.invalidation.page_size == 0 {
            return Err(CoreError::configuration("invalidation.page_size must be > 0"));
        }
        Ok(())
    }
}

/// Redis connection and pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis. Disabled deployments run on the in-process cache.
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Connection URL, e.g. "redis://localhost:6379".
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Optional AUTH password, injected into the connection URL.
    #[serde(default)]
    pub password: Option<String>,

    /// Connection pool size. Checkout blocks (bounded by
    /// `wait_timeout_ms`) rather than failing when the pool is exhausted.
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Per-operation timeout in milliseconds.
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum wait for a pooled connection in milliseconds.
    #[serde(default = "default_redis_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    50
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

fn default_redis_wait_timeout_ms() -> u64 {
    3000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            password: None,
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            wait_timeout_ms: default_redis_wait_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// Connection URL with the password spliced in when configured.
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                match self.url.split_once("://") {
                    Some((scheme, rest)) => format!("{scheme}://:{password}@{rest}"),
                    None => self.url.clone(),
                }
            }
            _ => self.url.clone(),
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Time-to-live per cached entity kind, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    #[serde(default = "default_ttl_default")]
    pub default_secs: u64,
    #[serde(default = "default_ttl_products")]
    pub products_secs: u64,
    #[serde(default = "default_ttl_orders")]
    pub orders_secs: u64,
    #[serde(default = "default_ttl_users")]
    pub users_secs: u64,
    #[serde(default = "default_ttl_summary")]
    pub summary_secs: u64,
    #[serde(default = "default_ttl_watchlist")]
    pub watchlist_secs: u64,
}

fn default_ttl_default() -> u64 {
    300
}

fn default_ttl_products() -> u64 {
    600
}

fn default_ttl_orders() -> u64 {
    60
}

fn default_ttl_users() -> u64 {
    300
}

fn default_ttl_summary() -> u64 {
    60
}

fn default_ttl_watchlist() -> u64 {
    120
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            default_secs: default_ttl_default(),
            products_secs: default_ttl_products(),
            orders_secs: default_ttl_orders(),
            users_secs: default_ttl_users(),
            summary_secs: default_ttl_summary(),
            watchlist_secs: default_ttl_watchlist(),
        }
    }
}

impl TtlConfig {
    pub fn products(&self) -> Duration {
        Duration::from_secs(self.products_secs)
    }

    pub fn orders(&self) -> Duration {
        Duration::from_secs(self.orders_secs)
    }

    pub fn users(&self) -> Duration {
        Duration::from_secs(self.users_secs)
    }

    pub fn summary(&self) -> Duration {
        Duration::from_secs(self.summary_secs)
    }

    pub fn watchlist(&self) -> Duration {
        Duration::from_secs(self.watchlist_secs)
    }
}

/// Inventory lock lease configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease duration in seconds. The lock always expires, even if the
    /// holder crashes; a short lease trades a narrow double-grant window
    /// for guaranteed liveness.
    #[serde(default = "default_lock_lease_secs")]
    pub lease_secs: u64,
}

fn default_lock_lease_secs() -> u64 {
    30
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lock_lease_secs(),
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

/// Default quota for the fixed-window rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub default_limit: i64,
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

fn default_rate_limit() -> i64 {
    60
}

fn default_rate_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: default_rate_limit(),
            window_secs: default_rate_window_secs(),
        }
    }
}

/// Bounds of the paginated-view invalidation fan-out.
///
/// Page membership is not tracked; writes over-invalidate the first
/// `page_fanout` pages of the default page size instead. Deployments with
/// deeper hot pagination can raise the fan-out at the cost of more keys
/// deleted per write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    #[serde(default = "default_page_fanout")]
    pub page_fanout: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// `n` of the cached `topPopular:{n}` aggregate view.
    #[serde(default = "default_top_popular_count")]
    pub top_popular_count: u32,
}

fn default_page_fanout() -> u32 {
    3
}

fn default_page_size() -> u32 {
    5
}

fn default_top_popular_count() -> u32 {
    3
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            page_fanout: default_page_fanout(),
            page_size: default_page_size(),
            top_popular_count: default_top_popular_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        CacheSettings::default().validate().unwrap();
    }

    #[test]
    fn password_is_spliced_into_url() {
        let config = RedisConfig {
            password: Some("hunter2".into()),
            ..RedisConfig::default()
        };
        assert_eq!(config.connection_url(), "redis://:hunter2@localhost:6379");

        let bare = RedisConfig::default();
        assert_eq!(bare.connection_url(), "redis://localhost:6379");
    }

    #[test]
    fn environment_variables_override_defaults() {
        unsafe { std::env::set_var("OPENMART_REDIS__URL", "redis://cache.internal:6380") };
        let settings = CacheSettings::load(None).unwrap();
        assert_eq!(settings.redis.url, "redis://cache.internal:6380");
        unsafe { std::env::remove_var("OPENMART_REDIS__URL") };
    }

    #[test]
    fn zero_lease_is_rejected() {
        let mut settings = CacheSettings::default();
        settings.lock.lease_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn enabled_redis_requires_url() {
        let mut settings = CacheSettings::default();
        settings.redis.enabled = true;
        settings.redis.url = String::new();
        assert!(settings.validate().is_err());
    }
}
