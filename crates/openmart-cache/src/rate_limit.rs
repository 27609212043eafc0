//! Fixed-window rate limiting on top of the cache store's atomic counter.
//!
//! Counting is approximate-fixed-window, not a sliding log: the first
//! increment in a window creates the key and stamps its TTL, and the key
//! vanishing `window` seconds later resets the count to zero. Two racing
//! first-requests both setting the TTL is harmless — the increment itself
//! is atomic, and a redundant `expire` just resets the same lifetime.

use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::keys;
use crate::store::CacheStore;

#[derive(Clone)]
pub struct RateLimiter {
    cache: CacheStore,
    defaults: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: CacheStore, defaults: RateLimitConfig) -> Self {
        Self { cache, defaults }
    }

    /// Count one request against `identity` on `endpoint`; `false` means
    /// the quota for the current window is exhausted.
    ///
    /// Fails open: when the cache tier is down the counter reads as zero
    /// and every request is admitted — a broken cache must bound nothing.
    pub async fn allow(
        &self,
        identity: &str,
        endpoint: &str,
        limit: i64,
        window: Duration,
    ) -> bool {
        if identity.is_empty() {
            return true;
        }

        let key = keys::activity::rate_limit(identity, endpoint);
        let count = self.cache.increment(&key).await;

        // First hit in a window stamps the TTL, fixing the window start.
        if count == 1 {
            self.cache.expire(&key, window).await;
        }

        if count > limit {
            tracing::warn!(identity, endpoint, count, limit, "rate limit exceeded");
            return false;
        }
        true
    }

    /// [`allow`](Self::allow) with the configured default quota.
    pub async fn allow_default(&self, identity: &str, endpoint: &str) -> bool {
        self.allow(
            identity,
            endpoint,
            self.defaults.default_limit,
            Duration::from_secs(self.defaults.window_secs),
        )
        .await
    }

    /// Requests counted so far in the current window.
    pub async fn current_count(&self, identity: &str, endpoint: &str) -> i64 {
        if identity.is_empty() {
            return 0;
        }
        self.cache
            .get(&keys::activity::rate_limit(identity, endpoint))
            .await
            .unwrap_or(0)
    }

    /// Drop the window so the next request starts a fresh one.
    pub async fn reset(&self, identity: &str, endpoint: &str) {
        if identity.is_empty() {
            return;
        }
        self.cache
            .delete(&keys::activity::rate_limit(identity, endpoint))
            .await;
        tracing::debug!(identity, endpoint, "rate limit window reset");
    }
}
