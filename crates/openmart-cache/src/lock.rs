//! Lease-based distributed inventory lock.
//!
//! One lock per product id, stored at `inventory:lock:{id}`. Acquisition is
//! a single atomic create-if-absent round trip; the stored value is an
//! opaque fencing token proving which acquire call currently owns the
//! lease, so a holder whose lease already expired cannot release a newer
//! holder's lock.
//!
//! This is a lease, not a true mutex: the key always expires, so a crashed
//! holder cannot block a product forever. The price is a narrow
//! double-grant window around lease expiry — callers pair the lock with
//! the storage layer's conditional stock update as the second line of
//! defense against oversell. Release is read-then-conditional-delete; the
//! race where the lease expires between those two steps is bounded and
//! self-healing for the same reason.

use std::time::Duration;

use openmart_core::ProductId;

use crate::config::LockConfig;
use crate::keys;
use crate::store::CacheStore;

/// Opaque proof of lock ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub struct InventoryLock {
    cache: CacheStore,
    lease: Duration,
}

impl InventoryLock {
    pub fn new(cache: CacheStore, config: &LockConfig) -> Self {
        Self {
            cache,
            lease: config.lease(),
        }
    }

    /// Try to take the lock. Returns the fencing token on success and
    /// `None` while another holder is live — contention is a normal
    /// result, not an error. A cache-tier failure also reports `None`
    /// (not acquired), so a broken cache never double-grants.
    pub async fn acquire(&self, product_id: ProductId) -> Option<LockToken> {
        let key = keys::inventory::lock(product_id);
        let token = LockToken::generate();
        if self.cache.set_if_absent(&key, &token.0, self.lease).await {
            tracing::debug!(product_id, token = %token.0, "inventory lock acquired");
            Some(token)
        } else {
            tracing::debug!(product_id, "inventory lock busy");
            None
        }
    }

    /// Release the lock if `token` still owns it. A mismatched or stale
    /// token is a no-op so it can never release another holder's lock.
    pub async fn release(&self, product_id: ProductId, token: &LockToken) -> bool {
        let key = keys::inventory::lock(product_id);
        match self.cache.get::<String>(&key).await {
            Some(current) if current == token.0 => {
                let released = self.cache.delete(&key).await;
                tracing::debug!(product_id, "inventory lock released");
                released
            }
            Some(_) => {
                tracing::warn!(product_id, "inventory lock release refused: token mismatch");
                false
            }
            None => false,
        }
    }

    /// Extend the lease, fenced by the same token check as release.
    pub async fn extend(&self, product_id: ProductId, token: &LockToken, extra: Duration) -> bool {
        let key = keys::inventory::lock(product_id);
        match self.cache.get::<String>(&key).await {
            Some(current) if current == token.0 => {
                let extended = self.cache.expire(&key, extra).await;
                tracing::debug!(product_id, extra_secs = extra.as_secs(), "inventory lock extended");
                extended
            }
            _ => false,
        }
    }

    /// Administrative override that bypasses the token check.
    pub async fn force_release(&self, product_id: ProductId) -> bool {
        let key = keys::inventory::lock(product_id);
        let released = self.cache.delete(&key).await;
        if released {
            tracing::warn!(product_id, "inventory lock force-released");
        }
        released
    }

    pub async fn is_locked(&self, product_id: ProductId) -> bool {
        self.cache.exists(&keys::inventory::lock(product_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock() -> InventoryLock {
        InventoryLock::new(CacheStore::new_memory(), &LockConfig::default())
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let lock = lock();
        let token = lock.acquire(7).await.expect("first acquire");
        assert!(lock.acquire(7).await.is_none());
        assert!(lock.is_locked(7).await);
        assert!(lock.release(7, &token).await);
        assert!(!lock.is_locked(7).await);
    }

    #[tokio::test]
    async fn release_then_acquire_succeeds_immediately() {
        let lock = lock();
        let token = lock.acquire(7).await.unwrap();
        assert!(lock.release(7, &token).await);
        assert!(lock.acquire(7).await.is_some());
    }

    #[tokio::test]
    async fn wrong_token_cannot_release() {
        let lock = lock();
        let _held = lock.acquire(7).await.unwrap();
        let stale = LockToken::generate();
        assert!(!lock.release(7, &stale).await);
        // The real holder is untouched.
        assert!(lock.is_locked(7).await);
    }

    #[tokio::test]
    async fn releasing_an_unheld_lock_is_a_noop() {
        let lock = lock();
        let token = LockToken::generate();
        assert!(!lock.release(7, &token).await);
    }

    #[tokio::test]
    async fn extend_is_fenced() {
        let lock = lock();
        let token = lock.acquire(7).await.unwrap();
        assert!(lock.extend(7, &token, Duration::from_secs(60)).await);
        let stale = LockToken::generate();
        assert!(!lock.extend(7, &stale, Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn force_release_bypasses_fencing() {
        let lock = lock();
        let _held = lock.acquire(7).await.unwrap();
        assert!(lock.force_release(7).await);
        assert!(lock.acquire(7).await.is_some());
    }

    #[tokio::test]
    async fn locks_are_per_product() {
        let lock = lock();
        let _a = lock.acquire(1).await.unwrap();
        assert!(lock.acquire(2).await.is_some());
    }

    #[tokio::test]
    async fn concurrent_acquire_has_exactly_one_winner() {
        let lock = std::sync::Arc::new(lock());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let lock = lock.clone();
            handles.push(tokio::spawn(async move { lock.acquire(7).await }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
