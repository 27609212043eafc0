//! Post-write cache invalidation.
//!
//! For each committed entity mutation the coordinator computes the set of
//! keys that could hold a stale view of the entity and deletes them in one
//! batch. The set is computed fresh per write and never persisted.
//!
//! Paginated views are handled by convention: the first `page_fanout`
//! pages of the default page size are dropped without tracking which page
//! actually contains the changed row. That deliberately over-invalidates —
//! correctness only requires deleting at least the stale keys, never
//! exactly them.
//!
//! Invalidation runs after the authoritative write committed, and its own
//! failure is swallowed and logged: a missed deletion risks a TTL-bounded
//! staleness window, never corrupt durable state, so the write is still
//! reported successful to the caller.

use openmart_core::{OrderId, ProductId, UserId};

use crate::config::InvalidationConfig;
use crate::keys;
use crate::store::CacheStore;

/// A committed mutation, described with just enough detail to derive its
/// invalidation fan-out.
#[derive(Debug, Clone)]
pub enum EntityChange {
    ProductCreated {
        product_id: ProductId,
    },
    ProductUpdated {
        product_id: ProductId,
        stock_changed: bool,
    },
    OrderPlaced {
        user_id: UserId,
        product_ids: Vec<ProductId>,
    },
    OrderCompleted {
        order_id: OrderId,
        user_id: UserId,
    },
    OrderCanceled {
        order_id: OrderId,
        user_id: UserId,
        product_ids: Vec<ProductId>,
    },
    UserUpdated {
        user_id: UserId,
        usernames: Vec<String>,
        emails: Vec<String>,
    },
    WatchlistChanged {
        user_id: UserId,
    },
}

#[derive(Clone)]
pub struct InvalidationCoordinator {
    cache: CacheStore,
    config: InvalidationConfig,
}

impl InvalidationCoordinator {
    pub fn new(cache: CacheStore, config: InvalidationConfig) -> Self {
        Self { cache, config }
    }

    /// Compute the invalidation set for a committed change. Pure given the
    /// coordinator's fan-out configuration.
    pub fn keys_for(&self, change: &EntityChange) -> Vec<String> {
        let mut keys = Vec::new();
        match change {
            EntityChange::ProductCreated { product_id } => {
                keys.push(keys::products::by_id(*product_id));
                keys.push(keys::products::ALL.to_string());
                keys.push(keys::products::IN_STOCK.to_string());
                self.push_product_aggregates(&mut keys);
            }
            EntityChange::ProductUpdated {
                product_id,
                stock_changed,
            } => {
                keys.push(keys::products::by_id(*product_id));
                keys.push(keys::products::ALL.to_string());
                if *stock_changed {
                    keys.push(keys::products::IN_STOCK.to_string());
                }
                // Product names appear in the cached aggregates.
                self.push_product_aggregates(&mut keys);
            }
            EntityChange::OrderPlaced {
                user_id,
                product_ids,
            } => {
                self.push_order_collections(&mut keys, *user_id);
                self.push_stock_views(&mut keys, product_ids);
            }
            EntityChange::OrderCompleted { order_id, user_id } => {
                keys.push(keys::orders::by_id(*order_id));
                self.push_order_collections(&mut keys, *user_id);
                // A completed order feeds the profit/volume aggregates.
                keys.push(keys::summary::MOST_PROFITABLE.to_string());
                keys.push(keys::summary::TOTAL_SOLD.to_string());
                keys.push(keys::summary::top_popular(self.config.top_popular_count));
            }
            EntityChange::OrderCanceled {
                order_id,
                user_id,
                product_ids,
            } => {
                keys.push(keys::orders::by_id(*order_id));
                self.push_order_collections(&mut keys, *user_id);
                // Cancellation restores stock.
                self.push_stock_views(&mut keys, product_ids);
            }
            EntityChange::UserUpdated {
                user_id,
                usernames,
                emails,
            } => {
                keys.push(keys::users::by_id(*user_id));
                for username in usernames {
                    keys.push(keys::users::by_username(username));
                }
                for email in emails {
                    keys.push(keys::users::by_email(email));
                }
                keys.push(keys::users::ALL.to_string());
            }
            EntityChange::WatchlistChanged { user_id } => {
                keys.push(keys::users::watchlist(*user_id));
            }
        }
        keys
    }

    /// Execute the invalidation for a committed change. Never fails: a
    /// cache-tier error here is logged and absorbed so the caller still
    /// reports the successful write.
    pub async fn invalidate(&self, change: &EntityChange) {
        let keys = self.keys_for(change);
        let dropped = self.cache.delete_many(&keys).await;
        tracing::debug!(
            change = ?change,
            computed = keys.len(),
            dropped = dropped,
            "cache invalidation"
        );
    }

    fn push_order_collections(&self, keys: &mut Vec<String>, user_id: UserId) {
        keys.push(keys::orders::ALL.to_string());
        keys.push(keys::orders::by_user(user_id));
        keys.push(keys::activity::frequent_purchases(
            user_id,
            self.config.top_popular_count,
        ));
        keys.push(keys::activity::recent_purchases(
            user_id,
            self.config.top_popular_count,
        ));
        for page in 1..=self.config.page_fanout {
            keys.push(keys::orders::page(page, self.config.page_size));
        }
    }

    fn push_stock_views(&self, keys: &mut Vec<String>, product_ids: &[ProductId]) {
        for product_id in product_ids {
            keys.push(keys::products::by_id(*product_id));
        }
        keys.push(keys::products::IN_STOCK.to_string());
    }

    fn push_product_aggregates(&self, keys: &mut Vec<String>) {
        keys.push(keys::summary::MOST_PROFITABLE.to_string());
        keys.push(keys::summary::top_popular(self.config.top_popular_count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn coordinator() -> InvalidationCoordinator {
        InvalidationCoordinator::new(CacheStore::new_memory(), InvalidationConfig::default())
    }

    #[test]
    fn order_completion_fans_out_to_aggregates() {
        let keys = coordinator().keys_for(&EntityChange::OrderCompleted {
            order_id: 9,
            user_id: 2,
        });
        assert!(keys.contains(&"orders:id:9".to_string()));
        assert!(keys.contains(&"orders:all".to_string()));
        assert!(keys.contains(&"orders:user:2".to_string()));
        assert!(keys.contains(&"summary:mostProfit".to_string()));
        assert!(keys.contains(&"summary:totalSold".to_string()));
        assert!(keys.contains(&"summary:topPopular:3".to_string()));
        // Default fan-out drops the first three pages of size five.
        for page in 1..=3 {
            assert!(keys.contains(&format!("orders:page:{page}:size:5")));
        }
        assert!(!keys.contains(&"orders:page:4:size:5".to_string()));
    }

    #[test]
    fn page_fanout_is_configurable() {
        let config = InvalidationConfig {
            page_fanout: 5,
            page_size: 10,
            top_popular_count: 3,
        };
        let coordinator = InvalidationCoordinator::new(CacheStore::new_memory(), config);
        let keys = coordinator.keys_for(&EntityChange::OrderPlaced {
            user_id: 1,
            product_ids: vec![],
        });
        for page in 1..=5 {
            assert!(keys.contains(&format!("orders:page:{page}:size:10")));
        }
    }

    #[test]
    fn stock_mutations_drop_product_views() {
        let keys = coordinator().keys_for(&EntityChange::OrderPlaced {
            user_id: 1,
            product_ids: vec![7, 9],
        });
        assert!(keys.contains(&"products:id:7".to_string()));
        assert!(keys.contains(&"products:id:9".to_string()));
        assert!(keys.contains(&"products:instock".to_string()));
    }

    #[test]
    fn product_update_without_stock_change_keeps_instock_view() {
        let keys = coordinator().keys_for(&EntityChange::ProductUpdated {
            product_id: 7,
            stock_changed: false,
        });
        assert!(keys.contains(&"products:id:7".to_string()));
        assert!(keys.contains(&"products:all".to_string()));
        assert!(!keys.contains(&"products:instock".to_string()));
        // Renames still reach the name-bearing aggregates.
        assert!(keys.contains(&"summary:mostProfit".to_string()));
    }

    #[test]
    fn user_update_drops_old_and_new_lookup_keys() {
        let keys = coordinator().keys_for(&EntityChange::UserUpdated {
            user_id: 3,
            usernames: vec!["old".into(), "new".into()],
            emails: vec!["old@example.com".into()],
        });
        assert!(keys.contains(&"users:id:3".to_string()));
        assert!(keys.contains(&"users:username:old".to_string()));
        assert!(keys.contains(&"users:username:new".to_string()));
        assert!(keys.contains(&"users:email:old@example.com".to_string()));
        assert!(keys.contains(&"users:all".to_string()));
    }

    #[tokio::test]
    async fn invalidate_drops_cached_entries() {
        let cache = CacheStore::new_memory();
        let coordinator =
            InvalidationCoordinator::new(cache.clone(), InvalidationConfig::default());

        cache.set("products:id:7", &"v1", Duration::from_secs(600)).await;
        cache.set("products:all", &"v1", Duration::from_secs(600)).await;

        coordinator
            .invalidate(&EntityChange::ProductUpdated {
                product_id: 7,
                stock_changed: true,
            })
            .await;

        assert_eq!(cache.get::<String>("products:id:7").await, None);
        assert_eq!(cache.get::<String>("products:all").await, None);
    }
}
