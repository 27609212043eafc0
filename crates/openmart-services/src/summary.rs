//! Admin summary aggregates over completed orders.
//!
//! These are thin computations over order lines, cached at the summary TTL
//! and invalidated whenever an order reaches `Completed` (the only
//! transition that changes them).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use openmart_cache::{CacheStore, keys};
use openmart_core::{CoreError, OrderStatus, ProductId, ProductStats, Result};
use openmart_storage::{OrderItemStore, OrderStore, ProductStore};

pub struct AdminSummary {
    orders: Arc<dyn OrderStore>,
    items: Arc<dyn OrderItemStore>,
    products: Arc<dyn ProductStore>,
    cache: CacheStore,
    summary_ttl: Duration,
}

impl AdminSummary {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        items: Arc<dyn OrderItemStore>,
        products: Arc<dyn ProductStore>,
        cache: CacheStore,
        summary_ttl: Duration,
    ) -> Self {
        Self {
            orders,
            items,
            products,
            cache,
            summary_ttl,
        }
    }

    pub async fn most_profitable_product(&self) -> Result<Option<ProductStats>> {
        if let Some(stats) = self
            .cache
            .get::<Option<ProductStats>>(keys::summary::MOST_PROFITABLE)
            .await
        {
            return Ok(stats);
        }

        let mut stats = self.completed_stats().await?;
        stats.sort_by(|a, b| {
            b.total_profit
                .partial_cmp(&a.total_profit)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top = stats.into_iter().next();

        self.cache
            .set(keys::summary::MOST_PROFITABLE, &top, self.summary_ttl)
            .await;
        Ok(top)
    }

    pub async fn total_units_sold(&self) -> Result<i64> {
        if let Some(total) = self.cache.get::<i64>(keys::summary::TOTAL_SOLD).await {
            return Ok(total);
        }

        let total: i64 = self
            .completed_stats()
            .await?
            .iter()
            .map(|s| s.total_quantity)
            .sum();

        self.cache
            .set(keys::summary::TOTAL_SOLD, &total, self.summary_ttl)
            .await;
        Ok(total)
    }

    pub async fn top_popular(&self, count: u32) -> Result<Vec<ProductStats>> {
        let key = keys::summary::top_popular(count);
        if let Some(stats) = self.cache.get_list::<ProductStats>(&key).await {
            return Ok(stats);
        }

        let mut stats = self.completed_stats().await?;
        stats.sort_by(|a, b| b.total_quantity.cmp(&a.total_quantity));
        stats.truncate(count as usize);

        self.cache.set(&key, &stats, self.summary_ttl).await;
        Ok(stats)
    }

    /// Per-product totals across the lines of completed orders. Profit is
    /// computed from the price snapshots taken at purchase time, so later
    /// catalog edits never rewrite history.
    async fn completed_stats(&self) -> Result<Vec<ProductStats>> {
        let orders = self.orders.find_all().await.map_err(CoreError::from)?;
        let completed: std::collections::HashSet<_> = orders
            .iter()
            .filter(|o| o.status == OrderStatus::Completed)
            .map(|o| o.id)
            .collect();

        let mut by_product: HashMap<ProductId, (i64, f64)> = HashMap::new();
        for item in self.items.find_all().await.map_err(CoreError::from)? {
            if !completed.contains(&item.order_id) {
                continue;
            }
            let entry = by_product.entry(item.product_id).or_insert((0, 0.0));
            entry.0 += item.quantity as i64;
            entry.1 += (item.retail_price_snapshot - item.wholesale_price_snapshot)
                * item.quantity as f64;
        }

        let mut stats = Vec::with_capacity(by_product.len());
        for (product_id, (total_quantity, total_profit)) in by_product {
            let product_name = self
                .products
                .find_by_id(product_id)
                .await
                .map_err(CoreError::from)?
                .map(|p| p.name)
                .unwrap_or_default();
            stats.push(ProductStats {
                product_id,
                product_name,
                total_quantity,
                total_profit,
            });
        }
        Ok(stats)
    }
}
