//! Order workflow: the state machine `Processing -> {Completed, Canceled}`
//! plus the concurrency glue around stock mutations.
//!
//! Stock deduction and restoration are serialized per product with the
//! distributed inventory lock, taken in ascending product-id order so two
//! orders touching overlapping product sets can never deadlock. Each lock
//! is released right after that product's stock row is updated and before
//! invalidation runs. The storage layer's conditional stock update remains
//! the second line of defense: even if a lease expires mid-flight, stock
//! can never go negative.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use openmart_cache::{CacheStore, EntityChange, InvalidationCoordinator, InventoryLock, keys};
use openmart_core::{
    CoreError, Order, OrderId, OrderItem, OrderStatus, Product, ProductId, Result, UserId,
};
use openmart_storage::{NewOrderItem, OrderItemStore, OrderStore, ProductStore, UserStore};

/// How often and how long to retry a busy inventory lock before giving up.
const LOCK_ATTEMPTS: u32 = 3;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct OrderWorkflow {
    orders: Arc<dyn OrderStore>,
    items: Arc<dyn OrderItemStore>,
    products: Arc<dyn ProductStore>,
    users: Arc<dyn UserStore>,
    cache: CacheStore,
    invalidation: InvalidationCoordinator,
    lock: InventoryLock,
    order_ttl: Duration,
}

impl OrderWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        items: Arc<dyn OrderItemStore>,
        products: Arc<dyn ProductStore>,
        users: Arc<dyn UserStore>,
        cache: CacheStore,
        invalidation: InvalidationCoordinator,
        lock: InventoryLock,
        order_ttl: Duration,
    ) -> Self {
        Self {
            orders,
            items,
            products,
            users,
            cache,
            invalidation,
            lock,
            order_ttl,
        }
    }

    /// Place an order. Deducts stock per product under the inventory lock
    /// (ascending id order), then persists the order and its lines, then
    /// invalidates. Any failure after a partial deduction restores the
    /// already-deducted stock before returning, so no order row is ever
    /// saved with stock it did not take.
    pub async fn create_order(
        &self,
        user_id: UserId,
        requested: Vec<NewOrderItem>,
    ) -> Result<Order> {
        self.users
            .find_by_id(user_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("User", user_id))?;

        if requested.is_empty() {
            return Err(CoreError::invalid_entity("order has no items"));
        }

        // Merge duplicate lines; BTreeMap gives the ascending-id lock order.
        let mut quantities: BTreeMap<ProductId, i32> = BTreeMap::new();
        for item in &requested {
            if item.quantity <= 0 {
                return Err(CoreError::invalid_entity("item quantity must be positive"));
            }
            *quantities.entry(item.product_id).or_insert(0) += item.quantity;
        }

        let mut deducted: Vec<(ProductId, i32)> = Vec::with_capacity(quantities.len());
        let mut snapshots: Vec<(ProductId, i32, f64, f64)> = Vec::with_capacity(quantities.len());

        for (&product_id, &quantity) in &quantities {
            match self.deduct_under_lock(product_id, quantity).await {
                Ok((wholesale, retail)) => {
                    deducted.push((product_id, quantity));
                    snapshots.push((product_id, quantity, wholesale, retail));
                }
                Err(err) => {
                    self.restore_deducted(&deducted).await;
                    return Err(err);
                }
            }
        }

        let now = OffsetDateTime::now_utc();
        let order = match self
            .orders
            .save(Order {
                id: 0,
                user_id,
                status: OrderStatus::Processing,
                order_time: now,
                updated_at: now,
            })
            .await
        {
            Ok(order) => order,
            Err(err) => {
                self.restore_deducted(&deducted).await;
                return Err(err.into());
            }
        };

        for (product_id, quantity, wholesale, retail) in snapshots {
            if let Err(err) = self
                .items
                .save(OrderItem {
                    id: 0,
                    order_id: order.id,
                    product_id,
                    quantity,
                    wholesale_price_snapshot: wholesale,
                    retail_price_snapshot: retail,
                })
                .await
            {
                self.restore_deducted(&deducted).await;
                return Err(err.into());
            }
        }

        self.invalidation
            .invalidate(&EntityChange::OrderPlaced {
                user_id,
                product_ids: quantities.keys().copied().collect(),
            })
            .await;

        tracing::info!(order_id = order.id, user_id, "order placed");
        Ok(order)
    }

    /// Cancel an order, restoring the stock it took. Canceling an already
    /// canceled order is a no-op success; a completed order cannot be
    /// canceled. A failure partway through the restore takes back the
    /// stock already restored, so a retried cancel never restocks the
    /// same line twice.
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self.require_order(order_id).await?;
        match order.status {
            OrderStatus::Canceled => return Ok(order),
            OrderStatus::Completed => {
                return Err(CoreError::invalid_transition(
                    OrderStatus::Completed.to_string(),
                    OrderStatus::Canceled.to_string(),
                ));
            }
            OrderStatus::Processing => {}
        }

        let items = self
            .items
            .find_by_order(order_id)
            .await
            .map_err(CoreError::from)?;

        // Ascending product-id order, same discipline as creation.
        let mut quantities: BTreeMap<ProductId, i32> = BTreeMap::new();
        for item in &items {
            *quantities.entry(item.product_id).or_insert(0) += item.quantity;
        }
        let mut restored: Vec<(ProductId, i32)> = Vec::with_capacity(quantities.len());
        for (&product_id, &quantity) in &quantities {
            if let Err(err) = self.restore_under_lock(product_id, quantity).await {
                self.deduct_restored(&restored).await;
                return Err(err);
            }
            restored.push((product_id, quantity));
        }

        let order = match self
            .orders
            .update_status(order_id, OrderStatus::Canceled)
            .await
        {
            Ok(order) => order,
            Err(err) => {
                self.deduct_restored(&restored).await;
                return Err(err.into());
            }
        };

        self.invalidation
            .invalidate(&EntityChange::OrderCanceled {
                order_id,
                user_id: order.user_id,
                product_ids: quantities.keys().copied().collect(),
            })
            .await;

        tracing::info!(order_id, "order canceled");
        Ok(order)
    }

    /// Complete an order. Completing an already completed order returns it
    /// unchanged; a canceled order cannot be completed.
    pub async fn complete_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self.require_order(order_id).await?;
        match order.status {
            OrderStatus::Completed => return Ok(order),
            OrderStatus::Canceled => {
                return Err(CoreError::invalid_transition(
                    OrderStatus::Canceled.to_string(),
                    OrderStatus::Completed.to_string(),
                ));
            }
            OrderStatus::Processing => {}
        }

        let order = self
            .orders
            .update_status(order_id, OrderStatus::Completed)
            .await
            .map_err(CoreError::from)?;

        self.invalidation
            .invalidate(&EntityChange::OrderCompleted {
                order_id,
                user_id: order.user_id,
            })
            .await;

        tracing::info!(order_id, "order completed");
        Ok(order)
    }

    pub async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>> {
        let key = keys::orders::by_id(order_id);
        if let Some(order) = self.cache.get::<Order>(&key).await {
            tracing::debug!(order_id, "cache hit for order");
            return Ok(Some(order));
        }

        let order = self
            .orders
            .find_by_id(order_id)
            .await
            .map_err(CoreError::from)?;
        if let Some(ref order) = order {
            self.cache.set(&key, order, self.order_ttl).await;
        }
        Ok(order)
    }

    pub async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let key = keys::orders::by_user(user_id);
        if let Some(orders) = self.cache.get_list::<Order>(&key).await {
            return Ok(orders);
        }

        let orders = self
            .orders
            .find_by_user(user_id)
            .await
            .map_err(CoreError::from)?;
        self.cache.set(&key, &orders, self.order_ttl).await;
        Ok(orders)
    }

    /// Uncached passthrough for callers that need the authoritative list.
    pub async fn find_all(&self) -> Result<Vec<Order>> {
        self.orders.find_all().await.map_err(CoreError::from)
    }

    pub async fn find_all_cached(&self) -> Result<Vec<Order>> {
        if let Some(orders) = self.cache.get_list::<Order>(keys::orders::ALL).await {
            return Ok(orders);
        }
        let orders = self.orders.find_all().await.map_err(CoreError::from)?;
        self.cache.set(keys::orders::ALL, &orders, self.order_ttl).await;
        Ok(orders)
    }

    /// Paginated view, cached at half the order TTL since pages churn
    /// faster than single rows.
    pub async fn find_page(&self, page: u32, size: u32) -> Result<Vec<Order>> {
        let key = keys::orders::page(page, size);
        if let Some(orders) = self.cache.get_list::<Order>(&key).await {
            return Ok(orders);
        }
        let orders = self
            .orders
            .find_page(page, size)
            .await
            .map_err(CoreError::from)?;
        self.cache.set(&key, &orders, self.order_ttl / 2).await;
        Ok(orders)
    }

    /// The user's most-purchased products, ranked by total quantity
    /// across their non-canceled orders. Cached per (user, limit); writes
    /// invalidate the limit configured for the aggregate views, other
    /// widths age out by TTL like the page views.
    pub async fn frequent_purchases(&self, user_id: UserId, limit: u32) -> Result<Vec<Product>> {
        let key = keys::activity::frequent_purchases(user_id, limit);
        if let Some(products) = self.cache.get_list::<Product>(&key).await {
            return Ok(products);
        }

        let orders = self
            .orders
            .find_by_user(user_id)
            .await
            .map_err(CoreError::from)?;
        let mut counts: HashMap<ProductId, i64> = HashMap::new();
        for order in orders.iter().filter(|o| o.status != OrderStatus::Canceled) {
            for item in self
                .items
                .find_by_order(order.id)
                .await
                .map_err(CoreError::from)?
            {
                *counts.entry(item.product_id).or_insert(0) += i64::from(item.quantity);
            }
        }
        let mut ranked: Vec<(ProductId, i64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit as usize);

        let mut products = Vec::with_capacity(ranked.len());
        for (product_id, _) in ranked {
            if let Some(product) = self
                .products
                .find_by_id(product_id)
                .await
                .map_err(CoreError::from)?
            {
                products.push(product);
            }
        }
        self.cache.set(&key, &products, self.order_ttl).await;
        Ok(products)
    }

    /// Distinct products from the user's most recent non-canceled orders,
    /// newest order first.
    pub async fn recent_purchases(&self, user_id: UserId, limit: u32) -> Result<Vec<Product>> {
        let key = keys::activity::recent_purchases(user_id, limit);
        if let Some(products) = self.cache.get_list::<Product>(&key).await {
            return Ok(products);
        }

        let mut orders = self
            .orders
            .find_by_user(user_id)
            .await
            .map_err(CoreError::from)?;
        orders.retain(|o| o.status != OrderStatus::Canceled);
        orders.sort_by(|a, b| b.order_time.cmp(&a.order_time).then(b.id.cmp(&a.id)));

        let mut seen = std::collections::HashSet::new();
        let mut products: Vec<Product> = Vec::new();
        'orders: for order in &orders {
            for item in self
                .items
                .find_by_order(order.id)
                .await
                .map_err(CoreError::from)?
            {
                if !seen.insert(item.product_id) {
                    continue;
                }
                if let Some(product) = self
                    .products
                    .find_by_id(item.product_id)
                    .await
                    .map_err(CoreError::from)?
                {
                    products.push(product);
                }
                if products.len() as u32 >= limit {
                    break 'orders;
                }
            }
        }
        self.cache.set(&key, &products, self.order_ttl).await;
        Ok(products)
    }

    async fn require_order(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .find_by_id(order_id)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::not_found("Order", order_id))
    }

    /// Deduct stock for one product under its lock, returning the price
    /// snapshots taken while the row was stable.
    async fn deduct_under_lock(&self, product_id: ProductId, quantity: i32) -> Result<(f64, f64)> {
        let token = self.acquire_with_retry(product_id).await?;

        let result = async {
            let product = self
                .products
                .find_by_id(product_id)
                .await
                .map_err(CoreError::from)?
                .ok_or_else(|| CoreError::not_found("Product", product_id))?;
            self.products
                .deduct_stock(product_id, quantity)
                .await
                .map_err(CoreError::from)?;
            Ok((product.wholesale_price, product.retail_price))
        }
        .await;

        self.lock.release(product_id, &token).await;
        result
    }

    async fn restore_under_lock(&self, product_id: ProductId, quantity: i32) -> Result<()> {
        let token = self.acquire_with_retry(product_id).await?;
        let result = self
            .products
            .restore_stock(product_id, quantity)
            .await
            .map(|_| ())
            .map_err(CoreError::from);
        self.lock.release(product_id, &token).await;
        result
    }

    async fn acquire_with_retry(
        &self,
        product_id: ProductId,
    ) -> Result<openmart_cache::LockToken> {
        for attempt in 0..LOCK_ATTEMPTS {
            if let Some(token) = self.lock.acquire(product_id).await {
                return Ok(token);
            }
            if attempt + 1 < LOCK_ATTEMPTS {
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
        }
        Err(CoreError::resource_busy(format!(
            "inventory for product {product_id} is locked"
        )))
    }

    /// Best-effort compensation for a partially deducted order.
    async fn restore_deducted(&self, deducted: &[(ProductId, i32)]) {
        for &(product_id, quantity) in deducted {
            if let Err(e) = self.products.restore_stock(product_id, quantity).await {
                tracing::error!(
                    product_id,
                    quantity,
                    error = %e,
                    "failed to restore stock while unwinding a failed order"
                );
            }
        }
    }

    /// Best-effort compensation for a partially restored cancellation:
    /// takes back stock already restored so the order's lines still hold
    /// it and a retried cancel restores each line exactly once.
    async fn deduct_restored(&self, restored: &[(ProductId, i32)]) {
        for &(product_id, quantity) in restored {
            if let Err(e) = self.products.deduct_stock(product_id, quantity).await {
                tracing::error!(
                    product_id,
                    quantity,
                    error = %e,
                    "failed to take back restored stock while unwinding a failed cancel"
                );
            }
        }
    }
}
