//! End-to-end scenarios over the in-memory store and in-process cache:
//! oversell prevention, state-machine idempotency, and cache coherence
//! after writes.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use openmart_cache::{
    CacheStore, InvalidationConfig, InvalidationCoordinator, InventoryLock, LockConfig, keys,
};
use openmart_core::{CoreError, OrderItem, OrderStatus, Product, User, UserRole};
use openmart_storage::{
    MemoryStore, NewOrderItem, OrderItemStore, ProductPatch, ProductStore, StorageError, UserStore,
};
use openmart_services::{AdminSummary, NewProduct, OrderWorkflow, ProductCatalog, UserDirectory};

struct Fixture {
    store: Arc<MemoryStore>,
    cache: CacheStore,
    orders: OrderWorkflow,
    catalog: ProductCatalog,
    users: UserDirectory,
    summary: AdminSummary,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheStore::new_memory();
        let invalidation =
            InvalidationCoordinator::new(cache.clone(), InvalidationConfig::default());
        let lock = InventoryLock::new(cache.clone(), &LockConfig::default());

        let orders = OrderWorkflow::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            cache.clone(),
            invalidation.clone(),
            lock,
            Duration::from_secs(60),
        );
        let catalog = ProductCatalog::new(
            store.clone(),
            cache.clone(),
            invalidation.clone(),
            Duration::from_secs(600),
        );
        let users = UserDirectory::new(
            store.clone(),
            store.clone(),
            cache.clone(),
            invalidation,
            Duration::from_secs(300),
            Duration::from_secs(120),
        );
        let summary = AdminSummary::new(
            store.clone(),
            store.clone(),
            store.clone(),
            cache.clone(),
            Duration::from_secs(60),
        );

        Self {
            store,
            cache,
            orders,
            catalog,
            users,
            summary,
        }
    }

    async fn seed_user(&self, username: &str) -> User {
        let now = OffsetDateTime::now_utc();
        UserStore::save(
            self.store.as_ref(),
            User {
                id: 0,
                username: username.into(),
                email: format!("{username}@example.com"),
                role: UserRole::Customer,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .unwrap()
    }

    async fn seed_product(&self, name: &str, stock: i32) -> Product {
        self.catalog
            .save(NewProduct {
                name: name.into(),
                description: format!("{name} description"),
                wholesale_price: 10.0,
                retail_price: 25.0,
                stock,
            })
            .await
            .unwrap()
    }

    async fn stock_of(&self, product_id: i64) -> i32 {
        ProductStore::find_by_id(self.store.as_ref(), product_id)
            .await
            .unwrap()
            .unwrap()
            .stock
    }
}

#[tokio::test]
async fn concurrent_orders_cannot_oversell() {
    let fx = Arc::new(Fixture::new());
    let user_a = fx.seed_user("ada").await;
    let user_b = fx.seed_user("bob").await;
    let product = fx.seed_product("widget", 10).await;

    let (fx1, fx2) = (fx.clone(), fx.clone());
    let (pid1, pid2) = (product.id, product.id);
    let first = tokio::spawn(async move {
        fx1.orders
            .create_order(user_a.id, vec![NewOrderItem { product_id: pid1, quantity: 6 }])
            .await
    });
    let second = tokio::spawn(async move {
        fx2.orders
            .create_order(user_b.id, vec![NewOrderItem { product_id: pid2, quantity: 6 }])
            .await
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one of the two orders must win");

    let failure = results.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        failure.as_ref().unwrap_err(),
        CoreError::InsufficientStock { .. }
    ));

    // 10 - 6 = 4, and never negative.
    assert_eq!(fx.stock_of(product.id).await, 4);
}

#[tokio::test]
async fn failed_multi_product_order_restores_deducted_stock() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    let plenty = fx.seed_product("plenty", 10).await;
    let scarce = fx.seed_product("scarce", 1).await;

    let err = fx
        .orders
        .create_order(
            user.id,
            vec![
                NewOrderItem { product_id: plenty.id, quantity: 2 },
                NewOrderItem { product_id: scarce.id, quantity: 5 },
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientStock { .. }));

    // The deduction taken for the first product was compensated.
    assert_eq!(fx.stock_of(plenty.id).await, 10);
    assert_eq!(fx.stock_of(scarce.id).await, 1);
}

/// An order-item store whose writes always fail, standing in for a
/// backend that loses the order_items table mid-flight.
struct UnavailableItemStore;

#[async_trait::async_trait]
impl OrderItemStore for UnavailableItemStore {
    async fn find_by_order(&self, _order_id: i64) -> Result<Vec<OrderItem>, StorageError> {
        Ok(Vec::new())
    }

    async fn find_all(&self) -> Result<Vec<OrderItem>, StorageError> {
        Ok(Vec::new())
    }

    async fn save(&self, _item: OrderItem) -> Result<OrderItem, StorageError> {
        Err(StorageError::internal("order_items unavailable"))
    }
}

#[tokio::test]
async fn failed_item_save_restores_deducted_stock() {
    let store = Arc::new(MemoryStore::new());
    let cache = CacheStore::new_memory();
    let invalidation = InvalidationCoordinator::new(cache.clone(), InvalidationConfig::default());
    let lock = InventoryLock::new(cache.clone(), &LockConfig::default());
    let orders = OrderWorkflow::new(
        store.clone(),
        Arc::new(UnavailableItemStore),
        store.clone(),
        store.clone(),
        cache,
        invalidation,
        lock,
        Duration::from_secs(60),
    );

    let now = OffsetDateTime::now_utc();
    let user = UserStore::save(
        store.as_ref(),
        User {
            id: 0,
            username: "ada".into(),
            email: "ada@example.com".into(),
            role: UserRole::Customer,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .unwrap();
    let product = ProductStore::save(
        store.as_ref(),
        Product {
            id: 0,
            name: "widget".into(),
            description: "widget description".into(),
            wholesale_price: 10.0,
            retail_price: 25.0,
            stock: 10,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .unwrap();

    let err = orders
        .create_order(user.id, vec![NewOrderItem { product_id: product.id, quantity: 4 }])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));

    // The deduction taken before the line save failed was compensated.
    let current = ProductStore::find_by_id(store.as_ref(), product.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.stock, 10);
}

#[tokio::test]
async fn completing_twice_is_idempotent() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    let product = fx.seed_product("widget", 5).await;
    let order = fx
        .orders
        .create_order(user.id, vec![NewOrderItem { product_id: product.id, quantity: 1 }])
        .await
        .unwrap();

    let once = fx.orders.complete_order(order.id).await.unwrap();
    assert_eq!(once.status, OrderStatus::Completed);

    let twice = fx.orders.complete_order(order.id).await.unwrap();
    assert_eq!(twice.status, OrderStatus::Completed);
    assert_eq!(twice.id, once.id);

    // Terminal states never transition out.
    let err = fx.orders.cancel_order(order.id).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn cancellation_restores_stock_and_is_idempotent() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    let product = fx.seed_product("widget", 8).await;
    let order = fx
        .orders
        .create_order(user.id, vec![NewOrderItem { product_id: product.id, quantity: 3 }])
        .await
        .unwrap();
    assert_eq!(fx.stock_of(product.id).await, 5);

    let canceled = fx.orders.cancel_order(order.id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(fx.stock_of(product.id).await, 8);

    // A second cancel is a no-op success, not a second restock.
    fx.orders.cancel_order(order.id).await.unwrap();
    assert_eq!(fx.stock_of(product.id).await, 8);
}

#[tokio::test]
async fn interrupted_cancel_never_double_restores_stock() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    let alpha = fx.seed_product("alpha", 10).await;
    let beta = fx.seed_product("beta", 10).await;
    let order = fx
        .orders
        .create_order(
            user.id,
            vec![
                NewOrderItem { product_id: alpha.id, quantity: 2 },
                NewOrderItem { product_id: beta.id, quantity: 3 },
            ],
        )
        .await
        .unwrap();
    assert_eq!(fx.stock_of(alpha.id).await, 8);
    assert_eq!(fx.stock_of(beta.id).await, 7);

    // Another holder pins the second product's inventory lock, so the
    // cancel restores the first product and then runs out of retries.
    let external = InventoryLock::new(fx.cache.clone(), &LockConfig::default());
    let token = external.acquire(beta.id).await.unwrap();

    let err = fx.orders.cancel_order(order.id).await.unwrap_err();
    assert!(matches!(err, CoreError::ResourceBusy(_)));

    // The failed cancel left the books exactly as they were: the first
    // product's restore was taken back and the order is still open.
    assert_eq!(fx.stock_of(alpha.id).await, 8);
    assert_eq!(fx.stock_of(beta.id).await, 7);
    let open = fx.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(open.status, OrderStatus::Processing);

    external.release(beta.id, &token).await;

    // The retried cancel restores each line exactly once.
    let canceled = fx.orders.cancel_order(order.id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(fx.stock_of(alpha.id).await, 10);
    assert_eq!(fx.stock_of(beta.id).await, 10);
}

#[tokio::test]
async fn product_update_invalidates_cached_snapshot() {
    let fx = Fixture::new();
    let product = fx.seed_product("widget", 10).await;

    // Warm the cache through the read path.
    let v1 = fx.catalog.find_by_id(product.id).await.unwrap().unwrap();
    assert_eq!(v1.stock, 10);
    assert!(fx.cache.exists(&keys::products::by_id(product.id)).await);

    fx.catalog
        .update_fields(
            product.id,
            ProductPatch {
                stock: Some(3),
                ..ProductPatch::default()
            },
        )
        .await
        .unwrap();

    // The stale snapshot is gone, not served.
    assert_eq!(
        fx.cache
            .get::<Product>(&keys::products::by_id(product.id))
            .await,
        None
    );
    let v2 = fx.catalog.find_by_id(product.id).await.unwrap().unwrap();
    assert_eq!(v2.stock, 3);
}

#[tokio::test]
async fn order_writes_are_read_after_own_write_consistent() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    let product = fx.seed_product("widget", 10).await;

    // Warm the per-user collection view before the write.
    assert!(fx.orders.find_by_user(user.id).await.unwrap().is_empty());

    let order = fx
        .orders
        .create_order(user.id, vec![NewOrderItem { product_id: product.id, quantity: 1 }])
        .await
        .unwrap();

    // The caller's own immediate re-read sees the new order.
    let mine = fx.orders.find_by_user(user.id).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, order.id);
}

#[tokio::test]
async fn order_completion_refreshes_summary_aggregates() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    let product = fx.seed_product("widget", 10).await;

    // Aggregates start empty and the zero result is cached.
    assert_eq!(fx.summary.total_units_sold().await.unwrap(), 0);

    let order = fx
        .orders
        .create_order(user.id, vec![NewOrderItem { product_id: product.id, quantity: 4 }])
        .await
        .unwrap();
    // Still Processing: not part of the sold aggregate, cached zero holds.
    assert_eq!(fx.summary.total_units_sold().await.unwrap(), 0);

    fx.orders.complete_order(order.id).await.unwrap();

    // Completion invalidated the aggregate keys, so the recompute shows up
    // immediately rather than after TTL expiry.
    assert_eq!(fx.summary.total_units_sold().await.unwrap(), 4);
    let top = fx.summary.most_profitable_product().await.unwrap().unwrap();
    assert_eq!(top.product_id, product.id);
    assert_eq!(top.total_quantity, 4);
    let popular = fx.summary.top_popular(3).await.unwrap();
    assert_eq!(popular.len(), 1);
}

#[tokio::test]
async fn purchase_activity_views_are_cached_and_invalidated() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    let alpha = fx.seed_product("alpha", 10).await;
    let beta = fx.seed_product("beta", 10).await;

    fx.orders
        .create_order(user.id, vec![NewOrderItem { product_id: alpha.id, quantity: 2 }])
        .await
        .unwrap();

    // Warm both views at the configured aggregate width.
    let frequent = fx.orders.frequent_purchases(user.id, 3).await.unwrap();
    assert_eq!(frequent.len(), 1);
    assert_eq!(frequent[0].id, alpha.id);
    let recent = fx.orders.recent_purchases(user.id, 3).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, alpha.id);

    // A new order drops the cached views, so re-reads see it immediately.
    fx.orders
        .create_order(user.id, vec![NewOrderItem { product_id: beta.id, quantity: 3 }])
        .await
        .unwrap();

    let frequent = fx.orders.frequent_purchases(user.id, 3).await.unwrap();
    let ids: Vec<_> = frequent.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![beta.id, alpha.id], "ranked by quantity purchased");

    let recent = fx.orders.recent_purchases(user.id, 3).await.unwrap();
    assert_eq!(recent[0].id, beta.id, "newest order first");
    assert_eq!(recent[1].id, alpha.id);
}

#[tokio::test]
async fn secondary_user_lookup_warms_primary_key() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;

    let by_name = fx.users.find_by_username("ada").await.unwrap().unwrap();
    assert_eq!(by_name.id, user.id);
    assert!(fx.cache.exists(&keys::users::by_id(user.id)).await);
    assert!(fx.cache.exists(&keys::users::by_username("ada")).await);
}

#[tokio::test]
async fn profile_update_drops_old_username_key() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    fx.users.find_by_username("ada").await.unwrap().unwrap();

    let mut renamed = user.clone();
    renamed.username = "ada2".into();
    fx.users.update_profile(renamed).await.unwrap();

    // The old lookup key no longer serves the stale snapshot.
    assert!(!fx.cache.exists(&keys::users::by_username("ada")).await);
    assert!(fx.users.find_by_username("ada").await.unwrap().is_none());
    assert!(fx.users.find_by_username("ada2").await.unwrap().is_some());
}

#[tokio::test]
async fn watchlist_reads_and_invalidation() {
    let fx = Fixture::new();
    let user = fx.seed_user("ada").await;
    let product = fx.seed_product("widget", 5).await;

    assert!(fx.users.watchlist(user.id).await.unwrap().is_empty());

    fx.users.add_to_watchlist(user.id, product.id).await.unwrap();
    let list = fx.users.watchlist(user.id).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, product.id);

    fx.users
        .remove_from_watchlist(user.id, product.id)
        .await
        .unwrap();
    assert!(fx.users.watchlist(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_user_and_empty_orders_are_domain_errors() {
    let fx = Fixture::new();
    let product = fx.seed_product("widget", 5).await;

    let err = fx
        .orders
        .create_order(999, vec![NewOrderItem { product_id: product.id, quantity: 1 }])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    let user = fx.seed_user("ada").await;
    let err = fx.orders.create_order(user.id, vec![]).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidEntity(_)));
}
