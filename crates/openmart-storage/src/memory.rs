//! In-memory storage backend.
//!
//! Backs the service tests and single-process development runs. Each table
//! lives behind one `RwLock`; `deduct_stock` performs its check-and-write
//! under the write lock so the row-level oversell guard holds under
//! concurrent callers, mirroring what a conditional `UPDATE` gives the
//! relational backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use openmart_core::{
    Order, OrderId, OrderItem, OrderItemId, OrderStatus, Product, ProductId, User, UserId,
    Watchlist, WatchlistId,
};

use crate::error::StorageError;
use crate::traits::{OrderItemStore, OrderStore, ProductStore, UserStore, WatchlistStore};

/// All tables of the marketplace in one process-local store.
#[derive(Default)]
pub struct MemoryStore {
    products: RwLock<HashMap<ProductId, Product>>,
    orders: RwLock<HashMap<OrderId, Order>>,
    order_items: RwLock<HashMap<OrderItemId, OrderItem>>,
    users: RwLock<HashMap<UserId, User>>,
    watchlists: RwLock<HashMap<WatchlistId, Watchlist>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    fn assign_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, StorageError> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Product>, StorageError> {
        let mut all: Vec<Product> = self.products.read().await.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    async fn find_in_stock(&self) -> Result<Vec<Product>, StorageError> {
        let mut in_stock: Vec<Product> = self
            .products
            .read()
            .await
            .values()
            .filter(|p| p.stock > 0)
            .cloned()
            .collect();
        in_stock.sort_by_key(|p| p.id);
        Ok(in_stock)
    }

    async fn save(&self, mut product: Product) -> Result<Product, StorageError> {
        if product.id == 0 {
            product.id = self.assign_id();
        }
        let mut table = self.products.write().await;
        if table.contains_key(&product.id) {
            return Err(StorageError::conflict(format!(
                "product {} already exists",
                product.id
            )));
        }
        table.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update(&self, mut product: Product) -> Result<Product, StorageError> {
        let mut table = self.products.write().await;
        if !table.contains_key(&product.id) {
            return Err(StorageError::not_found("Product", product.id));
        }
        product.updated_at = OffsetDateTime::now_utc();
        table.insert(product.id, product.clone());
        Ok(product)
    }

    async fn deduct_stock(&self, id: ProductId, quantity: i32) -> Result<Product, StorageError> {
        let mut table = self.products.write().await;
        let product = table
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("Product", id))?;
        if product.stock < quantity {
            return Err(StorageError::InsufficientStock {
                product_id: id,
                requested: quantity,
                available: product.stock,
            });
        }
        product.stock -= quantity;
        product.updated_at = OffsetDateTime::now_utc();
        Ok(product.clone())
    }

    async fn restore_stock(&self, id: ProductId, quantity: i32) -> Result<Product, StorageError> {
        let mut table = self.products.write().await;
        let product = table
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("Product", id))?;
        product.stock += quantity;
        product.updated_at = OffsetDateTime::now_utc();
        Ok(product.clone())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StorageError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Order>, StorageError> {
        let mut all: Vec<Order> = self.orders.read().await.values().cloned().collect();
        all.sort_by_key(|o| o.id);
        Ok(all)
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StorageError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn find_page(&self, page: u32, size: u32) -> Result<Vec<Order>, StorageError> {
        let all = OrderStore::find_all(self).await?;
        let offset = (page.saturating_sub(1) as usize) * size as usize;
        Ok(all.into_iter().skip(offset).take(size as usize).collect())
    }

    async fn save(&self, mut order: Order) -> Result<Order, StorageError> {
        if order.id == 0 {
            order.id = self.assign_id();
        }
        self.orders.write().await.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, StorageError> {
        let mut table = self.orders.write().await;
        let order = table
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("Order", id))?;
        order.status = status;
        order.updated_at = OffsetDateTime::now_utc();
        Ok(order.clone())
    }
}

#[async_trait]
impl OrderItemStore for MemoryStore {
    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StorageError> {
        let mut items: Vec<OrderItem> = self
            .order_items
            .read()
            .await
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }

    async fn find_all(&self) -> Result<Vec<OrderItem>, StorageError> {
        let mut all: Vec<OrderItem> = self.order_items.read().await.values().cloned().collect();
        all.sort_by_key(|i| i.id);
        Ok(all)
    }

    async fn save(&self, mut item: OrderItem) -> Result<OrderItem, StorageError> {
        if item.id == 0 {
            item.id = self.assign_id();
        }
        self.order_items.write().await.insert(item.id, item.clone());
        Ok(item)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_all(&self) -> Result<Vec<User>, StorageError> {
        let mut all: Vec<User> = self.users.read().await.values().cloned().collect();
        all.sort_by_key(|u| u.id);
        Ok(all)
    }

    async fn save(&self, mut user: User) -> Result<User, StorageError> {
        let mut table = self.users.write().await;
        if table.values().any(|u| u.username == user.username) {
            return Err(StorageError::conflict(format!(
                "username {} already taken",
                user.username
            )));
        }
        if user.id == 0 {
            user.id = self.assign_id();
        }
        table.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, mut user: User) -> Result<User, StorageError> {
        let mut table = self.users.write().await;
        if !table.contains_key(&user.id) {
            return Err(StorageError::not_found("User", user.id));
        }
        user.updated_at = OffsetDateTime::now_utc();
        table.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl WatchlistStore for MemoryStore {
    async fn find_products_for_user(&self, user_id: UserId) -> Result<Vec<Product>, StorageError> {
        let product_ids: Vec<ProductId> = self
            .watchlists
            .read()
            .await
            .values()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.product_id)
            .collect();
        let products = self.products.read().await;
        let mut found: Vec<Product> = product_ids
            .iter()
            .filter_map(|id| products.get(id).cloned())
            .collect();
        found.sort_by_key(|p| p.id);
        Ok(found)
    }

    async fn add(&self, user_id: UserId, product_id: ProductId) -> Result<(), StorageError> {
        let mut table = self.watchlists.write().await;
        let exists = table
            .values()
            .any(|w| w.user_id == user_id && w.product_id == product_id);
        if !exists {
            let id = self.assign_id();
            table.insert(
                id,
                Watchlist {
                    id,
                    user_id,
                    product_id,
                },
            );
        }
        Ok(())
    }

    async fn remove(&self, user_id: UserId, product_id: ProductId) -> Result<(), StorageError> {
        self.watchlists
            .write()
            .await
            .retain(|_, w| !(w.user_id == user_id && w.product_id == product_id));
        Ok(())
    }
}
