//! Store traits every persistence backend must implement.
//!
//! Implementations must be thread-safe (`Send + Sync`). Reads return
//! `Ok(None)` for missing rows; `Err` is reserved for infrastructure
//! failures and constraint violations.

use async_trait::async_trait;

use openmart_core::{
    Order, OrderId, OrderItem, OrderStatus, Product, ProductId, User, UserId,
};

use crate::error::StorageError;

/// Partial update for a product; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub wholesale_price: Option<f64>,
    pub retail_price: Option<f64>,
    pub stock: Option<i32>,
}

/// Input for inserting an order line; ids and snapshots are assigned by
/// the caller-side workflow before save.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: i32,
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, StorageError>;

    async fn find_all(&self) -> Result<Vec<Product>, StorageError>;

    async fn find_in_stock(&self) -> Result<Vec<Product>, StorageError>;

    /// Inserts the product and returns it with its assigned id.
    async fn save(&self, product: Product) -> Result<Product, StorageError>;

    async fn update(&self, product: Product) -> Result<Product, StorageError>;

    /// Conditionally deducts stock in one statement. Fails with
    /// [`StorageError::InsufficientStock`] instead of going negative.
    async fn deduct_stock(&self, id: ProductId, quantity: i32) -> Result<Product, StorageError>;

    /// Adds stock back (order cancellation).
    async fn restore_stock(&self, id: ProductId, quantity: i32) -> Result<Product, StorageError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StorageError>;

    async fn find_all(&self) -> Result<Vec<Order>, StorageError>;

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StorageError>;

    /// One-based page number, page size in rows.
    async fn find_page(&self, page: u32, size: u32) -> Result<Vec<Order>, StorageError>;

    async fn save(&self, order: Order) -> Result<Order, StorageError>;

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order, StorageError>;
}

#[async_trait]
pub trait OrderItemStore: Send + Sync {
    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StorageError>;

    async fn find_all(&self) -> Result<Vec<OrderItem>, StorageError>;

    async fn save(&self, item: OrderItem) -> Result<OrderItem, StorageError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StorageError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StorageError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    async fn find_all(&self) -> Result<Vec<User>, StorageError>;

    async fn save(&self, user: User) -> Result<User, StorageError>;

    async fn update(&self, user: User) -> Result<User, StorageError>;
}

#[async_trait]
pub trait WatchlistStore: Send + Sync {
    /// Products on the given user's watchlist.
    async fn find_products_for_user(&self, user_id: UserId) -> Result<Vec<Product>, StorageError>;

    async fn add(&self, user_id: UserId, product_id: ProductId) -> Result<(), StorageError>;

    async fn remove(&self, user_id: UserId, product_id: ProductId) -> Result<(), StorageError>;
}
