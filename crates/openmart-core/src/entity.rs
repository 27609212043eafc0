//! Marketplace entities and their identifiers.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type ProductId = i64;
pub type OrderId = i64;
pub type OrderItemId = i64;
pub type UserId = i64;
pub type WatchlistId = i64;

/// A catalog product. `stock` is the authoritative on-hand quantity; the
/// cache only ever holds a TTL-bounded snapshot of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub wholesale_price: f64,
    pub retail_price: f64,
    pub stock: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Order lifecycle. `Completed` and `Canceled` are terminal; re-entering the
/// state an order is already in is a no-op success, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Processing,
    Completed,
    Canceled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "Processing"),
            Self::Completed => write!(f, "Completed"),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub order_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A line of an order. Prices are snapshotted at purchase time so later
/// catalog edits never rewrite historical orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub wholesale_price_snapshot: f64,
    pub retail_price_snapshot: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Customer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: WatchlistId,
    pub user_id: UserId,
    pub product_id: ProductId,
}

/// Per-product sales aggregate used by the admin summary views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStats {
    pub product_id: ProductId,
    pub product_name: String,
    pub total_quantity: i64,
    pub total_profit: f64,
}
