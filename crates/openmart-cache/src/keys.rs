//! Deterministic cache key namespace.
//!
//! Keys are hierarchical strings: `<domain>:<qualifier>:<discriminator...>`.
//! A key encodes exactly the query or entity it represents — no randomness,
//! no time component — so the invalidation path can compute the same key a
//! reader derived without ever inspecting cached contents. Two distinct
//! queries never normalize to the same key.

use openmart_core::{OrderId, ProductId, UserId};

pub mod orders {
    use super::*;

    pub const ALL: &str = "orders:all";

    pub fn by_id(order_id: OrderId) -> String {
        format!("orders:id:{order_id}")
    }

    pub fn by_user(user_id: UserId) -> String {
        format!("orders:user:{user_id}")
    }

    /// Paginated view; the discriminator is the query shape (one-based
    /// page number and page size), not the result.
    pub fn page(page: u32, size: u32) -> String {
        format!("orders:page:{page}:size:{size}")
    }
}

pub mod products {
    use super::*;

    pub const ALL: &str = "products:all";
    pub const IN_STOCK: &str = "products:instock";

    pub fn by_id(product_id: ProductId) -> String {
        format!("products:id:{product_id}")
    }
}

pub mod users {
    use super::*;

    pub const ALL: &str = "users:all";

    pub fn by_id(user_id: UserId) -> String {
        format!("users:id:{user_id}")
    }

    pub fn by_username(username: &str) -> String {
        format!("users:username:{username}")
    }

    pub fn by_email(email: &str) -> String {
        format!("users:email:{email}")
    }

    pub fn watchlist(user_id: UserId) -> String {
        format!("users:watchlist:{user_id}")
    }
}

pub mod summary {
    pub const MOST_PROFITABLE: &str = "summary:mostProfit";
    pub const TOTAL_SOLD: &str = "summary:totalSold";

    pub fn top_popular(count: u32) -> String {
        format!("summary:topPopular:{count}")
    }
}

pub mod activity {
    use super::*;

    pub fn frequent_purchases(user_id: UserId, limit: u32) -> String {
        format!("activity:user:{user_id}:frequent:{limit}")
    }

    pub fn recent_purchases(user_id: UserId, limit: u32) -> String {
        format!("activity:user:{user_id}:recent:{limit}")
    }

    pub fn rate_limit(identity: &str, endpoint: &str) -> String {
        format!("activity:rateLimit:{identity}:{endpoint}")
    }
}

pub mod inventory {
    use super::*;

    pub fn lock(product_id: ProductId) -> String {
        format!("inventory:lock:{product_id}")
    }
}
