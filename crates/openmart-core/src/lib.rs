//! Core domain model for the OpenMart backend.
//!
//! Entities reference each other by identifier only (an [`Order`] carries a
//! `user_id`, never a `User`), so cached snapshots stay self-contained and
//! ownership cycles between orders, users and watchlists never arise.

pub mod entity;
pub mod error;

pub use entity::{
    Order, OrderId, OrderItem, OrderItemId, OrderStatus, Product, ProductId, ProductStats, User,
    UserId, UserRole, Watchlist, WatchlistId,
};
pub use error::{CoreError, Result};
