//! Persistence collaborator interface for the OpenMart backend.
//!
//! The relational store is the sole source of truth; the cache tier is a
//! derived, disposable view over it. This crate defines the per-entity
//! store traits the services consume and ships an in-memory backend used
//! by tests and single-process development setups. The cache layer never
//! opens or closes a transaction here — callers own that boundary.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use traits::{NewOrderItem, OrderItemStore, OrderStore, ProductPatch, ProductStore, UserStore, WatchlistStore};
