//! Business services of the OpenMart backend.
//!
//! Each service reads through the cache (cache-aside: check the cache,
//! fall back to the store on a miss, populate the cache with the result)
//! and writes through the persistence collaborator followed by an
//! invalidation step. Within one logical write, the persistence commit
//! happens-before invalidation, and invalidation happens-before the
//! success result is returned — so a caller that saw a write succeed will
//! not read its own stale data back.

pub mod catalog;
pub mod orders;
pub mod summary;
pub mod users;

pub use catalog::{NewProduct, ProductCatalog};
pub use orders::OrderWorkflow;
pub use summary::AdminSummary;
pub use users::UserDirectory;
