//! Error types for the persistence collaborator.

use openmart_core::CoreError;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested row was not found.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    /// A uniqueness constraint was violated.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// A conditional stock update would have driven stock negative.
    /// This is the row-level second line of defense against oversell.
    #[error("Not enough inventory for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i32,
        available: i32,
    },

    /// Failed to reach the storage backend.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StorageError {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => CoreError::not_found(kind, id),
            StorageError::InsufficientStock {
                product_id,
                requested,
                available,
            } => CoreError::insufficient_stock(product_id, requested, available),
            other => CoreError::Storage(other.to_string()),
        }
    }
}
