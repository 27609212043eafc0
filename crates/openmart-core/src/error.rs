use thiserror::Error;

/// Domain errors surfaced to callers of the OpenMart services.
///
/// These are deliberately distinct from cache-tier failures: a broken or
/// slow cache never produces a `CoreError`, it degrades to a miss inside
/// the cache layer. Everything here reflects the authoritative store or
/// the business rules and always propagates.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    #[error("Not enough inventory for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i32,
        available: i32,
    },

    #[error("Invalid order transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn insufficient_stock(product_id: i64, requested: i32, available: i32) -> Self {
        Self::InsufficientStock {
            product_id,
            requested,
            available,
        }
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn resource_busy(message: impl Into<String>) -> Self {
        Self::ResourceBusy(message.into())
    }

    pub fn invalid_entity(message: impl Into<String>) -> Self {
        Self::InvalidEntity(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Caller-caused errors (bad ids, business-rule violations).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::InsufficientStock { .. }
                | Self::InvalidTransition { .. }
                | Self::InvalidEntity(_)
        )
    }

    /// Infrastructure or misconfiguration errors.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Json(_) | Self::Storage(_) | Self::ResourceBusy(_)
        )
    }
}

/// Convenience result type for domain operations.
pub type Result<T> = std::result::Result<T, CoreError>;
