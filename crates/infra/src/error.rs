//! Storage and service error taxonomy.

use thiserror::Error;

use pantry_core::DomainError;

/// Error returned by an `InventoryStore` back-end.
///
/// These are infrastructure errors (storage, concurrency, timeouts); domain
/// rejections raised while folding a movement are wrapped in `Rejected`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A compare-and-swap on a row version (or reservation status) failed.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// The projector refused a movement; nothing was written.
    #[error("rejected: {0}")]
    Rejected(DomainError),

    #[error("not found: {0}")]
    NotFound(String),

    /// The call did not complete within its deadline.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Error surfaced by the stock services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// Optimistic-concurrency conflict that outlived the internal retries.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("return exceeds original: {0}")]
    ReturnExceedsOriginal(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl ServiceError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::ConcurrentModification(_) | ServiceError::ServiceUnavailable(_)
        )
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvalidId(msg)
            | DomainError::InvariantViolation(msg) => ServiceError::Validation(msg),
            DomainError::NotFound(what) => ServiceError::NotFound(what),
            DomainError::Conflict(msg) => ServiceError::ConcurrentModification(msg),
            DomainError::InsufficientStock(msg) => ServiceError::InsufficientStock(msg),
            DomainError::ReturnExceedsOriginal(msg) => ServiceError::ReturnExceedsOriginal(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => ServiceError::ConcurrentModification(msg),
            StoreError::Rejected(err) => err.into(),
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::Unavailable(msg) => ServiceError::ServiceUnavailable(msg),
            StoreError::Backend(msg) => ServiceError::Storage(msg),
        }
    }
}
