use thiserror::Error;

use stockledger_core::DomainError;

use crate::store::StoreError;

/// Error surfaced by receiving and purchasing operations.
#[derive(Debug, Error)]
pub enum ReceivingError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The order's state forbids the operation, or another writer got there first.
    ///
    /// `retryable` is set for lock timeouts and serialisation failures; a
    /// conflict caused by the order's state will fail again.
    #[error("conflict: {message}")]
    Conflict { message: String, retryable: bool },

    #[error("storage error: {0}")]
    Storage(String),
}

impl ReceivingError {
    pub fn conflict(message: impl Into<String>) -> Self {
        ReceivingError::Conflict {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the caller may repeat the whole operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReceivingError::Storage(_) => true,
            ReceivingError::Conflict { retryable, .. } => *retryable,
            ReceivingError::Validation(_) | ReceivingError::NotFound(_) => false,
        }
    }
}

impl From<DomainError> for ReceivingError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ReceivingError::Validation(msg)
            }
            DomainError::NotFound(msg) => ReceivingError::NotFound(msg),
            DomainError::Conflict(msg) | DomainError::InvariantViolation(msg) => {
                ReceivingError::conflict(msg)
            }
        }
    }
}

impl From<StoreError> for ReceivingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ReceivingError::NotFound(msg),
            StoreError::LockTimeout(_) | StoreError::Concurrency(_) => ReceivingError::Conflict {
                message: err.to_string(),
                retryable: true,
            },
            StoreError::Constraint(_) => ReceivingError::conflict(err.to_string()),
            StoreError::Corrupt(_) | StoreError::Backend(_) => {
                ReceivingError::Storage(err.to_string())
            }
        }
    }
}
