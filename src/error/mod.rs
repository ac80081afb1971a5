//! Centralized error handling for the lending core
//!
//! Every lifecycle operation returns a [`LendingError`] carrying a stable
//! machine-readable code, so the calling layer can decide between retrying,
//! reloading, or surfacing the failure to a human.

use thiserror::Error;
use uuid::Uuid;

use crate::payments::PaymentError;
use crate::storage::StorageError;

/// Lending core error type
#[derive(Error, Debug)]
pub enum LendingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: loan {loan_id} was modified concurrently (expected version {expected})")]
    Conflict { loan_id: Uuid, expected: i64 },

    #[error("Payment error: {0}")]
    Payment(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: &'static str },
}

impl LendingError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            LendingError::Validation(_) => "VALIDATION_ERROR",
            LendingError::Precondition(_) => "PRECONDITION_FAILED",
            LendingError::Forbidden(_) => "FORBIDDEN",
            LendingError::Conflict { .. } => "CONFLICT",
            LendingError::Payment(_) => "PAYMENT_ERROR",
            LendingError::NotFound { .. } => "NOT_FOUND",
            LendingError::Storage(_) => "STORAGE_ERROR",
            LendingError::Timeout { .. } => "TIMEOUT",
        }
    }

    /// Whether the caller may retry the whole operation.
    ///
    /// Conflicts need a reload first; payment failures and timeouts are
    /// retryable by a human or an outer retry policy, never by the core.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LendingError::Conflict { .. }
                | LendingError::Payment(_)
                | LendingError::Storage(_)
                | LendingError::Timeout { .. }
        )
    }

    pub(crate) fn loan_not_found(id: Uuid) -> Self {
        LendingError::NotFound { entity: "Loan", id }
    }

    pub(crate) fn user_not_found(id: Uuid) -> Self {
        LendingError::NotFound { entity: "User", id }
    }
}

impl From<StorageError> for LendingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { loan_id, expected } => {
                LendingError::Conflict { loan_id, expected }
            }
            StorageError::LoanNotFound(id) => LendingError::loan_not_found(id),
            StorageError::UserNotFound(id) => LendingError::user_not_found(id),
            other => LendingError::Storage(other.to_string()),
        }
    }
}

impl From<PaymentError> for LendingError {
    fn from(err: PaymentError) -> Self {
        LendingError::Payment(err.to_string())
    }
}

impl From<validator::ValidationErrors> for LendingError {
    fn from(err: validator::ValidationErrors) -> Self {
        LendingError::Validation(err.to_string())
    }
}

/// Result type alias using LendingError
pub type LendingResult<T> = Result<T, LendingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LendingError::Validation("test".to_string()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            LendingError::Precondition("test".to_string()).error_code(),
            "PRECONDITION_FAILED"
        );
        assert_eq!(
            LendingError::Conflict {
                loan_id: Uuid::nil(),
                expected: 3
            }
            .error_code(),
            "CONFLICT"
        );
        assert_eq!(
            LendingError::loan_not_found(Uuid::nil()).error_code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LendingError::Payment("card declined".to_string()).is_retryable());
        assert!(LendingError::Timeout {
            operation: "payment"
        }
        .is_retryable());
        assert!(!LendingError::Validation("bad".to_string()).is_retryable());
        assert!(!LendingError::Forbidden("nope".to_string()).is_retryable());
    }

    #[test]
    fn test_storage_conflict_maps_to_conflict() {
        let id = Uuid::new_v4();
        let err: LendingError = StorageError::Conflict {
            loan_id: id,
            expected: 2,
        }
        .into();
        assert!(matches!(err, LendingError::Conflict { loan_id, expected: 2 } if loan_id == id));
    }

    #[test]
    fn test_not_found_message_names_entity() {
        let err = LendingError::user_not_found(Uuid::nil());
        assert!(err.to_string().starts_with("User not found"));
    }
}
