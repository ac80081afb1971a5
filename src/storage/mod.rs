//! Persistence for loans and borrower profiles
//!
//! [`LoanStore`] is the only way the lifecycle controller touches state. Every
//! loan write after creation goes through [`LoanStore::save_loan`], a
//! conditional write keyed on the loan's version, so two transitions racing
//! on the same loan can never both commit.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::loan::{Loan, LoanFilter};
use crate::models::{CachedCreditScore, User};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("loan {loan_id} changed since version {expected}")]
    Conflict { loan_id: Uuid, expected: i64 },

    #[error("loan not found: {0}")]
    LoanNotFound(Uuid),

    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    #[error("record already exists: {0}")]
    Duplicate(Uuid),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Storage abstraction so the lifecycle controller can run against Postgres
/// or entirely in memory.
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn find_loan(&self, id: Uuid) -> Result<Option<Loan>, StorageError>;

    /// Create a loan; fails with `Duplicate` if the id is taken.
    async fn insert_loan(&self, loan: &Loan) -> Result<(), StorageError>;

    /// Replace a loan iff its stored version equals `expected_version`.
    ///
    /// On success the stored version is `expected_version + 1`, the borrower's
    /// history version is bumped in the same write, and the stored loan is
    /// returned.
    async fn save_loan(&self, loan: &Loan, expected_version: i64) -> Result<Loan, StorageError>;

    /// Remove a loan. Only used to undo a half-finished application.
    async fn delete_loan(&self, id: Uuid) -> Result<(), StorageError>;

    /// Loans matching `filter`, newest application first.
    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StorageError>;

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StorageError>;

    async fn insert_user(&self, user: &User) -> Result<(), StorageError>;

    /// Append `loan_id` to the user's history and bump its history version.
    /// Returns the new history version.
    async fn append_loan_to_user_history(
        &self,
        user_id: Uuid,
        loan_id: Uuid,
    ) -> Result<i64, StorageError>;

    async fn save_credit_score(
        &self,
        user_id: Uuid,
        score: &CachedCreditScore,
    ) -> Result<(), StorageError>;
}
