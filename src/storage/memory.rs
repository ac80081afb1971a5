//! In-memory store used for tests and database-less deployments

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LoanStore, StorageError};
use crate::loan::{Loan, LoanFilter};
use crate::models::{CachedCreditScore, User};

#[derive(Default)]
struct Tables {
    loans: HashMap<Uuid, Loan>,
    users: HashMap<Uuid, User>,
}

/// Store backed by hash maps behind a single `RwLock`
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoanStore for InMemoryStore {
    async fn find_loan(&self, id: Uuid) -> Result<Option<Loan>, StorageError> {
        Ok(self.tables.read().await.loans.get(&id).cloned())
    }

    async fn insert_loan(&self, loan: &Loan) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if tables.loans.contains_key(&loan.id) {
            return Err(StorageError::Duplicate(loan.id));
        }
        tables.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn save_loan(&self, loan: &Loan, expected_version: i64) -> Result<Loan, StorageError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let stored = tables
            .loans
            .get_mut(&loan.id)
            .ok_or(StorageError::LoanNotFound(loan.id))?;

        if stored.version != expected_version {
            return Err(StorageError::Conflict {
                loan_id: loan.id,
                expected: expected_version,
            });
        }

        let now = Utc::now();
        let mut next = loan.clone();
        next.version = expected_version + 1;
        next.updated_at = now;
        *stored = next.clone();

        if let Some(borrower) = tables.users.get_mut(&next.borrower_id) {
            borrower.history_version += 1;
            borrower.updated_at = now;
        }
        Ok(next)
    }

    async fn delete_loan(&self, id: Uuid) -> Result<(), StorageError> {
        self.tables
            .write()
            .await
            .loans
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::LoanNotFound(id))
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StorageError> {
        let tables = self.tables.read().await;
        let mut loans: Vec<Loan> = tables
            .loans
            .values()
            .filter(|loan| filter.matches(loan))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.application_date.cmp(&a.application_date));
        Ok(loans)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) {
            return Err(StorageError::Duplicate(user.id));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn append_loan_to_user_history(
        &self,
        user_id: Uuid,
        loan_id: Uuid,
    ) -> Result<i64, StorageError> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(StorageError::UserNotFound(user_id))?;
        user.loan_history.push(loan_id);
        user.history_version += 1;
        user.updated_at = Utc::now();
        Ok(user.history_version)
    }

    async fn save_credit_score(
        &self,
        user_id: Uuid,
        score: &CachedCreditScore,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(StorageError::UserNotFound(user_id))?;
        user.credit_score = Some(score.clone());
        user.updated_at = Utc::now();
        Ok(())
    }
}
