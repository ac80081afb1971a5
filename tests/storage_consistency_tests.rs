//! Consistency tests for the loan stores

mod common;

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::common::{add_user, history_loan};
    use lendcore::loan::{LoanFilter, LoanStatus};
    use lendcore::models::{CachedCreditScore, Role};
    use lendcore::retry::RetryPolicy;
    use lendcore::storage::{InMemoryStore, LoanStore, PgStore, StorageError};

    /// Helper to connect to the test database and apply migrations
    async fn setup_test_db() -> PgStore {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/lendcore_test".to_string());

        PgStore::connect(&database_url, 2, &RetryPolicy::no_retry())
            .await
            .expect("Failed to connect to test database")
    }

    /// Version checks, not-found handling and listing order, against any store.
    async fn exercise_store<S: LoanStore>(store: &S) {
        let borrower = add_user(store, Role::Borrower).await;
        let lender = add_user(store, Role::Lender).await;

        let now = Utc::now();
        let mut older = history_loan(dec!(1500), LoanStatus::Pending, "Inventory", now - Duration::days(3));
        older.borrower_id = borrower.id;
        let mut newer = history_loan(dec!(700.25), LoanStatus::Pending, "Education", now);
        newer.borrower_id = borrower.id;

        store.insert_loan(&older).await.unwrap();
        store.insert_loan(&newer).await.unwrap();
        assert!(matches!(
            store.insert_loan(&older).await,
            Err(StorageError::Duplicate(id)) if id == older.id
        ));

        // Versioned save
        let mut staged = older.clone();
        staged.status = LoanStatus::Approved;
        let saved = store.save_loan(&staged, 0).await.unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(saved.status, LoanStatus::Approved);

        let mut stale = older.clone();
        stale.status = LoanStatus::Rejected;
        stale.rejection_reason = Some("late".to_string());
        assert!(matches!(
            store.save_loan(&stale, 0).await,
            Err(StorageError::Conflict { expected: 0, .. })
        ));
        let stored = store.find_loan(older.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LoanStatus::Approved);
        assert_eq!(stored.version, 1);
        assert_eq!(stored.amount, dec!(1500));

        let mut funded = stored.clone();
        funded.status = LoanStatus::Funded;
        funded.lender_id = Some(lender.id);
        store.save_loan(&funded, 1).await.unwrap();

        let ghost = history_loan(dec!(100), LoanStatus::Pending, "Other", now);
        assert!(matches!(
            store.save_loan(&ghost, 0).await,
            Err(StorageError::LoanNotFound(id)) if id == ghost.id
        ));

        // Listing
        let by_borrower = store
            .list_loans(&LoanFilter {
                borrower_id: Some(borrower.id),
                ..LoanFilter::default()
            })
            .await
            .unwrap();
        let ids: Vec<Uuid> = by_borrower.iter().map(|loan| loan.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        let unassigned = store
            .list_loans(&LoanFilter {
                borrower_id: Some(borrower.id),
                status: Some(LoanStatus::Pending),
                unassigned: true,
                ..LoanFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].id, newer.id);
        assert_eq!(unassigned[0].amount, dec!(700.25));

        let by_lender = store
            .list_loans(&LoanFilter {
                lender_id: Some(lender.id),
                ..LoanFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_lender.len(), 1);
        assert_eq!(by_lender[0].version, 2);

        // Each committed save of a borrower's loan invalidates their score
        let profile = store.find_user(borrower.id).await.unwrap().unwrap();
        assert_eq!(profile.history_version, 2);

        // Profile history and score cache
        assert_eq!(
            store
                .append_loan_to_user_history(borrower.id, older.id)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            store
                .append_loan_to_user_history(borrower.id, newer.id)
                .await
                .unwrap(),
            4
        );
        store
            .save_credit_score(
                borrower.id,
                &CachedCreditScore {
                    score: 642,
                    history_version: 4,
                    computed_at: now,
                },
            )
            .await
            .unwrap();

        let profile = store.find_user(borrower.id).await.unwrap().unwrap();
        assert_eq!(profile.loan_history, vec![older.id, newer.id]);
        assert_eq!(profile.history_version, 4);
        assert_eq!(profile.fresh_credit_score(), Some(642));

        let mut touched = store.find_loan(newer.id).await.unwrap().unwrap();
        touched.purpose = "Education".to_string();
        store.save_loan(&touched, 0).await.unwrap();
        let profile = store.find_user(borrower.id).await.unwrap().unwrap();
        assert_eq!(profile.history_version, 5);
        assert_eq!(profile.fresh_credit_score(), None);

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.append_loan_to_user_history(missing, older.id).await,
            Err(StorageError::UserNotFound(id)) if id == missing
        ));

        // Undo path
        store.delete_loan(newer.id).await.unwrap();
        assert!(store.find_loan(newer.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_loan(newer.id).await,
            Err(StorageError::LoanNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_store_consistency() {
        let store = InMemoryStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_postgres_store_consistency() {
        let store = setup_test_db().await;
        store.check_health().await.unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_postgres_round_trips_schedule_and_assessment() {
        let store = setup_test_db().await;
        let borrower = add_user(&store, Role::Borrower).await;

        let mut loan = history_loan(dec!(2400), LoanStatus::Funded, "Equipment", Utc::now());
        loan.borrower_id = borrower.id;
        loan.repayment_schedule = lendcore::services::schedule::build_schedule(
            dec!(2400),
            dec!(0.12),
            6,
            lendcore::loan::TermUnit::Months,
            Utc::now(),
        )
        .unwrap();
        loan.risk_assessment.factors = vec!["Has 1 active loan(s)".to_string()];
        store.insert_loan(&loan).await.unwrap();

        let stored = store.find_loan(loan.id).await.unwrap().unwrap();
        assert_eq!(stored.repayment_schedule.len(), 6);
        assert_eq!(
            stored
                .repayment_schedule
                .iter()
                .map(|installment| installment.amount)
                .sum::<rust_decimal::Decimal>(),
            loan.repayment_schedule
                .iter()
                .map(|installment| installment.amount)
                .sum::<rust_decimal::Decimal>()
        );
        assert_eq!(stored.risk_assessment.factors, loan.risk_assessment.factors);
        assert_eq!(stored.term_unit, lendcore::loan::TermUnit::Months);
    }
}
