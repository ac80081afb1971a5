//! PostgreSQL-backed store
//!
//! Schedules, risk snapshots and disbursement receipts are kept as JSONB on
//! the loan row; everything queried or filtered on is a real column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::time::Duration;
use uuid::Uuid;

use super::{LoanStore, StorageError};
use crate::loan::{DisbursementDetails, Installment, Loan, LoanFilter, LoanStatus, TermUnit};
use crate::models::{CachedCreditScore, Role, User, VerificationStatus};
use crate::retry::RetryPolicy;
use crate::services::risk_engine::RiskAssessment;

const UNIQUE_VIOLATION: &str = "23505";

/// Create a connection pool, retrying transient connection failures.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    retry: &RetryPolicy,
) -> Result<PgPool, StorageError> {
    let pool = retry
        .run("database connect", |_| true, move || {
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .connect(database_url)
        })
        .await?;

    tracing::info!("Database connection pool created successfully");

    Ok(pool)
}

/// Loan store on a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and migrate in one step.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        retry: &RetryPolicy,
    ) -> Result<Self, StorageError> {
        let store = Self::new(create_pool(database_url, max_connections, retry).await?);
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(format!("migration failed: {}", e)))?;

        tracing::info!("Database migrations completed successfully");

        Ok(())
    }

    /// Check database connectivity
    pub async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == UNIQUE_VIOLATION)
}

fn to_i32(value: u32, field: &str) -> Result<i32, StorageError> {
    i32::try_from(value).map_err(|_| StorageError::Corrupt(format!("{} out of range: {}", field, value)))
}

#[derive(FromRow)]
struct LoanRow {
    id: Uuid,
    borrower_id: Uuid,
    lender_id: Option<Uuid>,
    amount: Decimal,
    term: i32,
    term_unit: TermUnit,
    interest_rate: Decimal,
    purpose: String,
    status: LoanStatus,
    repayment_schedule: Json<Vec<Installment>>,
    risk_assessment: Json<RiskAssessment>,
    credit_score_at_application: i32,
    rejection_reason: Option<String>,
    disbursement: Option<Json<DisbursementDetails>>,
    total_repayment_amount: Decimal,
    total_amount_paid: Decimal,
    remaining_amount: Decimal,
    application_date: DateTime<Utc>,
    approval_date: Option<DateTime<Utc>>,
    disbursement_date: Option<DateTime<Utc>>,
    completion_date: Option<DateTime<Utc>>,
    default_date: Option<DateTime<Utc>>,
    last_repayment_date: Option<DateTime<Utc>>,
    next_repayment_date: Option<DateTime<Utc>>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoanRow> for Loan {
    type Error = StorageError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(Loan {
            id: row.id,
            borrower_id: row.borrower_id,
            lender_id: row.lender_id,
            amount: row.amount,
            term: u32::try_from(row.term)
                .map_err(|_| StorageError::Corrupt(format!("loan {} has term {}", row.id, row.term)))?,
            term_unit: row.term_unit,
            interest_rate: row.interest_rate,
            purpose: row.purpose,
            status: row.status,
            repayment_schedule: row.repayment_schedule.0,
            risk_assessment: row.risk_assessment.0,
            credit_score_at_application: u16::try_from(row.credit_score_at_application)
                .map_err(|_| {
                    StorageError::Corrupt(format!(
                        "loan {} has credit score {}",
                        row.id, row.credit_score_at_application
                    ))
                })?,
            rejection_reason: row.rejection_reason,
            disbursement: row.disbursement.map(|json| json.0),
            total_repayment_amount: row.total_repayment_amount,
            total_amount_paid: row.total_amount_paid,
            remaining_amount: row.remaining_amount,
            application_date: row.application_date,
            approval_date: row.approval_date,
            disbursement_date: row.disbursement_date,
            completion_date: row.completion_date,
            default_date: row.default_date,
            last_repayment_date: row.last_repayment_date,
            next_repayment_date: row.next_repayment_date,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    email_verified: bool,
    phone_verified: bool,
    identity_verified: bool,
    loan_history: Vec<Uuid>,
    history_version: i64,
    credit_score: Option<i32>,
    credit_score_version: Option<i64>,
    credit_score_computed_at: Option<DateTime<Utc>>,
    payment_account_ref: Option<String>,
    payment_customer_ref: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| StorageError::Corrupt(format!("user {} has role '{}'", row.id, row.role)))?;

        let credit_score = match (
            row.credit_score,
            row.credit_score_version,
            row.credit_score_computed_at,
        ) {
            (Some(score), Some(history_version), Some(computed_at)) => Some(CachedCreditScore {
                score: u16::try_from(score).map_err(|_| {
                    StorageError::Corrupt(format!("user {} has credit score {}", row.id, score))
                })?,
                history_version,
                computed_at,
            }),
            _ => None,
        };

        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            role,
            verification_status: VerificationStatus {
                email: row.email_verified,
                phone: row.phone_verified,
                identity: row.identity_verified,
            },
            loan_history: row.loan_history,
            history_version: row.history_version,
            credit_score,
            payment_account_ref: row.payment_account_ref,
            payment_customer_ref: row.payment_customer_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl LoanStore for PgStore {
    async fn find_loan(&self, id: Uuid) -> Result<Option<Loan>, StorageError> {
        let row = sqlx::query_as::<_, LoanRow>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Loan::try_from).transpose()
    }

    async fn insert_loan(&self, loan: &Loan) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO loans (
                id, borrower_id, lender_id, amount, term, term_unit, interest_rate,
                purpose, status, repayment_schedule, risk_assessment,
                credit_score_at_application, rejection_reason, disbursement,
                total_repayment_amount, total_amount_paid, remaining_amount,
                application_date, approval_date, disbursement_date, completion_date,
                default_date, last_repayment_date, next_repayment_date, version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            "#,
        )
        .bind(loan.id)
        .bind(loan.borrower_id)
        .bind(loan.lender_id)
        .bind(loan.amount)
        .bind(to_i32(loan.term, "term")?)
        .bind(loan.term_unit)
        .bind(loan.interest_rate)
        .bind(&loan.purpose)
        .bind(loan.status)
        .bind(Json(&loan.repayment_schedule))
        .bind(Json(&loan.risk_assessment))
        .bind(i32::from(loan.credit_score_at_application))
        .bind(&loan.rejection_reason)
        .bind(loan.disbursement.as_ref().map(Json))
        .bind(loan.total_repayment_amount)
        .bind(loan.total_amount_paid)
        .bind(loan.remaining_amount)
        .bind(loan.application_date)
        .bind(loan.approval_date)
        .bind(loan.disbursement_date)
        .bind(loan.completion_date)
        .bind(loan.default_date)
        .bind(loan.last_repayment_date)
        .bind(loan.next_repayment_date)
        .bind(loan.version)
        .bind(loan.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Duplicate(loan.id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_loan(&self, loan: &Loan, expected_version: i64) -> Result<Loan, StorageError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, LoanRow>(
            r#"
            UPDATE loans SET
                lender_id = $2,
                status = $3,
                repayment_schedule = $4,
                rejection_reason = $5,
                disbursement = $6,
                total_amount_paid = $7,
                remaining_amount = $8,
                approval_date = $9,
                disbursement_date = $10,
                completion_date = $11,
                default_date = $12,
                last_repayment_date = $13,
                next_repayment_date = $14,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $15
            RETURNING *
            "#,
        )
        .bind(loan.id)
        .bind(loan.lender_id)
        .bind(loan.status)
        .bind(Json(&loan.repayment_schedule))
        .bind(&loan.rejection_reason)
        .bind(loan.disbursement.as_ref().map(Json))
        .bind(loan.total_amount_paid)
        .bind(loan.remaining_amount)
        .bind(loan.approval_date)
        .bind(loan.disbursement_date)
        .bind(loan.completion_date)
        .bind(loan.default_date)
        .bind(loan.last_repayment_date)
        .bind(loan.next_repayment_date)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some(row) => {
                let saved = Loan::try_from(row)?;
                sqlx::query(
                    "UPDATE users SET history_version = history_version + 1, updated_at = NOW() WHERE id = $1",
                )
                .bind(saved.borrower_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(saved)
            }
            None => {
                tx.rollback().await?;
                let exists: Option<(i64,)> =
                    sqlx::query_as("SELECT version FROM loans WHERE id = $1")
                        .bind(loan.id)
                        .fetch_optional(&self.pool)
                        .await?;
                match exists {
                    Some(_) => Err(StorageError::Conflict {
                        loan_id: loan.id,
                        expected: expected_version,
                    }),
                    None => Err(StorageError::LoanNotFound(loan.id)),
                }
            }
        }
    }

    async fn delete_loan(&self, id: Uuid) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM loans WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::LoanNotFound(id));
        }
        Ok(())
    }

    async fn list_loans(&self, filter: &LoanFilter) -> Result<Vec<Loan>, StorageError> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM loans WHERE 1=1");

        if let Some(borrower_id) = filter.borrower_id {
            query.push(" AND borrower_id = ").push_bind(borrower_id);
        }
        if let Some(lender_id) = filter.lender_id {
            query.push(" AND lender_id = ").push_bind(lender_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if filter.unassigned {
            query.push(" AND lender_id IS NULL");
        }
        query.push(" ORDER BY application_date DESC");

        let rows = query
            .build_query_as::<LoanRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Loan::try_from).collect()
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(User::try_from).transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        let cached = user.credit_score.as_ref();
        let result = sqlx::query(
            r#"
            INSERT INTO users (
                id, name, email, role, email_verified, phone_verified, identity_verified,
                loan_history, history_version, credit_score, credit_score_version,
                credit_score_computed_at, payment_account_ref, payment_customer_ref,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.verification_status.email)
        .bind(user.verification_status.phone)
        .bind(user.verification_status.identity)
        .bind(&user.loan_history)
        .bind(user.history_version)
        .bind(cached.map(|c| i32::from(c.score)))
        .bind(cached.map(|c| c.history_version))
        .bind(cached.map(|c| c.computed_at))
        .bind(&user.payment_account_ref)
        .bind(&user.payment_customer_ref)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Duplicate(user.id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn append_loan_to_user_history(
        &self,
        user_id: Uuid,
        loan_id: Uuid,
    ) -> Result<i64, StorageError> {
        let version: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET loan_history = array_append(loan_history, $2),
                history_version = history_version + 1,
                updated_at = NOW()
            WHERE id = $1
            RETURNING history_version
            "#,
        )
        .bind(user_id)
        .bind(loan_id)
        .fetch_optional(&self.pool)
        .await?;

        version
            .map(|(version,)| version)
            .ok_or(StorageError::UserNotFound(user_id))
    }

    async fn save_credit_score(
        &self,
        user_id: Uuid,
        score: &CachedCreditScore,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET credit_score = $2,
                credit_score_version = $3,
                credit_score_computed_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(i32::from(score.score))
        .bind(score.history_version)
        .bind(score.computed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UserNotFound(user_id));
        }
        Ok(())
    }
}
