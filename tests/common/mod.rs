//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use lendcore::config::LendingConfig;
use lendcore::loan::{
    ApplyLoanRequest, Installment, InstallmentStatus, Loan, LoanStatus, ProcessAction, TermUnit,
};
use lendcore::models::{Role, User};
use lendcore::notifications::MemoryNotifier;
use lendcore::payments::SimulatedPaymentGateway;
use lendcore::services::risk_engine::{RiskAssessment, RiskRecommendation};
use lendcore::storage::{InMemoryStore, LoanStore};
use lendcore::LoanService;

pub type TestService = LoanService<InMemoryStore, SimulatedPaymentGateway, MemoryNotifier>;

pub struct Harness {
    pub service: TestService,
    pub store: Arc<InMemoryStore>,
    pub payments: Arc<SimulatedPaymentGateway>,
    pub notifier: Arc<MemoryNotifier>,
    pub admin: User,
    pub lender: User,
    pub borrower: User,
}

pub async fn harness() -> Harness {
    harness_with_config(LendingConfig::default()).await
}

pub async fn harness_with_config(config: LendingConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let payments = Arc::new(SimulatedPaymentGateway::new());
    let notifier = Arc::new(MemoryNotifier::new());

    let admin = add_user(store.as_ref(), Role::Admin).await;
    let lender = add_user(store.as_ref(), Role::Lender).await;
    let borrower = add_user(store.as_ref(), Role::Borrower).await;

    let service = LoanService::new(store.clone(), payments.clone(), notifier.clone(), config);

    Harness {
        service,
        store,
        payments,
        notifier,
        admin,
        lender,
        borrower,
    }
}

/// Insert a verified user with payment references on file.
pub async fn add_user<S: LoanStore>(store: &S, role: Role) -> User {
    let id = Uuid::new_v4();
    let mut user = User::new(
        format!("{} {}", role.as_str(), id.simple()),
        format!("{}@example.com", id.simple()),
        role,
    );
    user.id = id;
    user.verification_status.email = true;
    user.payment_account_ref = Some(format!("acct_{}", id.simple()));
    user.payment_customer_ref = Some(format!("cus_{}", id.simple()));
    store.insert_user(&user).await.expect("insert user");
    user
}

pub fn apply_request(amount: Decimal, term: u32, term_unit: TermUnit) -> ApplyLoanRequest {
    ApplyLoanRequest {
        amount,
        term,
        term_unit,
        purpose: "Working capital".to_string(),
    }
}

/// Apply, approve and disburse a loan for the harness borrower.
pub async fn funded_loan(h: &Harness, request: ApplyLoanRequest) -> Loan {
    let loan = h.service.apply(h.borrower.id, request).await.expect("apply");
    h.service
        .process(h.admin.id, loan.id, ProcessAction::Approve)
        .await
        .expect("approve");
    h.service
        .disburse(h.lender.id, loan.id)
        .await
        .expect("disburse")
}

pub fn neutral_assessment() -> RiskAssessment {
    RiskAssessment {
        score: 50.0,
        recommendation: RiskRecommendation::from_score(50.0),
        factors: Vec::new(),
        credit_score: 600,
    }
}

/// Loan record for scoring tests, not tied to any store.
pub fn history_loan(amount: Decimal, status: LoanStatus, purpose: &str, applied: DateTime<Utc>) -> Loan {
    Loan {
        id: Uuid::new_v4(),
        borrower_id: Uuid::nil(),
        lender_id: None,
        amount,
        term: 3,
        term_unit: TermUnit::Months,
        interest_rate: Decimal::new(15, 2),
        purpose: purpose.to_string(),
        status,
        repayment_schedule: Vec::new(),
        risk_assessment: neutral_assessment(),
        credit_score_at_application: 600,
        rejection_reason: None,
        disbursement: None,
        total_repayment_amount: amount,
        total_amount_paid: Decimal::ZERO,
        remaining_amount: amount,
        application_date: applied,
        approval_date: None,
        disbursement_date: None,
        completion_date: None,
        default_date: None,
        last_repayment_date: None,
        next_repayment_date: None,
        version: 0,
        updated_at: applied,
    }
}

/// Installment due `due_in_days` from `base`, optionally paid `paid_after_days`
/// after its due date.
pub fn installment(
    sequence: u32,
    base: DateTime<Utc>,
    due_in_days: i64,
    status: InstallmentStatus,
    paid_after_days: Option<i64>,
) -> Installment {
    let due_date = base + Duration::days(due_in_days);
    Installment {
        sequence,
        due_date,
        amount: Decimal::new(10_000, 2),
        status,
        paid_date: paid_after_days.map(|days| due_date + Duration::days(days)),
        paid_amount: paid_after_days.map(|_| Decimal::new(10_000, 2)),
    }
}
