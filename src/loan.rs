//! Loan models for the lending core
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::services::risk_engine::RiskAssessment;

/// Loan status enum
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Funded,
    Active,
    Completed,
    Defaulted,
}

impl LoanStatus {
    /// No transition leaves these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Completed | LoanStatus::Rejected | LoanStatus::Defaulted
        )
    }

    /// Principal has been disbursed and repayment is open.
    pub fn is_in_repayment(&self) -> bool {
        matches!(self, LoanStatus::Funded | LoanStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Funded => "funded",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of `Loan::term`; selects the schedule generation law.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "term_unit", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TermUnit {
    /// Flat division, one installment per day
    Days,
    /// Amortized, one installment per month
    Months,
}

impl TermUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermUnit::Days => "days",
            TermUnit::Months => "months",
        }
    }
}

/// Installment status
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
}

/// One scheduled repayment obligation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Installment {
    /// 1-based position in the schedule
    pub sequence: u32,
    pub due_date: DateTime<Utc>,
    pub amount: Decimal,
    pub status: InstallmentStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub paid_amount: Option<Decimal>,
}

impl Installment {
    /// Pending or overdue; still owed.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self.status, InstallmentStatus::Paid)
    }

    /// Paid no later than its due date.
    pub fn paid_on_time(&self) -> bool {
        matches!(self.status, InstallmentStatus::Paid)
            && self.paid_date.map_or(false, |paid| paid <= self.due_date)
    }
}

/// Payment processor receipt for the principal transfer
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DisbursementDetails {
    pub transaction_id: String,
    pub date: DateTime<Utc>,
}

/// Loan model
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Loan {
    pub id: Uuid,
    pub borrower_id: Uuid,
    pub lender_id: Option<Uuid>,
    /// Principal in currency units
    pub amount: Decimal,
    pub term: u32,
    pub term_unit: TermUnit,
    /// Decimal in [0, 1]; flat over the loan for day terms, annual for month terms
    pub interest_rate: Decimal,
    pub purpose: String,
    pub status: LoanStatus,
    pub repayment_schedule: Vec<Installment>,
    pub risk_assessment: RiskAssessment,
    pub credit_score_at_application: u16,
    pub rejection_reason: Option<String>,
    pub disbursement: Option<DisbursementDetails>,
    pub total_repayment_amount: Decimal,
    pub total_amount_paid: Decimal,
    pub remaining_amount: Decimal,
    pub application_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    pub disbursement_date: Option<DateTime<Utc>>,
    pub completion_date: Option<DateTime<Utc>>,
    pub default_date: Option<DateTime<Utc>>,
    pub last_repayment_date: Option<DateTime<Utc>>,
    pub next_repayment_date: Option<DateTime<Utc>>,
    /// Optimistic concurrency token; bumped by every successful save
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Earliest installment still owed, if any.
    pub fn current_installment(&self) -> Option<&Installment> {
        self.repayment_schedule
            .iter()
            .filter(|installment| installment.is_outstanding())
            .min_by_key(|installment| (installment.due_date, installment.sequence))
    }

    pub(crate) fn current_installment_mut(&mut self) -> Option<&mut Installment> {
        self.repayment_schedule
            .iter_mut()
            .filter(|installment| installment.is_outstanding())
            .min_by_key(|installment| (installment.due_date, installment.sequence))
    }

    /// True iff an installment still owed was due before `as_of`.
    pub fn is_overdue(&self, as_of: DateTime<Utc>) -> bool {
        self.repayment_schedule
            .iter()
            .any(|installment| installment.is_outstanding() && installment.due_date < as_of)
    }

    pub fn outstanding_installments(&self) -> usize {
        self.repayment_schedule
            .iter()
            .filter(|installment| installment.is_outstanding())
            .count()
    }
}

/// Request to apply for a new loan
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApplyLoanRequest {
    pub amount: Decimal,
    #[validate(range(min = 1, message = "term must be at least 1"))]
    pub term: u32,
    pub term_unit: TermUnit,
    #[validate(length(min = 1, max = 200, message = "purpose is required"))]
    pub purpose: String,
}

/// Underwriting decision for a pending loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ProcessAction {
    Approve,
    Reject { reason: String },
}

/// Filters for listing loans
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoanFilter {
    pub borrower_id: Option<Uuid>,
    pub lender_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    /// Only loans with no lender assigned
    #[serde(default)]
    pub unassigned: bool,
}

impl LoanFilter {
    pub fn matches(&self, loan: &Loan) -> bool {
        self.borrower_id.map_or(true, |id| loan.borrower_id == id)
            && self.lender_id.map_or(true, |id| loan.lender_id == Some(id))
            && self.status.map_or(true, |status| loan.status == status)
            && (!self.unassigned || loan.lender_id.is_none())
    }
}
