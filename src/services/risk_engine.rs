//! Loan risk assessment
//!
//! Turns a borrower's credit score and history into a 0-100 risk score for a
//! specific application, higher meaning safer. The assessment is advisory: it
//! is captured once at application time and stored on the loan unchanged.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::loan::Loan;
use crate::services::credit_score::{
    payment_history_factor, CreditScoreResult, MAX_CREDIT_SCORE, MIN_CREDIT_SCORE,
};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Points available from the credit score
const CREDIT_SCORE_POINTS: f64 = 40.0;

/// Multiplier applied to the 0-100 payment history factor
const PAYMENT_HISTORY_MULTIPLIER: f64 = 0.3;

/// A request above this multiple of the largest previous loan is penalized
const AMOUNT_JUMP_MULTIPLIER: Decimal = dec!(1.5);

/// Penalty for an outsized request
const AMOUNT_JUMP_PENALTY: f64 = 10.0;

/// Penalty per open loan
const ACTIVE_LOAN_PENALTY: f64 = 5.0;

/// Maximum risk score
pub const MAX_RISK_SCORE: f64 = 100.0;

/// Minimum risk score
pub const MIN_RISK_SCORE: f64 = 0.0;

// ============================================================================
// Data Models
// ============================================================================

/// Underwriting recommendation tier
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskRecommendation {
    /// 80 and above
    Approve,
    /// 60 up to 80
    ConsiderApproval,
    /// 40 up to 60
    AdditionalVerification,
    /// Below 40
    NotRecommended,
}

impl RiskRecommendation {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RiskRecommendation::Approve
        } else if score >= 60.0 {
            RiskRecommendation::ConsiderApproval
        } else if score >= 40.0 {
            RiskRecommendation::AdditionalVerification
        } else {
            RiskRecommendation::NotRecommended
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskRecommendation::Approve => "Low Risk - Approve",
            RiskRecommendation::ConsiderApproval => "Moderate Risk - Consider Approval",
            RiskRecommendation::AdditionalVerification => {
                "High Risk - Additional Verification Required"
            }
            RiskRecommendation::NotRecommended => "Very High Risk - Not Recommended",
        }
    }
}

impl std::fmt::Display for RiskRecommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Point-in-time risk snapshot attached to a loan at application
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RiskAssessment {
    /// 0-100, higher is safer
    pub score: f64,
    pub recommendation: RiskRecommendation,
    pub factors: Vec<String>,
    /// Credit score the assessment was derived from
    pub credit_score: u16,
}

// ============================================================================
// Assessment
// ============================================================================

/// Assess one application against the borrower's credit result and history.
///
/// `requested_term` does not move the score today; it is accepted so callers
/// pass the full application and the snapshot stays comparable if it ever does.
pub fn assess_loan_risk(
    credit: &CreditScoreResult,
    loan_history: &[Loan],
    requested_amount: Decimal,
    _requested_term: u32,
) -> RiskAssessment {
    let mut factors = Vec::new();
    let mut score = 0.0;

    let score_span = (MAX_CREDIT_SCORE - MIN_CREDIT_SCORE) as f64;
    score += (credit.score as f64 - MIN_CREDIT_SCORE as f64) / score_span * CREDIT_SCORE_POINTS;

    score += payment_history_factor(loan_history) * PAYMENT_HISTORY_MULTIPLIER;

    let max_previous = loan_history
        .iter()
        .map(|loan| loan.amount)
        .max()
        .unwrap_or(Decimal::ZERO)
        .max(Decimal::ZERO);
    if requested_amount > max_previous * AMOUNT_JUMP_MULTIPLIER {
        factors.push("Loan amount significantly higher than previous loans".to_string());
        score -= AMOUNT_JUMP_PENALTY;
    }

    let active_loans = loan_history
        .iter()
        .filter(|loan| loan.status.is_in_repayment())
        .count();
    if active_loans > 0 {
        factors.push(format!("Has {} active loan(s)", active_loans));
        score -= ACTIVE_LOAN_PENALTY * active_loans as f64;
    }

    let score = score.clamp(MIN_RISK_SCORE, MAX_RISK_SCORE);

    tracing::debug!(
        score,
        credit_score = credit.score,
        active_loans,
        "loan risk assessed"
    );

    RiskAssessment {
        score,
        recommendation: RiskRecommendation::from_score(score),
        factors,
        credit_score: credit.score,
    }
}
