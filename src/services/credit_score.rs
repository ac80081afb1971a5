//! Credit scoring model
//!
//! Computes a 300-850 credit score from a borrower's account age and loan
//! history with a weighted additive model around a base of 600. Everything
//! here is a pure function of its inputs; the reference time is passed in so
//! results are reproducible.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::loan::{InstallmentStatus, Loan};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Starting point before any factor is applied
const BASE_SCORE: f64 = 600.0;

/// Lowest score the model can emit
pub const MIN_CREDIT_SCORE: u16 = 300;

/// Highest score the model can emit
pub const MAX_CREDIT_SCORE: u16 = 850;

/// Weight for on-time payment ratio
const WEIGHT_PAYMENT_HISTORY: f64 = 0.35;

/// Weight for outstanding balance on open loans
const WEIGHT_UTILIZATION: f64 = 0.30;

/// Weight for account age
const WEIGHT_CREDIT_HISTORY: f64 = 0.15;

/// Weight for recent applications
const WEIGHT_NEW_CREDIT: f64 = 0.10;

/// Weight for diversity of loan purposes
const WEIGHT_CREDIT_MIX: f64 = 0.10;

/// Applications inside this window count as new credit
const NEW_CREDIT_WINDOW_DAYS: i64 = 30;

// ============================================================================
// Data Models
// ============================================================================

/// Per-factor values on a 0-100 scale, before weighting
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ScoreDetails {
    pub payment_history: f64,
    pub utilization: f64,
    pub credit_history: f64,
    pub new_credit: f64,
    pub credit_mix: f64,
}

/// Output of [`compute_credit_score`]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreditScoreResult {
    pub score: u16,
    pub factors: Vec<String>,
    pub details: ScoreDetails,
}

// ============================================================================
// Scoring
// ============================================================================

/// Score a borrower from account age and loan history as of `as_of`.
///
/// An empty history is valid input: every history-dependent factor is zero,
/// so a brand-new account scores exactly the base.
pub fn compute_credit_score(
    account_age_years: f64,
    loan_history: &[Loan],
    as_of: DateTime<Utc>,
) -> CreditScoreResult {
    let details = ScoreDetails {
        payment_history: payment_history_factor(loan_history),
        utilization: utilization_factor(loan_history),
        credit_history: credit_history_factor(account_age_years),
        new_credit: new_credit_factor(loan_history, as_of),
        credit_mix: credit_mix_factor(loan_history),
    };

    let weighted = details.payment_history * WEIGHT_PAYMENT_HISTORY
        + details.utilization * WEIGHT_UTILIZATION
        + details.credit_history * WEIGHT_CREDIT_HISTORY
        + details.new_credit * WEIGHT_NEW_CREDIT
        + details.credit_mix * WEIGHT_CREDIT_MIX;

    let score = (BASE_SCORE + weighted)
        .clamp(MIN_CREDIT_SCORE as f64, MAX_CREDIT_SCORE as f64)
        .round() as u16;

    CreditScoreResult {
        score,
        factors: score_factors(score),
        details,
    }
}

/// Share of settled installments paid on or before their due date, 0-100.
///
/// Only paid and overdue installments are considered; pending ones have not
/// been tested yet.
pub fn payment_history_factor(loan_history: &[Loan]) -> f64 {
    let mut considered = 0usize;
    let mut on_time = 0usize;

    for installment in loan_history.iter().flat_map(|loan| &loan.repayment_schedule) {
        match installment.status {
            InstallmentStatus::Paid | InstallmentStatus::Overdue => {
                considered += 1;
                if installment.paid_on_time() {
                    on_time += 1;
                }
            }
            InstallmentStatus::Pending => {}
        }
    }

    if considered == 0 {
        0.0
    } else {
        on_time as f64 / considered as f64 * 100.0
    }
}

/// Outstanding share of principal across open loans, 0-100.
fn utilization_factor(loan_history: &[Loan]) -> f64 {
    let (total_amount, total_paid) = loan_history
        .iter()
        .filter(|loan| loan.status.is_in_repayment())
        .fold((Decimal::ZERO, Decimal::ZERO), |(amount, paid), loan| {
            (amount + loan.amount, paid + loan.total_amount_paid)
        });

    if total_amount.is_zero() {
        return 0.0;
    }

    let repaid_ratio = (total_paid / total_amount).to_f64().unwrap_or(0.0);
    (1.0 - repaid_ratio) * 100.0
}

/// Full marks at five years of account age.
fn credit_history_factor(account_age_years: f64) -> f64 {
    (account_age_years.max(0.0) * 20.0).min(100.0)
}

/// Penalizes applications made in the last 30 days.
fn new_credit_factor(loan_history: &[Loan], as_of: DateTime<Utc>) -> f64 {
    if loan_history.is_empty() {
        return 0.0;
    }

    let window_start = as_of - Duration::days(NEW_CREDIT_WINDOW_DAYS);
    let recent = loan_history
        .iter()
        .filter(|loan| loan.application_date >= window_start)
        .count();

    (100.0 - 20.0 * recent as f64).max(0.0)
}

/// Rewards distinct loan purposes, capped at four.
fn credit_mix_factor(loan_history: &[Loan]) -> f64 {
    let purposes: HashSet<String> = loan_history
        .iter()
        .map(|loan| loan.purpose.trim().to_lowercase())
        .collect();

    (purposes.len() as f64 * 25.0).min(100.0)
}

/// Qualitative factor list for the band a score falls in.
pub fn score_factors(score: u16) -> Vec<String> {
    let factors: &[&str] = match score {
        0..=579 => &[
            "Poor payment history",
            "High loan utilization",
            "Limited credit history",
        ],
        580..=669 => &[
            "Recent late payments",
            "Multiple recent loan applications",
            "Limited credit mix",
        ],
        670..=739 => &[
            "Good payment history",
            "Moderate loan utilization",
            "Growing credit history",
        ],
        740..=799 => &[
            "Excellent payment history",
            "Low loan utilization",
            "Diverse credit mix",
        ],
        _ => &[
            "Perfect payment history",
            "Very low loan utilization",
            "Extensive credit history",
            "Optimal credit mix",
        ],
    };

    factors.iter().map(|factor| factor.to_string()).collect()
}

/// Short label shown next to a score
pub fn score_band_label(score: u16) -> &'static str {
    match score {
        800..=u16::MAX => "Excellent",
        740..=799 => "Very Good",
        670..=739 => "Good",
        580..=669 => "Fair",
        _ => "Poor",
    }
}
