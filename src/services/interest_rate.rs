//! Interest rate policy
//!
//! The binding rate for a loan comes from its risk score alone. The credit
//! score band table below is an estimate for borrowers browsing offers and is
//! never consulted when a loan is created.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::services::credit_score::score_band_label;
use crate::services::risk_engine::{MAX_RISK_SCORE, MIN_RISK_SCORE};

/// Rate charged to a perfect risk score
const BASE_RATE: Decimal = dec!(0.10);

/// Added in full at a risk score of zero
const RISK_PREMIUM: Decimal = dec!(0.15);

/// Ceiling on any rate
const MAX_RATE: Decimal = dec!(0.30);

/// Basis point precision
const RATE_DECIMAL_PLACES: u32 = 4;

/// Rate for a 0-100 risk score, as a decimal fraction rounded to basis points.
///
/// `min(0.10 + (100 - score) / 100 * 0.15, 0.30)`
pub fn rate_for_risk_score(risk_score: f64) -> Decimal {
    let score = risk_score.clamp(MIN_RISK_SCORE, MAX_RISK_SCORE);
    let score = Decimal::from_f64(score).unwrap_or(Decimal::ZERO);

    let rate = BASE_RATE + (dec!(100) - score) / dec!(100) * RISK_PREMIUM;
    rate.min(MAX_RATE)
        .round_dp_with_strategy(RATE_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Non-binding offer estimate for a credit score
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EligibilityEstimate {
    pub credit_score: u16,
    pub band: String,
    pub max_amount: Decimal,
    /// Annual rate in percent, e.g. 6.5
    pub interest_rate_percent: Decimal,
    pub eligible_terms_months: Vec<u32>,
    /// Always true; the actual rate is set from the risk assessment at apply
    pub is_estimate: bool,
}

/// Look up the band table for `credit_score`.
pub fn eligibility_for_credit_score(credit_score: u16) -> EligibilityEstimate {
    let (max_amount, rate, terms) = match credit_score {
        750..=u16::MAX => (dec!(50000), dec!(6.5), vec![12, 24, 36, 48, 60]),
        700..=749 => (dec!(35000), dec!(8.5), vec![12, 24, 36, 48]),
        650..=699 => (dec!(20000), dec!(11), vec![12, 24, 36]),
        600..=649 => (dec!(10000), dec!(14), vec![12, 24]),
        _ => (dec!(5000), dec!(18), vec![12]),
    };

    EligibilityEstimate {
        credit_score,
        band: score_band_label(credit_score).to_string(),
        max_amount,
        interest_rate_percent: rate,
        eligible_terms_months: terms,
        is_estimate: true,
    }
}
