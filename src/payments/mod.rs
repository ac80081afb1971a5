//! Payment execution
//!
//! The lifecycle controller moves money only through [`PaymentGateway`]:
//! principal out to the borrower on disbursement, repayments in from the
//! borrower. Amounts cross this boundary as integer minor units; conversion
//! from `Decimal` happens here and nowhere else.

mod http;
mod simulated;

pub use http::HttpPaymentGateway;
pub use simulated::{PaymentKind, PaymentRecord, SimulatedPaymentGateway};

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Payment errors
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("invalid payment amount: {0}")]
    InvalidAmount(String),

    #[error("no payment account on file for {0}")]
    MissingAccount(String),

    #[error("payment processor unavailable: {0}")]
    Transport(String),
}

/// Processor-assigned transaction reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound payment rail
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Push `amount_minor` to a connected account.
    async fn transfer_funds(
        &self,
        destination: &str,
        amount_minor: i64,
        memo: &str,
    ) -> Result<TransactionId, PaymentError>;

    /// Pull `amount_minor` from a customer's stored payment method.
    async fn charge_customer(
        &self,
        customer: &str,
        amount_minor: i64,
        memo: &str,
    ) -> Result<TransactionId, PaymentError>;
}

/// Convert a currency amount to positive minor units (cents), rounding half
/// away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentError> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }

    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .filter(|minor| *minor > 0)
        .ok_or_else(|| PaymentError::InvalidAmount(format!("{} is not representable in cents", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_minor_units() {
        assert_eq!(to_minor_units(dec!(1200)).unwrap(), 120_000);
        assert_eq!(to_minor_units(dec!(105.50)).unwrap(), 10_550);
        assert_eq!(to_minor_units(dec!(0.015)).unwrap(), 2);
    }

    #[test]
    fn test_to_minor_units_rejects_non_positive() {
        assert!(matches!(
            to_minor_units(Decimal::ZERO),
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(to_minor_units(dec!(-5)).is_err());
        assert!(to_minor_units(dec!(0.004)).is_err());
    }
}
