//! In-process payment gateway for development and tests
//!
//! Records every call and answers with `sim_` transaction ids. Failures and
//! latency can be injected to exercise the controller's error paths.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PaymentError, PaymentGateway, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentKind {
    Transfer,
    Charge,
}

/// One accepted payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub kind: PaymentKind,
    /// Destination account or charged customer
    pub party: String,
    pub amount_minor: i64,
    pub memo: String,
    pub transaction_id: TransactionId,
}

#[derive(Default)]
struct SimulatorState {
    records: Vec<PaymentRecord>,
    failure: Option<String>,
}

/// Gateway that settles instantly in memory
#[derive(Default)]
pub struct SimulatedPaymentGateway {
    state: Mutex<SimulatorState>,
    latency: Option<Duration>,
}

impl SimulatedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Decline every call with `reason` until cleared with `None`.
    pub async fn set_failure(&self, reason: Option<&str>) {
        self.state.lock().await.failure = reason.map(str::to_string);
    }

    /// Payments accepted so far, oldest first.
    pub async fn records(&self) -> Vec<PaymentRecord> {
        self.state.lock().await.records.clone()
    }

    async fn settle(
        &self,
        kind: PaymentKind,
        party: &str,
        amount_minor: i64,
        memo: &str,
    ) -> Result<TransactionId, PaymentError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if let Some(reason) = &state.failure {
            return Err(PaymentError::Declined(reason.clone()));
        }
        if amount_minor <= 0 {
            return Err(PaymentError::InvalidAmount(amount_minor.to_string()));
        }

        let transaction_id = TransactionId(format!("sim_{}", Uuid::new_v4().simple()));
        tracing::info!(
            ?kind,
            party,
            amount_minor,
            transaction = %transaction_id,
            "Simulated payment settled"
        );

        state.records.push(PaymentRecord {
            kind,
            party: party.to_string(),
            amount_minor,
            memo: memo.to_string(),
            transaction_id: transaction_id.clone(),
        });
        Ok(transaction_id)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn transfer_funds(
        &self,
        destination: &str,
        amount_minor: i64,
        memo: &str,
    ) -> Result<TransactionId, PaymentError> {
        self.settle(PaymentKind::Transfer, destination, amount_minor, memo)
            .await
    }

    async fn charge_customer(
        &self,
        customer: &str,
        amount_minor: i64,
        memo: &str,
    ) -> Result<TransactionId, PaymentError> {
        self.settle(PaymentKind::Charge, customer, amount_minor, memo)
            .await
    }
}
