//! JSON-over-HTTP payment processor client

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{PaymentError, PaymentGateway, TransactionId};
use crate::config::Config;

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    destination: &'a str,
    amount: i64,
    currency: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    customer: &'a str,
    amount: i64,
    currency: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaymentReceipt {
    id: String,
}

/// Payment gateway talking to a processor's REST API with a bearer key
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    currency: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        currency: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            currency: currency.into(),
        }
    }

    /// Build from configuration; `None` when no processor URL is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let base_url = config.payment_api_url.as_ref()?;
        Some(Self::new(
            base_url.clone(),
            config.payment_api_key.clone(),
            config.payment_currency.clone(),
            config.lending().external_call_timeout,
        ))
    }

    async fn submit<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<TransactionId, PaymentError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))
            .map_err(transport)?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PaymentError::Declined(format!("{}: {}", status, detail)));
        }
        if !status.is_success() {
            return Err(PaymentError::Transport(format!(
                "payment processor returned {}",
                status
            )));
        }

        let receipt: PaymentReceipt = response
            .json()
            .await
            .context("malformed payment processor response")
            .map_err(transport)?;

        Ok(TransactionId(receipt.id))
    }
}

fn transport(err: anyhow::Error) -> PaymentError {
    PaymentError::Transport(format!("{:#}", err))
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn transfer_funds(
        &self,
        destination: &str,
        amount_minor: i64,
        memo: &str,
    ) -> Result<TransactionId, PaymentError> {
        let body = TransferRequest {
            destination,
            amount: amount_minor,
            currency: &self.currency,
            description: memo,
        };
        let transaction = self.submit("transfers", &body).await?;
        tracing::info!(%transaction, amount_minor, "Transfer submitted");
        Ok(transaction)
    }

    async fn charge_customer(
        &self,
        customer: &str,
        amount_minor: i64,
        memo: &str,
    ) -> Result<TransactionId, PaymentError> {
        let body = ChargeRequest {
            customer,
            amount: amount_minor,
            currency: &self.currency,
            description: memo,
        };
        let transaction = self.submit("charges", &body).await?;
        tracing::info!(%transaction, amount_minor, "Charge submitted");
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = HttpPaymentGateway::new(
            "https://payments.example.com/v1/",
            None,
            "usd",
            Duration::from_secs(1),
        );
        assert_eq!(gateway.base_url, "https://payments.example.com/v1");
    }

    #[test]
    fn test_charge_body_shape() {
        let body = ChargeRequest {
            customer: "cus_123",
            amount: 10_550,
            currency: "usd",
            description: "Loan repayment",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["customer"], "cus_123");
        assert_eq!(json["amount"], 10_550);
    }
}
