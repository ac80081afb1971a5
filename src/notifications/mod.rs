//! Borrower notifications
//!
//! Delivery is best-effort: the lifecycle controller logs and drops any
//! [`NotificationError`], so a failed notice never undoes a committed
//! transition.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::retry::RetryPolicy;

/// Notification templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LoanApplicationReceived,
    LoanApproved,
    LoanRejected,
    PaymentConfirmation,
    LoanCompleted,
    PaymentReminder,
    LatePayment,
}

impl NotificationKind {
    /// Subject line for the rendered message
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationKind::LoanApplicationReceived => "Loan Application Received",
            NotificationKind::LoanApproved => "Loan Application Approved",
            NotificationKind::LoanRejected => "Loan Application Status Update",
            NotificationKind::PaymentConfirmation => "Payment Confirmation",
            NotificationKind::LoanCompleted => "Loan Successfully Repaid",
            NotificationKind::PaymentReminder => "Payment Reminder",
            NotificationKind::LatePayment => "Late Payment Notice",
        }
    }
}

/// Template variables, e.g. `loan_id`, `amount`, `due_date`
pub type NotificationData = BTreeMap<String, String>;

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

impl NotificationError {
    fn is_transient(&self) -> bool {
        matches!(self, NotificationError::Transport(_))
    }
}

/// Outbound notification hook
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        data: NotificationData,
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    user_id: Uuid,
    kind: NotificationKind,
    subject: &'static str,
    data: &'a NotificationData,
}

/// Posts each notification as JSON to a relay that renders and sends it
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    /// `attempt_timeout` bounds each POST, not the whole retry sequence.
    pub fn new(url: impl Into<String>, attempt_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client: Client::builder()
                .timeout(attempt_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.into(),
            retry,
        }
    }

    /// Build from configuration; `None` when no relay is configured.
    ///
    /// Attempts are sized so the whole retry sequence finishes inside the
    /// external-call timeout the lifecycle controller wraps around `notify`.
    pub fn from_config(config: &Config) -> Option<Self> {
        let url = config.notify_webhook_url.as_ref()?;
        let retry = config.retry_policy();
        let attempt_timeout =
            retry.attempt_timeout_within(config.lending().external_call_timeout);
        Some(Self::new(url.clone(), attempt_timeout, retry))
    }

    async fn post_once(&self, payload: &WebhookPayload<'_>) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(NotificationError::Transport(format!("relay returned {}", status)));
        }
        if !status.is_success() {
            return Err(NotificationError::Rejected(format!("relay returned {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        data: NotificationData,
    ) -> Result<(), NotificationError> {
        let payload = WebhookPayload {
            user_id,
            kind,
            subject: kind.subject(),
            data: &data,
        };

        let payload = &payload;
        self.retry
            .run("notification", NotificationError::is_transient, move || {
                self.post_once(payload)
            })
            .await
    }
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        data: NotificationData,
    ) -> Result<(), NotificationError> {
        tracing::info!(%user_id, ?kind, ?data, "{}", kind.subject());
        Ok(())
    }
}

/// One notification captured by [`MemoryNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub data: NotificationData,
}

/// Keeps notifications in memory; can be told to fail
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: Mutex<bool>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }

    /// Kinds delivered to `user_id`, oldest first.
    pub async fn kinds_for(&self, user_id: Uuid) -> Vec<NotificationKind> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|sent| sent.user_id == user_id)
            .map(|sent| sent.kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        data: NotificationData,
    ) -> Result<(), NotificationError> {
        if *self.failing.lock().await {
            return Err(NotificationError::Transport("relay offline".to_string()));
        }
        self.sent.lock().await.push(SentNotification { user_id, kind, data });
        Ok(())
    }
}
