//! Loan service layer - lifecycle transitions for peer-to-peer loans
//!
//! Every transition follows the same shape: load the loan and its version,
//! check the actor and the current state, stage all changes on a clone, run
//! any payment, then commit with a single versioned save. A failure anywhere
//! before the save leaves the stored loan untouched.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use crate::config::LendingConfig;
use crate::error::{LendingError, LendingResult};
use crate::loan::{
    ApplyLoanRequest, DisbursementDetails, InstallmentStatus, Loan, LoanFilter, LoanStatus,
    ProcessAction,
};
use crate::models::{CachedCreditScore, Role, User};
use crate::notifications::{NotificationData, NotificationKind, Notifier};
use crate::payments::{to_minor_units, PaymentError, PaymentGateway};
use crate::services::credit_score::compute_credit_score;
use crate::services::interest_rate::{
    eligibility_for_credit_score, rate_for_risk_score, EligibilityEstimate,
};
use crate::services::risk_engine::assess_loan_risk;
use crate::services::schedule::{build_schedule, total_repayable};
use crate::storage::LoanStore;

/// Loan service for managing the loan lifecycle
pub struct LoanService<S, P, N> {
    store: Arc<S>,
    payments: Arc<P>,
    notifier: Arc<N>,
    config: LendingConfig,
}

impl<S, P, N> Clone for LoanService<S, P, N> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            payments: self.payments.clone(),
            notifier: self.notifier.clone(),
            config: self.config.clone(),
        }
    }
}

fn ensure_cents(amount: Decimal, what: &str) -> LendingResult<()> {
    if amount.normalize().scale() > 2 {
        return Err(LendingError::Validation(format!(
            "{} must have at most two decimal places, got {}",
            what, amount
        )));
    }
    Ok(())
}

fn loan_data(loan: &Loan) -> NotificationData {
    let mut data = NotificationData::new();
    data.insert("loan_id".to_string(), loan.id.to_string());
    data.insert("amount".to_string(), loan.amount.to_string());
    data
}

impl<S, P, N> LoanService<S, P, N>
where
    S: LoanStore,
    P: PaymentGateway,
    N: Notifier,
{
    /// Create a new loan service instance
    pub fn new(store: Arc<S>, payments: Arc<P>, notifier: Arc<N>, config: LendingConfig) -> Self {
        Self {
            store,
            payments,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LendingConfig {
        &self.config
    }

    // ========================================================================
    // Collaborator plumbing
    // ========================================================================

    /// Run a collaborator call under the external-call timeout.
    async fn call<T, E, F>(&self, operation: &'static str, fut: F) -> LendingResult<T>
    where
        F: Future<Output = Result<T, E>>,
        LendingError: From<E>,
    {
        match tokio::time::timeout(self.config.external_call_timeout, fut).await {
            Ok(result) => result.map_err(LendingError::from),
            Err(_) => {
                tracing::warn!(operation, "External call timed out");
                Err(LendingError::Timeout { operation })
            }
        }
    }

    async fn load_loan(&self, loan_id: Uuid) -> LendingResult<Loan> {
        self.call("load loan", self.store.find_loan(loan_id))
            .await?
            .ok_or_else(|| LendingError::loan_not_found(loan_id))
    }

    async fn load_user(&self, user_id: Uuid) -> LendingResult<User> {
        self.call("load user", self.store.find_user(user_id))
            .await?
            .ok_or_else(|| LendingError::user_not_found(user_id))
    }

    async fn load_history(&self, borrower_id: Uuid) -> LendingResult<Vec<Loan>> {
        let filter = LoanFilter {
            borrower_id: Some(borrower_id),
            ..LoanFilter::default()
        };
        self.call("list loans", self.store.list_loans(&filter)).await
    }

    /// Single conditional write for a staged transition.
    async fn commit(&self, staged: &Loan, expected_version: i64) -> LendingResult<Loan> {
        let result = self
            .call("save loan", self.store.save_loan(staged, expected_version))
            .await;
        if let Err(LendingError::Conflict { loan_id, expected }) = &result {
            tracing::warn!(
                loan_id = %loan_id,
                expected_version = expected,
                "Loan modified concurrently, transition rejected"
            );
        }
        result
    }

    /// Best-effort delivery; failures are logged and dropped.
    async fn notify(&self, user_id: Uuid, kind: NotificationKind, data: NotificationData) {
        let delivery = tokio::time::timeout(
            self.config.external_call_timeout,
            self.notifier.notify(user_id, kind, data),
        )
        .await;

        match delivery {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(user_id = %user_id, ?kind, error = %err, "Notification failed")
            }
            Err(_) => tracing::warn!(user_id = %user_id, ?kind, "Notification timed out"),
        }
    }

    /// Cache a freshly computed score; a failed write only costs a recompute.
    async fn cache_credit_score(&self, user_id: Uuid, score: u16, history_version: i64) {
        let cached = CachedCreditScore {
            score,
            history_version,
            computed_at: Utc::now(),
        };
        if let Err(err) = self
            .call("save credit score", self.store.save_credit_score(user_id, &cached))
            .await
        {
            tracing::warn!(user_id = %user_id, error = %err, "Failed to cache credit score");
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Submit a loan application for the acting borrower.
    pub async fn apply(&self, actor_id: Uuid, request: ApplyLoanRequest) -> LendingResult<Loan> {
        request.validate()?;

        let actor = self.load_user(actor_id).await?;
        if !actor.role.can_apply() {
            return Err(LendingError::Forbidden(format!(
                "{} accounts cannot apply for loans",
                actor.role.as_str()
            )));
        }
        if !actor.verification_status.email {
            return Err(LendingError::Forbidden(
                "email must be verified before applying".to_string(),
            ));
        }

        if request.amount < self.config.min_loan_amount
            || request.amount > self.config.max_loan_amount
        {
            return Err(LendingError::Validation(format!(
                "amount must be between {} and {}, got {}",
                self.config.min_loan_amount, self.config.max_loan_amount, request.amount
            )));
        }
        ensure_cents(request.amount, "amount")?;
        let max_term = self.config.max_term(request.term_unit);
        if request.term > max_term {
            return Err(LendingError::Validation(format!(
                "term must be at most {} {}, got {}",
                max_term,
                request.term_unit.as_str(),
                request.term
            )));
        }
        if request.purpose.trim().is_empty() {
            return Err(LendingError::Validation("purpose is required".to_string()));
        }

        let history = self.load_history(actor.id).await?;
        let now = Utc::now();

        let credit = compute_credit_score(actor.account_age_years(now), &history, now);
        let risk = assess_loan_risk(&credit, &history, request.amount, request.term);
        let interest_rate = rate_for_risk_score(risk.score);
        let total = total_repayable(request.amount, interest_rate, request.term, request.term_unit)?;
        // Anything accepted here must be disbursable later.
        build_schedule(request.amount, interest_rate, request.term, request.term_unit, now)?;

        let loan = Loan {
            id: Uuid::new_v4(),
            borrower_id: actor.id,
            lender_id: None,
            amount: request.amount,
            term: request.term,
            term_unit: request.term_unit,
            interest_rate,
            purpose: request.purpose.trim().to_string(),
            status: LoanStatus::Pending,
            repayment_schedule: Vec::new(),
            risk_assessment: risk,
            credit_score_at_application: credit.score,
            rejection_reason: None,
            disbursement: None,
            total_repayment_amount: total,
            total_amount_paid: Decimal::ZERO,
            remaining_amount: total,
            application_date: now,
            approval_date: None,
            disbursement_date: None,
            completion_date: None,
            default_date: None,
            last_repayment_date: None,
            next_repayment_date: None,
            version: 0,
            updated_at: now,
        };

        self.call("insert loan", self.store.insert_loan(&loan)).await?;

        let history_version = match self
            .call(
                "append loan history",
                self.store.append_loan_to_user_history(actor.id, loan.id),
            )
            .await
        {
            Ok(version) => version,
            Err(err) => {
                if let Err(undo) = self.call("delete loan", self.store.delete_loan(loan.id)).await {
                    tracing::error!(
                        loan_id = %loan.id,
                        error = %undo,
                        "Failed to remove loan after history update failed"
                    );
                }
                return Err(err);
            }
        };

        let mut updated_history = history;
        updated_history.push(loan.clone());
        let refreshed = compute_credit_score(actor.account_age_years(now), &updated_history, now);
        self.cache_credit_score(actor.id, refreshed.score, history_version)
            .await;

        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %actor.id,
            amount = %loan.amount,
            interest_rate = %loan.interest_rate,
            risk_score = loan.risk_assessment.score,
            "Loan application received"
        );

        let mut data = loan_data(&loan);
        data.insert("term".to_string(), loan.term.to_string());
        data.insert("term_unit".to_string(), loan.term_unit.as_str().to_string());
        data.insert("interest_rate".to_string(), loan.interest_rate.to_string());
        self.notify(actor.id, NotificationKind::LoanApplicationReceived, data)
            .await;

        Ok(loan)
    }

    /// Approve or reject a pending application.
    pub async fn process(
        &self,
        actor_id: Uuid,
        loan_id: Uuid,
        action: ProcessAction,
    ) -> LendingResult<Loan> {
        if let ProcessAction::Reject { reason } = &action {
            if reason.trim().is_empty() {
                return Err(LendingError::Validation(
                    "rejection reason is required".to_string(),
                ));
            }
        }

        let actor = self.load_user(actor_id).await?;
        if !actor.role.can_underwrite() {
            return Err(LendingError::Forbidden(
                "only administrators can process applications".to_string(),
            ));
        }

        let loan = self.load_loan(loan_id).await?;
        if loan.status != LoanStatus::Pending {
            return Err(LendingError::Precondition(format!(
                "loan {} is {}, expected pending",
                loan.id, loan.status
            )));
        }

        let mut staged = loan.clone();
        let kind = match &action {
            ProcessAction::Approve => {
                staged.status = LoanStatus::Approved;
                staged.approval_date = Some(Utc::now());
                NotificationKind::LoanApproved
            }
            ProcessAction::Reject { reason } => {
                staged.status = LoanStatus::Rejected;
                staged.rejection_reason = Some(reason.trim().to_string());
                NotificationKind::LoanRejected
            }
        };

        let saved = self.commit(&staged, loan.version).await?;

        tracing::info!(loan_id = %saved.id, status = %saved.status, "Loan application processed");

        let mut data = loan_data(&saved);
        if let Some(reason) = &saved.rejection_reason {
            data.insert("reason".to_string(), reason.clone());
        }
        self.notify(saved.borrower_id, kind, data).await;

        Ok(saved)
    }

    /// Release principal for an approved loan and open repayment.
    pub async fn disburse(&self, actor_id: Uuid, loan_id: Uuid) -> LendingResult<Loan> {
        let actor = self.load_user(actor_id).await?;
        if !actor.role.can_fund() {
            return Err(LendingError::Forbidden(
                "only lenders or administrators can disburse loans".to_string(),
            ));
        }

        let loan = self.load_loan(loan_id).await?;
        if loan.status != LoanStatus::Approved {
            return Err(LendingError::Precondition(format!(
                "loan {} is {}, expected approved",
                loan.id, loan.status
            )));
        }
        if actor.role == Role::Lender && loan.lender_id.map_or(false, |id| id != actor.id) {
            return Err(LendingError::Forbidden(
                "loan is assigned to another lender".to_string(),
            ));
        }

        let borrower = self.load_user(loan.borrower_id).await?;
        let destination = borrower
            .payment_account_ref
            .clone()
            .ok_or_else(|| PaymentError::MissingAccount(borrower.id.to_string()))?;

        let now = Utc::now();
        let schedule = build_schedule(loan.amount, loan.interest_rate, loan.term, loan.term_unit, now)?;
        let amount_minor = to_minor_units(loan.amount)?;

        let memo = format!("Loan disbursement {}", loan.id);
        let transaction = self
            .call(
                "transfer funds",
                self.payments.transfer_funds(&destination, amount_minor, &memo),
            )
            .await?;

        let mut staged = loan.clone();
        staged.status = LoanStatus::Funded;
        staged.disbursement_date = Some(now);
        staged.disbursement = Some(DisbursementDetails {
            transaction_id: transaction.to_string(),
            date: now,
        });
        if actor.role == Role::Lender {
            staged.lender_id = Some(actor.id);
        }
        staged.next_repayment_date = schedule.first().map(|installment| installment.due_date);
        staged.repayment_schedule = schedule;

        let saved = self.commit(&staged, loan.version).await.map_err(|err| {
            tracing::error!(
                loan_id = %loan.id,
                transaction = %transaction,
                error = %err,
                "Funds transferred but loan was not updated"
            );
            err
        })?;

        tracing::info!(
            loan_id = %saved.id,
            transaction = %transaction,
            amount = %saved.amount,
            "Loan disbursed"
        );

        Ok(saved)
    }

    /// Pay the current installment of a funded or active loan.
    pub async fn repay(&self, actor_id: Uuid, loan_id: Uuid, amount: Decimal) -> LendingResult<Loan> {
        let loan = self.load_loan(loan_id).await?;
        if loan.borrower_id != actor_id {
            return Err(LendingError::Forbidden(
                "only the borrower can repay this loan".to_string(),
            ));
        }
        if !loan.status.is_in_repayment() {
            return Err(LendingError::Precondition(format!(
                "loan {} is {}, expected funded or active",
                loan.id, loan.status
            )));
        }
        let current = loan.current_installment().cloned().ok_or_else(|| {
            LendingError::Precondition(format!("loan {} has no outstanding installments", loan.id))
        })?;

        if amount <= Decimal::ZERO {
            return Err(LendingError::Validation(format!(
                "repayment must be positive, got {}",
                amount
            )));
        }
        ensure_cents(amount, "repayment")?;
        let minimum = current.amount.min(loan.remaining_amount);
        if amount < minimum {
            return Err(LendingError::Validation(format!(
                "repayment of {} is below the installment due of {}",
                amount, minimum
            )));
        }
        if amount > loan.remaining_amount {
            return Err(LendingError::Validation(format!(
                "repayment of {} exceeds the remaining balance of {}",
                amount, loan.remaining_amount
            )));
        }

        let borrower = self.load_user(loan.borrower_id).await?;
        let customer = borrower
            .payment_customer_ref
            .clone()
            .ok_or_else(|| PaymentError::MissingAccount(borrower.id.to_string()))?;
        let amount_minor = to_minor_units(amount)?;

        // Last look before money moves; the versioned save is still the arbiter.
        let latest = self.load_loan(loan_id).await?;
        if latest.version != loan.version {
            tracing::warn!(
                loan_id = %loan.id,
                expected_version = loan.version,
                found_version = latest.version,
                "Loan changed before charge, repayment abandoned"
            );
            return Err(LendingError::Conflict {
                loan_id: loan.id,
                expected: loan.version,
            });
        }

        let memo = format!("Loan repayment {} installment {}", loan.id, current.sequence);
        let transaction = self
            .call(
                "charge customer",
                self.payments.charge_customer(&customer, amount_minor, &memo),
            )
            .await?;

        let now = Utc::now();
        let mut staged = loan.clone();
        if let Some(installment) = staged.current_installment_mut() {
            installment.status = InstallmentStatus::Paid;
            installment.paid_date = Some(now);
            installment.paid_amount = Some(amount);
        }
        staged.total_amount_paid += amount;
        staged.remaining_amount = staged.total_repayment_amount - staged.total_amount_paid;
        staged.last_repayment_date = Some(now);

        if staged.remaining_amount <= Decimal::ZERO {
            staged.status = LoanStatus::Completed;
            staged.completion_date = Some(now);
            staged.next_repayment_date = None;
            for installment in staged
                .repayment_schedule
                .iter_mut()
                .filter(|installment| installment.is_outstanding())
            {
                installment.status = InstallmentStatus::Paid;
                installment.paid_date = Some(now);
                installment.paid_amount = Some(Decimal::ZERO);
            }
        } else {
            staged.status = LoanStatus::Active;
            staged.next_repayment_date = staged
                .current_installment()
                .map(|installment| installment.due_date);
        }

        let saved = self.commit(&staged, loan.version).await.map_err(|err| {
            tracing::error!(
                loan_id = %loan.id,
                transaction = %transaction,
                amount = %amount,
                error = %err,
                "Repayment charged but loan was not updated; borrower may be double charged on retry and needs a manual refund"
            );
            err
        })?;

        tracing::info!(
            loan_id = %saved.id,
            transaction = %transaction,
            amount = %amount,
            remaining = %saved.remaining_amount,
            status = %saved.status,
            "Repayment recorded"
        );

        let mut data = loan_data(&saved);
        data.insert("payment_amount".to_string(), amount.to_string());
        data.insert("remaining_amount".to_string(), saved.remaining_amount.to_string());
        data.insert("transaction_id".to_string(), transaction.to_string());
        self.notify(saved.borrower_id, NotificationKind::PaymentConfirmation, data)
            .await;

        if saved.status == LoanStatus::Completed {
            let mut data = loan_data(&saved);
            data.insert("total_paid".to_string(), saved.total_amount_paid.to_string());
            self.notify(saved.borrower_id, NotificationKind::LoanCompleted, data)
                .await;
        }

        Ok(saved)
    }

    /// Flip past-due pending installments to overdue and warn the borrower.
    ///
    /// Returns how many installments changed.
    pub async fn mark_overdue_installments(
        &self,
        loan_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> LendingResult<usize> {
        let loan = self.load_loan(loan_id).await?;
        if !loan.status.is_in_repayment() {
            return Ok(0);
        }

        let mut staged = loan.clone();
        let mut flipped = 0;
        let mut amount_due = Decimal::ZERO;
        for installment in staged.repayment_schedule.iter_mut() {
            if installment.status == InstallmentStatus::Pending && installment.due_date < as_of {
                installment.status = InstallmentStatus::Overdue;
                flipped += 1;
            }
            if installment.status == InstallmentStatus::Overdue {
                amount_due += installment.amount;
            }
        }
        if flipped == 0 {
            return Ok(0);
        }

        let saved = self.commit(&staged, loan.version).await?;

        tracing::warn!(loan_id = %saved.id, flipped, amount_due = %amount_due, "Installments overdue");

        let mut data = loan_data(&saved);
        data.insert("overdue_installments".to_string(), flipped.to_string());
        data.insert("amount_due".to_string(), amount_due.to_string());
        self.notify(saved.borrower_id, NotificationKind::LatePayment, data)
            .await;

        Ok(flipped)
    }

    /// Mark an overdue loan as defaulted.
    pub async fn declare_default(
        &self,
        actor_id: Uuid,
        loan_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> LendingResult<Loan> {
        let actor = self.load_user(actor_id).await?;
        if !actor.role.can_underwrite() {
            return Err(LendingError::Forbidden(
                "only administrators can declare defaults".to_string(),
            ));
        }

        let loan = self.load_loan(loan_id).await?;
        if !loan.status.is_in_repayment() {
            return Err(LendingError::Precondition(format!(
                "loan {} is {}, expected funded or active",
                loan.id, loan.status
            )));
        }
        if !loan.is_overdue(as_of) {
            return Err(LendingError::Precondition(format!(
                "loan {} has no overdue installments",
                loan.id
            )));
        }

        let mut staged = loan.clone();
        for installment in staged.repayment_schedule.iter_mut() {
            if installment.status == InstallmentStatus::Pending && installment.due_date < as_of {
                installment.status = InstallmentStatus::Overdue;
            }
        }
        staged.status = LoanStatus::Defaulted;
        staged.default_date = Some(as_of);
        staged.next_repayment_date = None;

        let saved = self.commit(&staged, loan.version).await?;

        tracing::warn!(
            loan_id = %saved.id,
            remaining = %saved.remaining_amount,
            "Loan declared in default"
        );

        Ok(saved)
    }

    /// Remind the borrower when the current installment falls due within
    /// `horizon` of `as_of`. Returns whether a reminder was sent.
    pub async fn send_payment_reminders(
        &self,
        loan_id: Uuid,
        as_of: DateTime<Utc>,
        horizon: Duration,
    ) -> LendingResult<bool> {
        let loan = self.load_loan(loan_id).await?;
        if !loan.status.is_in_repayment() {
            return Ok(false);
        }

        let Some(current) = loan.current_installment() else {
            return Ok(false);
        };
        let due_soon = current.status == InstallmentStatus::Pending
            && current.due_date >= as_of
            && current.due_date <= as_of + horizon;
        if !due_soon {
            return Ok(false);
        }

        let mut data = loan_data(&loan);
        data.insert("installment".to_string(), current.sequence.to_string());
        data.insert("amount_due".to_string(), current.amount.to_string());
        data.insert("due_date".to_string(), current.due_date.to_rfc3339());
        self.notify(loan.borrower_id, NotificationKind::PaymentReminder, data)
            .await;

        Ok(true)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// True iff an outstanding installment of the loan was due before `as_of`.
    pub async fn is_overdue(&self, loan_id: Uuid, as_of: DateTime<Utc>) -> LendingResult<bool> {
        Ok(self.load_loan(loan_id).await?.is_overdue(as_of))
    }

    pub async fn get_loan(&self, loan_id: Uuid) -> LendingResult<Loan> {
        self.load_loan(loan_id).await
    }

    pub async fn loans_for_borrower(&self, borrower_id: Uuid) -> LendingResult<Vec<Loan>> {
        self.load_history(borrower_id).await
    }

    pub async fn loans_for_lender(&self, lender_id: Uuid) -> LendingResult<Vec<Loan>> {
        let filter = LoanFilter {
            lender_id: Some(lender_id),
            ..LoanFilter::default()
        };
        self.call("list loans", self.store.list_loans(&filter)).await
    }

    /// Pending applications no lender has picked up yet.
    pub async fn available_loans(&self) -> LendingResult<Vec<Loan>> {
        let filter = LoanFilter {
            status: Some(LoanStatus::Pending),
            unassigned: true,
            ..LoanFilter::default()
        };
        self.call("list loans", self.store.list_loans(&filter)).await
    }

    /// Current credit score, recomputed only when the loan history changed
    /// since the cached value.
    pub async fn borrower_credit_score(&self, user_id: Uuid) -> LendingResult<u16> {
        let user = self.load_user(user_id).await?;
        if let Some(score) = user.fresh_credit_score() {
            return Ok(score);
        }

        let history = self.load_history(user.id).await?;
        let now = Utc::now();
        let credit = compute_credit_score(user.account_age_years(now), &history, now);
        self.cache_credit_score(user.id, credit.score, user.history_version)
            .await;

        tracing::debug!(user_id = %user.id, score = credit.score, "Credit score recomputed");
        Ok(credit.score)
    }

    /// Non-binding offer table for a user's current credit score.
    pub async fn eligibility_estimate(&self, user_id: Uuid) -> LendingResult<EligibilityEstimate> {
        let score = self.borrower_credit_score(user_id).await?;
        Ok(eligibility_for_credit_score(score))
    }
}
