//! User models for the lending core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Score assigned before any history has been evaluated.
pub const DEFAULT_CREDIT_SCORE: u16 = 600;

/// User roles
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Borrower,
    Lender,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Borrower => "borrower",
            Role::Lender => "lender",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "borrower" => Some(Role::Borrower),
            "lender" => Some(Role::Lender),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// May submit loan applications.
    pub fn can_apply(&self) -> bool {
        matches!(self, Role::Borrower)
    }

    /// May approve or reject pending applications.
    pub fn can_underwrite(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// May release principal to a borrower.
    pub fn can_fund(&self) -> bool {
        matches!(self, Role::Lender | Role::Admin)
    }
}

/// Contact and identity verification flags
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationStatus {
    pub email: bool,
    pub phone: bool,
    pub identity: bool,
}

/// Credit score derived from loan history, cached against the history version
/// it was computed from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CachedCreditScore {
    pub score: u16,
    pub history_version: i64,
    pub computed_at: DateTime<Utc>,
}

/// User model
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub verification_status: VerificationStatus,
    /// Loan ids in application order
    pub loan_history: Vec<Uuid>,
    /// Bumped whenever one of the user's loans is appended or saved;
    /// invalidates `credit_score`
    pub history_version: i64,
    pub credit_score: Option<CachedCreditScore>,
    /// Destination account for disbursements
    pub payment_account_ref: Option<String>,
    /// Customer reference charged for repayments
    pub payment_customer_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            role,
            verification_status: VerificationStatus::default(),
            loan_history: Vec::new(),
            history_version: 0,
            credit_score: None,
            payment_account_ref: None,
            payment_customer_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Account age in fractional years at `as_of`.
    pub fn account_age_years(&self, as_of: DateTime<Utc>) -> f64 {
        let seconds = (as_of - self.created_at).num_seconds().max(0) as f64;
        seconds / (365.0 * 24.0 * 60.0 * 60.0)
    }

    /// Cached score if it still matches the current history, else `None`.
    pub fn fresh_credit_score(&self) -> Option<u16> {
        self.credit_score
            .as_ref()
            .filter(|cached| cached.history_version == self.history_version)
            .map(|cached| cached.score)
    }

    /// Last known score, stale or not, falling back to the default.
    pub fn display_credit_score(&self) -> u16 {
        self.credit_score
            .as_ref()
            .map(|cached| cached.score)
            .unwrap_or(DEFAULT_CREDIT_SCORE)
    }
}

/// Public view of a user, without payment references
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub credit_score: u16,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            credit_score: user.display_credit_score(),
            id: user.id,
            name: user.name,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Borrower.can_apply());
        assert!(!Role::Lender.can_apply());
        assert!(Role::Admin.can_underwrite());
        assert!(!Role::Borrower.can_underwrite());
        assert!(Role::Lender.can_fund());
        assert!(Role::Admin.can_fund());
        assert!(!Role::Borrower.can_fund());
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::Borrower, Role::Lender, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("investor"), None);
    }

    #[test]
    fn test_account_age_years() {
        let mut user = User::new("Ada", "ada@example.com", Role::Borrower);
        let now = Utc::now();
        user.created_at = now - Duration::days(730);
        let age = user.account_age_years(now);
        assert!((age - 2.0).abs() < 0.01);

        user.created_at = now + Duration::days(1);
        assert_eq!(user.account_age_years(now), 0.0);
    }

    #[test]
    fn test_cached_score_goes_stale_on_history_change() {
        let mut user = User::new("Ada", "ada@example.com", Role::Borrower);
        assert_eq!(user.fresh_credit_score(), None);
        assert_eq!(user.display_credit_score(), DEFAULT_CREDIT_SCORE);

        user.credit_score = Some(CachedCreditScore {
            score: 712,
            history_version: 0,
            computed_at: Utc::now(),
        });
        assert_eq!(user.fresh_credit_score(), Some(712));

        user.history_version += 1;
        assert_eq!(user.fresh_credit_score(), None);
        assert_eq!(user.display_credit_score(), 712);
    }

    #[test]
    fn test_user_response_hides_payment_refs() {
        let mut user = User::new("Ada", "ada@example.com", Role::Borrower);
        user.payment_account_ref = Some("acct_123".to_string());
        let json = serde_json::to_string(&UserResponse::from(user)).unwrap();
        assert!(!json.contains("acct_123"));
        assert!(json.contains("\"credit_score\":600"));
    }
}
