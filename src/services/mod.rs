//! Pure lending computations: scoring, risk, pricing and schedules

pub mod credit_score;
pub mod interest_rate;
pub mod risk_engine;
pub mod schedule;

pub use credit_score::{compute_credit_score, CreditScoreResult};
pub use interest_rate::{eligibility_for_credit_score, rate_for_risk_score, EligibilityEstimate};
pub use risk_engine::{assess_loan_risk, RiskAssessment, RiskRecommendation};
pub use schedule::{build_schedule, total_repayable};
