//! Lendcore Library
//!
//! Credit scoring, risk assessment and loan lifecycle management for a
//! peer-to-peer lending marketplace. Storage, payment execution and
//! notification delivery are pluggable behind async traits.

pub mod config;
pub mod error;
pub mod loan;
pub mod loan_service;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod retry;
pub mod services;
pub mod storage;
pub mod telemetry;

pub use config::{Config, LendingConfig};
pub use error::{LendingError, LendingResult};
pub use loan::{ApplyLoanRequest, Loan, LoanStatus, ProcessAction, TermUnit};
pub use loan_service::LoanService;
pub use models::{Role, User};
