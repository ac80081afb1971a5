//! Repayment schedule generation
//!
//! `TermUnit::Days` loans use flat division of principal plus interest, one
//! installment per day. `TermUnit::Months` loans are amortized at a monthly
//! rate of `rate / 12`. In both cases installments are rounded to cents and
//! the final installment absorbs the residual so the schedule sums exactly to
//! the total repayable.

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::error::{LendingError, LendingResult};
use crate::loan::{Installment, InstallmentStatus, TermUnit};

const MONEY_DECIMAL_PLACES: u32 = 2;

const MONTHS_PER_YEAR: Decimal = dec!(12);

/// Hard ceiling on installments per schedule, whatever the configured limits.
pub const MAX_TERM_COUNT: u32 = 3650;

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

fn truncate_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::ToZero)
}

fn validate_inputs(principal: Decimal, rate: Decimal, term_count: u32) -> LendingResult<()> {
    if principal <= Decimal::ZERO {
        return Err(LendingError::Validation(format!(
            "principal must be positive, got {}",
            principal
        )));
    }
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(LendingError::Validation(format!(
            "interest rate must be within [0, 1], got {}",
            rate
        )));
    }
    if term_count == 0 {
        return Err(LendingError::Validation(
            "term must be at least 1".to_string(),
        ));
    }
    if term_count > MAX_TERM_COUNT {
        return Err(LendingError::Validation(format!(
            "term must be at most {}, got {}",
            MAX_TERM_COUNT, term_count
        )));
    }
    Ok(())
}

/// Unrounded amortized payment for `term_count` months.
fn amortized_payment(principal: Decimal, rate: Decimal, term_count: u32) -> LendingResult<Decimal> {
    let monthly_rate = rate / MONTHS_PER_YEAR;
    if monthly_rate.is_zero() {
        return Ok(principal / Decimal::from(term_count));
    }

    let overflow = || {
        LendingError::Validation(format!(
            "term of {} months is out of range for a rate of {}",
            term_count, rate
        ))
    };
    let growth = (Decimal::ONE + monthly_rate)
        .checked_powu(term_count as u64)
        .ok_or_else(overflow)?;
    principal
        .checked_mul(monthly_rate)
        .and_then(|value| value.checked_mul(growth))
        .and_then(|value| value.checked_div(growth - Decimal::ONE))
        .ok_or_else(overflow)
}

/// Per-installment amount before the final residual adjustment.
///
/// Rounded to the nearest cent unless that would make the first
/// `term_count - 1` installments exceed the total, in which case it is
/// truncated so the final installment never goes negative.
fn regular_installment(
    principal: Decimal,
    rate: Decimal,
    term_count: u32,
    term_unit: TermUnit,
    total: Decimal,
) -> LendingResult<Decimal> {
    let exact = match term_unit {
        TermUnit::Days => total / Decimal::from(term_count),
        TermUnit::Months => amortized_payment(principal, rate, term_count)?,
    };

    let rounded = round_money(exact);
    if rounded * Decimal::from(term_count - 1) > total {
        Ok(truncate_money(exact))
    } else {
        Ok(rounded)
    }
}

/// Total the borrower repays over the life of the loan, rounded to cents.
pub fn total_repayable(
    principal: Decimal,
    rate: Decimal,
    term_count: u32,
    term_unit: TermUnit,
) -> LendingResult<Decimal> {
    validate_inputs(principal, rate, term_count)?;

    let total = match term_unit {
        TermUnit::Days => principal * (Decimal::ONE + rate),
        TermUnit::Months => amortized_payment(principal, rate, term_count)? * Decimal::from(term_count),
    };
    Ok(round_money(total))
}

/// Build the installment schedule for a loan disbursed at `disbursement_date`.
///
/// Installment `i` (1-based) is due `i` days or `i` calendar months after
/// disbursement. Identical inputs always produce identical schedules.
pub fn build_schedule(
    principal: Decimal,
    rate: Decimal,
    term_count: u32,
    term_unit: TermUnit,
    disbursement_date: DateTime<Utc>,
) -> LendingResult<Vec<Installment>> {
    let total = total_repayable(principal, rate, term_count, term_unit)?;
    let regular = regular_installment(principal, rate, term_count, term_unit, total)?;
    let final_amount = total - regular * Decimal::from(term_count - 1);

    (1..=term_count)
        .map(|sequence| {
            let due_date = due_date_for(disbursement_date, sequence, term_unit)?;
            let amount = if sequence == term_count {
                final_amount
            } else {
                regular
            };
            Ok(Installment {
                sequence,
                due_date,
                amount,
                status: InstallmentStatus::Pending,
                paid_date: None,
                paid_amount: None,
            })
        })
        .collect()
}

fn due_date_for(
    disbursement_date: DateTime<Utc>,
    sequence: u32,
    term_unit: TermUnit,
) -> LendingResult<DateTime<Utc>> {
    let due = match term_unit {
        TermUnit::Days => disbursement_date.checked_add_signed(Duration::days(sequence as i64)),
        TermUnit::Months => disbursement_date.checked_add_months(Months::new(sequence)),
    };
    due.ok_or_else(|| {
        LendingError::Validation(format!(
            "due date for installment {} is out of range",
            sequence
        ))
    })
}
