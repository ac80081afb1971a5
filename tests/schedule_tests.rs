//! Repayment Schedule Tests
//!
//! Schedules must sum exactly to the total repayable, fall due on the right
//! calendar days, and never depend on anything but their inputs.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use lendcore::loan::{InstallmentStatus, TermUnit};
use lendcore::services::schedule::{build_schedule, total_repayable, MAX_TERM_COUNT};
use lendcore::LendingError;

fn disbursed() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 15, 9, 30, 0).unwrap()
}

fn sum(amounts: impl Iterator<Item = Decimal>) -> Decimal {
    amounts.sum()
}

// ============================================================================
// Flat (day-term) schedules
// ============================================================================

#[test]
fn test_flat_schedule_sums_to_total() {
    for (principal, rate, days) in [
        (dec!(100), dec!(0.10), 7),
        (dec!(1000), dec!(0.2323), 30),
        (dec!(2500.55), dec!(0.175), 45),
        (dec!(50000), dec!(0.25), 90),
    ] {
        let schedule = build_schedule(principal, rate, days, TermUnit::Days, disbursed()).unwrap();
        let expected = (principal * (Decimal::ONE + rate)).round_dp(2);

        assert_eq!(schedule.len(), days as usize);
        assert_eq!(sum(schedule.iter().map(|i| i.amount)), expected);
        assert_eq!(
            total_repayable(principal, rate, days, TermUnit::Days).unwrap(),
            expected
        );
    }
}

#[test]
fn test_flat_schedule_due_dates_are_consecutive_days() {
    let schedule = build_schedule(dec!(700), dec!(0.10), 7, TermUnit::Days, disbursed()).unwrap();
    for (index, installment) in schedule.iter().enumerate() {
        assert_eq!(installment.sequence, index as u32 + 1);
        assert_eq!(
            installment.due_date,
            disbursed() + Duration::days(index as i64 + 1)
        );
        assert_eq!(installment.status, InstallmentStatus::Pending);
        assert!(installment.paid_date.is_none());
    }
}

#[test]
fn test_single_installment_is_whole_total() {
    let schedule = build_schedule(dec!(1000), dec!(0.15), 1, TermUnit::Days, disbursed()).unwrap();
    assert_eq!(schedule.len(), 1);
    assert_eq!(schedule[0].amount, dec!(1150.00));
}

// ============================================================================
// Amortized (month-term) schedules
// ============================================================================

#[test]
fn test_amortized_twelve_months() {
    let schedule =
        build_schedule(dec!(1200), dec!(0.10), 12, TermUnit::Months, disbursed()).unwrap();

    assert!(schedule[..11].iter().all(|i| i.amount == dec!(105.50)));
    assert_eq!(schedule[11].amount, dec!(105.49));
    assert_eq!(sum(schedule.iter().map(|i| i.amount)), dec!(1265.99));
    assert_eq!(
        total_repayable(dec!(1200), dec!(0.10), 12, TermUnit::Months).unwrap(),
        dec!(1265.99)
    );
}

#[test]
fn test_amortized_due_dates_follow_calendar_months() {
    let schedule =
        build_schedule(dec!(1200), dec!(0.10), 12, TermUnit::Months, disbursed()).unwrap();

    assert_eq!(schedule[0].due_date.month(), 4);
    assert_eq!(schedule[0].due_date.day(), 15);
    assert_eq!(schedule[11].due_date.year(), 2026);
    assert_eq!(schedule[11].due_date.month(), 3);
}

#[test]
fn test_amortized_schedule_sums_to_total() {
    for (principal, rate, months) in [
        (dec!(5000), dec!(0.145), 24),
        (dec!(35000), dec!(0.085), 48),
        (dec!(100), dec!(0.25), 60),
        (dec!(999.99), dec!(0.2013), 7),
    ] {
        let schedule =
            build_schedule(principal, rate, months, TermUnit::Months, disbursed()).unwrap();
        let total = total_repayable(principal, rate, months, TermUnit::Months).unwrap();

        assert_eq!(sum(schedule.iter().map(|i| i.amount)), total);
        assert!(total > principal);
        let regular = schedule[0].amount;
        let last = schedule[months as usize - 1].amount;
        assert!((last - regular).abs() <= dec!(0.01) * Decimal::from(months));
    }
}

#[test]
fn test_amortized_zero_rate() {
    let total = total_repayable(dec!(1200), Decimal::ZERO, 12, TermUnit::Months).unwrap();
    assert_eq!(total, dec!(1200.00));
}

// ============================================================================
// Sweeps over the input space
// ============================================================================

#[test]
fn test_every_valid_input_sums_to_total() {
    let principals = [dec!(0.01), dec!(1), dec!(100), dec!(123.45), dec!(9999.99), dec!(50000)];
    let rates = [Decimal::ZERO, dec!(0.0001), dec!(0.1), dec!(0.2323), dec!(0.3), Decimal::ONE];
    let day_terms = [1, 2, 3, 11, 30, 365, 600, 1000, 3650];
    let month_terms = [1, 2, 3, 11, 12, 59, 60, 360, 600];

    for (unit, terms) in [(TermUnit::Days, &day_terms), (TermUnit::Months, &month_terms)] {
        for principal in principals {
            for rate in rates {
                for &term in terms {
                    let label = format!("{} @ {} x {} {:?}", principal, rate, term, unit);
                    let total = total_repayable(principal, rate, term, unit)
                        .unwrap_or_else(|err| panic!("{}: {}", label, err));
                    let schedule = build_schedule(principal, rate, term, unit, disbursed())
                        .unwrap_or_else(|err| panic!("{}: {}", label, err));

                    assert_eq!(schedule.len(), term as usize, "{}", label);
                    assert_eq!(sum(schedule.iter().map(|i| i.amount)), total, "{}", label);
                    assert!(schedule.iter().all(|i| i.amount >= Decimal::ZERO), "{}", label);
                    if unit == TermUnit::Days {
                        let expected = (principal * (Decimal::ONE + rate))
                            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
                        assert_eq!(total, expected, "{}", label);
                    }
                }
            }
        }
    }
}

#[test]
fn test_term_ceiling() {
    for unit in [TermUnit::Days, TermUnit::Months] {
        let result = build_schedule(dec!(1000), dec!(0.1), MAX_TERM_COUNT + 1, unit, disbursed());
        assert!(matches!(result, Err(LendingError::Validation(_))), "{:?}", unit);
    }

    let schedule =
        build_schedule(dec!(1000), dec!(0.1), MAX_TERM_COUNT, TermUnit::Days, disbursed()).unwrap();
    assert_eq!(schedule.len(), MAX_TERM_COUNT as usize);
}

#[test]
fn test_huge_month_term_does_not_panic() {
    let result = std::panic::catch_unwind(|| {
        total_repayable(dec!(1000), dec!(0.25), MAX_TERM_COUNT, TermUnit::Months)
    });
    assert!(matches!(result, Ok(Err(LendingError::Validation(_)))));
}

// ============================================================================
// Validation and determinism
// ============================================================================

#[test]
fn test_rejects_invalid_inputs() {
    let cases = [
        (dec!(0), dec!(0.1), 12),
        (dec!(-100), dec!(0.1), 12),
        (dec!(100), dec!(1.01), 12),
        (dec!(100), dec!(-0.01), 12),
        (dec!(100), dec!(0.1), 0),
    ];
    for (principal, rate, term) in cases {
        for unit in [TermUnit::Days, TermUnit::Months] {
            let result = build_schedule(principal, rate, term, unit, disbursed());
            assert!(
                matches!(result, Err(LendingError::Validation(_))),
                "{} @ {} x {} {:?}",
                principal,
                rate,
                term,
                unit
            );
        }
    }
}

#[test]
fn test_identical_inputs_identical_schedules() {
    let first =
        build_schedule(dec!(4321.09), dec!(0.1987), 19, TermUnit::Months, disbursed()).unwrap();
    let second =
        build_schedule(dec!(4321.09), dec!(0.1987), 19, TermUnit::Months, disbursed()).unwrap();
    assert_eq!(first, second);
}
