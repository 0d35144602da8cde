//! Payment allocation against an outstanding balance.
//!
//! Pure: computes what a payment would do without touching the transaction. The aggregate
//! records the result as an event only when allocation succeeds.

use serde::{Deserialize, Serialize};

use ledgerpos_core::{DomainError, DomainResult, Money};

use crate::schedule::PaymentSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Pay down part of the balance; never more than what is outstanding.
    #[serde(alias = "sebagian")]
    Partial,
    /// Pay off everything that remains; the amount must cover it.
    #[serde(alias = "pelunasan")]
    Settle,
}

/// Outcome of allocating one payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    /// Part of the tendered amount credited to the transaction.
    pub applied: Money,
    /// Tendered amount above the outstanding balance (settle mode only).
    pub change: Money,
    /// Installment numbers this payment completes, in due-date order.
    pub installments_settled: Vec<u32>,
    pub total_paid_after: Money,
    pub outstanding_after: Money,
}

impl PaymentAllocation {
    pub fn settles(&self) -> bool {
        self.outstanding_after.is_zero()
    }
}

/// Allocate `amount` against `outstanding`.
///
/// `total_paid` is the running total of earlier payments; installments are marked by
/// comparing the cumulative schedule against the new running total, so several small
/// payments can complete one installment and one payment can complete several.
pub fn allocate_payment(
    outstanding: Money,
    total_paid: Money,
    schedule: Option<&PaymentSchedule>,
    amount: Money,
    mode: PaymentMode,
) -> DomainResult<PaymentAllocation> {
    if !amount.is_positive() {
        return Err(DomainError::validation("payment amount must be positive"));
    }
    if !outstanding.is_positive() {
        return Err(DomainError::invariant(format!(
            "cannot allocate against outstanding balance {outstanding}"
        )));
    }

    let (applied, change) = match mode {
        PaymentMode::Partial => {
            if amount > outstanding {
                return Err(DomainError::ExcessPayment { amount, outstanding });
            }
            (amount, Money::ZERO)
        }
        PaymentMode::Settle => {
            if amount < outstanding {
                return Err(DomainError::InsufficientPayment { amount, outstanding });
            }
            let change = amount
                .checked_sub(outstanding)
                .ok_or_else(|| DomainError::invariant("change overflow"))?;
            (outstanding, change)
        }
    };

    let total_paid_after = total_paid
        .checked_add(applied)
        .ok_or_else(|| DomainError::invariant("paid total overflow"))?;
    let outstanding_after = outstanding
        .checked_sub(applied)
        .ok_or_else(|| DomainError::invariant("outstanding balance overflow"))?;

    let installments_settled = match schedule {
        Some(schedule) if outstanding_after.is_zero() => schedule
            .entries()
            .iter()
            .filter(|e| !e.is_paid())
            .map(|e| e.installment_no())
            .collect(),
        Some(schedule) => schedule.coverable(total_paid_after),
        None => Vec::new(),
    };

    Ok(PaymentAllocation {
        applied,
        change,
        installments_settled,
        total_paid_after,
        outstanding_after,
    })
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use chrono::NaiveDate;

    use super::*;
    use crate::schedule::generate;
    use crate::terms::DurationUnit;

    fn schedule() -> PaymentSchedule {
        generate(
            Money::from_minor(1_000_000),
            Money::from_minor(100_000),
            NonZeroU32::new(3).unwrap(),
            DurationUnit::Month,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn partial_payment_covering_first_installment() {
        let s = schedule();
        let a = allocate_payment(
            Money::from_minor(900_000),
            Money::ZERO,
            Some(&s),
            Money::from_minor(300_000),
            PaymentMode::Partial,
        )
        .unwrap();
        assert_eq!(a.installments_settled, vec![1]);
        assert_eq!(a.outstanding_after, Money::from_minor(600_000));
        assert!(!a.settles());
    }

    #[test]
    fn partial_payment_below_installment_marks_nothing() {
        let s = schedule();
        let a = allocate_payment(
            Money::from_minor(900_000),
            Money::ZERO,
            Some(&s),
            Money::from_minor(299_999),
            PaymentMode::Partial,
        )
        .unwrap();
        assert!(a.installments_settled.is_empty());
    }

    #[test]
    fn partial_overshoot_is_rejected() {
        let err = allocate_payment(
            Money::from_minor(600),
            Money::ZERO,
            None,
            Money::from_minor(601),
            PaymentMode::Partial,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::ExcessPayment { .. }));
    }

    #[test]
    fn settle_requires_full_amount_and_returns_change() {
        let err = allocate_payment(
            Money::from_minor(600),
            Money::ZERO,
            None,
            Money::from_minor(599),
            PaymentMode::Settle,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientPayment { .. }));

        let a = allocate_payment(
            Money::from_minor(600),
            Money::from_minor(400),
            None,
            Money::from_minor(1_000),
            PaymentMode::Settle,
        )
        .unwrap();
        assert_eq!(a.applied, Money::from_minor(600));
        assert_eq!(a.change, Money::from_minor(400));
        assert_eq!(a.total_paid_after, Money::from_minor(1_000));
        assert!(a.settles());
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let err = allocate_payment(Money::from_minor(10), Money::ZERO, None, Money::ZERO, PaymentMode::Partial)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
