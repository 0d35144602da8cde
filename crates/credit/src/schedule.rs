//! Installment schedule: generation and settlement bookkeeping.

use std::num::NonZeroU32;

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use ledgerpos_core::{DomainError, DomainResult, Money};

use crate::terms::DurationUnit;

/// One installment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentScheduleEntry {
    installment_no: u32,
    due_date: NaiveDate,
    amount: Money,
    paid: bool,
    paid_on: Option<NaiveDate>,
}

impl PaymentScheduleEntry {
    pub fn installment_no(&self) -> u32 {
        self.installment_no
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn is_paid(&self) -> bool {
        self.paid
    }

    pub fn paid_on(&self) -> Option<NaiveDate> {
        self.paid_on
    }

    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        !self.paid && self.due_date < as_of
    }
}

/// Ordered installments. Installment numbers are `1..=n` and due dates strictly increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSchedule {
    entries: Vec<PaymentScheduleEntry>,
}

impl PaymentSchedule {
    pub fn entries(&self) -> &[PaymentScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all installments: the financed amount.
    pub fn total(&self) -> Money {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn paid_total(&self) -> Money {
        self.entries.iter().filter(|e| e.paid).map(|e| e.amount).sum()
    }

    /// Earliest unpaid installment. Paid entries always form a prefix.
    pub fn next_unpaid(&self) -> Option<&PaymentScheduleEntry> {
        self.entries.iter().find(|e| !e.paid)
    }

    pub fn overdue(&self, as_of: NaiveDate) -> impl Iterator<Item = &PaymentScheduleEntry> {
        self.entries.iter().filter(move |e| e.is_overdue(as_of))
    }

    /// Due date of the last installment.
    pub fn settlement_deadline(&self) -> Option<NaiveDate> {
        self.entries.last().map(|e| e.due_date)
    }

    pub fn is_fully_paid(&self) -> bool {
        self.entries.iter().all(|e| e.paid)
    }

    /// Unpaid installments whose cumulative total is covered once the transaction's
    /// paid total reaches `paid_total_after`, in order.
    pub fn coverable(&self, paid_total_after: Money) -> Vec<u32> {
        let mut cumulative = Money::ZERO;
        let mut covered = Vec::new();
        for entry in &self.entries {
            cumulative += entry.amount;
            if cumulative > paid_total_after {
                break;
            }
            if !entry.paid {
                covered.push(entry.installment_no);
            }
        }
        covered
    }

    pub(crate) fn settlement(&mut self) -> ScheduleSettlement<'_> {
        ScheduleSettlement { schedule: self }
    }
}

/// Mutable view used when replaying payments; marks installments strictly in order.
pub(crate) struct ScheduleSettlement<'a> {
    schedule: &'a mut PaymentSchedule,
}

impl ScheduleSettlement<'_> {
    pub(crate) fn pay_next(&mut self, paid_on: NaiveDate) -> Option<u32> {
        let entry = self.schedule.entries.iter_mut().find(|e| !e.paid)?;
        entry.paid = true;
        entry.paid_on = Some(paid_on);
        Some(entry.installment_no)
    }
}

/// Build the installment schedule for `principal - down_payment`.
///
/// Entry `k` falls `k` units after `start_date`. Month steps clamp to the last day of the
/// target month (Jan 31 + 1 month = Feb 28/29) and are always computed from the start date.
/// Installments are the floor share; the last one absorbs the remainder.
pub fn generate(
    principal: Money,
    down_payment: Money,
    duration: NonZeroU32,
    unit: DurationUnit,
    start_date: NaiveDate,
) -> DomainResult<PaymentSchedule> {
    let financed = principal
        .checked_sub(down_payment)
        .ok_or_else(|| DomainError::invalid_schedule("financed amount overflow"))?;
    if !financed.is_positive() {
        return Err(DomainError::invalid_schedule(
            "nothing left to finance after the down payment",
        ));
    }

    let count = duration.get();
    let (share, last_share) = financed
        .split_even(count)
        .ok_or_else(|| DomainError::invalid_schedule("cannot split financed amount"))?;

    let mut entries = Vec::with_capacity(count as usize);
    for k in 1..=count {
        let due_date = step(start_date, unit, k).ok_or_else(|| {
            DomainError::invalid_schedule(format!("installment {k} falls outside the calendar"))
        })?;
        entries.push(PaymentScheduleEntry {
            installment_no: k,
            due_date,
            amount: if k == count { last_share } else { share },
            paid: false,
            paid_on: None,
        });
    }

    Ok(PaymentSchedule { entries })
}

fn step(start: NaiveDate, unit: DurationUnit, k: u32) -> Option<NaiveDate> {
    match unit {
        DurationUnit::Day => start.checked_add_days(Days::new(u64::from(k))),
        DurationUnit::Month => start.checked_add_months(Months::new(k)),
    }
}
