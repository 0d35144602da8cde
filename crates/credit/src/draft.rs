//! Resuming a held transaction: its saved inputs plus a preview of what checkout would produce.

use std::num::NonZeroU32;

use chrono::NaiveDate;
use serde::Serialize;

use ledgerpos_core::{DomainError, DomainResult};

use crate::reference::ReferenceNumber;
use crate::schedule::{PaymentSchedule, generate};
use crate::status::TransactionStatus;
use crate::terms::{PaymentMethod, Totals, TransactionDetails, TransactionId};
use crate::transaction::Transaction;

/// A draft as the operator left it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftState {
    pub transaction_id: TransactionId,
    pub reference: ReferenceNumber,
    pub details: TransactionDetails,
    /// `None` while the draft is still incomplete.
    pub totals: Option<Totals>,
    /// Installments the draft would generate if finalized on `as_of`.
    pub schedule_preview: Option<PaymentSchedule>,
    /// Reasons the draft cannot be finalized yet.
    pub blockers: Vec<String>,
}

impl DraftState {
    pub fn is_ready(&self) -> bool {
        self.blockers.is_empty()
    }

    pub fn resume(tx: &Transaction, as_of: NaiveDate) -> DomainResult<Self> {
        if !tx.exists() {
            return Err(DomainError::not_found());
        }
        if tx.status() != TransactionStatus::Draft {
            return Err(DomainError::invalid_transition(tx.status(), TransactionStatus::Draft));
        }
        let (Some(reference), Some(details)) = (tx.reference(), tx.details()) else {
            return Err(DomainError::invariant("draft without reference or details"));
        };

        let mut blockers = Vec::new();
        if let Err(e) = details.validate_for_checkout() {
            blockers.push(e.user_message());
        }
        let totals = match details.totals() {
            Ok(t) => Some(t),
            Err(e) => {
                blockers.push(e.user_message());
                None
            }
        };
        let schedule_preview = match (details.terms.method, details.terms.installment, totals) {
            (PaymentMethod::Installment, Some(plan), Some(t)) => NonZeroU32::new(plan.duration)
                .and_then(|d| generate(t.net(), t.down_payment, d, plan.unit, as_of).ok()),
            _ => None,
        };
        blockers.dedup();

        Ok(Self {
            transaction_id: tx.id_typed(),
            reference: reference.clone(),
            details: details.clone(),
            totals,
            schedule_preview,
            blockers,
        })
    }
}
