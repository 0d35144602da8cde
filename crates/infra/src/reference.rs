//! Reference number sequencing.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;

use ledgerpos_core::TenantId;
use ledgerpos_credit::{ReferenceNumber, TransactionKind};

/// Hands out unique reference numbers.
pub trait ReferenceGenerator: Send + Sync {
    fn next_reference(&self, tenant_id: TenantId, kind: TransactionKind, date: NaiveDate) -> ReferenceNumber;

    /// Record a number that is already in use so it is never handed out again.
    fn observe(&self, tenant_id: TenantId, existing: &ReferenceNumber);
}

/// Sequence per (tenant, kind prefix, day), starting at 1.
#[derive(Debug)]
pub struct InMemoryReferenceSequencer {
    width: usize,
    counters: Mutex<HashMap<(TenantId, &'static str, NaiveDate), u64>>,
}

impl InMemoryReferenceSequencer {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl ReferenceGenerator for InMemoryReferenceSequencer {
    fn next_reference(&self, tenant_id: TenantId, kind: TransactionKind, date: NaiveDate) -> ReferenceNumber {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry((tenant_id, kind.reference_prefix(), date)).or_insert(0);
        *counter += 1;
        ReferenceNumber::compose(kind, date, *counter, self.width)
    }

    fn observe(&self, tenant_id: TenantId, existing: &ReferenceNumber) {
        let mut parts = existing.as_str().splitn(3, '-');
        let (Some(kind), Some(date), Some(seq)) = (existing.kind(), parts.nth(1), parts.next()) else {
            return;
        };
        let (Ok(date), Ok(seq)) = (NaiveDate::parse_from_str(date, "%Y%m%d"), seq.parse::<u64>()) else {
            return;
        };
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry((tenant_id, kind.reference_prefix(), date)).or_insert(0);
        *counter = (*counter).max(seq);
    }
}
