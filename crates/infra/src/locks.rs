//! Per-transaction mutual exclusion.
//!
//! Every mutation of one transaction runs under that transaction's mutex, so two payments
//! can never both read the same outstanding balance. Different transactions never contend
//! beyond the short registry lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use ledgerpos_core::TenantId;
use ledgerpos_credit::TransactionId;

type Slot = Arc<Mutex<()>>;

#[derive(Debug, Default)]
pub struct TransactionLocks {
    slots: Mutex<HashMap<(TenantId, TransactionId), Slot>>,
}

impl TransactionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `(tenant_id, transaction_id)`.
    ///
    /// A panic inside `f` poisons only a `()` mutex; later callers recover the guard. The
    /// registry entry is dropped again once nobody else holds or waits on it.
    pub fn with_lock<T>(&self, tenant_id: TenantId, transaction_id: TransactionId, f: impl FnOnce() -> T) -> T {
        let key = (tenant_id, transaction_id);
        let slot = self.slot(key);
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(key, &slot);
        result
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: (TenantId, TransactionId)) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key).or_default().clone()
    }

    /// Clones are only taken under the registry lock, so a count of two (registry + ours)
    /// means no other caller holds or waits on this slot.
    fn release(&self, key: (TenantId, TransactionId), slot: &Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = slots
            .get(&key)
            .is_some_and(|held| Arc::ptr_eq(held, slot) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(&key);
        }
    }
}
