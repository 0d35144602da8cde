//! Outstanding balances per counterparty: what customers owe the shop (receivables) and
//! what the shop owes suppliers (payables).

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use ledgerpos_core::{AggregateId, Money, TenantId};
use ledgerpos_credit::{PartyId, TransactionEvent, TransactionKind};
use ledgerpos_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError};
use crate::ledger::TRANSACTION_AGGREGATE_TYPE;
use crate::read_model::TenantStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSide {
    Receivable,
    Payable,
}

impl BalanceSide {
    fn for_kind(kind: TransactionKind) -> Self {
        match kind {
            TransactionKind::Sale | TransactionKind::Income => BalanceSide::Receivable,
            TransactionKind::Purchase | TransactionKind::Expense => BalanceSide::Payable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BalanceKey {
    pub party_id: PartyId,
    pub side: BalanceSide,
}

/// Read model: one counterparty's open balance on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutstandingBalance {
    pub party_id: PartyId,
    pub side: BalanceSide,
    pub outstanding: Money,
    pub open_transactions: u32,
}

impl OutstandingBalance {
    fn empty(key: BalanceKey) -> Self {
        Self {
            party_id: key.party_id,
            side: key.side,
            outstanding: Money::ZERO,
            open_transactions: 0,
        }
    }
}

/// What the projection remembers about one open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenTransaction {
    key: BalanceKey,
    outstanding: Money,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum OutstandingBalancesError {
    #[error("failed to deserialize transaction event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Projection over transaction events. Idempotent per stream: envelopes at or below the
/// stream cursor are ignored.
#[derive(Debug)]
pub struct OutstandingBalancesProjection<S>
where
    S: TenantStore<BalanceKey, OutstandingBalance>,
{
    store: S,
    state: RwLock<ProjectionState>,
}

#[derive(Debug, Default)]
struct ProjectionState {
    cursors: HashMap<StreamKey, u64>,
    open: HashMap<StreamKey, OpenTransaction>,
}

impl<S> OutstandingBalancesProjection<S>
where
    S: TenantStore<BalanceKey, OutstandingBalance>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: RwLock::new(ProjectionState::default()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, party_id: PartyId, side: BalanceSide) -> Option<OutstandingBalance> {
        self.store.get(tenant_id, &BalanceKey { party_id, side })
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<OutstandingBalance> {
        self.store.list(tenant_id)
    }

    /// Sum over all counterparties on one side.
    pub fn total(&self, tenant_id: TenantId, side: BalanceSide) -> Money {
        self.list(tenant_id)
            .into_iter()
            .filter(|b| b.side == side)
            .map(|b| b.outstanding)
            .sum()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), OutstandingBalancesError> {
        if envelope.aggregate_type() != TRANSACTION_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let stream = StreamKey {
            tenant_id,
            aggregate_id: envelope.aggregate_id(),
        };
        let seq = envelope.sequence_number();

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let last = state.cursors.get(&stream).copied().unwrap_or(0);
        if seq == 0 || seq > last + 1 {
            return Err(OutstandingBalancesError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }

        let event: TransactionEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| OutstandingBalancesError::Deserialize(e.to_string()))?;
        let (event_tenant, transaction_id) = match &event {
            TransactionEvent::DraftSaved(e) => (e.tenant_id, e.transaction_id),
            TransactionEvent::Finalized(e) => (e.tenant_id, e.transaction_id),
            TransactionEvent::PaymentApplied(e) => (e.tenant_id, e.transaction_id),
            TransactionEvent::Settled(e) => (e.tenant_id, e.transaction_id),
            TransactionEvent::Cancelled(e) => (e.tenant_id, e.transaction_id),
        };
        if event_tenant != tenant_id {
            return Err(OutstandingBalancesError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if transaction_id.0 != stream.aggregate_id {
            return Err(OutstandingBalancesError::TenantIsolation(
                "event transaction_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            TransactionEvent::DraftSaved(_) => {}
            TransactionEvent::Finalized(e) => {
                let deferred = e.details.terms.method.is_deferred() && e.totals.amount_due.is_positive();
                if let (Some(counterparty), true) = (e.details.counterparty, deferred) {
                    let key = BalanceKey {
                        party_id: counterparty.party_id(),
                        side: BalanceSide::for_kind(e.details.kind),
                    };
                    let outstanding = e.totals.amount_due - e.paid_at_checkout;
                    state.open.insert(stream, OpenTransaction { key, outstanding });
                    self.store.update(tenant_id, key, || OutstandingBalance::empty(key), |b| {
                        b.outstanding += outstanding;
                        b.open_transactions += 1;
                    });
                }
            }
            TransactionEvent::PaymentApplied(e) => {
                if let Some(open) = state.open.get_mut(&stream) {
                    open.outstanding -= e.applied;
                    let key = open.key;
                    self.store.update(tenant_id, key, || OutstandingBalance::empty(key), |b| {
                        b.outstanding -= e.applied;
                    });
                }
            }
            TransactionEvent::Settled(_) | TransactionEvent::Cancelled(_) => {
                if let Some(open) = state.open.remove(&stream) {
                    let key = open.key;
                    self.store.update(tenant_id, key, || OutstandingBalance::empty(key), |b| {
                        b.outstanding -= open.outstanding;
                        b.open_transactions = b.open_transactions.saturating_sub(1);
                    });
                }
            }
        }

        state.cursors.insert(stream, seq);
        Ok(())
    }

    /// Rebuild one tenant's balances from the stored transaction streams.
    pub fn rebuild<E: EventStore>(&self, events: &E, tenant_id: TenantId) -> Result<(), OutstandingBalancesError> {
        let stored = events.load_by_type(tenant_id, TRANSACTION_AGGREGATE_TYPE)?;
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.cursors.retain(|k, _| k.tenant_id != tenant_id);
            state.open.retain(|k, _| k.tenant_id != tenant_id);
        }
        self.store.clear_tenant(tenant_id);

        for e in &stored {
            self.apply_envelope(&e.to_envelope())?;
        }
        Ok(())
    }
}
