//! Services the ledger calls out to: stock, pricing, counterparty lookup and audit.
//!
//! In-memory implementations for the directory and audit log live here too; the stock and
//! pricing side is backed by the inventory aggregate (see `stock`).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledgerpos_core::{Money, TenantId, UserId};
use ledgerpos_credit::{
    Counterparty, LineItem, PartyId, ReferenceNumber, TransactionId, TransactionKind, TransactionStatus,
};
use ledgerpos_inventory::ProductId;

use crate::command_dispatcher::DispatchError;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("stock update for product {product_id} failed: {source}")]
    Stock {
        product_id: ProductId,
        #[source]
        source: DispatchError,
    },

    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },
}

/// Where the stock movement comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement<'a> {
    pub tenant_id: TenantId,
    pub reference: &'a ReferenceNumber,
    pub kind: TransactionKind,
    pub lines: &'a [LineItem],
    pub occurred_at: DateTime<Utc>,
}

/// Moves goods when a transaction is finalized or cancelled.
///
/// Both calls are all-or-nothing across lines: a failure on one line undoes the lines
/// already moved before the error is returned.
pub trait StockMutator: Send + Sync {
    /// Sales issue stock; purchases receive it (and re-run costing).
    fn apply_checkout(&self, movement: &StockMovement<'_>) -> Result<(), CollaboratorError>;

    /// Inverse of `apply_checkout`.
    fn reverse_checkout(&self, movement: &StockMovement<'_>) -> Result<(), CollaboratorError>;
}

/// Current acquisition cost per product.
pub trait PricingSource: Send + Sync {
    fn unit_cost(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<Money>, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyProfile {
    pub counterparty: Counterparty,
    pub name: String,
}

/// Customer/supplier lookup.
pub trait CounterpartyResolver: Send + Sync {
    /// `None` if the party is unknown or registered under the other role.
    fn resolve(
        &self,
        tenant_id: TenantId,
        counterparty: &Counterparty,
    ) -> Result<Option<CounterpartyProfile>, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub reference: Option<ReferenceNumber>,
    pub operator: UserId,
    pub previous_status: TransactionStatus,
    pub reason: Option<String>,
    pub outstanding_at_cancel: Money,
    pub recorded_at: DateTime<Utc>,
}

/// Receives cancellations of settled transactions for manual review.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), CollaboratorError>;
}

/// Tenant-scoped customer/supplier directory.
#[derive(Debug, Default)]
pub struct InMemoryCounterpartyDirectory {
    parties: RwLock<HashMap<(TenantId, PartyId), CounterpartyProfile>>,
}

impl InMemoryCounterpartyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: TenantId, counterparty: Counterparty, name: impl Into<String>) {
        let profile = CounterpartyProfile {
            counterparty,
            name: name.into(),
        };
        let mut parties = self.parties.write().unwrap_or_else(PoisonError::into_inner);
        parties.insert((tenant_id, counterparty.party_id()), profile);
    }
}

impl CounterpartyResolver for InMemoryCounterpartyDirectory {
    fn resolve(
        &self,
        tenant_id: TenantId,
        counterparty: &Counterparty,
    ) -> Result<Option<CounterpartyProfile>, CollaboratorError> {
        let parties = self.parties.read().map_err(|_| CollaboratorError::Unavailable {
            service: "counterparty directory",
            reason: "lock poisoned".to_string(),
        })?;
        Ok(parties
            .get(&(tenant_id, counterparty.party_id()))
            .filter(|p| p.counterparty == *counterparty)
            .cloned())
    }
}

/// Audit log kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), CollaboratorError> {
        let mut entries = self.entries.lock().map_err(|_| CollaboratorError::Unavailable {
            service: "audit log",
            reason: "lock poisoned".to_string(),
        })?;
        entries.push(entry);
        Ok(())
    }
}
