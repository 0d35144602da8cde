//! Ledger service: draft/checkout coordination and the payment ledger.
//!
//! Every operation on one transaction runs under that transaction's lock and follows the
//! same shape: load the stream, let the aggregate decide, run collaborator effects, commit.
//! A rejected operation commits nothing.

mod error;
mod outcome;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;

use ledgerpos_core::{Aggregate, AggregateId, DomainError, Money, TenantId, UserId};
use ledgerpos_credit::{
    ApplyPayment, CancelTransaction, DraftState, FinalizeTransaction, PaymentMethod, PaymentMode,
    PaymentScheduleEntry, ReferenceNumber, SaveDraft, Transaction, TransactionCommand,
    TransactionDetails, TransactionEvent, TransactionId, TransactionKind, TransactionStatus,
};
use ledgerpos_events::{EventBus, EventEnvelope};

use crate::collaborators::{
    AuditEntry, AuditSink, CounterpartyResolver, PricingSource, StockMovement, StockMutator,
};
use crate::command_dispatcher::{CommandDispatcher, DispatchError, Loaded};
use crate::config::LedgerConfig;
use crate::event_store::EventStore;
use crate::locks::TransactionLocks;
use crate::reference::ReferenceGenerator;

pub use error::LedgerError;
pub use outcome::{CancellationOutcome, CheckoutOutcome, EffectOutcome, PaymentReceipt};

pub const TRANSACTION_AGGREGATE_TYPE: &str = "credit.transaction";

/// Who is acting, for which shop, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerContext {
    pub tenant_id: TenantId,
    pub operator: UserId,
    pub now: DateTime<Utc>,
}

impl LedgerContext {
    pub fn new(tenant_id: TenantId, operator: UserId) -> Self {
        Self {
            tenant_id,
            operator,
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: Money,
    pub mode: PaymentMode,
    /// Defaults to today's business date.
    pub payment_date: Option<NaiveDate>,
}

impl PaymentRequest {
    pub fn partial(amount: Money) -> Self {
        Self {
            amount,
            mode: PaymentMode::Partial,
            payment_date: None,
        }
    }

    pub fn settle(amount: Money) -> Self {
        Self {
            amount,
            mode: PaymentMode::Settle,
            payment_date: None,
        }
    }

    pub fn on(mut self, payment_date: NaiveDate) -> Self {
        self.payment_date = Some(payment_date);
        self
    }
}

/// External services the ledger depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub stock: Arc<dyn StockMutator>,
    pub pricing: Arc<dyn PricingSource>,
    pub counterparties: Arc<dyn CounterpartyResolver>,
    pub audit: Arc<dyn AuditSink>,
    pub references: Arc<dyn ReferenceGenerator>,
}

pub struct LedgerService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    collaborators: Collaborators,
    locks: TransactionLocks,
    config: LedgerConfig,
}

impl<S, B> LedgerService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        collaborators: Collaborators,
        config: LedgerConfig,
    ) -> Self {
        Self {
            dispatcher,
            collaborators,
            locks: TransactionLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn locks(&self) -> &TransactionLocks {
        &self.locks
    }

    /// Create a held transaction, or edit one that is still a draft.
    #[tracing::instrument(skip_all, fields(tenant_id = %ctx.tenant_id, transaction_id = ?transaction_id))]
    pub fn save_draft(
        &self,
        ctx: &LedgerContext,
        transaction_id: Option<TransactionId>,
        details: TransactionDetails,
    ) -> Result<Transaction, LedgerError> {
        let id = transaction_id.unwrap_or_else(|| TransactionId::new(AggregateId::new()));
        let result = self.locks.with_lock(ctx.tenant_id, id, || {
            self.check_counterparty(ctx, &details)?;
            let loaded = self.load(ctx, id)?;
            let reference = self.reference_for(ctx, &loaded.aggregate, details.kind)?;
            let command = TransactionCommand::SaveDraft(SaveDraft {
                tenant_id: ctx.tenant_id,
                transaction_id: id,
                reference,
                operator: ctx.operator,
                details,
                occurred_at: ctx.now,
            });
            let events = loaded.aggregate.handle(&command)?;
            self.commit(ctx, id, loaded, &events)
        });

        match &result {
            Ok(tx) => tracing::info!(transaction_id = %id, reference = ?tx.reference().map(|r| r.as_str()), "draft saved"),
            Err(e) => tracing::warn!(transaction_id = %id, error = %e, "draft rejected"),
        }
        result
    }

    /// Saved inputs of a draft plus the schedule checkout would produce today.
    pub fn resume_draft(&self, ctx: &LedgerContext, transaction_id: TransactionId) -> Result<DraftState, LedgerError> {
        let tx = self.get(ctx, transaction_id)?;
        Ok(DraftState::resume(&tx, self.config.business_date(ctx.now))?)
    }

    /// Checkout. Retrying with the id of a transaction that already went through returns
    /// the stored transaction unchanged.
    #[tracing::instrument(skip_all, fields(tenant_id = %ctx.tenant_id, transaction_id = ?transaction_id))]
    pub fn finalize(
        &self,
        ctx: &LedgerContext,
        transaction_id: Option<TransactionId>,
        details: TransactionDetails,
    ) -> Result<CheckoutOutcome, LedgerError> {
        let id = transaction_id.unwrap_or_else(|| TransactionId::new(AggregateId::new()));
        let result = self.locks.with_lock(ctx.tenant_id, id, || self.finalize_locked(ctx, id, details));

        match &result {
            Ok(outcome) if outcome.already_finalized => {
                tracing::debug!(transaction_id = %id, "checkout retried; transaction already finalized")
            }
            Ok(outcome) => tracing::info!(
                transaction_id = %id,
                reference = ?outcome.transaction.reference().map(|r| r.as_str()),
                status = %outcome.transaction.status(),
                outstanding = %outcome.transaction.outstanding(),
                "transaction finalized"
            ),
            Err(e) => tracing::warn!(transaction_id = %id, error = %e, "checkout rejected"),
        }
        result
    }

    fn finalize_locked(
        &self,
        ctx: &LedgerContext,
        id: TransactionId,
        details: TransactionDetails,
    ) -> Result<CheckoutOutcome, LedgerError> {
        let loaded = self.load(ctx, id)?;
        if loaded.aggregate.exists()
            && matches!(
                loaded.aggregate.status(),
                TransactionStatus::AwaitingPayment | TransactionStatus::Settled
            )
        {
            return Ok(CheckoutOutcome {
                transaction: loaded.aggregate,
                already_finalized: true,
            });
        }

        self.check_plan_limit(&details)?;
        self.check_counterparty(ctx, &details)?;
        let details = self.stamp_costs(ctx, details)?;
        let reference = self.reference_for(ctx, &loaded.aggregate, details.kind)?;

        let command = TransactionCommand::Finalize(FinalizeTransaction {
            tenant_id: ctx.tenant_id,
            transaction_id: id,
            reference: reference.clone(),
            operator: ctx.operator,
            details: details.clone(),
            start_date: self.config.business_date(ctx.now),
            occurred_at: ctx.now,
        });
        let events = loaded.aggregate.handle(&command)?;
        if events.is_empty() {
            return Ok(CheckoutOutcome {
                transaction: loaded.aggregate,
                already_finalized: true,
            });
        }

        let movement = StockMovement {
            tenant_id: ctx.tenant_id,
            reference: &reference,
            kind: details.kind,
            lines: &details.lines,
            occurred_at: ctx.now,
        };
        self.collaborators.stock.apply_checkout(&movement)?;

        match self.commit(ctx, id, loaded, &events) {
            Ok(transaction) => Ok(CheckoutOutcome {
                transaction,
                already_finalized: false,
            }),
            Err(err) => {
                if let Err(undo) = self.collaborators.stock.reverse_checkout(&movement) {
                    tracing::error!(
                        reference = %reference,
                        error = %undo,
                        "checkout failed after stock moved and the movement could not be undone"
                    );
                }
                Err(err)
            }
        }
    }

    /// Apply a partial or settling payment.
    #[tracing::instrument(
        skip_all,
        fields(tenant_id = %ctx.tenant_id, transaction_id = %transaction_id, amount = %request.amount, mode = ?request.mode)
    )]
    pub fn apply_payment(
        &self,
        ctx: &LedgerContext,
        transaction_id: TransactionId,
        request: PaymentRequest,
    ) -> Result<PaymentReceipt, LedgerError> {
        let result = self
            .locks
            .with_lock(ctx.tenant_id, transaction_id, || self.apply_payment_locked(ctx, transaction_id, request));

        match &result {
            Ok(receipt) => tracing::info!(
                applied = %receipt.applied,
                change = %receipt.change,
                outstanding = %receipt.outstanding,
                status = %receipt.status,
                "payment applied"
            ),
            Err(e) => tracing::warn!(error = %e, "payment rejected"),
        }
        result
    }

    fn apply_payment_locked(
        &self,
        ctx: &LedgerContext,
        id: TransactionId,
        request: PaymentRequest,
    ) -> Result<PaymentReceipt, LedgerError> {
        let loaded = self.load(ctx, id)?;
        let payment_date = request
            .payment_date
            .unwrap_or_else(|| self.config.business_date(ctx.now));
        let command = TransactionCommand::ApplyPayment(ApplyPayment {
            tenant_id: ctx.tenant_id,
            transaction_id: id,
            amount: request.amount,
            payment_date,
            mode: request.mode,
            occurred_at: ctx.now,
        });
        let events = loaded.aggregate.handle(&command)?;
        let applied = events
            .iter()
            .find_map(|e| match e {
                TransactionEvent::PaymentApplied(p) => Some(p.clone()),
                _ => None,
            })
            .ok_or_else(|| DomainError::invariant("payment produced no payment event"))?;
        let tx = self.commit(ctx, id, loaded, &events)?;

        Ok(PaymentReceipt {
            transaction_id: id,
            reference: tx.reference().cloned(),
            mode: applied.mode,
            payment_date: applied.payment_date,
            amount_tendered: applied.amount_tendered,
            applied: applied.applied,
            change: applied.change,
            installments_settled: applied.installments_settled,
            outstanding: tx.outstanding(),
            status: tx.status(),
        })
    }

    /// Cancel a transaction and put the goods back.
    ///
    /// For open transactions the stock reversal must succeed before the cancellation is
    /// stored. A settled transaction is cancelled regardless; stock and audit failures
    /// are reported in the outcome.
    #[tracing::instrument(skip_all, fields(tenant_id = %ctx.tenant_id, transaction_id = %transaction_id))]
    pub fn cancel(
        &self,
        ctx: &LedgerContext,
        transaction_id: TransactionId,
        reason: Option<String>,
    ) -> Result<CancellationOutcome, LedgerError> {
        let result = self
            .locks
            .with_lock(ctx.tenant_id, transaction_id, || self.cancel_locked(ctx, transaction_id, reason));

        match &result {
            Ok(outcome) => tracing::info!(
                stock_reversal = ?outcome.stock_reversal,
                audit = ?outcome.audit,
                "transaction cancelled"
            ),
            Err(e) => tracing::warn!(error = %e, "cancellation rejected"),
        }
        result
    }

    fn cancel_locked(
        &self,
        ctx: &LedgerContext,
        id: TransactionId,
        reason: Option<String>,
    ) -> Result<CancellationOutcome, LedgerError> {
        let loaded = self.load(ctx, id)?;
        let command = TransactionCommand::Cancel(CancelTransaction {
            tenant_id: ctx.tenant_id,
            transaction_id: id,
            reason,
            occurred_at: ctx.now,
        });
        let events = loaded.aggregate.handle(&command)?;
        let cancelled = events
            .iter()
            .find_map(|e| match e {
                TransactionEvent::Cancelled(c) => Some(c.clone()),
                _ => None,
            })
            .ok_or_else(|| DomainError::invariant("cancel produced no cancellation event"))?;

        let reference = loaded.aggregate.reference().cloned();
        let details = loaded.aggregate.details().cloned();
        let goods = match (&reference, &details) {
            (Some(reference), Some(details))
                if cancelled.previous_status != TransactionStatus::Draft
                    && matches!(details.kind, TransactionKind::Sale | TransactionKind::Purchase) =>
            {
                Some(StockMovement {
                    tenant_id: ctx.tenant_id,
                    reference,
                    kind: details.kind,
                    lines: &details.lines,
                    occurred_at: ctx.now,
                })
            }
            _ => None,
        };
        let settled = cancelled.previous_status == TransactionStatus::Settled;

        let blocking = goods.as_ref().filter(|_| !settled);
        if let Some(movement) = blocking {
            self.collaborators.stock.reverse_checkout(movement)?;
        }

        let transaction = match self.commit(ctx, id, loaded, &events) {
            Ok(tx) => tx,
            Err(err) => {
                if let Some(movement) = blocking {
                    if let Err(undo) = self.collaborators.stock.apply_checkout(movement) {
                        tracing::error!(error = %undo, "cancel failed after stock was restored and could not be re-issued");
                    }
                }
                return Err(err);
            }
        };

        let stock_reversal = match (&goods, settled) {
            (None, _) => EffectOutcome::NotRequired,
            (Some(_), false) => EffectOutcome::Completed,
            (Some(movement), true) => match self.collaborators.stock.reverse_checkout(movement) {
                Ok(()) => EffectOutcome::Completed,
                Err(e) => {
                    tracing::warn!(error = %e, "stock reversal failed for cancelled settled transaction");
                    EffectOutcome::Failed(e.to_string())
                }
            },
        };

        let audit = if cancelled.requires_audit {
            let entry = AuditEntry {
                tenant_id: ctx.tenant_id,
                transaction_id: id,
                reference,
                operator: ctx.operator,
                previous_status: cancelled.previous_status,
                reason: cancelled.reason.clone(),
                outstanding_at_cancel: cancelled.outstanding_at_cancel,
                recorded_at: ctx.now,
            };
            match self.collaborators.audit.record(entry) {
                Ok(()) => EffectOutcome::Completed,
                Err(e) => {
                    tracing::warn!(error = %e, "audit entry for cancelled settled transaction was not recorded");
                    EffectOutcome::Failed(e.to_string())
                }
            }
        } else {
            EffectOutcome::NotRequired
        };

        Ok(CancellationOutcome {
            transaction,
            stock_reversal,
            audit,
        })
    }

    pub fn get(&self, ctx: &LedgerContext, transaction_id: TransactionId) -> Result<Transaction, LedgerError> {
        let tx = self.load(ctx, transaction_id)?.aggregate;
        if !tx.exists() {
            return Err(DomainError::not_found().into());
        }
        Ok(tx)
    }

    /// Unpaid installments due before `as_of`.
    pub fn overdue_installments(
        &self,
        ctx: &LedgerContext,
        transaction_id: TransactionId,
        as_of: NaiveDate,
    ) -> Result<Vec<PaymentScheduleEntry>, LedgerError> {
        let tx = self.get(ctx, transaction_id)?;
        Ok(tx.overdue(as_of).into_iter().cloned().collect())
    }

    fn load(&self, ctx: &LedgerContext, id: TransactionId) -> Result<Loaded<Transaction>, LedgerError> {
        Ok(self
            .dispatcher
            .load(ctx.tenant_id, id.0, |_, aggregate_id| Transaction::empty(TransactionId::new(aggregate_id)))?)
    }

    fn commit(
        &self,
        ctx: &LedgerContext,
        id: TransactionId,
        loaded: Loaded<Transaction>,
        events: &[TransactionEvent],
    ) -> Result<Transaction, LedgerError> {
        self.dispatcher
            .commit(ctx.tenant_id, id.0, TRANSACTION_AGGREGATE_TYPE, loaded.expected, events)?;
        let mut tx = loaded.aggregate;
        for event in events {
            tx.apply(event);
        }
        Ok(tx)
    }

    /// Keep the number a draft already has; otherwise take the next one that no stored
    /// transaction of this tenant uses, whichever service wrote it.
    fn reference_for(
        &self,
        ctx: &LedgerContext,
        tx: &Transaction,
        kind: TransactionKind,
    ) -> Result<ReferenceNumber, LedgerError> {
        if let Some(existing) = tx.reference() {
            return Ok(existing.clone());
        }
        let references = &self.collaborators.references;
        for taken in self.references_in_use(ctx.tenant_id)? {
            references.observe(ctx.tenant_id, &taken);
        }
        Ok(references.next_reference(ctx.tenant_id, kind, self.config.business_date(ctx.now)))
    }

    fn references_in_use(&self, tenant_id: TenantId) -> Result<Vec<ReferenceNumber>, LedgerError> {
        let stored = self
            .dispatcher
            .store()
            .load_by_type(tenant_id, TRANSACTION_AGGREGATE_TYPE)
            .map_err(DispatchError::from)?;

        let mut references = Vec::new();
        for e in stored {
            let event: TransactionEvent =
                serde_json::from_value(e.payload).map_err(|err| DispatchError::Deserialize(err.to_string()))?;
            match event {
                TransactionEvent::DraftSaved(d) => references.push(d.reference),
                TransactionEvent::Finalized(f) => references.push(f.reference),
                _ => {}
            }
        }
        Ok(references)
    }

    fn check_plan_limit(&self, details: &TransactionDetails) -> Result<(), LedgerError> {
        match details.terms.installment {
            Some(plan) if details.terms.method == PaymentMethod::Installment
                && plan.duration > self.config.max_installments =>
            {
                Err(DomainError::invalid_schedule(format!(
                    "installment duration {} exceeds the maximum of {}",
                    plan.duration, self.config.max_installments
                ))
                .into())
            }
            _ => Ok(()),
        }
    }

    fn check_counterparty(&self, ctx: &LedgerContext, details: &TransactionDetails) -> Result<(), LedgerError> {
        let Some(counterparty) = details.counterparty else {
            return Ok(());
        };
        if self.collaborators.counterparties.resolve(ctx.tenant_id, &counterparty)?.is_none() {
            return Err(DomainError::validation(format!(
                "unknown counterparty {}",
                counterparty.party_id()
            ))
            .into());
        }
        Ok(())
    }

    /// Sale lines record what the goods cost at the time of sale.
    fn stamp_costs(&self, ctx: &LedgerContext, mut details: TransactionDetails) -> Result<TransactionDetails, LedgerError> {
        if details.kind != TransactionKind::Sale {
            return Ok(details);
        }
        for line in &mut details.lines {
            if let Some(cost) = self.collaborators.pricing.unit_cost(ctx.tenant_id, line.product_id)? {
                line.unit_cost = cost;
            }
        }
        Ok(details)
    }
}
