use std::num::NonZeroU32;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ledgerpos_core::{Aggregate, AggregateRoot, DomainError, Money, TenantId, UserId};
use ledgerpos_events::Event;

use crate::payment::{PaymentMode, allocate_payment};
use crate::reference::ReferenceNumber;
use crate::schedule::{PaymentSchedule, PaymentScheduleEntry, generate};
use crate::status::TransactionStatus;
use crate::terms::{PaymentMethod, Totals, TransactionDetails, TransactionId, TransactionKind};

/// Aggregate root: Transaction (sale, purchase, expense or income with its payment state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    tenant_id: Option<TenantId>,
    reference: Option<ReferenceNumber>,
    operator: Option<UserId>,
    status: TransactionStatus,
    details: Option<TransactionDetails>,
    totals: Totals,
    schedule: Option<PaymentSchedule>,
    settlement_deadline: Option<NaiveDate>,
    total_paid: Money,
    business_date: Option<NaiveDate>,
    last_payment_on: Option<NaiveDate>,
    settled_on: Option<NaiveDate>,
    audit_required: bool,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Transaction {
    /// Create an empty, not-yet-saved aggregate instance for rehydration.
    pub fn empty(id: TransactionId) -> Self {
        Self {
            id,
            tenant_id: None,
            reference: None,
            operator: None,
            status: TransactionStatus::Draft,
            details: None,
            totals: Totals::default(),
            schedule: None,
            settlement_deadline: None,
            total_paid: Money::ZERO,
            business_date: None,
            last_payment_on: None,
            settled_on: None,
            audit_required: false,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransactionId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn reference(&self) -> Option<&ReferenceNumber> {
        self.reference.as_ref()
    }

    pub fn operator(&self) -> Option<UserId> {
        self.operator
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn details(&self) -> Option<&TransactionDetails> {
        self.details.as_ref()
    }

    pub fn kind(&self) -> Option<TransactionKind> {
        self.details.as_ref().map(|d| d.kind)
    }

    /// Totals fixed at finalize; zero while the transaction is a draft.
    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn schedule(&self) -> Option<&PaymentSchedule> {
        self.schedule.as_ref()
    }

    pub fn settlement_deadline(&self) -> Option<NaiveDate> {
        self.settlement_deadline
    }

    pub fn total_paid(&self) -> Money {
        self.total_paid
    }

    pub fn business_date(&self) -> Option<NaiveDate> {
        self.business_date
    }

    pub fn last_payment_on(&self) -> Option<NaiveDate> {
        self.last_payment_on
    }

    pub fn settled_on(&self) -> Option<NaiveDate> {
        self.settled_on
    }

    /// Settled books were voided; someone has to review the reversal by hand.
    pub fn audit_required(&self) -> bool {
        self.audit_required
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Balance still owed. Zero for drafts and cancelled transactions.
    pub fn outstanding(&self) -> Money {
        match self.status {
            TransactionStatus::Draft | TransactionStatus::Cancelled => Money::ZERO,
            _ => self.balance().clamp_non_negative(),
        }
    }

    pub fn next_due(&self) -> Option<&PaymentScheduleEntry> {
        self.schedule.as_ref().and_then(|s| s.next_unpaid())
    }

    pub fn overdue(&self, as_of: NaiveDate) -> Vec<&PaymentScheduleEntry> {
        match (&self.schedule, self.status) {
            (Some(s), TransactionStatus::AwaitingPayment) => s.overdue(as_of).collect(),
            _ => Vec::new(),
        }
    }

    /// amount due after checkout minus everything paid since.
    fn balance(&self) -> Money {
        self.totals.amount_due - self.total_paid
    }
}

impl AggregateRoot for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SaveDraft (create or edit a held transaction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveDraft {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    /// Used only when the transaction has no number yet.
    pub reference: ReferenceNumber,
    pub operator: UserId,
    pub details: TransactionDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinalizeTransaction (checkout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub reference: ReferenceNumber,
    pub operator: UserId,
    pub details: TransactionDetails,
    /// Business date of checkout; installments fall due relative to it.
    pub start_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPayment {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub mode: PaymentMode,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionCommand {
    SaveDraft(SaveDraft),
    Finalize(FinalizeTransaction),
    ApplyPayment(ApplyPayment),
    Cancel(CancelTransaction),
}

/// Event: DraftSaved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSaved {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub reference: ReferenceNumber,
    pub operator: UserId,
    pub details: TransactionDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionFinalized. Carries the generated schedule; replay never regenerates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFinalized {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub reference: ReferenceNumber,
    pub operator: UserId,
    pub details: TransactionDetails,
    pub totals: Totals,
    pub schedule: Option<PaymentSchedule>,
    pub settlement_deadline: Option<NaiveDate>,
    /// Collected at the counter for non-deferred methods.
    pub paid_at_checkout: Money,
    pub status: TransactionStatus,
    pub business_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplied {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub mode: PaymentMode,
    pub amount_tendered: Money,
    pub applied: Money,
    pub change: Money,
    pub payment_date: NaiveDate,
    pub installments_settled: Vec<u32>,
    pub total_paid_after: Money,
    pub outstanding_after: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionSettled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSettled {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub settled_on: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCancelled {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub previous_status: TransactionStatus,
    pub reason: Option<String>,
    pub requires_audit: bool,
    pub outstanding_at_cancel: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEvent {
    DraftSaved(DraftSaved),
    Finalized(TransactionFinalized),
    PaymentApplied(PaymentApplied),
    Settled(TransactionSettled),
    Cancelled(TransactionCancelled),
}

impl Event for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::DraftSaved(_) => "credit.transaction.draft_saved",
            TransactionEvent::Finalized(_) => "credit.transaction.finalized",
            TransactionEvent::PaymentApplied(_) => "credit.transaction.payment_applied",
            TransactionEvent::Settled(_) => "credit.transaction.settled",
            TransactionEvent::Cancelled(_) => "credit.transaction.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransactionEvent::DraftSaved(e) => e.occurred_at,
            TransactionEvent::Finalized(e) => e.occurred_at,
            TransactionEvent::PaymentApplied(e) => e.occurred_at,
            TransactionEvent::Settled(e) => e.occurred_at,
            TransactionEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transaction {
    type Command = TransactionCommand;
    type Event = TransactionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransactionEvent::DraftSaved(e) => {
                self.id = e.transaction_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = Some(e.reference.clone());
                self.operator = Some(e.operator);
                self.details = Some(e.details.clone());
                self.status = TransactionStatus::Draft;
                if self.created_at.is_none() {
                    self.created_at = Some(e.occurred_at);
                }
                self.created = true;
            }
            TransactionEvent::Finalized(e) => {
                self.id = e.transaction_id;
                self.tenant_id = Some(e.tenant_id);
                self.reference = Some(e.reference.clone());
                self.operator = Some(e.operator);
                self.details = Some(e.details.clone());
                self.totals = e.totals;
                self.schedule = e.schedule.clone();
                self.settlement_deadline = e.settlement_deadline;
                self.total_paid = e.paid_at_checkout;
                self.status = e.status;
                self.business_date = Some(e.business_date);
                if e.status == TransactionStatus::Settled {
                    self.settled_on = Some(e.business_date);
                }
                if self.created_at.is_none() {
                    self.created_at = Some(e.occurred_at);
                }
                self.created = true;
            }
            TransactionEvent::PaymentApplied(e) => {
                if let Some(schedule) = self.schedule.as_mut() {
                    let mut settlement = schedule.settlement();
                    for _ in &e.installments_settled {
                        settlement.pay_next(e.payment_date);
                    }
                }
                self.total_paid = e.total_paid_after;
                self.last_payment_on = Some(e.payment_date);
            }
            TransactionEvent::Settled(e) => {
                self.status = TransactionStatus::Settled;
                self.settled_on = Some(e.settled_on);
            }
            TransactionEvent::Cancelled(e) => {
                self.status = TransactionStatus::Cancelled;
                self.audit_required = e.requires_audit;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransactionCommand::SaveDraft(cmd) => self.handle_save_draft(cmd),
            TransactionCommand::Finalize(cmd) => self.handle_finalize(cmd),
            TransactionCommand::ApplyPayment(cmd) => self.handle_apply_payment(cmd),
            TransactionCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Transaction {
    fn ensure_target(&self, tenant_id: TenantId, transaction_id: TransactionId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != transaction_id {
            return Err(DomainError::invariant("transaction_id mismatch"));
        }
        Ok(())
    }

    /// Number kept from the first save, or the proposed one for a new transaction.
    fn assign_reference(
        &self,
        proposed: &ReferenceNumber,
        kind: TransactionKind,
    ) -> Result<ReferenceNumber, DomainError> {
        if let Some(existing) = &self.reference {
            if self.kind().is_some_and(|k| k != kind) {
                return Err(DomainError::validation(
                    "transaction kind cannot change once numbered",
                ));
            }
            return Ok(existing.clone());
        }
        if proposed.kind() != Some(kind) {
            return Err(DomainError::validation(format!(
                "reference {proposed} does not match a {kind} transaction"
            )));
        }
        Ok(proposed.clone())
    }

    fn handle_save_draft(&self, cmd: &SaveDraft) -> Result<Vec<TransactionEvent>, DomainError> {
        if self.created {
            self.ensure_target(cmd.tenant_id, cmd.transaction_id)?;
            if self.status != TransactionStatus::Draft {
                return Err(DomainError::invalid_transition(self.status, TransactionStatus::Draft));
            }
        }
        cmd.details.validate_shape()?;
        let reference = self.assign_reference(&cmd.reference, cmd.details.kind)?;

        Ok(vec![TransactionEvent::DraftSaved(DraftSaved {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            reference,
            operator: cmd.operator,
            details: cmd.details.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finalize(&self, cmd: &FinalizeTransaction) -> Result<Vec<TransactionEvent>, DomainError> {
        if self.created {
            self.ensure_target(cmd.tenant_id, cmd.transaction_id)?;
            match self.status {
                // Retried checkout: already done, nothing to add.
                TransactionStatus::AwaitingPayment | TransactionStatus::Settled => return Ok(vec![]),
                TransactionStatus::Cancelled => {
                    return Err(DomainError::invalid_transition(
                        TransactionStatus::Cancelled,
                        TransactionStatus::AwaitingPayment,
                    ));
                }
                TransactionStatus::Draft => {}
            }
        }

        let details = &cmd.details;
        details.validate_for_checkout()?;
        let reference = self.assign_reference(&cmd.reference, details.kind)?;
        let totals = details.totals()?;

        let schedule = match (details.terms.method, details.terms.installment) {
            (PaymentMethod::Installment, Some(plan)) => {
                let duration = NonZeroU32::new(plan.duration).ok_or_else(|| {
                    DomainError::invalid_schedule("installment duration must be positive")
                })?;
                Some(generate(
                    totals.net(),
                    totals.down_payment,
                    duration,
                    plan.unit,
                    cmd.start_date,
                )?)
            }
            _ => None,
        };

        let deferred = details.terms.method.is_deferred();
        let paid_at_checkout = if deferred { Money::ZERO } else { totals.amount_due };
        let to = if deferred && totals.amount_due.is_positive() {
            TransactionStatus::AwaitingPayment
        } else {
            TransactionStatus::Settled
        };
        TransactionStatus::Draft.transition(to)?;

        Ok(vec![TransactionEvent::Finalized(TransactionFinalized {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            reference,
            operator: cmd.operator,
            details: details.clone(),
            totals,
            settlement_deadline: schedule.as_ref().and_then(|s| s.settlement_deadline()),
            schedule,
            paid_at_checkout,
            status: to,
            business_date: cmd.start_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_payment(&self, cmd: &ApplyPayment) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.transaction_id)?;
        if !self.status.accepts_payments() {
            return Err(DomainError::not_payable(self.status));
        }

        let balance = self.balance();
        if balance.is_negative() {
            return Err(DomainError::invariant(format!("negative outstanding balance {balance}")));
        }
        let allocation = allocate_payment(
            balance,
            self.total_paid,
            self.schedule.as_ref(),
            cmd.amount,
            cmd.mode,
        )?;
        let settles = allocation.settles();
        if settles {
            self.status.transition(TransactionStatus::Settled)?;
        }

        let mut events = vec![TransactionEvent::PaymentApplied(PaymentApplied {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            mode: cmd.mode,
            amount_tendered: cmd.amount,
            applied: allocation.applied,
            change: allocation.change,
            payment_date: cmd.payment_date,
            installments_settled: allocation.installments_settled,
            total_paid_after: allocation.total_paid_after,
            outstanding_after: allocation.outstanding_after,
            occurred_at: cmd.occurred_at,
        })];
        if settles {
            events.push(TransactionEvent::Settled(TransactionSettled {
                tenant_id: cmd.tenant_id,
                transaction_id: cmd.transaction_id,
                settled_on: cmd.payment_date,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelTransaction) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.transaction_id)?;
        let transition = self.status.transition(TransactionStatus::Cancelled)?;

        Ok(vec![TransactionEvent::Cancelled(TransactionCancelled {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            previous_status: transition.from,
            reason: cmd.reason.clone(),
            requires_audit: transition.requires_audit,
            outstanding_at_cancel: self.outstanding(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
