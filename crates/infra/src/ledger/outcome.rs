use chrono::NaiveDate;
use serde::Serialize;

use ledgerpos_core::Money;
use ledgerpos_credit::{PaymentMode, ReferenceNumber, Transaction, TransactionId, TransactionStatus};

/// Result of a checkout.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub transaction: Transaction,
    /// The transaction had already been finalized; nothing was changed.
    pub already_finalized: bool,
}

/// What the till prints after a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    pub transaction_id: TransactionId,
    pub reference: Option<ReferenceNumber>,
    pub mode: PaymentMode,
    pub payment_date: NaiveDate,
    pub amount_tendered: Money,
    pub applied: Money,
    pub change: Money,
    pub installments_settled: Vec<u32>,
    pub outstanding: Money,
    pub status: TransactionStatus,
}

/// Side effect that runs alongside a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum EffectOutcome {
    NotRequired,
    Completed,
    Failed(String),
}

impl EffectOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, EffectOutcome::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    pub transaction: Transaction,
    pub stock_reversal: EffectOutcome,
    pub audit: EffectOutcome,
}
