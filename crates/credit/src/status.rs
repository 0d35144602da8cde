use serde::{Deserialize, Serialize};

use ledgerpos_core::{DomainError, DomainResult};

/// Lifecycle of a transaction.
///
/// ```text
/// Draft -> AwaitingPayment -> Settled
///   |            |              |
///   +----------> Cancelled <----+   (Settled -> Cancelled is audit-flagged)
/// Draft -> Settled                  (paid in full at checkout)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[serde(alias = "tunda")]
    Draft,
    #[serde(alias = "belum_lunas")]
    AwaitingPayment,
    #[serde(alias = "lunas")]
    Settled,
    #[serde(alias = "batal")]
    Cancelled,
}

/// A permitted status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    /// Cancelling settled books needs a separate audit trail.
    pub requires_audit: bool,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Draft => "draft",
            TransactionStatus::AwaitingPayment => "awaiting_payment",
            TransactionStatus::Settled => "settled",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Cancelled)
    }

    pub fn accepts_payments(self) -> bool {
        matches!(self, TransactionStatus::AwaitingPayment)
    }

    pub fn can_transition_to(self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, to),
            (Draft, AwaitingPayment)
                | (Draft, Settled)
                | (Draft, Cancelled)
                | (AwaitingPayment, Settled)
                | (AwaitingPayment, Cancelled)
                | (Settled, Cancelled)
        )
    }

    pub fn transition(self, to: TransactionStatus) -> DomainResult<StatusTransition> {
        if !self.can_transition_to(to) {
            return Err(DomainError::invalid_transition(self, to));
        }
        Ok(StatusTransition {
            from: self,
            to,
            requires_audit: self == TransactionStatus::Settled && to == TransactionStatus::Cancelled,
        })
    }
}

impl core::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
