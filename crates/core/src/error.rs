//! Domain error model.

use thiserror::Error;

use crate::money::Money;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts, ledger rules). Infrastructure concerns belong elsewhere.
/// Every variant is recoverable at the caller boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,

    /// Installment schedule cannot be built (bad duration or nothing to finance).
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A status change not permitted by the transaction state machine.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Payment attempted on a transaction that is not awaiting payment.
    #[error("transaction is not payable in status {0}")]
    NotPayable(String),

    /// Partial payment larger than the remaining balance.
    #[error("payment of {amount} exceeds outstanding balance of {outstanding}")]
    ExcessPayment { amount: Money, outstanding: Money },

    /// Settling payment smaller than the remaining balance.
    #[error("payment of {amount} does not cover outstanding balance of {outstanding}")]
    InsufficientPayment { amount: Money, outstanding: Money },

    /// Weighted-average cost cannot be computed (zero total quantity).
    #[error("cost undefined: {0}")]
    CostUndefined(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn invalid_schedule(msg: impl Into<String>) -> Self {
        Self::InvalidSchedule(msg.into())
    }

    pub fn invalid_transition(from: impl core::fmt::Display, to: impl core::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn not_payable(status: impl core::fmt::Display) -> Self {
        Self::NotPayable(status.to_string())
    }

    pub fn cost_undefined(msg: impl Into<String>) -> Self {
        Self::CostUndefined(msg.into())
    }

    /// Sentence suitable for showing to the operator who submitted the request.
    pub fn user_message(&self) -> String {
        match self {
            DomainError::Validation(msg) => format!("invalid input: {msg}"),
            DomainError::InvariantViolation(_) => {
                "the transaction is in an inconsistent state; please contact support".to_string()
            }
            DomainError::InvalidId(_) => "the reference is not valid".to_string(),
            DomainError::NotFound => "transaction not found".to_string(),
            DomainError::Conflict(_) => {
                "the transaction was changed by someone else; please retry".to_string()
            }
            DomainError::Unauthorized => "you are not allowed to do this".to_string(),
            DomainError::InvalidSchedule(msg) => format!("installment plan is not valid: {msg}"),
            DomainError::InvalidTransition { from, to } => {
                format!("a {from} transaction cannot become {to}")
            }
            DomainError::NotPayable(status) => {
                format!("payments are not accepted for a {status} transaction")
            }
            DomainError::ExcessPayment { outstanding, .. } => {
                format!("payment exceeds remaining balance ({outstanding})")
            }
            DomainError::InsufficientPayment { outstanding, .. } => {
                format!("payment does not cover remaining balance ({outstanding})")
            }
            DomainError::CostUndefined(_) => {
                "product cost cannot be computed for zero stock".to_string()
            }
        }
    }
}
