use thiserror::Error;

use ledgerpos_core::DomainError;

use crate::collaborators::CollaboratorError;
use crate::command_dispatcher::DispatchError;

/// Failure of a ledger operation. Every variant leaves the transaction as it was.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(DomainError),

    #[error(transparent)]
    Dispatch(DispatchError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        LedgerError::Domain(value)
    }
}

impl From<DispatchError> for LedgerError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => LedgerError::Domain(e),
            other => LedgerError::Dispatch(other),
        }
    }
}

impl LedgerError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Sentence for the operator at the till.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::Domain(e) => e.user_message(),
            LedgerError::Dispatch(DispatchError::Concurrency(_)) => {
                "the transaction was changed by someone else; please retry".to_string()
            }
            LedgerError::Dispatch(_) => "the ledger is temporarily unavailable; please retry".to_string(),
            LedgerError::Collaborator(CollaboratorError::Stock { source, .. }) => match source.as_domain() {
                Some(e) => format!("stock update failed: {}", e.user_message()),
                None => "stock update failed; please retry".to_string(),
            },
            LedgerError::Collaborator(e) => e.to_string(),
        }
    }
}
