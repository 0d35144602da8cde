//! Credit transaction ledger: deferred-payment transactions, their installment schedules,
//! payment allocation and the status lifecycle.

pub mod draft;
pub mod payment;
pub mod reference;
pub mod schedule;
pub mod status;
pub mod terms;
pub mod transaction;

pub use draft::DraftState;
pub use payment::{PaymentAllocation, PaymentMode, allocate_payment};
pub use reference::ReferenceNumber;
pub use schedule::{PaymentSchedule, PaymentScheduleEntry, generate};
pub use status::{StatusTransition, TransactionStatus};
pub use terms::{
    Counterparty, Discount, DurationUnit, InstallmentPlan, LineItem, PartyId, PaymentMethod,
    PaymentTerms, Totals, TransactionDetails, TransactionId, TransactionKind,
};
pub use transaction::{
    ApplyPayment, CancelTransaction, DraftSaved, FinalizeTransaction, PaymentApplied, SaveDraft,
    Transaction, TransactionCancelled, TransactionCommand, TransactionEvent, TransactionFinalized,
    TransactionSettled,
};
