//! Read models built from published transaction events.
//!
//! Projections are disposable: each can be rebuilt from the event store and tolerates
//! redelivered envelopes.

pub mod outstanding_balances;

pub use outstanding_balances::{
    BalanceKey, BalanceSide, OutstandingBalance, OutstandingBalancesError, OutstandingBalancesProjection,
};
