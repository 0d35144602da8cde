//! Infrastructure for the credit ledger: event storage and dispatch, locking, reference
//! numbers, collaborators, configuration, the ledger service and its read models.

pub mod collaborators;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod ledger;
pub mod locks;
pub mod projections;
pub mod read_model;
pub mod reference;
pub mod stock;

mod integration_tests;
