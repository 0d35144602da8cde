//! Append-only event store boundary.
//!
//! Streams are keyed by tenant + aggregate. Nothing here assumes a storage engine; the
//! in-memory store backs tests and single-till deployments.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
