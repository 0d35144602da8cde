//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! load stream -> rehydrate -> handle (pure) -> append (optimistic) -> publish
//! ```
//!
//! The pipeline is also exposed in two halves, [`CommandDispatcher::load`] and
//! [`CommandDispatcher::commit`], so a coordinator can run side effects on other
//! aggregates between the decision and the commit.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use ledgerpos_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion, TenantId};
use ledgerpos_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The command was rejected by the aggregate.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Stream moved on between load and append.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Stored payload no longer matches the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl DispatchError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            DispatchError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// A rehydrated aggregate and the stream revision it was built from.
#[derive(Debug, Clone)]
pub struct Loaded<A> {
    pub aggregate: A,
    pub expected: ExpectedVersion,
}

#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and decide in one go, then commit.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: ledgerpos_events::Event + Serialize + DeserializeOwned,
    {
        let loaded = self.load(tenant_id, aggregate_id, make_aggregate)?;
        let decided = loaded.aggregate.handle(&command)?;
        self.commit(tenant_id, aggregate_id, aggregate_type, loaded.expected, &decided)
    }

    /// Rebuild an aggregate from its stream.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Loaded<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        for stored in &history {
            let ev: A::Event = serde_json::from_value(stored.payload.clone())
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            aggregate.apply(&ev);
        }

        let expected = ExpectedVersion::Exact(stream_version(&history));
        debug_assert_eq!(ExpectedVersion::Exact(aggregate.version()), expected);
        Ok(Loaded { aggregate, expected })
    }

    /// Append decided events at `expected` and publish them.
    ///
    /// Once the append succeeds the events are committed: a bus failure is logged and the
    /// committed events are still returned. Read models that missed them catch up with a
    /// rebuild from the store.
    pub fn commit<E>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: ExpectedVersion,
        events: &[E],
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        E: ledgerpos_events::Event + Serialize,
    {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted = events
            .iter()
            .map(|ev| UncommittedEvent::from_typed(tenant_id, aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;
        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    aggregate_id = %aggregate_id,
                    aggregate_type,
                    sequence_number = stored.sequence_number,
                    error = ?e,
                    "events stored but not published; read models need a rebuild"
                );
                break;
            }
        }
        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

/// Reject streams that mix tenants/aggregates or skip sequence numbers.
fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        let expected = idx as u64 + 1;
        if e.sequence_number != expected {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "gap in loaded stream (expected {expected}, found {})",
                e.sequence_number
            ))));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use ledgerpos_core::Money;
    use ledgerpos_events::InMemoryEventBus;
    use ledgerpos_inventory::{InventoryCommand, InventoryItem, ProductId, ReceiveStock, RegisterItem};

    use super::*;
    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(InMemoryEventStore::new(), Arc::new(InMemoryEventBus::new()))
    }

    fn register(d: &Dispatcher, tenant_id: TenantId, product_id: ProductId) -> Result<Vec<StoredEvent>, DispatchError> {
        d.dispatch(
            tenant_id,
            product_id.0,
            "inventory.item",
            InventoryCommand::RegisterItem(RegisterItem {
                tenant_id,
                product_id,
                name: "Gula 1kg".to_string(),
                opening_quantity: 0,
                opening_unit_cost: Money::ZERO,
                occurred_at: Utc::now(),
            }),
            |_, id| InventoryItem::empty(ProductId::new(id)),
        )
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let (tenant_id, product_id) = (TenantId::new(), ProductId::new(AggregateId::new()));

        let committed = register(&d, tenant_id, product_id).unwrap();
        assert_eq!(committed.len(), 1);

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "inventory.item.registered");
        assert_eq!(published[0].sequence_number(), 1);
    }

    /// Bus that accepts subscribers but refuses every message.
    #[derive(Debug)]
    struct BrokenBus;

    impl EventBus<EventEnvelope<JsonValue>> for BrokenBus {
        type Error = String;

        fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            Err("broker unreachable".to_string())
        }

        fn subscribe(&self) -> ledgerpos_events::Subscription<EventEnvelope<JsonValue>> {
            let (_tx, rx) = std::sync::mpsc::channel();
            ledgerpos_events::Subscription::new(rx)
        }
    }

    #[test]
    fn stored_events_count_as_committed_when_bus_fails() {
        let d = CommandDispatcher::new(InMemoryEventStore::new(), BrokenBus);
        let (tenant_id, product_id) = (TenantId::new(), ProductId::new(AggregateId::new()));

        let committed = d
            .dispatch(
                tenant_id,
                product_id.0,
                "inventory.item",
                InventoryCommand::RegisterItem(RegisterItem {
                    tenant_id,
                    product_id,
                    name: "Gula 1kg".to_string(),
                    opening_quantity: 4,
                    opening_unit_cost: Money::from_minor(100),
                    occurred_at: Utc::now(),
                }),
                |_, id| InventoryItem::empty(ProductId::new(id)),
            )
            .unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(d.store().load_stream(tenant_id, product_id.0).unwrap().len(), 1);
    }

    #[test]
    fn domain_rejection_writes_nothing() {
        let d = dispatcher();
        let (tenant_id, product_id) = (TenantId::new(), ProductId::new(AggregateId::new()));
        register(&d, tenant_id, product_id).unwrap();

        let err = register(&d, tenant_id, product_id).unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::Conflict(_))));
        assert_eq!(d.store().load_stream(tenant_id, product_id.0).unwrap().len(), 1);
    }

    #[test]
    fn commit_against_stale_load_is_a_concurrency_error() {
        let d = dispatcher();
        let (tenant_id, product_id) = (TenantId::new(), ProductId::new(AggregateId::new()));
        register(&d, tenant_id, product_id).unwrap();

        let make = |_: TenantId, id: AggregateId| InventoryItem::empty(ProductId::new(id));
        let stale = d.load(tenant_id, product_id.0, make).unwrap();
        let receive = InventoryCommand::ReceiveStock(ReceiveStock {
            tenant_id,
            product_id,
            quantity: 5,
            unit_cost: Money::from_minor(100),
            source: None,
            occurred_at: Utc::now(),
        });
        d.dispatch(tenant_id, product_id.0, "inventory.item", receive.clone(), make).unwrap();

        let events = stale.aggregate.handle(&receive).unwrap();
        let err = d
            .commit(tenant_id, product_id.0, "inventory.item", stale.expected, &events)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }
}
