//! Stock and pricing backed by the `InventoryItem` aggregate.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use ledgerpos_core::{Money, TenantId};
use ledgerpos_credit::{LineItem, TransactionKind};
use ledgerpos_events::{EventBus, EventEnvelope};
use ledgerpos_inventory::{
    InventoryCommand, InventoryItem, IssueStock, ProductId, ReceiveStock, RestoreStock,
};

use crate::collaborators::{CollaboratorError, PricingSource, StockMovement, StockMutator};
use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::EventStore;

pub const INVENTORY_AGGREGATE_TYPE: &str = "inventory.item";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Checkout,
    Reversal,
}

/// Issues, receives and restores stock through the inventory event streams.
#[derive(Debug)]
pub struct InventoryStockAdapter<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> InventoryStockAdapter<S, B> {
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }
}

impl<S, B> InventoryStockAdapter<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Inventory command that moves one line in `direction`. Expense and income lines carry
    /// no goods.
    fn command_for(
        movement: &StockMovement<'_>,
        line: &LineItem,
        direction: Direction,
    ) -> Option<InventoryCommand> {
        let tenant_id = movement.tenant_id;
        let product_id = line.product_id;
        let quantity = line.quantity;
        let source = Some(movement.reference.to_string());
        let occurred_at = movement.occurred_at;

        let issue = || {
            InventoryCommand::IssueStock(IssueStock {
                tenant_id,
                product_id,
                quantity,
                source: source.clone(),
                occurred_at,
            })
        };

        match (movement.kind, direction) {
            (TransactionKind::Sale, Direction::Checkout) => Some(issue()),
            (TransactionKind::Sale, Direction::Reversal) => {
                Some(InventoryCommand::RestoreStock(RestoreStock {
                    tenant_id,
                    product_id,
                    quantity,
                    source: source.clone(),
                    occurred_at,
                }))
            }
            (TransactionKind::Purchase, Direction::Checkout) => {
                Some(InventoryCommand::ReceiveStock(ReceiveStock {
                    tenant_id,
                    product_id,
                    quantity,
                    unit_cost: line.unit_price,
                    source: source.clone(),
                    occurred_at,
                }))
            }
            // Goods go back to the supplier; the average cost is left as it is.
            (TransactionKind::Purchase, Direction::Reversal) => Some(issue()),
            (TransactionKind::Expense | TransactionKind::Income, _) => None,
        }
    }

    fn move_line(
        &self,
        movement: &StockMovement<'_>,
        line: &LineItem,
        direction: Direction,
    ) -> Result<(), CollaboratorError> {
        let Some(command) = Self::command_for(movement, line, direction) else {
            return Ok(());
        };
        self.dispatcher
            .dispatch(
                movement.tenant_id,
                line.product_id.0,
                INVENTORY_AGGREGATE_TYPE,
                command,
                |_, id| InventoryItem::empty(ProductId::new(id)),
            )
            .map(|_| ())
            .map_err(|source| CollaboratorError::Stock {
                product_id: line.product_id,
                source,
            })
    }

    fn move_all(&self, movement: &StockMovement<'_>, direction: Direction) -> Result<(), CollaboratorError> {
        let undo = match direction {
            Direction::Checkout => Direction::Reversal,
            Direction::Reversal => Direction::Checkout,
        };

        for (done, line) in movement.lines.iter().enumerate() {
            if let Err(err) = self.move_line(movement, line, direction) {
                for moved in movement.lines[..done].iter().rev() {
                    if let Err(undo_err) = self.move_line(movement, moved, undo) {
                        tracing::error!(
                            reference = %movement.reference,
                            product_id = %moved.product_id,
                            error = %undo_err,
                            "failed to undo stock movement; inventory needs manual correction"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

impl<S, B> StockMutator for InventoryStockAdapter<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn apply_checkout(&self, movement: &StockMovement<'_>) -> Result<(), CollaboratorError> {
        self.move_all(movement, Direction::Checkout)
    }

    fn reverse_checkout(&self, movement: &StockMovement<'_>) -> Result<(), CollaboratorError> {
        self.move_all(movement, Direction::Reversal)
    }
}

impl<S, B> PricingSource for InventoryStockAdapter<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn unit_cost(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Option<Money>, CollaboratorError> {
        let loaded = self
            .dispatcher
            .load(tenant_id, product_id.0, |_, id| InventoryItem::empty(ProductId::new(id)))
            .map_err(|source| CollaboratorError::Stock { product_id, source })?;
        let item = loaded.aggregate;
        Ok(item.is_registered().then(|| item.average_cost()))
    }
}
