use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerpos_core::{Aggregate, AggregateRoot, DomainError, Money, TenantId};
use ledgerpos_events::Event;

use crate::cost::{ProductCostRecord, ProductId, apply_issue, apply_purchase, apply_return};

/// Aggregate root: InventoryItem (one product's stock and cost).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    id: ProductId,
    tenant_id: Option<TenantId>,
    name: String,
    cost: ProductCostRecord,
    version: u64,
    created: bool,
}

impl InventoryItem {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            cost: ProductCostRecord::empty(id),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    pub fn on_hand(&self) -> i64 {
        self.cost.on_hand()
    }

    pub fn average_cost(&self) -> Money {
        self.cost.average_cost()
    }

    pub fn cost_record(&self) -> &ProductCostRecord {
        &self.cost
    }
}

impl AggregateRoot for InventoryItem {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterItem (opening balance optional).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterItem {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub opening_quantity: i64,
    pub opening_unit_cost: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (purchase line; runs the costing engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Money,
    /// Reference number of the originating transaction.
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueStock (sale line, or goods returned to a supplier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestoreStock (cancelled sale).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    RegisterItem(RegisterItem),
    ReceiveStock(ReceiveStock),
    IssueStock(IssueStock),
    RestoreStock(RestoreStock),
}

/// Event: ItemRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRegistered {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub on_hand: i64,
    pub average_cost: Money,
    pub carried_value: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived. Carries the resulting cost record so replay never re-runs the
/// costing arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Money,
    pub source: Option<String>,
    pub on_hand_after: i64,
    pub average_cost_after: Money,
    pub carried_value_after: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIssued {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub source: Option<String>,
    pub on_hand_after: i64,
    pub carried_value_after: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockRestored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRestored {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub source: Option<String>,
    pub on_hand_after: i64,
    pub carried_value_after: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ItemRegistered(ItemRegistered),
    StockReceived(StockReceived),
    StockIssued(StockIssued),
    StockRestored(StockRestored),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ItemRegistered(_) => "inventory.item.registered",
            InventoryEvent::StockReceived(_) => "inventory.item.stock_received",
            InventoryEvent::StockIssued(_) => "inventory.item.stock_issued",
            InventoryEvent::StockRestored(_) => "inventory.item.stock_restored",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ItemRegistered(e) => e.occurred_at,
            InventoryEvent::StockReceived(e) => e.occurred_at,
            InventoryEvent::StockIssued(e) => e.occurred_at,
            InventoryEvent::StockRestored(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryItem {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ItemRegistered(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.cost = ProductCostRecord::from_parts(
                    e.product_id,
                    e.on_hand,
                    e.average_cost,
                    e.carried_value,
                );
                self.created = true;
            }
            InventoryEvent::StockReceived(e) => {
                self.cost = ProductCostRecord::from_parts(
                    self.id,
                    e.on_hand_after,
                    e.average_cost_after,
                    e.carried_value_after,
                );
            }
            InventoryEvent::StockIssued(e) => {
                self.cost = ProductCostRecord::from_parts(
                    self.id,
                    e.on_hand_after,
                    self.cost.average_cost(),
                    e.carried_value_after,
                );
            }
            InventoryEvent::StockRestored(e) => {
                self.cost = ProductCostRecord::from_parts(
                    self.id,
                    e.on_hand_after,
                    self.cost.average_cost(),
                    e.carried_value_after,
                );
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::RegisterItem(cmd) => self.handle_register(cmd),
            InventoryCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            InventoryCommand::IssueStock(cmd) => self.handle_issue(cmd),
            InventoryCommand::RestoreStock(cmd) => self.handle_restore(cmd),
        }
    }
}

impl InventoryItem {
    fn ensure_target(&self, tenant_id: TenantId, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterItem) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already registered"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let opening =
            ProductCostRecord::opening(cmd.product_id, cmd.opening_quantity, cmd.opening_unit_cost)?;

        Ok(vec![InventoryEvent::ItemRegistered(ItemRegistered {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            name: cmd.name.clone(),
            on_hand: opening.on_hand(),
            average_cost: opening.average_cost(),
            carried_value: opening.carried_value(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.product_id)?;
        let updated = apply_purchase(&self.cost, cmd.quantity, cmd.unit_cost)?;

        Ok(vec![InventoryEvent::StockReceived(StockReceived {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            source: cmd.source.clone(),
            on_hand_after: updated.on_hand(),
            average_cost_after: updated.average_cost(),
            carried_value_after: updated.carried_value(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &IssueStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.product_id)?;
        let updated = apply_issue(&self.cost, cmd.quantity)?;

        Ok(vec![InventoryEvent::StockIssued(StockIssued {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            source: cmd.source.clone(),
            on_hand_after: updated.on_hand(),
            carried_value_after: updated.carried_value(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restore(&self, cmd: &RestoreStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.product_id)?;
        let updated = apply_return(&self.cost, cmd.quantity)?;

        Ok(vec![InventoryEvent::StockRestored(StockRestored {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            source: cmd.source.clone(),
            on_hand_after: updated.on_hand(),
            carried_value_after: updated.carried_value(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerpos_core::AggregateId;
    use ledgerpos_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered(tenant_id: TenantId, quantity: i64, unit_cost: i64) -> InventoryItem {
        let product_id = ProductId::new(AggregateId::new());
        let mut item = InventoryItem::empty(product_id);
        execute(
            &mut item,
            &InventoryCommand::RegisterItem(RegisterItem {
                tenant_id,
                product_id,
                name: "Beras 5kg".to_string(),
                opening_quantity: quantity,
                opening_unit_cost: Money::from_minor(unit_cost),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        item
    }

    #[test]
    fn receiving_stock_updates_weighted_cost() {
        let tenant_id = TenantId::new();
        let mut item = registered(tenant_id, 0, 0);
        let product_id = item.id_typed();

        for (qty, cost) in [(10, 100), (10, 200)] {
            execute(
                &mut item,
                &InventoryCommand::ReceiveStock(ReceiveStock {
                    tenant_id,
                    product_id,
                    quantity: qty,
                    unit_cost: Money::from_minor(cost),
                    source: Some("PUR-20261018-00001".to_string()),
                    occurred_at: test_time(),
                }),
            )
            .unwrap();
        }

        assert_eq!(item.on_hand(), 20);
        assert_eq!(item.average_cost(), Money::from_minor(150));
        assert_eq!(item.version(), 3);
    }

    #[test]
    fn issuing_more_than_on_hand_is_rejected_without_state_change() {
        let tenant_id = TenantId::new();
        let mut item = registered(tenant_id, 2, 500);
        let before = item.clone();
        let product_id = item.id_typed();

        let err = execute(
            &mut item,
            &InventoryCommand::IssueStock(IssueStock {
                tenant_id,
                product_id,
                quantity: 3,
                source: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();

        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(item, before);
    }

    #[test]
    fn restore_reverses_issue() {
        let tenant_id = TenantId::new();
        let mut item = registered(tenant_id, 5, 1_000);
        let product_id = item.id_typed();

        execute(
            &mut item,
            &InventoryCommand::IssueStock(IssueStock {
                tenant_id,
                product_id,
                quantity: 2,
                source: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(item.on_hand(), 3);

        execute(
            &mut item,
            &InventoryCommand::RestoreStock(RestoreStock {
                tenant_id,
                product_id,
                quantity: 2,
                source: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(item.on_hand(), 5);
        assert_eq!(item.cost_record().carried_value(), Money::from_minor(5_000));
    }

    #[test]
    fn commands_on_unregistered_item_are_not_found() {
        let product_id = ProductId::new(AggregateId::new());
        let item = InventoryItem::empty(product_id);
        let err = item
            .handle(&InventoryCommand::IssueStock(IssueStock {
                tenant_id: TenantId::new(),
                product_id,
                quantity: 1,
                source: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn other_tenant_cannot_touch_item() {
        let item = registered(TenantId::new(), 5, 100);
        let err = item
            .handle(&InventoryCommand::IssueStock(IssueStock {
                tenant_id: TenantId::new(),
                product_id: item.id_typed(),
                quantity: 1,
                source: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
