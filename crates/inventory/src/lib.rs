//! Inventory costing and stock (event-sourced).
//!
//! `cost` holds the pure weighted-average costing engine; `item` wraps it in an
//! aggregate that owns one product's on-hand quantity. No IO, no storage.

pub mod cost;
pub mod item;

pub use cost::{ProductCostRecord, ProductId, apply_issue, apply_purchase, apply_return};
pub use item::{
    InventoryCommand, InventoryEvent, InventoryItem, IssueStock, ItemRegistered, ReceiveStock,
    RegisterItem, RestoreStock, StockIssued, StockReceived, StockRestored,
};
