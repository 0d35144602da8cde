//! Weighted-average costing engine.
//!
//! A purchase blends the incoming unit cost into the current average:
//!
//! ```text
//! new_cost = (on_hand * avg_cost + incoming_qty * incoming_cost) / (on_hand + incoming_qty)
//! ```
//!
//! `on_hand * avg_cost` is the unrounded value of the stock already held, which the record
//! keeps exactly as `carried_value`. Only the published average is rounded (half-up), so a
//! run of small purchases lands on the same cost as one large purchase and rounding never
//! accumulates.

use serde::{Deserialize, Serialize};

use ledgerpos_core::{AggregateId, DomainError, DomainResult, Money};

/// Product identifier; also the id of the product's inventory stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Per-product costing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCostRecord {
    product_id: ProductId,
    on_hand: i64,
    average_cost: Money,
    carried_value: Money,
}

impl ProductCostRecord {
    /// No stock, no cost history.
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            on_hand: 0,
            average_cost: Money::ZERO,
            carried_value: Money::ZERO,
        }
    }

    /// Opening balance, e.g. migrated from a stock count.
    pub fn opening(product_id: ProductId, on_hand: i64, average_cost: Money) -> DomainResult<Self> {
        if on_hand < 0 {
            return Err(DomainError::validation("on-hand quantity cannot be negative"));
        }
        if average_cost.is_negative() {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        let carried_value = average_cost
            .checked_mul(on_hand)
            .ok_or_else(|| DomainError::invariant("inventory value overflow"))?;
        Ok(Self {
            product_id,
            on_hand,
            average_cost,
            carried_value,
        })
    }

    pub(crate) fn from_parts(
        product_id: ProductId,
        on_hand: i64,
        average_cost: Money,
        carried_value: Money,
    ) -> Self {
        Self {
            product_id,
            on_hand,
            average_cost,
            carried_value,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn on_hand(&self) -> i64 {
        self.on_hand
    }

    pub fn average_cost(&self) -> Money {
        self.average_cost
    }

    /// Exact value of the stock on hand.
    pub fn carried_value(&self) -> Money {
        self.carried_value
    }
}

/// Blend a purchase into the record. Pure: the input record is not touched.
pub fn apply_purchase(
    record: &ProductCostRecord,
    incoming_qty: i64,
    incoming_unit_cost: Money,
) -> DomainResult<ProductCostRecord> {
    if incoming_qty < 0 {
        return Err(DomainError::validation("incoming quantity cannot be negative"));
    }
    if incoming_unit_cost.is_negative() {
        return Err(DomainError::validation("incoming unit cost cannot be negative"));
    }

    let total_qty = record
        .on_hand
        .checked_add(incoming_qty)
        .ok_or_else(|| DomainError::invariant("quantity overflow"))?;
    if total_qty == 0 {
        return Err(DomainError::cost_undefined(format!(
            "product {} would have zero total quantity",
            record.product_id
        )));
    }
    if incoming_qty == 0 {
        return Err(DomainError::validation("incoming quantity must be positive"));
    }

    let incoming_value = incoming_unit_cost
        .checked_mul(incoming_qty)
        .ok_or_else(|| DomainError::invariant("purchase value overflow"))?;
    let carried_value = record
        .carried_value
        .checked_add(incoming_value)
        .ok_or_else(|| DomainError::invariant("inventory value overflow"))?;
    let average_cost = Money::from_ratio(i128::from(carried_value.minor()), i128::from(total_qty))
        .ok_or_else(|| DomainError::invariant("average cost overflow"))?;

    Ok(ProductCostRecord {
        product_id: record.product_id,
        on_hand: total_qty,
        average_cost,
        carried_value,
    })
}

/// Take stock out (sale, return to supplier). The average cost is unchanged; the carried
/// value drops by the proportional share, and to exactly zero when the shelf empties.
pub fn apply_issue(record: &ProductCostRecord, quantity: i64) -> DomainResult<ProductCostRecord> {
    if quantity <= 0 {
        return Err(DomainError::validation("issued quantity must be positive"));
    }
    if quantity > record.on_hand {
        return Err(DomainError::invariant(format!(
            "stock cannot go negative (on hand {}, requested {})",
            record.on_hand, quantity
        )));
    }

    let remaining = record.on_hand - quantity;
    let carried_value = if remaining == 0 {
        Money::ZERO
    } else {
        let removed = Money::from_ratio(
            record.carried_value.minor() as i128 * quantity as i128,
            record.on_hand as i128,
        )
        .ok_or_else(|| DomainError::invariant("inventory value overflow"))?;
        record.carried_value - removed
    };

    Ok(ProductCostRecord {
        product_id: record.product_id,
        on_hand: remaining,
        average_cost: record.average_cost,
        carried_value,
    })
}

/// Put previously issued stock back (cancelled sale) at the current average cost.
pub fn apply_return(record: &ProductCostRecord, quantity: i64) -> DomainResult<ProductCostRecord> {
    if quantity <= 0 {
        return Err(DomainError::validation("returned quantity must be positive"));
    }
    let on_hand = record
        .on_hand
        .checked_add(quantity)
        .ok_or_else(|| DomainError::invariant("quantity overflow"))?;
    let carried_value = record
        .average_cost
        .checked_mul(quantity)
        .and_then(|v| record.carried_value.checked_add(v))
        .ok_or_else(|| DomainError::invariant("inventory value overflow"))?;

    Ok(ProductCostRecord {
        product_id: record.product_id,
        on_hand,
        average_cost: record.average_cost,
        carried_value,
    })
}
