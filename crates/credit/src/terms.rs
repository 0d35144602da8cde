//! Transaction inputs: kind, payment terms, line items and the totals derived from them.

use serde::{Deserialize, Serialize};

use ledgerpos_core::{AggregateId, DomainError, DomainResult, Money, ValueObject};
use ledgerpos_inventory::ProductId;

/// Transaction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub AggregateId);

impl TransactionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Customer or supplier identifier (owned by the parties directory).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub AggregateId);

impl PartyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PartyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The other side of a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Counterparty {
    Customer(PartyId),
    Supplier(PartyId),
}

impl Counterparty {
    pub fn party_id(&self) -> PartyId {
        match self {
            Counterparty::Customer(id) | Counterparty::Supplier(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    #[serde(alias = "penjualan")]
    Sale,
    #[serde(alias = "pembelian")]
    Purchase,
    #[serde(alias = "pengeluaran")]
    Expense,
    #[serde(alias = "pemasukan")]
    Income,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Sale => "sale",
            TransactionKind::Purchase => "purchase",
            TransactionKind::Expense => "expense",
            TransactionKind::Income => "income",
        }
    }

    /// Prefix of the human-readable reference number.
    pub fn reference_prefix(self) -> &'static str {
        match self {
            TransactionKind::Sale => "SAL",
            TransactionKind::Purchase => "PUR",
            TransactionKind::Expense => "EXP",
            TransactionKind::Income => "INC",
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[serde(alias = "tunai")]
    Cash,
    #[serde(alias = "kartu")]
    Card,
    #[serde(alias = "transfer")]
    BankTransfer,
    #[serde(alias = "cicilan")]
    Installment,
    #[serde(alias = "hutang")]
    OpenCredit,
}

impl PaymentMethod {
    /// Installment and open credit leave a balance to be paid later.
    pub fn is_deferred(self) -> bool {
        matches!(self, PaymentMethod::Installment | PaymentMethod::OpenCredit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Installment => "installment",
            PaymentMethod::OpenCredit => "open_credit",
        }
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spacing between installment due dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    #[serde(alias = "hari")]
    Day,
    #[serde(alias = "bulan")]
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub duration: u32,
    pub unit: DurationUnit,
}

impl ValueObject for InstallmentPlan {}

/// Discount as a fixed amount or as basis points of the principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Discount {
    Amount(Money),
    Percent(i64),
}

impl Default for Discount {
    fn default() -> Self {
        Discount::Amount(Money::ZERO)
    }
}

impl Discount {
    /// Discount in money against `principal`; never negative, never above principal.
    pub fn resolve(self, principal: Money) -> DomainResult<Money> {
        let amount = match self {
            Discount::Amount(amount) => amount,
            Discount::Percent(bp) => {
                if !(0..=10_000).contains(&bp) {
                    return Err(DomainError::validation(
                        "discount percentage must be between 0 and 100",
                    ));
                }
                principal
                    .percent(bp)
                    .ok_or_else(|| DomainError::invariant("discount overflow"))?
            }
        };
        if amount.is_negative() {
            return Err(DomainError::validation("discount cannot be negative"));
        }
        if amount > principal {
            return Err(DomainError::validation("discount cannot exceed the principal"));
        }
        Ok(amount)
    }
}

/// How the transaction is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTerms {
    pub method: PaymentMethod,
    #[serde(default)]
    pub discount: Discount,
    #[serde(default)]
    pub down_payment: Money,
    #[serde(default)]
    pub installment: Option<InstallmentPlan>,
}

impl ValueObject for PaymentTerms {}

impl PaymentTerms {
    /// Paid in full at the counter.
    pub fn immediate(method: PaymentMethod) -> Self {
        Self {
            method,
            discount: Discount::default(),
            down_payment: Money::ZERO,
            installment: None,
        }
    }

    pub fn installment(down_payment: Money, duration: u32, unit: DurationUnit) -> Self {
        Self {
            method: PaymentMethod::Installment,
            discount: Discount::default(),
            down_payment,
            installment: Some(InstallmentPlan { duration, unit }),
        }
    }

    pub fn open_credit(down_payment: Money) -> Self {
        Self {
            method: PaymentMethod::OpenCredit,
            discount: Discount::default(),
            down_payment,
            installment: None,
        }
    }

    pub fn with_discount(mut self, discount: Discount) -> Self {
        self.discount = discount;
        self
    }

    /// Shape checks that do not depend on amounts.
    pub fn validate(&self) -> DomainResult<()> {
        if self.down_payment.is_negative() {
            return Err(DomainError::validation("down payment cannot be negative"));
        }
        if !self.method.is_deferred() && self.down_payment.is_positive() {
            return Err(DomainError::validation(
                "down payment only applies to installment or open credit",
            ));
        }
        match (self.method, self.installment) {
            (PaymentMethod::Installment, None) => Err(DomainError::invalid_schedule(
                "installment payment requires a duration",
            )),
            (PaymentMethod::Installment, Some(plan)) if plan.duration == 0 => Err(
                DomainError::invalid_schedule("installment duration must be positive"),
            ),
            (PaymentMethod::Installment, Some(_)) => Ok(()),
            (_, Some(_)) => Err(DomainError::validation(
                "an installment plan requires the installment payment method",
            )),
            (_, None) => Ok(()),
        }
    }
}

/// One product line as priced by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    /// Acquisition cost per unit at the time of the transaction.
    #[serde(default)]
    pub unit_cost: Money,
}

impl LineItem {
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }

    fn validate(&self, line_no: usize) -> DomainResult<()> {
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "line {line_no}: quantity must be positive"
            )));
        }
        if self.unit_price.is_negative() || self.unit_cost.is_negative() {
            return Err(DomainError::validation(format!(
                "line {line_no}: prices cannot be negative"
            )));
        }
        Ok(())
    }
}

/// Everything the operator fills in for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub kind: TransactionKind,
    pub lines: Vec<LineItem>,
    pub terms: PaymentTerms,
    pub counterparty: Option<Counterparty>,
    pub note: Option<String>,
}

impl TransactionDetails {
    /// Checks that hold for any saved transaction, draft or not.
    pub fn validate_shape(&self) -> DomainResult<()> {
        for (idx, line) in self.lines.iter().enumerate() {
            line.validate(idx + 1)?;
        }
        match (self.kind, self.counterparty) {
            (TransactionKind::Sale, Some(Counterparty::Supplier(_))) => Err(
                DomainError::validation("a sale takes a customer, not a supplier"),
            ),
            (TransactionKind::Purchase, Some(Counterparty::Customer(_))) => Err(
                DomainError::validation("a purchase takes a supplier, not a customer"),
            ),
            _ => Ok(()),
        }
    }

    /// Checks required before a transaction can leave draft.
    pub fn validate_for_checkout(&self) -> DomainResult<()> {
        self.validate_shape()?;
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot finalize a transaction without lines"));
        }
        self.terms.validate()?;
        if self.terms.method.is_deferred() && self.counterparty.is_none() {
            return Err(DomainError::validation(
                "deferred payment requires a customer or supplier",
            ));
        }
        Ok(())
    }

    pub fn principal(&self) -> DomainResult<Money> {
        self.lines.iter().try_fold(Money::ZERO, |acc, line| {
            line.line_total()
                .and_then(|t| acc.checked_add(t))
                .ok_or_else(|| DomainError::invariant("transaction total overflow"))
        })
    }

    pub fn totals(&self) -> DomainResult<Totals> {
        Totals::compute(self)
    }
}

/// Money figures derived from lines and terms.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub principal: Money,
    pub discount: Money,
    pub down_payment: Money,
    /// principal - discount - down payment: what is left to pay after checkout.
    pub amount_due: Money,
}

impl ValueObject for Totals {}

impl Totals {
    pub fn compute(details: &TransactionDetails) -> DomainResult<Self> {
        let principal = details.principal()?;
        let discount = details.terms.discount.resolve(principal)?;
        let net = principal
            .checked_sub(discount)
            .ok_or_else(|| DomainError::invariant("discounted total overflow"))?;
        let down_payment = details.terms.down_payment;
        if down_payment.is_negative() {
            return Err(DomainError::validation("down payment cannot be negative"));
        }
        if down_payment > net {
            return Err(DomainError::validation("down payment exceeds the amount due"));
        }
        Ok(Self {
            principal,
            discount,
            down_payment,
            amount_due: net - down_payment,
        })
    }

    /// Principal after discount.
    pub fn net(&self) -> Money {
        self.principal - self.discount
    }
}
