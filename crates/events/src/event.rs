use chrono::{DateTime, Utc};

/// A recorded ledger fact.
///
/// Events are immutable, versioned for schema evolution and only ever appended.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name (e.g. "credit.transaction.payment_applied").
    fn event_type(&self) -> &'static str;

    /// Schema version of this event type.
    fn version(&self) -> u32;

    /// Business time at which the fact happened.
    fn occurred_at(&self) -> DateTime<Utc>;
}
