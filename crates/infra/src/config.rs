//! Ledger settings read from the environment.
//!
//! | variable                          | default | meaning                                  |
//! |-----------------------------------|---------|------------------------------------------|
//! | `LEDGER_REFERENCE_WIDTH`          | 5       | zero-padded digits of the reference seq  |
//! | `LEDGER_MAX_INSTALLMENTS`         | 360     | longest installment plan accepted        |
//! | `LEDGER_TIMEZONE_OFFSET_MINUTES`  | 0       | shop offset from UTC for business dates  |

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

pub const REFERENCE_WIDTH_VAR: &str = "LEDGER_REFERENCE_WIDTH";
pub const MAX_INSTALLMENTS_VAR: &str = "LEDGER_MAX_INSTALLMENTS";
pub const TIMEZONE_OFFSET_VAR: &str = "LEDGER_TIMEZONE_OFFSET_MINUTES";

const MAX_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub reference_width: usize,
    pub max_installments: u32,
    pub timezone_offset_minutes: i32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reference_width: 5,
            max_installments: 360,
            timezone_offset_minutes: 0,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable or out-of-range values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            reference_width: parse_or(&lookup, REFERENCE_WIDTH_VAR, defaults.reference_width, |w| {
                (1..=12).contains(w)
            }),
            max_installments: parse_or(&lookup, MAX_INSTALLMENTS_VAR, defaults.max_installments, |n| *n > 0),
            timezone_offset_minutes: parse_or(
                &lookup,
                TIMEZONE_OFFSET_VAR,
                defaults.timezone_offset_minutes,
                |m| m.abs() <= MAX_OFFSET_MINUTES,
            ),
        }
    }

    /// Calendar date at the shop for a UTC instant.
    pub fn business_date(&self, at: DateTime<Utc>) -> NaiveDate {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60)
            .map(|tz| at.with_timezone(&tz).date_naive())
            .unwrap_or_else(|| at.date_naive())
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: core::str::FromStr + core::fmt::Display + Copy,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            tracing::warn!(key, value = %raw, %default, "ignoring invalid ledger setting");
            default
        }
    }
}
