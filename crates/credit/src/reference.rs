use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use ledgerpos_core::{DomainError, DomainResult};

use crate::terms::TransactionKind;

/// Human-readable transaction number: `{PREFIX}-{YYYYMMDD}-{sequence}`, e.g.
/// `SAL-20261018-00042`. Assigned once on first save and never regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceNumber(String);

impl ReferenceNumber {
    pub fn compose(kind: TransactionKind, date: NaiveDate, sequence: u64, width: usize) -> Self {
        Self(format!(
            "{}-{}-{:0width$}",
            kind.reference_prefix(),
            date.format("%Y%m%d"),
            sequence,
        ))
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        let mut parts = value.splitn(3, '-');
        let (Some(prefix), Some(date), Some(seq)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DomainError::validation(format!("malformed reference number: {value}")));
        };
        if kind_for_prefix(prefix).is_none() {
            return Err(DomainError::validation(format!("unknown reference prefix: {prefix}")));
        }
        if NaiveDate::parse_from_str(date, "%Y%m%d").is_err() {
            return Err(DomainError::validation(format!("bad date in reference number: {value}")));
        }
        if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!("bad sequence in reference number: {value}")));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Transaction kind encoded in the prefix.
    pub fn kind(&self) -> Option<TransactionKind> {
        self.0.split('-').next().and_then(kind_for_prefix)
    }
}

impl core::fmt::Display for ReferenceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn kind_for_prefix(prefix: &str) -> Option<TransactionKind> {
    [
        TransactionKind::Sale,
        TransactionKind::Purchase,
        TransactionKind::Expense,
        TransactionKind::Income,
    ]
    .into_iter()
    .find(|k| k.reference_prefix() == prefix)
}
