//! Fixed-point money amounts.
//!
//! `Money` is an integer count of the smallest currency unit (e.g. rupiah, cents). All
//! ledger arithmetic goes through this type; there is no float constructor. Rendering to a
//! display currency string is left to the presentation layer.

use core::iter::Sum;
use core::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Basis points in one whole (100.00%).
pub const BASIS_POINTS_PER_UNIT: i64 = 10_000;

/// Amount in the smallest currency unit.
///
/// Subtraction may produce a negative value; callers in money-moving paths must check
/// the sign (see [`Money::checked_sub`] / [`Money::is_negative`]) rather than clamp.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Multiply by an integer quantity (line totals).
    pub fn checked_mul(self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }

    /// Zero for negative amounts. Display/read paths only.
    pub fn clamp_non_negative(self) -> Money {
        Money(self.0.max(0))
    }

    /// Percentage of this amount, given in basis points (`1_250` = 12.5%), rounded to the
    /// nearest minor unit with halves rounded away from zero.
    pub fn percent(self, basis_points: i64) -> Option<Money> {
        let scaled = (self.0 as i128).checked_mul(basis_points as i128)?;
        let rounded = div_round_half_up(scaled, BASIS_POINTS_PER_UNIT as i128)?;
        i64::try_from(rounded).ok().map(Money)
    }

    /// This amount increased by a margin in basis points (profit-margin pricing).
    pub fn with_margin(self, basis_points: i64) -> Option<Money> {
        self.checked_add(self.percent(basis_points)?)
    }

    /// `numerator / denominator` rounded half-up into a money amount.
    ///
    /// Returns `None` for a zero denominator or when the result does not fit.
    pub fn from_ratio(numerator: i128, denominator: i128) -> Option<Money> {
        let q = div_round_half_up(numerator, denominator)?;
        i64::try_from(q).ok().map(Money)
    }

    /// Split into `parts` equal floor-shares; returns `(share, last_share)` where the last
    /// share absorbs the remainder so that `share * (parts - 1) + last_share == self`.
    pub fn split_even(self, parts: u32) -> Option<(Money, Money)> {
        if parts == 0 {
            return None;
        }
        let parts = parts as i64;
        let share = self.0.div_euclid(parts);
        let last = self.0.checked_sub(share.checked_mul(parts - 1)?)?;
        Some((Money(share), Money(last)))
    }
}

/// Integer division rounding halves away from zero.
fn div_round_half_up(numerator: i128, denominator: i128) -> Option<i128> {
    if denominator == 0 {
        return None;
    }
    let (n, d) = if denominator < 0 {
        (numerator.checked_neg()?, denominator.checked_neg()?)
    } else {
        (numerator, denominator)
    };
    let q = n / d;
    let r = n % d;
    if r.checked_mul(2)?.abs() >= d {
        if n < 0 { q.checked_sub(1) } else { q.checked_add(1) }
    } else {
        Some(q)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

// Operators saturate at the `i64` bounds instead of panicking or wrapping. Paths that move
// money use the `checked_*` methods and reject overflow as an error.
impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Mul<i64> for Money {
    type Output = Money;

    fn mul(self, quantity: i64) -> Money {
        Money(self.0.saturating_mul(quantity))
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(self.0.saturating_neg())
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}
