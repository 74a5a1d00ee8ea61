//! Monetary amounts as integer cents.

use serde::{Deserialize, Serialize};

/// A monetary amount stored as integer cents to avoid floating-point drift.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(0);

    /// Creates an amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents.
    pub fn as_cents(&self) -> i64 {
        self.0
    }

    /// Multiplies a unit price by a quantity, saturating on overflow.
    pub fn times(&self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(quantity)))
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total() {
        let price = Money::from_cents(1250);
        assert_eq!(price.times(3), Money::from_cents(3750));
    }

    #[test]
    fn test_sum() {
        let total: Money = [Money::from_cents(100), Money::from_cents(250)]
            .into_iter()
            .sum();
        assert_eq!(total, Money::from_cents(350));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1999).to_string(), "19.99");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }
}
