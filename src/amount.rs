//! Monetary amounts as integers in the smallest currency unit.
//!
//! All value crossing any boundary of this crate is a whole number of minor
//! units (cents, satoshis, ...). There is no fractional arithmetic and no
//! floating point anywhere in the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

/// A signed quantity of minor currency units.
///
/// Positive values are credits, negative values are debits. Boundary
/// operations (pay, fund, escrow) only accept strictly positive amounts;
/// signed values appear on ledger entries as deltas.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use payrail::Amount;
///
/// let amount = Amount::from_str("2500").unwrap();
/// assert_eq!(amount, Amount::new(2500));
/// assert!(amount.is_positive());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    /// Zero value.
    pub const ZERO: Self = Amount(0);

    /// Creates an amount from a count of minor units.
    pub const fn new(minor_units: i64) -> Self {
        Amount(minor_units)
    }

    /// Returns the raw count of minor units.
    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    /// Returns `true` if this value is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if this value is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checked addition; `None` on overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Checked subtraction; `None` on overflow.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Saturating addition, for reporting aggregates that must stay monotone.
    pub fn saturating_add(self, rhs: Self) -> Self {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        // Safety: the engine only negates validated positive amounts,
        // which are always in range.
        Amount(-self.0)
    }
}

impl FromStr for Amount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_parses_minor_units() {
        assert_eq!(Amount::from_str("2500").unwrap(), Amount::new(2500));
        assert_eq!(Amount::from_str("  100  ").unwrap(), Amount::new(100));
        assert_eq!(Amount::from_str("-42").unwrap(), Amount::new(-42));
    }

    #[test]
    fn test_from_str_rejects_fractions() {
        assert!(Amount::from_str("10.5").is_err());
        assert!(Amount::from_str("1e3").is_err());
        assert!(Amount::from_str("").is_err());
    }

    #[test]
    fn test_display_is_plain_integer() {
        assert_eq!(Amount::new(2500).to_string(), "2500");
        assert_eq!(Amount::new(-7).to_string(), "-7");
        assert_eq!(Amount::ZERO.to_string(), "0");
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Amount::new(i64::MAX);
        assert!(a.checked_add(Amount::new(1)).is_none());
        assert_eq!(
            Amount::new(10).checked_sub(Amount::new(3)),
            Some(Amount::new(7))
        );
    }

    #[test]
    fn test_negation_flips_sign() {
        assert_eq!(-Amount::new(500), Amount::new(-500));
        assert_eq!(-Amount::new(-500), Amount::new(500));
    }

    #[test]
    fn test_sign_predicates() {
        assert!(Amount::new(1).is_positive());
        assert!(!Amount::ZERO.is_positive());
        assert!(!Amount::new(-1).is_positive());
        assert!(Amount::ZERO.is_zero());
    }
}
