// Amount module
// Fixed-point chain amount used for votes and deposits.
//
// INVARIANTS:
// - 1 coin = 100_000_000 units (8 decimal places)
// - Signed: vote/deposit deltas may be negative during rollback arithmetic
// - No system time or randomness

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Number of minimal units per whole coin.
pub const UNITS_PER_COIN: i64 = 100_000_000;

/// Signed 64-bit fixed-point amount with 8 decimal places.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Fixed64(pub i64);

impl Fixed64 {
    pub const ZERO: Fixed64 = Fixed64(0);

    /// Builds an amount from a whole number of coins.
    pub fn from_coins(coins: i64) -> Fixed64 {
        Fixed64(coins * UNITS_PER_COIN)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl Add for Fixed64 {
    type Output = Fixed64;
    fn add(self, rhs: Fixed64) -> Fixed64 {
        Fixed64(self.0 + rhs.0)
    }
}

impl Sub for Fixed64 {
    type Output = Fixed64;
    fn sub(self, rhs: Fixed64) -> Fixed64 {
        Fixed64(self.0 - rhs.0)
    }
}

impl AddAssign for Fixed64 {
    fn add_assign(&mut self, rhs: Fixed64) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Fixed64 {
    fn sub_assign(&mut self, rhs: Fixed64) {
        self.0 -= rhs.0;
    }
}

impl Neg for Fixed64 {
    type Output = Fixed64;
    fn neg(self) -> Fixed64 {
        Fixed64(-self.0)
    }
}

impl Sum for Fixed64 {
    fn sum<I: Iterator<Item = Fixed64>>(iter: I) -> Fixed64 {
        iter.fold(Fixed64::ZERO, Add::add)
    }
}

impl fmt::Display for Fixed64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{}{}.{:08}",
            sign,
            abs / UNITS_PER_COIN as u64,
            abs % UNITS_PER_COIN as u64
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        let a = Fixed64::from_coins(3);
        let b = Fixed64(50_000_000);
        assert_eq!((a + b).value(), 350_000_000);
        assert_eq!((a - b).value(), 250_000_000);
        let mut c = a;
        c += b;
        c -= a;
        assert_eq!(c, b);
    }

    #[test]
    fn test_sum() {
        let total: Fixed64 = [Fixed64(1), Fixed64(2), Fixed64(3)].into_iter().sum();
        assert_eq!(total, Fixed64(6));
    }

    #[test]
    fn test_display() {
        assert_eq!(Fixed64::from_coins(5).to_string(), "5.00000000");
        assert_eq!(Fixed64(123).to_string(), "0.00000123");
        assert_eq!(Fixed64(-150_000_000).to_string(), "-1.50000000");
    }
}
