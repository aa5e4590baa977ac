//! Ringgit amounts and percentage rates.
//!
//! Every amount in the system is an integer number of **sen** (1/100 MYR).
//! Rates (SST, discounts) are integer basis points, so `600` is 6.00%.
//! Fractional sen produced by a rate are rounded half away from zero.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Amount of Malaysian ringgit, stored in sen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    #[inline]
    pub const fn from_sen(sen: i64) -> Self {
        Money(sen)
    }

    /// `from_ringgit_sen(12, 50)` is RM 12.50. A negative ringgit part makes
    /// the whole amount negative.
    #[inline]
    pub const fn from_ringgit_sen(ringgit: i64, sen: i64) -> Self {
        if ringgit < 0 {
            Money(ringgit * 100 - sen)
        } else {
            Money(ringgit * 100 + sen)
        }
    }

    #[inline]
    pub const fn sen(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("amount overflow"))
    }

    /// Unit price times quantity.
    pub fn times(self, quantity: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("line amount overflow"))
    }

    /// Portion of this amount at `rate`, rounded half away from zero.
    ///
    /// `Money::from_sen(1050).apply_rate(BasisPoints::new(600))` is 63 sen.
    pub fn apply_rate(self, rate: BasisPoints) -> Money {
        Money(div_round_half_away(
            self.0 as i128 * rate.0 as i128,
            10_000,
        ) as i64)
    }

    /// Malaysian cash rounding to the nearest 5 sen.
    ///
    /// The last digit 1-2 goes down to 0, 3-7 goes to 5, and 8-9 goes up to the
    /// next 10. Only applied to cash tenders.
    pub fn round_to_5_sen(self) -> Money {
        let sign = if self.0 < 0 { -1 } else { 1 };
        let magnitude = self.0.abs();
        let base = magnitude - magnitude % 10;
        let rounded = match magnitude % 10 {
            0..=2 => base,
            3..=7 => base + 5,
            _ => base + 10,
        };
        Money(sign * rounded)
    }
}

fn div_round_half_away(numerator: i128, denominator: i128) -> i128 {
    let half = denominator / 2;
    if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    }
}

/// Renders as `RM 1,234.50` (`-RM 3.00` for negatives).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let ringgit = (abs / 100).to_string();
        let mut grouped = String::with_capacity(ringgit.len() + ringgit.len() / 3);
        for (i, ch) in ringgit.chars().enumerate() {
            if i > 0 && (ringgit.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        write!(f, "{sign}RM {grouped}.{:02}", abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// A rate in basis points (1/100 of a percent).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BasisPoints(u32);

impl BasisPoints {
    pub const FULL: BasisPoints = BasisPoints(10_000);

    #[inline]
    pub const fn new(bps: u32) -> Self {
        BasisPoints(bps)
    }

    #[inline]
    pub const fn zero() -> Self {
        BasisPoints(0)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Rejects anything above 100%.
    pub fn validate_percent(self, field: &str) -> DomainResult<Self> {
        if self.0 > Self::FULL.0 {
            return Err(DomainError::validation(format!(
                "{field} cannot exceed 100% (got {} bps)",
                self.0
            )));
        }
        Ok(self)
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn displays_grouped_ringgit() {
        assert_eq!(Money::from_sen(123_450).to_string(), "RM 1,234.50");
        assert_eq!(Money::from_sen(5).to_string(), "RM 0.05");
        assert_eq!(Money::from_sen(-300).to_string(), "-RM 3.00");
        assert_eq!(Money::from_sen(100_000_000).to_string(), "RM 1,000,000.00");
    }

    #[test]
    fn from_ringgit_sen_handles_sign() {
        assert_eq!(Money::from_ringgit_sen(12, 50).sen(), 1250);
        assert_eq!(Money::from_ringgit_sen(-5, 50).sen(), -550);
    }

    #[test]
    fn sst_rounds_half_up() {
        // 6% of RM 10.50 = 63 sen exactly
        assert_eq!(Money::from_sen(1050).apply_rate(BasisPoints::new(600)).sen(), 63);
        // 8% of RM 0.25 = 2 sen
        assert_eq!(Money::from_sen(25).apply_rate(BasisPoints::new(800)).sen(), 2);
        // 10% of 5 sen = 0.5 sen -> 1 sen
        assert_eq!(Money::from_sen(5).apply_rate(BasisPoints::new(1000)).sen(), 1);
        // negative amounts round away from zero
        assert_eq!(Money::from_sen(-5).apply_rate(BasisPoints::new(1000)).sen(), -1);
    }

    #[test]
    fn cash_rounding_follows_bnm_table() {
        let cases = [
            (1000, 1000),
            (1001, 1000),
            (1002, 1000),
            (1003, 1005),
            (1004, 1005),
            (1006, 1005),
            (1007, 1005),
            (1008, 1010),
            (1009, 1010),
        ];
        for (input, expected) in cases {
            assert_eq!(Money::from_sen(input).round_to_5_sen().sen(), expected, "{input}");
        }
    }

    #[test]
    fn percent_validation_caps_at_full() {
        assert!(BasisPoints::new(10_000).validate_percent("tax_rate").is_ok());
        assert!(BasisPoints::new(10_001).validate_percent("tax_rate").is_err());
    }

    #[test]
    fn sums_money() {
        let total: Money = [Money::from_sen(100), Money::from_sen(250)].iter().sum();
        assert_eq!(total, Money::from_sen(350));
    }

    proptest! {
        #[test]
        fn cash_rounding_moves_at_most_two_sen(sen in -10_000_000i64..10_000_000) {
            let rounded = Money::from_sen(sen).round_to_5_sen();
            prop_assert!((rounded.sen() - sen).abs() <= 2);
            prop_assert_eq!(rounded.sen() % 5, 0);
        }

        #[test]
        fn rate_never_exceeds_amount(sen in 0i64..1_000_000_000, bps in 0u32..=10_000) {
            let part = Money::from_sen(sen).apply_rate(BasisPoints::new(bps));
            prop_assert!(part.sen() >= 0);
            prop_assert!(part.sen() <= sen);
        }
    }
}
