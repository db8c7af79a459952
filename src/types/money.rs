//! Money types with precision guarantees for financial calculations.
//!
//! # Design Rationale
//! All monetary values use `Decimal` to avoid floating-point errors.
//! We define newtypes for semantic clarity and type safety. There is
//! deliberately no conversion from `f64`/`f32`: values enter the kernel
//! as strings, integers, or `Decimal` literals only.
//!
//! Final persisted money rounds half-away-from-zero to 2 decimal places;
//! intermediate values keep full `Decimal` precision (28-29 significant
//! digits).

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

use super::{DeskError, DeskResult};

/// Represents a monetary amount with 2-decimal precision for display,
/// but internally maintains full precision for calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(dec!(0));

    /// Create a new Money value from a raw decimal.
    #[inline]
    pub fn new(value: Decimal) -> Self {
        Money(value)
    }

    /// Create from cents (integer).
    #[inline]
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// Create from a whole-dollar integer.
    #[inline]
    pub fn from_dollars(dollars: i64) -> Self {
        Money(Decimal::from(dollars))
    }

    /// Create a Money value that must be non-negative (prices, fees,
    /// allowances). Negative input is a hard failure, not a clamp.
    pub fn non_negative(value: Decimal, field: &str) -> DeskResult<Self> {
        if value < dec!(0) {
            return Err(DeskError::NegativeAmount {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        Ok(Money(value))
    }

    /// Get the raw decimal value.
    #[inline]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Round to the nearest cent, half away from zero.
    ///
    /// This is the persistence rounding for all final money values:
    /// $10.125 becomes $10.13, -$10.125 becomes -$10.13.
    #[inline]
    pub fn round_cents(&self) -> Self {
        Money(self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Round up to the next cent (ceiling).
    #[inline]
    pub fn ceil_cents(&self) -> Self {
        Money((self.0 * dec!(100)).ceil() / dec!(100))
    }

    /// Round down to the previous cent (floor).
    #[inline]
    pub fn floor_cents(&self) -> Self {
        Money((self.0 * dec!(100)).floor() / dec!(100))
    }

    /// Check if value is negative.
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < dec!(0)
    }

    /// Check if value is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == dec!(0)
    }

    /// Return the absolute value.
    #[inline]
    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Return the maximum of two values.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        if self.0 >= other.0 { self } else { other }
    }

    /// Return the minimum of two values.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }

    /// Clamp value to zero (no negatives).
    #[inline]
    pub fn clamp_zero(self) -> Self {
        self.max(Money::ZERO)
    }

    /// Cap the value at `cap` when a cap is present.
    #[inline]
    pub fn apply_cap(self, cap: Option<Money>) -> Self {
        match cap {
            Some(c) => self.min(c),
            None => self,
        }
    }

    /// Multiply by a percentage expressed as a rate (0.5 for 50%).
    #[inline]
    pub fn apply_percent(self, pct: Rate) -> Self {
        Money(self.0 * pct.as_decimal())
    }

    /// Checked division; division by zero is an arithmetic failure.
    pub fn checked_div(self, rhs: Decimal) -> DeskResult<Self> {
        if rhs == dec!(0) {
            return Err(DeskError::Arithmetic {
                message: format!("division of {} by zero", self.0),
            });
        }
        Ok(Money(self.0 / rhs))
    }

    /// Sum a sequence of money values at full precision.
    pub fn sum<I: IntoIterator<Item = Money>>(values: I) -> Money {
        values.into_iter().fold(Money::ZERO, |acc, m| acc + m)
    }

    /// Cent-tolerance equality: |a - b| <= epsilon.
    #[inline]
    pub fn is_equal(a: Money, b: Money, epsilon: Decimal) -> bool {
        (a.0 - b.0).abs() <= epsilon
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::ZERO
    }
}

impl FromStr for Money {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s)
            .map(Money)
            .map_err(|e| DeskError::Arithmetic {
                message: format!("invalid money literal {:?}: {}", s, e),
            })
    }
}

impl Add for Money {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Decimal) -> Self::Output {
        Money(self.0 * rhs)
    }
}

impl Div<Decimal> for Money {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Decimal) -> Self::Output {
        Money(self.0 / rhs)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

/// Represents a rate (APR, tax rate, etc.) as a decimal percentage.
/// Stored as the actual decimal value (e.g., 0.0725 for 7.25%)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(dec!(0));

    /// Create a rate from decimal form (e.g., 0.0725 for 7.25%).
    #[inline]
    pub fn from_decimal(value: Decimal) -> Self {
        Rate(value)
    }

    /// Create a rate from percentage form (e.g., 7.25 for 7.25%).
    #[inline]
    pub fn from_percentage(percent: Decimal) -> Self {
        Rate(percent / dec!(100))
    }

    /// Create a rate that must be non-negative.
    pub fn non_negative(value: Decimal, field: &str) -> DeskResult<Self> {
        if value < dec!(0) {
            return Err(DeskError::NegativeAmount {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        Ok(Rate(value))
    }

    /// Get the decimal value.
    #[inline]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Get as percentage (e.g., 7.25).
    #[inline]
    pub fn as_percentage(&self) -> Decimal {
        self.0 * dec!(100)
    }

    /// Apply this rate to a money amount. Full precision, no rounding.
    #[inline]
    pub fn apply(&self, amount: Money) -> Money {
        amount * self.0
    }

    /// Check if value is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == dec!(0)
    }
}

impl Default for Rate {
    fn default() -> Self {
        Rate::ZERO
    }
}

impl FromStr for Rate {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s)
            .map(Rate)
            .map_err(|e| DeskError::Arithmetic {
                message: format!("invalid rate literal {:?}: {}", s, e),
            })
    }
}

impl Add for Rate {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Rate(self.0 + rhs.0)
    }
}

impl Sub for Rate {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Rate(self.0 - rhs.0)
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.as_percentage())
    }
}

/// Represents a money factor for lease calculations.
/// Typically a small decimal like 0.00125
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoneyFactor(Decimal);

impl MoneyFactor {
    /// Create from the raw money factor value.
    #[inline]
    pub fn new(value: Decimal) -> Self {
        MoneyFactor(value)
    }

    /// Convert to equivalent APR (money factor * 2400, as decimal).
    #[inline]
    pub fn to_apr(&self) -> Rate {
        Rate::from_decimal(self.0 * dec!(2400) / dec!(100))
    }

    /// Create from APR (APR / 2400).
    #[inline]
    pub fn from_apr(apr: Rate) -> Self {
        MoneyFactor(apr.as_decimal() / dec!(24))
    }

    /// Get the raw value.
    #[inline]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

/// Raise a decimal to an integer power using binary exponentiation.
///
/// Used for `(1 + r)^n` in payment formulas. O(log n) multiplications.
pub fn powi(base: Decimal, exp: u32) -> Decimal {
    if exp == 0 {
        return dec!(1);
    }

    let mut result = dec!(1);
    let mut current_base = base;
    let mut remaining_exp = exp;

    while remaining_exp > 0 {
        if remaining_exp % 2 == 1 {
            result *= current_base;
        }
        current_base *= current_base;
        remaining_exp /= 2;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_cents(1000); // $10.00
        let b = Money::from_cents(250); // $2.50

        assert_eq!((a + b).as_decimal(), dec!(12.50));
        assert_eq!((a - b).as_decimal(), dec!(7.50));
    }

    #[test]
    fn test_money_rounds_half_away_from_zero() {
        assert_eq!(Money::new(dec!(10.125)).round_cents().as_decimal(), dec!(10.13));
        assert_eq!(Money::new(dec!(10.135)).round_cents().as_decimal(), dec!(10.14));
        assert_eq!(Money::new(dec!(-10.125)).round_cents().as_decimal(), dec!(-10.13));
        assert_eq!(Money::new(dec!(10.124)).round_cents().as_decimal(), dec!(10.12));
    }

    #[test]
    fn test_money_ceil_floor() {
        let m = Money::new(dec!(10.121));
        assert_eq!(m.ceil_cents().as_decimal(), dec!(10.13));
        assert_eq!(m.floor_cents().as_decimal(), dec!(10.12));
    }

    #[test]
    fn test_non_negative_rejects() {
        let err = Money::non_negative(dec!(-1), "vehicle_price").unwrap_err();
        assert_eq!(err.code(), "NEGATIVE_AMOUNT");

        assert!(Money::non_negative(dec!(0), "vehicle_price").is_ok());
    }

    #[test]
    fn test_division_by_zero_fails() {
        let err = Money::new(dec!(100)).checked_div(dec!(0)).unwrap_err();
        assert_eq!(err.code(), "ARITHMETIC");
    }

    #[test]
    fn test_money_from_str_only() {
        let m: Money = "12345.67".parse().unwrap();
        assert_eq!(m.as_decimal(), dec!(12345.67));
        assert!("12,345".parse::<Money>().is_err());
    }

    #[test]
    fn test_money_string_round_trip() {
        let m = Money::new(dec!(12345.67));
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"12345.67\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_apply_cap_and_percent() {
        let allowance = Money::new(dec!(30000));
        assert_eq!(allowance.apply_cap(Some(Money::new(dec!(25000)))).as_decimal(), dec!(25000));
        assert_eq!(allowance.apply_cap(None).as_decimal(), dec!(30000));

        let half = allowance.apply_percent(Rate::from_decimal(dec!(0.5)));
        assert_eq!(half.as_decimal(), dec!(15000));
    }

    #[test]
    fn test_sum_and_epsilon_equality() {
        let total = Money::sum(vec![
            Money::new(dec!(0.01)),
            Money::new(dec!(0.02)),
            Money::new(dec!(0.03)),
        ]);
        assert_eq!(total.as_decimal(), dec!(0.06));

        assert!(Money::is_equal(Money::new(dec!(1.004)), Money::new(dec!(1.00)), dec!(0.005)));
        assert!(!Money::is_equal(Money::new(dec!(1.01)), Money::new(dec!(1.00)), dec!(0.005)));
    }

    #[test]
    fn test_rate_application() {
        let rate = Rate::from_percentage(dec!(7.25));
        let amount = Money::new(dec!(10000));
        let tax = rate.apply(amount);
        assert_eq!(tax.as_decimal(), dec!(725));
    }

    #[test]
    fn test_money_factor_conversion() {
        let mf = MoneyFactor::new(dec!(0.00125));
        let apr = mf.to_apr();
        assert_eq!(apr.as_percentage(), dec!(3.00)); // 0.00125 * 2400 = 3.0%

        let back = MoneyFactor::from_apr(apr);
        assert_eq!(back.as_decimal(), dec!(0.00125));
    }

    #[test]
    fn test_powi() {
        assert_eq!(powi(dec!(2), 0), dec!(1));
        assert_eq!(powi(dec!(2), 10), dec!(1024));
        assert_eq!(powi(dec!(1.005), 60).round_dp(4), dec!(1.3489));
    }
}
