use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};

/// An amount in some currency, fixed to two decimal places.
///
/// The currency itself is carried next to the amount on the transaction;
/// `Money` is just the arithmetic-safe value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn from_minor(units: i64) -> Self {
        Money(Decimal::from(units) / Decimal::from(100))
    }

    pub fn to_minor(self) -> i64 {
        (self.0 * Decimal::from(100)).round().to_i64().unwrap_or(0)
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp(2))
    }

    /// Lossy constructor for the ingestion boundary, where amounts arrive as
    /// JSON numbers. NaN/infinite inputs collapse to zero.
    pub fn from_f64(value: f64) -> Self {
        Money(Decimal::from_f64(value).unwrap_or(Decimal::ZERO).round_dp(2))
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    /// Multiply by an FX rate, re-rounding to two places.
    pub fn mul_rate(self, rate: Decimal) -> Self {
        Money((self.0 * rate).round_dp(2))
    }

    /// Round to the nearest multiple of `step` (e.g. 100 for modal-salary
    /// bucketing). A zero step returns the amount unchanged.
    pub fn round_to(self, step: i64) -> Self {
        if step == 0 {
            return self;
        }
        let step = Decimal::from(step);
        Money((self.0 / step).round() * step)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
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
        iter.fold(Money::zero(), |a, b| a + b)
    }
}
