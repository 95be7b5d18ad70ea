//! Exact decimal arithmetic for prices and quantities
//!
//! Exchange feeds quote prices and sizes as decimal strings. `Fixed` keeps
//! them exact end to end: parsing never goes through `f64`, and the type is
//! totally ordered so it can key order-book levels directly.

use rust_decimal::{Decimal, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Exact decimal value backed by `rust_decimal` (28 significant digits)
///
/// Equality and ordering ignore trailing zeros, so `100` and `100.00`
/// compare equal and hash identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixed {
    value: Decimal,
}

impl Fixed {
    pub const ZERO: Fixed = Fixed { value: Decimal::ZERO };

    pub const ONE: Fixed = Fixed { value: Decimal::ONE };

    pub fn from_decimal(value: Decimal) -> Self {
        Fixed { value }
    }

    pub fn from_i64(value: i64) -> Self {
        Fixed { value: Decimal::from(value) }
    }

    /// Lossy: only for values that already were floats upstream
    pub fn from_f64(value: f64) -> Result<Self, FixedError> {
        Decimal::try_from(value)
            .map(Self::from_decimal)
            .map_err(|_| FixedError::InvalidValue(value.to_string()))
    }

    /// Parse a decimal string; scientific notation (`1e-8`) is accepted
    pub fn from_str_exact(s: &str) -> Result<Self, FixedError> {
        let trimmed = s.trim();
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map(Self::from_decimal)
            .map_err(|_| FixedError::InvalidValue(s.to_string()))
    }

    /// Parse a JSON string or number. Numbers are read from their textual
    /// form so integer precision survives.
    pub fn from_json(value: &Value) -> Result<Self, FixedError> {
        match value {
            Value::String(s) => Self::from_str_exact(s),
            Value::Number(n) => Self::from_str_exact(&n.to_string()),
            other => Err(FixedError::InvalidValue(other.to_string())),
        }
    }

    pub fn to_decimal(&self) -> Decimal {
        self.value
    }

    /// Convert to f64 (may lose precision)
    pub fn to_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(0.0)
    }

    /// Canonical string without trailing zeros
    pub fn to_string_normalized(&self) -> String {
        self.value.normalize().to_string()
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.value.is_sign_positive() && !self.value.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.value.is_sign_negative() && !self.value.is_zero()
    }

    pub fn abs(&self) -> Self {
        Fixed { value: self.value.abs() }
    }

    pub fn round_dp(&self, dp: u32) -> Self {
        Fixed { value: self.value.round_dp(dp) }
    }

    pub fn checked_add(&self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.value
            .checked_add(rhs.value)
            .map(Self::from_decimal)
            .ok_or(FixedError::Overflow)
    }

    pub fn checked_sub(&self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.value
            .checked_sub(rhs.value)
            .map(Self::from_decimal)
            .ok_or(FixedError::Overflow)
    }

    /// Overflow-safe product; prefer this over `*` for wire-supplied values
    pub fn checked_mul(&self, rhs: Fixed) -> Result<Fixed, FixedError> {
        self.value
            .checked_mul(rhs.value)
            .map(Self::from_decimal)
            .ok_or(FixedError::Overflow)
    }

    pub fn checked_div(&self, rhs: Fixed) -> Result<Fixed, FixedError> {
        if rhs.is_zero() {
            return Err(FixedError::DivisionByZero);
        }
        self.value
            .checked_div(rhs.value)
            .map(Self::from_decimal)
            .ok_or(FixedError::Overflow)
    }
}

/// Decimal parsing and arithmetic errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixedError {
    #[error("Invalid decimal value: {0}")]
    InvalidValue(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Overflow in arithmetic operation")]
    Overflow,
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Self) -> Self::Output {
        Fixed { value: self.value + rhs.value }
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Self) -> Self::Output {
        Fixed { value: self.value - rhs.value }
    }
}

impl Mul for Fixed {
    type Output = Fixed;

    fn mul(self, rhs: Self) -> Self::Output {
        Fixed { value: self.value * rhs.value }
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    fn neg(self) -> Self::Output {
        Fixed { value: -self.value }
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Self) {
        self.value += rhs.value;
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Self) {
        self.value -= rhs.value;
    }
}

impl Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Fixed {
    type Err = FixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_exact(s)
    }
}

impl From<Decimal> for Fixed {
    fn from(value: Decimal) -> Self {
        Fixed { value }
    }
}

impl From<Fixed> for Decimal {
    fn from(fixed: Fixed) -> Self {
        fixed.value
    }
}

impl From<i64> for Fixed {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

/// `fixed!(16578.50)` parses the literal exactly; panics on malformed input
#[macro_export]
macro_rules! fixed {
    ($value:expr) => {
        $crate::fixed::Fixed::from_str_exact(stringify!($value)).unwrap()
    };
}
