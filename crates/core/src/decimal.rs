//! Validated fixed-precision decimal boundary.
//!
//! Every quantity and monetary value enters the domain through these newtypes
//! exactly once; all arithmetic happens on [`rust_decimal::Decimal`] behind
//! them. Raw wire/storage representations (strings, floats) must never be
//! operated on numerically — parse first, compute second.

use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Decimal places carried for physical quantities.
pub const QUANTITY_SCALE: u32 = 3;

/// Decimal places carried for unit costs and valuations.
pub const MONEY_SCALE: u32 = 4;

fn coerce(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Non-negative physical quantity, fixed at [`QUANTITY_SCALE`] decimal places.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// The single validated constructor: rejects negative values and coerces
    /// to fixed precision.
    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::validation(format!(
                "quantity cannot be negative: {value}"
            )));
        }
        Ok(Self(coerce(value, QUANTITY_SCALE)))
    }

    /// Parse a textual quantity (the ingress for wire/storage strings).
    pub fn parse(s: &str) -> DomainResult<Self> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("quantity '{s}': {e}")))?;
        Self::new(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.0.is_zero()
    }

    /// Addition; `None` on overflow.
    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(Quantity)
    }

    /// Subtraction; `None` when the result would be negative (non-negativity
    /// is enforced here, not clamped).
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        let result = self.0.checked_sub(other.0)?;
        if result.is_sign_negative() && !result.is_zero() {
            return None;
        }
        Some(Quantity(result))
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Quantity(Decimal::from(value))
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl ValueObject for Quantity {}

/// Non-negative monetary amount (unit cost or valuation), fixed at
/// [`MONEY_SCALE`] decimal places.
///
/// Costs in this engine are never negative: outbound valuation uses the
/// moving average, and corrections are compensating movements rather than
/// negative amounts.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// The single validated constructor: rejects negative values and coerces
    /// to fixed precision.
    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::validation(format!(
                "amount cannot be negative: {value}"
            )));
        }
        Ok(Self(coerce(value, MONEY_SCALE)))
    }

    /// Parse a textual amount (the ingress for wire/storage strings).
    pub fn parse(s: &str) -> DomainResult<Self> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("amount '{s}': {e}")))?;
        Self::new(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        let result = self.0.checked_sub(other.0)?;
        if result.is_sign_negative() && !result.is_zero() {
            return None;
        }
        Some(Money(result))
    }

    /// Extend a unit amount over a quantity, rounded to [`MONEY_SCALE`].
    pub fn extend(self, quantity: Quantity) -> Option<Money> {
        self.0
            .checked_mul(quantity.as_decimal())
            .map(|v| Money(coerce(v, MONEY_SCALE)))
    }

    /// Divide a total by a quantity (unit-cost derivation), rounded to
    /// [`MONEY_SCALE`]. `None` when the quantity is zero.
    pub fn per_unit(self, quantity: Quantity) -> Option<Money> {
        self.0
            .checked_div(quantity.as_decimal())
            .map(|v| Money(coerce(v, MONEY_SCALE)))
    }
}

impl From<u64> for Money {
    fn from(value: u64) -> Self {
        Money(Decimal::from(value))
    }
}

impl TryFrom<Decimal> for Money {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl ValueObject for Money {}
