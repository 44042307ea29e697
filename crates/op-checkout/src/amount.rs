//! Amount Conversion
//!
//! Major-unit amounts arrive as decimals; the protocol wants integer minor
//! units as digit strings. All arithmetic stays in `rust_decimal`.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Largest asset scale a `Decimal` can carry
pub const MAX_ASSET_SCALE: u8 = 28;

/// A validated, strictly positive amount in major units
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct MajorAmount(Decimal);

impl MajorAmount {
    /// Validate a decimal amount
    pub fn new(value: Decimal) -> Result<Self> {
        if value <= Decimal::ZERO {
            return Err(FlowError::InvalidAmount(format!(
                "{value} is not strictly positive"
            )));
        }
        Ok(Self(value))
    }

    /// Parse a decimal string such as "100.00"
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let value = Decimal::from_str_exact(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(|_| FlowError::InvalidAmount(format!("'{input}' is not a decimal number")))?;
        Self::new(value)
    }

    pub const fn value(self) -> Decimal {
        self.0
    }

    /// Convert to minor units at `scale`
    pub fn to_minor_units(self, scale: u8) -> Result<String> {
        to_minor_units(self.0, scale)
    }
}

impl TryFrom<Decimal> for MajorAmount {
    type Error = FlowError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<MajorAmount> for Decimal {
    fn from(amount: MajorAmount) -> Self {
        amount.0
    }
}

impl TryFrom<f64> for MajorAmount {
    type Error = FlowError;

    /// NaN and infinities are rejected
    fn try_from(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(FlowError::InvalidAmount(format!("{value} is not finite")));
        }
        let decimal = Decimal::try_from(value)
            .map_err(|_| FlowError::InvalidAmount(format!("{value} is out of range")))?;
        Self::new(decimal)
    }
}

impl FromStr for MajorAmount {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for MajorAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `round(amount * 10^scale)` as a string of digits
///
/// Rounds to nearest, midpoints away from zero.
pub fn to_minor_units(amount: Decimal, scale: u8) -> Result<String> {
    let factor = scale_factor(scale)?;
    let scaled = amount
        .checked_mul(factor)
        .ok_or_else(|| FlowError::InvalidAmount(format!("{amount} overflows at scale {scale}")))?;

    let minor = scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    Ok(minor.to_string())
}

/// Inverse of [`to_minor_units`]
pub fn from_minor_units(value: &str, scale: u8) -> Result<Decimal> {
    if scale > MAX_ASSET_SCALE {
        return Err(FlowError::InvalidAmount(format!(
            "asset scale {scale} exceeds {MAX_ASSET_SCALE}"
        )));
    }
    let minor: i128 = value
        .parse()
        .map_err(|_| FlowError::InvalidAmount(format!("'{value}' is not an integer")))?;

    Decimal::try_from_i128_with_scale(minor, u32::from(scale))
        .map_err(|_| FlowError::InvalidAmount(format!("'{value}' is out of range")))
}

fn scale_factor(scale: u8) -> Result<Decimal> {
    if scale > MAX_ASSET_SCALE {
        return Err(FlowError::InvalidAmount(format!(
            "asset scale {scale} exceeds {MAX_ASSET_SCALE}"
        )));
    }
    Decimal::try_from_i128_with_scale(10_i128.pow(u32::from(scale)), 0)
        .map_err(|_| FlowError::InvalidAmount(format!("asset scale {scale} is out of range")))
}
