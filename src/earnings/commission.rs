//! Trainer/platform commission arithmetic.
//!
//! Rates are held as basis points of the trainer's share so no floating point ever touches a
//! currency amount. The platform share is always the remainder of the gross amount, which keeps
//! `trainer_share + platform_share == gross_amount` exact for every input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::Money;

const BASIS_POINTS: i128 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    #[error("commission rate `{0}` is not a decimal in (0, 1]")]
    Malformed(String),
    #[error("commission rate `{0}` has more than four decimal places")]
    TooPrecise(String),
    #[error("commission rate must be within (0, 1], got {0} basis points")]
    OutOfRange(u32),
}

/// Trainer's share of a gross amount, in basis points (`9000` == 0.90).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CommissionRate(u32);

impl CommissionRate {
    pub fn from_basis_points(basis_points: u32) -> Result<Self, RateError> {
        if basis_points == 0 || basis_points as i128 > BASIS_POINTS {
            return Err(RateError::OutOfRange(basis_points));
        }
        Ok(Self(basis_points))
    }

    pub fn basis_points(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for CommissionRate {
    type Error = RateError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_basis_points(value)
    }
}

impl From<CommissionRate> for u32 {
    fn from(rate: CommissionRate) -> Self {
        rate.0
    }
}

impl FromStr for CommissionRate {
    type Err = RateError;

    /// Accepts decimal fractions such as `0.9`, `0.70` or `1`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(RateError::Malformed(raw.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(RateError::Malformed(raw.to_string()));
        }
        if fraction.len() > 4 {
            return Err(RateError::TooPrecise(raw.to_string()));
        }
        let whole: u32 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| RateError::Malformed(raw.to_string()))?
        };
        let padded = format!("{fraction:0<4}");
        let fraction: u32 = padded
            .parse()
            .map_err(|_| RateError::Malformed(raw.to_string()))?;
        let basis_points = whole
            .checked_mul(10_000)
            .and_then(|value| value.checked_add(fraction))
            .ok_or_else(|| RateError::Malformed(raw.to_string()))?;
        Self::from_basis_points(basis_points)
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / 10_000, self.0 % 10_000)
    }
}

/// Income channel a payment arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Manual,
    Gateway,
}

/// Per-channel trainer rates. The two channels are configured independently and are not
/// reconciled against each other here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRates {
    pub manual: CommissionRate,
    pub gateway: CommissionRate,
}

impl CommissionRates {
    pub fn for_channel(&self, channel: Channel) -> CommissionRate {
        match channel {
            Channel::Manual => self.manual,
            Channel::Gateway => self.gateway,
        }
    }
}

impl Default for CommissionRates {
    fn default() -> Self {
        Self {
            manual: CommissionRate(9_000),
            gateway: CommissionRate(7_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionSplit {
    pub gross_amount: Money,
    pub trainer_share: Money,
    pub platform_share: Money,
}

/// Splits `gross_amount` between trainer and platform.
///
/// `trainer_share = round(gross_amount * rate)` with halves rounded away from zero;
/// `platform_share` is whatever remains.
pub fn split(gross_amount: Money, rate: CommissionRate) -> CommissionSplit {
    let gross = gross_amount as i128;
    let scaled = gross.abs() * rate.0 as i128;
    let rounded = (scaled + BASIS_POINTS / 2) / BASIS_POINTS;
    let trainer = if gross < 0 { -rounded } else { rounded };
    // |trainer| <= |gross| because rate <= 1, so the narrowing cannot overflow.
    let trainer_share = trainer as Money;
    CommissionSplit {
        gross_amount,
        trainer_share,
        platform_share: gross_amount - trainer_share,
    }
}
