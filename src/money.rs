// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Exact decimal money primitives.
//!
//! Monetary values are [`Decimal`]s end to end. This module owns the three
//! places where precision is decided: currency minor units, parsing of
//! external amounts, and half-up rounding of computed fees.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use vulipay_ledger::money::{Currency, parse_amount, round_half_up};
//!
//! let usd = Currency::new("usd");
//! assert_eq!(parse_amount("100.25", &usd).unwrap(), dec!(100.25));
//! assert!(parse_amount("100.255", &usd).is_err());
//! assert_eq!(round_half_up(dec!(2.345), 2), dec!(2.35));
//! ```

use crate::TransactionError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fractional digits used when a currency does not say otherwise.
pub const DEFAULT_MINOR_UNITS: u32 = 2;

/// ISO 4217 currencies without a minor unit.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// ISO 4217 currencies with three fractional digits.
const THREE_DECIMAL_CURRENCIES: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// ISO 4217 currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Number of fractional digits amounts in this currency may carry.
    pub fn minor_units(&self) -> u32 {
        let code = self.0.as_str();
        if ZERO_DECIMAL_CURRENCIES.contains(&code) {
            0
        } else if THREE_DECIMAL_CURRENCIES.contains(&code) {
            3
        } else {
            DEFAULT_MINOR_UNITS
        }
    }

    /// Rounds `value` half-up to this currency's minor units.
    pub fn round(&self, value: Decimal) -> Decimal {
        round_half_up(value, self.minor_units())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Currency::new(code))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rounds half away from zero, which is half-up for the positive amounts
/// the ledger handles. The result always carries exactly `dp` places.
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(dp);
    rounded
}

/// Checks that `amount` is positive and representable in `currency`.
pub fn validate_amount(amount: Decimal, currency: &Currency) -> Result<Decimal, TransactionError> {
    if amount <= Decimal::ZERO {
        return Err(TransactionError::InvalidAmount);
    }
    if amount.normalize().scale() > currency.minor_units() {
        return Err(TransactionError::InvalidAmount);
    }
    Ok(amount)
}

/// Parses an amount supplied as text.
///
/// Rejects empty input, non-numeric text, values that would overflow
/// [`Decimal`] and values with more fractional digits than the currency.
pub fn parse_amount(raw: &str, currency: &Currency) -> Result<Decimal, TransactionError> {
    let amount = parse_decimal(raw).ok_or(TransactionError::InvalidAmount)?;
    validate_amount(amount, currency)
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str_exact(trimmed).ok()
}

/// Amount as it arrives in a request payload: a JSON/YAML string or number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl AmountInput {
    /// Converts to an exact decimal without validating sign or precision.
    ///
    /// Floats go through their shortest round-trip text form so that `0.1`
    /// becomes exactly `0.1` rather than its binary expansion.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Integer(value) => Some(Decimal::from(*value)),
            Self::Float(value) if value.is_finite() => Decimal::from_str(&value.to_string()).ok(),
            Self::Float(_) => None,
            Self::Text(text) => parse_decimal(text),
        }
    }

    /// Converts and validates against `currency`.
    pub fn into_amount(self, currency: &Currency) -> Result<Decimal, TransactionError> {
        let amount = self.to_decimal().ok_or(TransactionError::InvalidAmount)?;
        validate_amount(amount, currency)
    }
}

/// Serde helper accepting a decimal written either as a string or a number.
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let input = AmountInput::deserialize(deserializer)?;
    input
        .to_decimal()
        .ok_or_else(|| serde::de::Error::custom("invalid decimal value"))
}

/// Optional variant of [`deserialize_decimal`].
pub fn deserialize_optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<AmountInput>::deserialize(deserializer)? {
        Some(input) => input
            .to_decimal()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("invalid decimal value")),
        None => Ok(None),
    }
}
