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

//! Fee configuration records.
//!
//! A [`TransactionFee`] applies to one transaction type and optionally
//! narrows itself to a country and/or a payment-method type. A missing
//! country or payment-method type means "applies to all".
//!
//! The fee amount is a [`FeeRule`]: either a fixed amount or a percentage of
//! the nominal amount. The rule always carries its own discriminator; there
//! is no inference from the magnitude of the configured value.

use crate::base::{CountryId, FeeId, PaymentMethodTypeId};
use crate::error::FeeConfigError;
use crate::transaction::TransactionType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stored discriminator between the two fee columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePriority {
    Fixed,
    Percentage,
}

/// How the fee amount is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "fee_priority", content = "value", rename_all = "lowercase")]
pub enum FeeRule {
    /// Flat fee, independent of the amount.
    Fixed(Decimal),
    /// Percentage of the amount, in `0..=100`.
    Percentage(Decimal),
}

impl FeeRule {
    /// Builds a rule from the three stored columns.
    ///
    /// Exactly one of `fixed_fee` / `percentage_fee` must be set and it must
    /// agree with `priority` when a priority is given.
    pub fn from_columns(
        priority: Option<FeePriority>,
        fixed_fee: Option<Decimal>,
        percentage_fee: Option<Decimal>,
    ) -> Result<Self, FeeConfigError> {
        let rule = match (fixed_fee, percentage_fee) {
            (Some(_), Some(_)) => return Err(FeeConfigError::ConflictingFeeValues),
            (None, None) => return Err(FeeConfigError::MissingFeeValue),
            (Some(fixed), None) => FeeRule::Fixed(fixed),
            (None, Some(percentage)) => FeeRule::Percentage(percentage),
        };
        if let Some(priority) = priority {
            if priority != rule.priority() {
                return Err(FeeConfigError::PriorityMismatch);
            }
        }
        rule.validate()?;
        Ok(rule)
    }

    pub fn priority(&self) -> FeePriority {
        match self {
            Self::Fixed(_) => FeePriority::Fixed,
            Self::Percentage(_) => FeePriority::Percentage,
        }
    }

    pub fn validate(&self) -> Result<(), FeeConfigError> {
        match *self {
            Self::Fixed(fixed) if fixed < Decimal::ZERO => {
                Err(FeeConfigError::NegativeFixedFee(fixed))
            }
            Self::Percentage(pct) if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED => {
                Err(FeeConfigError::PercentageOutOfRange(pct))
            }
            _ => Ok(()),
        }
    }

    pub fn fixed_fee(&self) -> Option<Decimal> {
        match self {
            Self::Fixed(fixed) => Some(*fixed),
            Self::Percentage(_) => None,
        }
    }

    pub fn percentage_fee(&self) -> Option<Decimal> {
        match self {
            Self::Percentage(pct) => Some(*pct),
            Self::Fixed(_) => None,
        }
    }
}

impl fmt::Display for FeeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(fixed) => write!(f, "Fixed: {fixed}"),
            Self::Percentage(pct) => write!(f, "Percentage: {pct}%"),
        }
    }
}

/// Fee configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFee {
    pub id: FeeId,
    pub name: String,
    pub transaction_type: TransactionType,
    /// `None` applies to every country.
    pub country: Option<CountryId>,
    /// `None` applies to every payment-method type.
    pub payment_method_type: Option<PaymentMethodTypeId>,
    pub rule: FeeRule,
}

impl TransactionFee {
    /// Higher is more specific:
    /// 3 = country and payment-method type, 2 = country only,
    /// 1 = payment-method type only, 0 = fully global.
    pub fn specificity(&self) -> u8 {
        match (self.country.is_some(), self.payment_method_type.is_some()) {
            (true, true) => 3,
            (true, false) => 2,
            (false, true) => 1,
            (false, false) => 0,
        }
    }

    /// Whether this record may answer `lookup`.
    ///
    /// A scoped record only matches a lookup for that exact scope; a lookup
    /// without a country (or payment-method type) only matches records that
    /// apply to all countries (or types).
    pub fn matches(&self, lookup: &FeeLookup) -> bool {
        self.transaction_type == lookup.transaction_type
            && scope_matches(self.country, lookup.country)
            && scope_matches(self.payment_method_type, lookup.payment_method_type)
    }
}

fn scope_matches<T: PartialEq>(configured: Option<T>, requested: Option<T>) -> bool {
    match configured {
        None => true,
        Some(configured) => requested == Some(configured),
    }
}

impl fmt::Display for TransactionFee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let country = self
            .country
            .map_or_else(|| "Global".to_string(), |c| c.to_string());
        let method = self
            .payment_method_type
            .map_or_else(|| "All".to_string(), |m| m.to_string());
        write!(
            f,
            "{country} - {} - {method} - {} ({})",
            self.transaction_type, self.rule, self.name
        )
    }
}

/// Exact lookup key used for resolution and caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeeLookup {
    pub country: Option<CountryId>,
    pub transaction_type: TransactionType,
    pub payment_method_type: Option<PaymentMethodTypeId>,
}

impl FeeLookup {
    pub fn new(
        country: Option<CountryId>,
        transaction_type: TransactionType,
        payment_method_type: Option<PaymentMethodTypeId>,
    ) -> Self {
        Self {
            country,
            transaction_type,
            payment_method_type,
        }
    }
}

/// Outcome of a fee lookup. "No fee configured" is an ordinary branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeResolution {
    Found(TransactionFee),
    NotConfigured,
}

impl FeeResolution {
    pub fn fee(&self) -> Option<&TransactionFee> {
        match self {
            Self::Found(fee) => Some(fee),
            Self::NotConfigured => None,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}
