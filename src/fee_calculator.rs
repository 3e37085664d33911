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

//! Stateless fee arithmetic.

use crate::error::TransactionError;
use crate::fee::{FeeResolution, FeeRule};
use crate::money::{Currency, round_half_up};
use rust_decimal::Decimal;
use serde::Serialize;

/// Fee outcome for one amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub calculated_fee: Decimal,
    /// Nominal amount plus fee.
    pub charged_amount: Decimal,
}

impl FeeBreakdown {
    /// Breakdown when no fee applies.
    pub fn zero(amount: Decimal) -> Self {
        Self {
            calculated_fee: Decimal::ZERO,
            charged_amount: amount,
        }
    }
}

/// Computes calculated fee and charged amount.
///
/// Amounts are validated (positive, currency precision) before they get
/// here.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeeCalculator;

impl FeeCalculator {
    /// Both rules are rounded half-up to `minor_units`; percentage fees are
    /// `amount * pct / 100`. Amounts too large to price are `InvalidAmount`.
    pub fn compute(
        amount: Decimal,
        rule: &FeeRule,
        minor_units: u32,
    ) -> Result<FeeBreakdown, TransactionError> {
        let raw_fee = match *rule {
            FeeRule::Fixed(fixed) => fixed,
            FeeRule::Percentage(pct) => amount
                .checked_mul(pct)
                .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
                .ok_or(TransactionError::InvalidAmount)?,
        };
        let calculated_fee = round_half_up(raw_fee, minor_units);
        let charged_amount = amount
            .checked_add(calculated_fee)
            .ok_or(TransactionError::InvalidAmount)?;
        Ok(FeeBreakdown {
            calculated_fee,
            charged_amount,
        })
    }

    /// Applies a resolution; `NotConfigured` yields a zero fee.
    pub fn apply(
        amount: Decimal,
        resolution: &FeeResolution,
        currency: &Currency,
    ) -> Result<FeeBreakdown, TransactionError> {
        match resolution {
            FeeResolution::Found(fee) => Self::compute(amount, &fee.rule, currency.minor_units()),
            FeeResolution::NotConfigured => Ok(FeeBreakdown::zero(amount)),
        }
    }
}
