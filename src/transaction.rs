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

//! Transaction records and their status lifecycle.
//!
//! ```text
//!  INITIATED ──pair──► PENDING ──settle──► COMPLETED
//!      │                  │
//!      ├──fail/cancel─────┴──fail/cancel──► FAILED | CANCELLED
//! ```
//!
//! `COMPLETED`, `FAILED` and `CANCELLED` are terminal. Once a fee has been
//! frozen on a record its calculated fee and charged amount never change.

use crate::base::{CountryId, FeeId, PaymentMethodTypeId, PhoneNumber, WalletId};
use crate::fee_calculator::FeeBreakdown;
use crate::money::Currency;
use crate::TransactionError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of money movement. Serialized with the short wire codes that also
/// appear in references and payment codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "P2P")]
    P2P,
    #[serde(rename = "MP")]
    MerchantPayment,
    #[serde(rename = "CI")]
    CashIn,
    #[serde(rename = "CO")]
    CashOut,
}

impl TransactionType {
    pub const ALL: [TransactionType; 4] = [
        TransactionType::P2P,
        TransactionType::MerchantPayment,
        TransactionType::CashIn,
        TransactionType::CashOut,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::P2P => "P2P",
            Self::MerchantPayment => "MP",
            Self::CashIn => "CI",
            Self::CashOut => "CO",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Whether the money leaves a platform wallet.
    pub fn has_source_wallet(&self) -> bool {
        !matches!(self, Self::CashIn)
    }

    /// Whether the money lands in a platform wallet.
    pub fn has_target_wallet(&self) -> bool {
        !matches!(self, Self::CashOut)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TransactionType {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P2P" => Ok(Self::P2P),
            "MP" | "MERCHANT_PAYMENT" => Ok(Self::MerchantPayment),
            "CI" | "CASH_IN" => Ok(Self::CashIn),
            "CO" | "CASH_OUT" => Ok(Self::CashOut),
            _ => Err(TransactionError::UnknownTransactionType),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created by one party, waiting for the payer to pair.
    Initiated,
    /// Both parties known, fee frozen, waiting for settlement.
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Initiated, Pending)
                | (Initiated, Failed)
                | (Initiated, Cancelled)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auditable transaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub reference: String,
    pub payment_code: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub calculated_fee: Option<Decimal>,
    pub charged_amount: Option<Decimal>,
    pub currency: Currency,
    pub country: Option<CountryId>,
    pub payment_method_type: Option<PaymentMethodTypeId>,
    /// Fee configuration applied, `None` when no fee was configured.
    pub fee_id: Option<FeeId>,
    pub source_wallet: Option<WalletId>,
    pub target_wallet: Option<WalletId>,
    pub phone_number: Option<PhoneNumber>,
    pub notes: Option<String>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Transaction {
    /// Moves the record to `next`, enforcing the lifecycle.
    pub fn transition(&mut self, next: TransactionStatus) -> Result<(), TransactionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransactionError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_on = Utc::now();
        Ok(())
    }

    /// Records the fee outcome. Refuses to overwrite a frozen fee.
    pub fn freeze_fee(
        &mut self,
        breakdown: &FeeBreakdown,
        fee_id: Option<FeeId>,
    ) -> Result<(), TransactionError> {
        if self.charged_amount.is_some() || self.calculated_fee.is_some() {
            return Err(TransactionError::processing(format!(
                "fee already frozen on {}",
                self.reference
            )));
        }
        self.calculated_fee = Some(breakdown.calculated_fee);
        self.charged_amount = Some(breakdown.charged_amount);
        self.fee_id = fee_id;
        Ok(())
    }

    /// Frozen fee, if any.
    pub fn fee_breakdown(&self) -> Option<FeeBreakdown> {
        Some(FeeBreakdown {
            calculated_fee: self.calculated_fee?,
            charged_amount: self.charged_amount?,
        })
    }

    pub fn append_note(&mut self, note: impl AsRef<str>) {
        match &mut self.notes {
            Some(notes) if !notes.is_empty() => {
                notes.push('\n');
                notes.push_str(note.as_ref());
            }
            _ => self.notes = Some(note.as_ref().to_string()),
        }
    }

    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            reference: self.reference.clone(),
            payment_code: self.payment_code.clone(),
            transaction_type: self.transaction_type,
            status: self.status,
            amount: self.amount,
            calculated_fee: self.calculated_fee,
            charged_amount: self.charged_amount,
            currency: self.currency.clone(),
        }
    }
}

/// What the surrounding service returns to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub reference: String,
    pub payment_code: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub calculated_fee: Option<Decimal>,
    pub charged_amount: Option<Decimal>,
    pub currency: Currency,
}
