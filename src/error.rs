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

//! Error types for fee resolution, ledger mutation and transaction processing.

use crate::base::FeeId;
use crate::transaction::TransactionStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Transaction processing errors.
///
/// Every variant except [`TransactionError::Processing`] is client-correctable:
/// it is raised before any balance is touched and is never retried by the core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Amount is zero, negative, malformed or too precise for the currency
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Source wallet balance is below the charged amount
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Source (or sole) wallet does not exist
    #[error("wallet not found")]
    WalletNotFound,

    /// Receiving wallet does not exist
    #[error("target wallet not found")]
    TargetWalletNotFound,

    /// Wallet has been deactivated
    #[error("wallet is inactive")]
    WalletInactive,

    /// User already owns a wallet of this type
    #[error("user already has a wallet of this type")]
    DuplicateWallet,

    /// Source and target are the same wallet
    #[error("source and target wallets must differ")]
    SameWallet,

    /// Source and target wallets hold different currencies
    #[error("wallet currencies do not match")]
    CurrencyMismatch,

    /// Referenced transaction does not exist
    #[error("transaction not found")]
    TransactionNotFound,

    /// Payment code is malformed, has the wrong prefix or an unknown type
    #[error("unknown payment code")]
    InvalidPaymentCode,

    /// Requested status change is not allowed by the lifecycle
    #[error("invalid transaction status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Payment-method type does not allow this transaction type
    #[error("transaction type not allowed for this payment method type")]
    TransactionNotAllowed,

    /// Transaction type name is not recognised
    #[error("unknown transaction type")]
    UnknownTransactionType,

    /// Payment-method type identifier is not registered
    #[error("unknown payment method type")]
    UnknownPaymentMethodType,

    /// Settlement requested before both parties are known
    #[error("transaction has no payer yet")]
    MissingCounterparty,

    /// Unexpected failure inside the atomic ledger mutation.
    ///
    /// The detail is kept for logs only and is not part of the message.
    #[error("transaction processing failed")]
    Processing(String),
}

impl TransactionError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "invalid_amount",
            Self::InsufficientFunds => "insufficient_funds",
            Self::WalletNotFound => "wallet_not_found",
            Self::TargetWalletNotFound => "target_wallet_not_found",
            Self::WalletInactive => "wallet_inactive",
            Self::DuplicateWallet => "duplicate_wallet",
            Self::SameWallet => "same_wallet",
            Self::CurrencyMismatch => "currency_mismatch",
            Self::TransactionNotFound => "transaction_not_found",
            Self::InvalidPaymentCode => "unknown_payment_code",
            Self::InvalidStatusTransition { .. } => "invalid_status",
            Self::TransactionNotAllowed => "transaction_not_allowed",
            Self::UnknownTransactionType => "unknown_transaction_type",
            Self::UnknownPaymentMethodType => "unknown_payment_method_type",
            Self::MissingCounterparty => "missing_counterparty",
            Self::Processing(_) => "transaction_processing_error",
        }
    }

    /// Returns `true` when the caller can fix the request and try again.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Processing(_))
    }

    /// Internal detail of a processing failure, for logging.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Processing(detail) => Some(detail),
            _ => None,
        }
    }

    pub(crate) fn processing(detail: impl Into<String>) -> Self {
        Self::Processing(detail.into())
    }
}

/// Rejected fee configuration writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeConfigError {
    #[error("fee configuration has neither a fixed nor a percentage fee")]
    MissingFeeValue,

    #[error("fee configuration sets both a fixed and a percentage fee")]
    ConflictingFeeValues,

    #[error("fee priority does not match the fee value supplied")]
    PriorityMismatch,

    #[error("percentage fee {0} outside 0..=100")]
    PercentageOutOfRange(Decimal),

    #[error("fixed fee {0} is negative")]
    NegativeFixedFee(Decimal),

    #[error("fee {0} already exists")]
    DuplicateFee(FeeId),

    #[error("fee {0} not found")]
    FeeNotFound(FeeId),
}

/// Transaction record persistence failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JournalError {
    #[error("reference {0} already recorded")]
    DuplicateReference(String),

    #[error("payment code already recorded")]
    DuplicatePaymentCode,

    #[error("reference {0} not recorded")]
    NotFound(String),

    #[error("status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        expected: TransactionStatus,
        actual: TransactionStatus,
    },

    #[error("journal unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid fee configuration: {0}")]
    Fee(#[from] FeeConfigError),

    #[error("invalid seed data: {0}")]
    Seed(#[from] TransactionError),
}
