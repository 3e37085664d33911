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

//! # Vulipay Ledger
//!
//! Fee resolution and wallet ledger engine for mobile-money transactions:
//! peer-to-peer transfers, merchant payments, cash-in and cash-out.
//!
//! ## Core Components
//!
//! - [`Engine`]: Transaction orchestrator; the only component that moves money
//! - [`WalletLedger`]: User wallets with atomic debit, credit and transfer
//! - [`PlatformFeeCollector`]: Per-country and global platform fee pools
//! - [`FeeResolver`]: Specificity-ranked fee lookup behind an injected [`FeeCache`]
//! - [`FeeCalculator`]: Stateless fixed / percentage fee arithmetic
//! - [`Transaction`]: Auditable record with a strict status lifecycle
//!
//! ## Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use vulipay_ledger::{
//!     Currency, Engine, FeeId, FeeRule, TransactionFee, TransactionRequest, TransactionStatus,
//!     TransactionType, UserId,
//! };
//!
//! let engine = Engine::new();
//! let usd = Currency::new("USD");
//! let alice = engine.wallets().open_main_wallet(UserId(1), usd.clone()).unwrap();
//! let bob = engine.wallets().open_main_wallet(UserId(2), usd).unwrap();
//! engine.wallets().credit(alice, dec!(1000)).unwrap();
//!
//! engine
//!     .fees()
//!     .insert(TransactionFee {
//!         id: FeeId(1),
//!         name: "P2P".to_string(),
//!         transaction_type: TransactionType::P2P,
//!         country: None,
//!         payment_method_type: None,
//!         rule: FeeRule::Percentage(dec!(2.5)),
//!     })
//!     .unwrap();
//!
//! let tx = engine.process(TransactionRequest::p2p(alice, bob, dec!(100))).unwrap();
//! assert_eq!(tx.status, TransactionStatus::Completed);
//! assert_eq!(tx.calculated_fee, Some(dec!(2.50)));
//! assert_eq!(engine.wallets().balance(alice).unwrap(), dec!(897.50));
//! assert_eq!(engine.platform().balance(None), Some(dec!(2.50)));
//! ```
//!
//! ## Thread Safety
//!
//! Every wallet and platform pool has its own lock. Settlements lock their
//! wallets in ascending id order and the platform pool last, so settlements
//! on disjoint wallets run in parallel and none can deadlock.

mod base;
pub mod config;
pub mod engine;
pub mod error;
pub mod fee;
pub mod fee_cache;
pub mod fee_calculator;
pub mod fee_resolver;
pub mod logging;
pub mod money;
pub mod payment_code;
pub mod payment_method;
pub mod platform;
pub mod transaction;
pub mod transaction_log;
pub mod wallet;

pub use base::{CountryId, FeeId, PaymentMethodTypeId, PhoneNumber, UserId, WalletId};
pub use config::LedgerConfig;
pub use engine::{
    CashInOutcome, Engine, EngineBuilder, EngineSettings, RecipientCredit, TransactionDetails,
    TransactionRequest,
};
pub use error::{ConfigError, FeeConfigError, JournalError, TransactionError};
pub use fee::{FeeLookup, FeePriority, FeeResolution, FeeRule, TransactionFee};
pub use fee_cache::{CacheStats, FeeCache, FeeChangeListener};
pub use fee_calculator::{FeeBreakdown, FeeCalculator};
pub use fee_resolver::{FeeResolver, FeeSchedule, FeeStore};
pub use money::{AmountInput, Currency};
pub use payment_code::PaymentCodeHasher;
pub use payment_method::{PaymentMethodType, PaymentMethodTypes};
pub use platform::{PlatformFeeCollector, PlatformWallet};
pub use transaction::{Transaction, TransactionStatus, TransactionSummary, TransactionType};
pub use transaction_log::{TransactionJournal, TransactionLog};
pub use wallet::{Wallet, WalletLedger, WalletType};
