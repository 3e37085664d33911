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

//! Wallet ledger.
//!
//! Each [`Wallet`] guards its data with its own mutex, so operations on
//! disjoint wallets run fully in parallel while operations on the same
//! wallet serialize. Operations that touch two wallets always lock them in
//! ascending [`WalletId`] order, so two opposite transfers cannot deadlock.
//!
//! Every mutation checks first and writes second: a rejected debit, credit
//! or transfer leaves every balance exactly as it was.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use vulipay_ledger::{Currency, UserId, WalletLedger, TransactionError};
//!
//! let ledger = WalletLedger::new();
//! let alice = ledger.open_main_wallet(UserId(1), Currency::new("USD")).unwrap();
//! let bob = ledger.open_main_wallet(UserId(2), Currency::new("USD")).unwrap();
//!
//! ledger.credit(alice, dec!(100)).unwrap();
//! ledger.transfer(alice, bob, dec!(40)).unwrap();
//! assert_eq!(ledger.balance(alice).unwrap(), dec!(60));
//! assert_eq!(ledger.transfer(alice, bob, dec!(61)), Err(TransactionError::InsufficientFunds));
//! ```

use crate::base::{UserId, WalletId};
use crate::money::Currency;
use crate::TransactionError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalletType {
    Main,
    Business,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "MAIN",
            Self::Business => "BUSINESS",
        }
    }
}

#[derive(Debug)]
pub(crate) struct WalletData {
    id: WalletId,
    owner: UserId,
    wallet_type: WalletType,
    balance: Decimal,
    currency: Currency,
    is_active: bool,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
}

impl WalletData {
    fn new(id: WalletId, owner: UserId, wallet_type: WalletType, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner,
            wallet_type,
            balance: Decimal::ZERO,
            currency,
            is_active: true,
            created_on: now,
            updated_on: now,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: wallet {} balance went negative: {}",
            self.id,
            self.balance
        );
    }

    pub(crate) fn id(&self) -> WalletId {
        self.id
    }

    pub(crate) fn balance(&self) -> Decimal {
        self.balance
    }

    pub(crate) fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Balance after debiting `amount`, without applying it.
    pub(crate) fn check_debit(&self, amount: Decimal) -> Result<Decimal, TransactionError> {
        if amount <= Decimal::ZERO {
            return Err(TransactionError::InvalidAmount);
        }
        if !self.is_active {
            return Err(TransactionError::WalletInactive);
        }
        if self.balance < amount {
            return Err(TransactionError::InsufficientFunds);
        }
        Ok(self.balance - amount)
    }

    /// Balance after crediting `amount`, without applying it.
    pub(crate) fn check_credit(&self, amount: Decimal) -> Result<Decimal, TransactionError> {
        if amount <= Decimal::ZERO {
            return Err(TransactionError::InvalidAmount);
        }
        if !self.is_active {
            return Err(TransactionError::WalletInactive);
        }
        self.balance.checked_add(amount).ok_or_else(|| {
            TransactionError::processing(format!("balance overflow on wallet {}", self.id))
        })
    }

    /// Writes a balance produced by `check_debit` / `check_credit`.
    pub(crate) fn set_balance(&mut self, balance: Decimal) {
        self.balance = balance;
        self.updated_on = Utc::now();
        self.assert_invariants();
    }

    fn debit(&mut self, amount: Decimal) -> Result<Decimal, TransactionError> {
        let balance = self.check_debit(amount)?;
        self.set_balance(balance);
        Ok(balance)
    }

    fn credit(&mut self, amount: Decimal) -> Result<Decimal, TransactionError> {
        let balance = self.check_credit(amount)?;
        self.set_balance(balance);
        Ok(balance)
    }
}

/// Moves `amount` from `source` to `target` or changes nothing.
pub(crate) fn transfer_between(
    source: &mut WalletData,
    target: &mut WalletData,
    amount: Decimal,
) -> Result<(), TransactionError> {
    if source.currency != target.currency {
        return Err(TransactionError::CurrencyMismatch);
    }
    let source_balance = source.check_debit(amount)?;
    let target_balance = target.check_credit(amount)?;
    source.set_balance(source_balance);
    target.set_balance(target_balance);
    Ok(())
}

/// User wallet.
#[derive(Debug)]
pub struct Wallet {
    inner: Mutex<WalletData>,
}

impl Wallet {
    fn new(id: WalletId, owner: UserId, wallet_type: WalletType, currency: Currency) -> Self {
        Self {
            inner: Mutex::new(WalletData::new(id, owner, wallet_type, currency)),
        }
    }

    pub fn id(&self) -> WalletId {
        self.inner.lock().id
    }

    pub fn owner(&self) -> UserId {
        self.inner.lock().owner
    }

    pub fn wallet_type(&self) -> WalletType {
        self.inner.lock().wallet_type
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub fn currency(&self) -> Currency {
        self.inner.lock().currency.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().is_active
    }

    pub fn created_on(&self) -> DateTime<Utc> {
        self.inner.lock().created_on
    }

    pub fn updated_on(&self) -> DateTime<Utc> {
        self.inner.lock().updated_on
    }
}

impl Serialize for Wallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Wallet", 6)?;
        state.serialize_field("wallet", &data.id)?;
        state.serialize_field("user", &data.owner)?;
        state.serialize_field("type", &data.wallet_type)?;
        state.serialize_field("balance", &data.currency.round(data.balance))?;
        state.serialize_field("currency", &data.currency)?;
        state.serialize_field("active", &data.is_active)?;
        state.end()
    }
}

/// Owner of every user wallet and the only mutator of their balances.
#[derive(Debug)]
pub struct WalletLedger {
    wallets: DashMap<WalletId, Arc<Wallet>>,
    /// Enforces one wallet per (user, wallet type).
    owners: DashMap<(UserId, WalletType), WalletId>,
    next_id: AtomicU64,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
            owners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens a wallet with a zero balance.
    ///
    /// # Errors
    ///
    /// [`TransactionError::DuplicateWallet`] if the user already has a
    /// wallet of this type.
    pub fn open_wallet(
        &self,
        owner: UserId,
        wallet_type: WalletType,
        currency: Currency,
    ) -> Result<WalletId, TransactionError> {
        match self.owners.entry((owner, wallet_type)) {
            Entry::Occupied(_) => Err(TransactionError::DuplicateWallet),
            Entry::Vacant(entry) => {
                let id = WalletId(self.next_id.fetch_add(1, Ordering::SeqCst));
                self.wallets
                    .insert(id, Arc::new(Wallet::new(id, owner, wallet_type, currency)));
                entry.insert(id);
                Ok(id)
            }
        }
    }

    /// Opens the MAIN wallet every user gets on sign-up.
    pub fn open_main_wallet(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<WalletId, TransactionError> {
        self.open_wallet(owner, WalletType::Main, currency)
    }

    pub fn wallet(&self, id: WalletId) -> Option<Arc<Wallet>> {
        self.wallets.get(&id).map(|wallet| Arc::clone(&wallet))
    }

    pub fn wallet_of(&self, owner: UserId, wallet_type: WalletType) -> Option<WalletId> {
        self.owners.get(&(owner, wallet_type)).map(|id| *id)
    }

    pub fn main_wallet(&self, owner: UserId) -> Option<WalletId> {
        self.wallet_of(owner, WalletType::Main)
    }

    pub fn balance(&self, id: WalletId) -> Result<Decimal, TransactionError> {
        self.wallet(id)
            .map(|wallet| wallet.balance())
            .ok_or(TransactionError::WalletNotFound)
    }

    /// Soft-deactivates a wallet. Deactivated wallets reject every mutation.
    pub fn deactivate(&self, id: WalletId) -> Result<(), TransactionError> {
        self.set_active(id, false)
    }

    pub fn activate(&self, id: WalletId) -> Result<(), TransactionError> {
        self.set_active(id, true)
    }

    fn set_active(&self, id: WalletId, active: bool) -> Result<(), TransactionError> {
        self.with_wallet(id, TransactionError::WalletNotFound, |data| {
            data.is_active = active;
            data.updated_on = Utc::now();
            Ok(())
        })
    }

    /// Decrements the balance, returning the new balance.
    pub fn debit(&self, id: WalletId, amount: Decimal) -> Result<Decimal, TransactionError> {
        self.with_wallet(id, TransactionError::WalletNotFound, |data| data.debit(amount))
    }

    /// Increments the balance, returning the new balance.
    pub fn credit(&self, id: WalletId, amount: Decimal) -> Result<Decimal, TransactionError> {
        self.with_wallet(id, TransactionError::TargetWalletNotFound, |data| {
            data.credit(amount)
        })
    }

    /// Debits `source` and credits `target` as one unit.
    pub fn transfer(
        &self,
        source: WalletId,
        target: WalletId,
        amount: Decimal,
    ) -> Result<(), TransactionError> {
        self.with_pair(source, target, |source, target| {
            transfer_between(source, target, amount)
        })
    }

    /// Runs `f` with exclusive access to one wallet.
    pub(crate) fn with_wallet<R>(
        &self,
        id: WalletId,
        missing: TransactionError,
        f: impl FnOnce(&mut WalletData) -> Result<R, TransactionError>,
    ) -> Result<R, TransactionError> {
        let wallet = self.wallet(id).ok_or(missing)?;
        let mut data = wallet.inner.lock();
        f(&mut data)
    }

    /// Runs `f` with exclusive access to two distinct wallets, locked in
    /// ascending id order.
    pub(crate) fn with_pair<R>(
        &self,
        source: WalletId,
        target: WalletId,
        f: impl FnOnce(&mut WalletData, &mut WalletData) -> Result<R, TransactionError>,
    ) -> Result<R, TransactionError> {
        if source == target {
            return Err(TransactionError::SameWallet);
        }
        let source_wallet = self.wallet(source).ok_or(TransactionError::WalletNotFound)?;
        let target_wallet = self
            .wallet(target)
            .ok_or(TransactionError::TargetWalletNotFound)?;

        let (mut source_data, mut target_data) = if source < target {
            let s = source_wallet.inner.lock();
            let t = target_wallet.inner.lock();
            (s, t)
        } else {
            let t = target_wallet.inner.lock();
            let s = source_wallet.inner.lock();
            (s, t)
        };
        f(&mut source_data, &mut target_data)
    }

    /// Returns an iterator over all wallets.
    pub fn wallets(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, WalletId, Arc<Wallet>>> {
        self.wallets.iter()
    }

    /// Sum of every wallet balance.
    pub fn total_balance(&self) -> Decimal {
        self.wallets.iter().map(|wallet| wallet.balance()).sum()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

impl Default for WalletLedger {
    fn default() -> Self {
        Self::new()
    }
}
