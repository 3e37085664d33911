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

//! Platform fee pools.
//!
//! Collected fees accumulate in one pool per country plus a global pool
//! (country `None`) that always exists. A fee for a country without its own
//! pool lands in the global pool.

use crate::base::CountryId;
use crate::money::Currency;
use crate::TransactionError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct PoolData {
    country: Option<CountryId>,
    balance: Decimal,
    currency: Currency,
    updated_on: DateTime<Utc>,
}

impl PoolData {
    /// Pool balance after collecting `fee`, without applying it.
    pub(crate) fn check_collect(
        &self,
        fee: Decimal,
        currency: &Currency,
    ) -> Result<Decimal, TransactionError> {
        if fee < Decimal::ZERO {
            return Err(TransactionError::InvalidAmount);
        }
        if fee.is_zero() {
            return Ok(self.balance);
        }
        if &self.currency != currency {
            return Err(TransactionError::CurrencyMismatch);
        }
        self.balance
            .checked_add(fee)
            .ok_or_else(|| TransactionError::processing("platform pool balance overflow"))
    }

    pub(crate) fn set_balance(&mut self, balance: Decimal) {
        debug_assert!(
            balance >= self.balance,
            "Invariant violated: platform pool may only grow ({} -> {})",
            self.balance,
            balance
        );
        if balance != self.balance {
            self.balance = balance;
            self.updated_on = Utc::now();
        }
    }

    pub(crate) fn country(&self) -> Option<CountryId> {
        self.country
    }
}

/// Fee pool for one country, or the global pool.
#[derive(Debug)]
pub struct PlatformWallet {
    inner: Mutex<PoolData>,
}

impl PlatformWallet {
    fn new(country: Option<CountryId>, currency: Currency) -> Self {
        Self {
            inner: Mutex::new(PoolData {
                country,
                balance: Decimal::ZERO,
                currency,
                updated_on: Utc::now(),
            }),
        }
    }

    pub fn country(&self) -> Option<CountryId> {
        self.inner.lock().country
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub fn currency(&self) -> Currency {
        self.inner.lock().currency.clone()
    }

    pub fn updated_on(&self) -> DateTime<Utc> {
        self.inner.lock().updated_on
    }
}

impl Serialize for PlatformWallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("PlatformWallet", 3)?;
        state.serialize_field("country", &data.country)?;
        state.serialize_field("balance", &data.currency.round(data.balance))?;
        state.serialize_field("currency", &data.currency)?;
        state.end()
    }
}

/// Accumulates collected fees into platform pools.
#[derive(Debug)]
pub struct PlatformFeeCollector {
    global: Arc<PlatformWallet>,
    countries: DashMap<CountryId, Arc<PlatformWallet>>,
}

impl PlatformFeeCollector {
    /// Creates the collector with its global pool.
    pub fn new(global_currency: Currency) -> Self {
        Self {
            global: Arc::new(PlatformWallet::new(None, global_currency)),
            countries: DashMap::new(),
        }
    }

    /// Opens the pool for `country`. At most one pool per country.
    pub fn open_pool(&self, country: CountryId, currency: Currency) -> Result<(), TransactionError> {
        match self.countries.entry(country) {
            Entry::Occupied(_) => Err(TransactionError::DuplicateWallet),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(PlatformWallet::new(Some(country), currency)));
                Ok(())
            }
        }
    }

    /// Pool that receives fees for `country`.
    pub fn pool_for(&self, country: Option<CountryId>) -> Arc<PlatformWallet> {
        country
            .and_then(|c| self.countries.get(&c).map(|pool| Arc::clone(&pool)))
            .unwrap_or_else(|| Arc::clone(&self.global))
    }

    /// Atomically adds `fee` to the pool for `country`. A zero fee is a no-op.
    pub fn collect(
        &self,
        country: Option<CountryId>,
        fee: Decimal,
        currency: &Currency,
    ) -> Result<Decimal, TransactionError> {
        self.with_pool(country, |pool| {
            let balance = pool.check_collect(fee, currency)?;
            pool.set_balance(balance);
            debug!(country = ?pool.country(), %fee, %balance, "platform fee collected");
            Ok(balance)
        })
    }

    pub(crate) fn with_pool<R>(
        &self,
        country: Option<CountryId>,
        f: impl FnOnce(&mut PoolData) -> Result<R, TransactionError>,
    ) -> Result<R, TransactionError> {
        let pool = self.pool_for(country);
        let mut data = pool.inner.lock();
        f(&mut data)
    }

    /// Balance of the pool stored under exactly `country`; `None` is the
    /// global pool.
    pub fn balance(&self, country: Option<CountryId>) -> Option<Decimal> {
        match country {
            None => Some(self.global.balance()),
            Some(c) => self.countries.get(&c).map(|pool| pool.balance()),
        }
    }

    pub fn total_balance(&self) -> Decimal {
        self.global.balance() + self.countries.iter().map(|pool| pool.balance()).sum::<Decimal>()
    }

    /// Global pool first, then country pools.
    pub fn pools(&self) -> Vec<Arc<PlatformWallet>> {
        let mut pools = vec![Arc::clone(&self.global)];
        let mut countries: Vec<_> = self.countries.iter().map(|pool| Arc::clone(&pool)).collect();
        countries.sort_by_key(|pool| pool.country());
        pools.extend(countries);
        pools
    }
}
