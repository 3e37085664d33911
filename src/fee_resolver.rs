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

//! Fee configuration store and specificity-ranked resolution.
//!
//! Resolution picks, among the records for the requested transaction type
//! that match the lookup scope, the most specific one:
//!
//! 1. country and payment-method type
//! 2. country, any payment-method type
//! 3. any country, payment-method type
//! 4. fully global
//!
//! Ties at the same level prefer a fixed fee, then the lowest fee id.

use crate::base::{CountryId, FeeId, PaymentMethodTypeId};
use crate::error::FeeConfigError;
use crate::fee::{FeeLookup, FeePriority, FeeResolution, TransactionFee};
use crate::fee_cache::{FeeCache, FeeChangeListener};
use crate::transaction::TransactionType;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::warn;

/// Read side of fee configuration storage.
pub trait FeeStore: Send + Sync {
    /// Every fee record configured for `transaction_type`.
    fn fees_for(&self, transaction_type: TransactionType) -> Vec<TransactionFee>;
}

/// In-memory fee configuration table.
///
/// Writes are validated and announced to every subscribed
/// [`FeeChangeListener`] after they are applied.
#[derive(Default)]
pub struct FeeSchedule {
    fees: DashMap<FeeId, TransactionFee>,
    listeners: RwLock<Vec<Arc<dyn FeeChangeListener>>>,
}

impl FeeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn FeeChangeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn insert(&self, fee: TransactionFee) -> Result<(), FeeConfigError> {
        fee.rule.validate()?;
        let transaction_type = fee.transaction_type;
        match self.fees.entry(fee.id) {
            Entry::Occupied(_) => return Err(FeeConfigError::DuplicateFee(fee.id)),
            Entry::Vacant(entry) => {
                entry.insert(fee);
            }
        }
        self.notify(transaction_type);
        Ok(())
    }

    /// Replaces an existing record. Moving a record to another transaction
    /// type invalidates both types.
    pub fn update(&self, fee: TransactionFee) -> Result<(), FeeConfigError> {
        fee.rule.validate()?;
        let new_type = fee.transaction_type;
        let old_type = match self.fees.get_mut(&fee.id) {
            Some(mut existing) => {
                let old_type = existing.transaction_type;
                *existing = fee;
                old_type
            }
            None => return Err(FeeConfigError::FeeNotFound(fee.id)),
        };
        self.notify(old_type);
        if old_type != new_type {
            self.notify(new_type);
        }
        Ok(())
    }

    pub fn remove(&self, id: FeeId) -> Result<TransactionFee, FeeConfigError> {
        let (_, fee) = self.fees.remove(&id).ok_or(FeeConfigError::FeeNotFound(id))?;
        self.notify(fee.transaction_type);
        Ok(fee)
    }

    pub fn get(&self, id: FeeId) -> Option<TransactionFee> {
        self.fees.get(&id).map(|fee| fee.clone())
    }

    pub fn len(&self) -> usize {
        self.fees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fees.is_empty()
    }

    fn notify(&self, transaction_type: TransactionType) {
        for listener in self.listeners.read().iter() {
            listener.fee_changed(transaction_type);
        }
    }
}

impl FeeStore for FeeSchedule {
    fn fees_for(&self, transaction_type: TransactionType) -> Vec<TransactionFee> {
        self.fees
            .iter()
            .filter(|fee| fee.transaction_type == transaction_type)
            .map(|fee| fee.clone())
            .collect()
    }
}

/// Resolves the applicable fee for a lookup, reading through the cache.
pub struct FeeResolver {
    store: Arc<dyn FeeStore>,
    cache: Arc<FeeCache>,
}

impl FeeResolver {
    pub fn new(store: Arc<dyn FeeStore>, cache: Arc<FeeCache>) -> Self {
        Self { store, cache }
    }

    pub fn resolve(
        &self,
        country: Option<CountryId>,
        transaction_type: TransactionType,
        payment_method_type: Option<PaymentMethodTypeId>,
    ) -> FeeResolution {
        self.resolve_lookup(FeeLookup::new(country, transaction_type, payment_method_type))
    }

    pub fn resolve_lookup(&self, lookup: FeeLookup) -> FeeResolution {
        if let Some(cached) = self.cache.get(&lookup) {
            return cached;
        }
        let generation = self.cache.generation();
        let resolution = self.resolve_uncached(&lookup);
        self.cache
            .insert_if_current(lookup, resolution.clone(), generation);
        resolution
    }

    /// Resolution straight from the store, bypassing the cache.
    pub fn resolve_uncached(&self, lookup: &FeeLookup) -> FeeResolution {
        let best = self
            .store
            .fees_for(lookup.transaction_type)
            .into_iter()
            .filter(|fee| fee.matches(lookup))
            .min_by_key(|fee| {
                (
                    Reverse(fee.specificity()),
                    fee.rule.priority() != FeePriority::Fixed,
                    fee.id,
                )
            });

        match best {
            Some(fee) => FeeResolution::Found(fee),
            None => {
                warn!(
                    transaction_type = %lookup.transaction_type,
                    country = ?lookup.country,
                    payment_method_type = ?lookup.payment_method_type,
                    "no fee configured, charging zero fee"
                );
                FeeResolution::NotConfigured
            }
        }
    }

    pub fn cache(&self) -> &FeeCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee::FeeRule;
    use rust_decimal_macros::dec;

    fn fee(id: u32, country: Option<u16>, method: Option<u32>, rule: FeeRule) -> TransactionFee {
        TransactionFee {
            id: FeeId(id),
            name: format!("fee-{id}"),
            transaction_type: TransactionType::P2P,
            country: country.map(CountryId),
            payment_method_type: method.map(PaymentMethodTypeId),
            rule,
        }
    }

    fn resolver_with(fees: Vec<TransactionFee>) -> (Arc<FeeSchedule>, FeeResolver) {
        let schedule = Arc::new(FeeSchedule::new());
        let cache = Arc::new(FeeCache::default());
        schedule.subscribe(cache.clone());
        for fee in fees {
            schedule.insert(fee).unwrap();
        }
        let resolver = FeeResolver::new(schedule.clone(), cache);
        (schedule, resolver)
    }

    #[test]
    fn insert_rejects_duplicates_and_invalid_rules() {
        let schedule = FeeSchedule::new();
        schedule
            .insert(fee(1, None, None, FeeRule::Fixed(dec!(1))))
            .unwrap();
        assert_eq!(
            schedule.insert(fee(1, None, None, FeeRule::Fixed(dec!(2)))),
            Err(FeeConfigError::DuplicateFee(FeeId(1)))
        );
        assert_eq!(
            schedule.insert(fee(2, None, None, FeeRule::Percentage(dec!(101)))),
            Err(FeeConfigError::PercentageOutOfRange(dec!(101)))
        );
        assert_eq!(schedule.len(), 1);
    }

    #[test]
    fn tie_prefers_fixed_then_lowest_id() {
        let (_, resolver) = resolver_with(vec![
            fee(5, Some(1), None, FeeRule::Percentage(dec!(1))),
            fee(4, Some(1), None, FeeRule::Fixed(dec!(3))),
            fee(3, Some(1), None, FeeRule::Fixed(dec!(2))),
        ]);
        let resolved = resolver.resolve(Some(CountryId(1)), TransactionType::P2P, None);
        assert_eq!(resolved.fee().map(|f| f.id), Some(FeeId(3)));
    }

    #[test]
    fn update_and_remove_invalidate_cache() {
        let (schedule, resolver) =
            resolver_with(vec![fee(1, None, None, FeeRule::Percentage(dec!(1)))]);
        let first = resolver.resolve(None, TransactionType::P2P, None);
        assert_eq!(first.fee().unwrap().rule, FeeRule::Percentage(dec!(1)));

        schedule
            .update(fee(1, None, None, FeeRule::Percentage(dec!(2))))
            .unwrap();
        let second = resolver.resolve(None, TransactionType::P2P, None);
        assert_eq!(second.fee().unwrap().rule, FeeRule::Percentage(dec!(2)));

        schedule.remove(FeeId(1)).unwrap();
        assert_eq!(
            resolver.resolve(None, TransactionType::P2P, None),
            FeeResolution::NotConfigured
        );
    }

    #[test]
    fn update_unknown_fee_fails() {
        let schedule = FeeSchedule::new();
        assert_eq!(
            schedule.update(fee(9, None, None, FeeRule::Fixed(dec!(1)))),
            Err(FeeConfigError::FeeNotFound(FeeId(9)))
        );
        assert_eq!(schedule.remove(FeeId(9)), Err(FeeConfigError::FeeNotFound(FeeId(9))));
    }
}
