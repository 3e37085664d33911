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

//! Fee resolution cache.
//!
//! Resolved fees (including "not configured") are cached per exact
//! [`FeeLookup`]. The cache is an injected service, not ambient state: the
//! [`FeeResolver`](crate::fee_resolver::FeeResolver) reads through it and the
//! [`FeeSchedule`](crate::fee_resolver::FeeSchedule) drops affected entries
//! through the [`FeeChangeListener`] hook on every write.
//!
//! Correctness never depends on the cache. A disabled or cold cache only
//! costs extra store reads.

use crate::fee::{FeeLookup, FeeResolution};
use crate::transaction::TransactionType;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Notified after fee configuration for `transaction_type` changed.
pub trait FeeChangeListener: Send + Sync {
    fn fee_changed(&self, transaction_type: TransactionType);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    resolution: FeeResolution,
    stored_at: Instant,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

#[derive(Debug)]
pub struct FeeCache {
    entries: DashMap<FeeLookup, CacheEntry>,
    /// `None` keeps entries until invalidated.
    ttl: Option<Duration>,
    enabled: bool,
    /// Bumped before every invalidation.
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl FeeCache {
    /// One hour, the lifetime fee entries have always had.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            enabled: true,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// A cache that stores nothing; every lookup misses.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(None)
        }
    }

    pub fn get(&self, key: &FeeLookup) -> Option<FeeResolution> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let fresh = self.entries.get(key).and_then(|entry| {
            let expired = self
                .ttl
                .is_some_and(|ttl| entry.stored_at.elapsed() >= ttl);
            (!expired).then(|| entry.resolution.clone())
        });
        match fresh {
            Some(resolution) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(resolution)
            }
            None => {
                // Drop an expired entry so the map does not keep stale keys around.
                if let Some(ttl) = self.ttl {
                    self.entries
                        .remove_if(key, |_, entry| entry.stored_at.elapsed() >= ttl);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: FeeLookup, resolution: FeeResolution) {
        if !self.enabled {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                resolution,
                stored_at: Instant::now(),
            },
        );
    }

    /// Current invalidation generation, read before a store lookup.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Inserts unless an invalidation happened since `observed` was read.
    ///
    /// The generation is checked again after the insert so that a write
    /// racing with the store read can never leave a stale entry behind.
    pub fn insert_if_current(&self, key: FeeLookup, resolution: FeeResolution, observed: u64) {
        if self.generation() != observed {
            return;
        }
        self.insert(key, resolution);
        if self.generation() != observed {
            self.entries.remove(&key);
        }
    }

    /// Drops every entry for `transaction_type`.
    pub fn invalidate(&self, transaction_type: TransactionType) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries
            .retain(|key, _| key.transaction_type != transaction_type);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(%transaction_type, "fee cache invalidated");
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Default for FeeCache {
    fn default() -> Self {
        Self::new(Some(Self::DEFAULT_TTL))
    }
}

impl FeeChangeListener for FeeCache {
    fn fee_changed(&self, transaction_type: TransactionType) {
        self.invalidate(transaction_type);
    }
}
