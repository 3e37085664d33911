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

//! Transaction record storage.
//!
//! [`TransactionJournal`] is the persistence seam of the engine: records
//! are inserted once and afterwards only replaced through a
//! compare-and-set on their status, so two racing settlements of the same
//! record cannot both win. [`TransactionLog`] is the in-memory journal.

use crate::error::JournalError;
use crate::transaction::{Transaction, TransactionStatus};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait TransactionJournal: Send + Sync {
    /// Records a new transaction. Reference and payment code must be unused.
    fn insert(&self, transaction: Transaction) -> Result<(), JournalError>;

    /// Replaces the stored record if its status is still `expected`.
    fn update(
        &self,
        transaction: Transaction,
        expected: TransactionStatus,
    ) -> Result<(), JournalError>;

    fn get(&self, reference: &str) -> Option<Transaction>;

    fn find_by_payment_code(&self, payment_code: &str) -> Option<Transaction>;

    /// Every record, oldest first.
    fn transactions(&self) -> Vec<Transaction>;
}

#[derive(Debug)]
struct Record {
    seq: u64,
    transaction: Transaction,
}

/// In-memory journal with unique references and payment codes.
///
/// References are checked and inserted through the [`DashMap`] entry API so
/// concurrent inserts of the same reference cannot both succeed.
#[derive(Debug)]
pub struct TransactionLog {
    records: DashMap<String, Record>,
    /// Payment code to reference.
    payment_codes: DashMap<String, String>,
    next_seq: AtomicU64,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            payment_codes: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionJournal for TransactionLog {
    fn insert(&self, transaction: Transaction) -> Result<(), JournalError> {
        // Lock order: records entry, then payment code entry.
        match self.records.entry(transaction.reference.clone()) {
            Entry::Occupied(_) => Err(JournalError::DuplicateReference(transaction.reference)),
            Entry::Vacant(record) => match self.payment_codes.entry(transaction.payment_code.clone()) {
                Entry::Occupied(_) => Err(JournalError::DuplicatePaymentCode),
                Entry::Vacant(code) => {
                    code.insert(transaction.reference.clone());
                    record.insert(Record {
                        seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                        transaction,
                    });
                    Ok(())
                }
            },
        }
    }

    fn update(
        &self,
        transaction: Transaction,
        expected: TransactionStatus,
    ) -> Result<(), JournalError> {
        let mut record = self
            .records
            .get_mut(&transaction.reference)
            .ok_or_else(|| JournalError::NotFound(transaction.reference.clone()))?;
        let actual = record.transaction.status;
        if actual != expected {
            return Err(JournalError::StatusConflict { expected, actual });
        }
        debug_assert_eq!(
            record.transaction.payment_code, transaction.payment_code,
            "payment code is fixed at insert"
        );
        record.transaction = transaction;
        Ok(())
    }

    fn get(&self, reference: &str) -> Option<Transaction> {
        self.records
            .get(reference)
            .map(|record| record.transaction.clone())
    }

    fn find_by_payment_code(&self, payment_code: &str) -> Option<Transaction> {
        let reference = self.payment_codes.get(payment_code)?.value().clone();
        self.get(&reference)
    }

    fn transactions(&self) -> Vec<Transaction> {
        let mut records: Vec<(u64, Transaction)> = self
            .records
            .iter()
            .map(|record| (record.seq, record.transaction.clone()))
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        records.into_iter().map(|(_, transaction)| transaction).collect()
    }
}
