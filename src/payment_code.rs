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

//! Transaction references and payment codes.
//!
//! A reference looks like `P2P.BA1234.1700000000`: the transaction type
//! wire code, a salt (one consonant, one vowel, four digits) and the unix
//! timestamp in seconds.
//!
//! A payment code is `<prefix>$<type>$<SHA256(reference) in upper-case hex>`.
//! It is handed to the other party instead of the reference and can be
//! checked against a candidate reference without storing anything extra.

use crate::transaction::TransactionType;
use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const CONSONANTS: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";
const VOWELS: &[u8] = b"AEIOUY";

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "vulipay";

/// Generates a transaction reference for `transaction_type` at `now`.
pub fn make_reference<R: Rng + ?Sized>(
    transaction_type: TransactionType,
    now: DateTime<Utc>,
    rng: &mut R,
) -> String {
    let consonant = CONSONANTS[rng.gen_range(0..CONSONANTS.len())] as char;
    let vowel = VOWELS[rng.gen_range(0..VOWELS.len())] as char;
    let digits: u16 = rng.gen_range(0..10_000);
    format!(
        "{}.{consonant}{vowel}{digits:04}.{}",
        transaction_type.code(),
        now.timestamp()
    )
}

/// Parts of a payment code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPaymentCode<'a> {
    pub prefix: &'a str,
    pub transaction_type: &'a str,
    pub hash: &'a str,
}

/// Encodes and checks payment codes under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCodeHasher {
    prefix: String,
}

impl PaymentCodeHasher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn encode(&self, reference: &str, transaction_type: TransactionType) -> String {
        self.encode_raw(reference, transaction_type.code())
    }

    fn encode_raw(&self, reference: &str, transaction_type: &str) -> String {
        let digest = Sha256::digest(reference.as_bytes());
        format!(
            "{}${}${}",
            self.prefix,
            transaction_type,
            hex::encode_upper(digest)
        )
    }

    /// Splits a code into its three parts. Everything after the second `$`
    /// is the hash.
    pub fn decode<'a>(&self, code: &'a str) -> Option<DecodedPaymentCode<'a>> {
        let mut parts = code.splitn(3, '$');
        let prefix = parts.next()?;
        let transaction_type = parts.next()?;
        let hash = parts.next()?;
        Some(DecodedPaymentCode {
            prefix,
            transaction_type,
            hash,
        })
    }

    /// Whether `code` carries this prefix and a known transaction type.
    pub fn is_valid(&self, code: &str) -> bool {
        self.decode(code).is_some_and(|decoded| {
            decoded.prefix == self.prefix
                && TransactionType::from_code(decoded.transaction_type).is_some()
        })
    }

    /// Whether `code` was derived from `reference`, compared in constant time.
    ///
    /// The type segment is taken from `code` itself, so only the hash is
    /// checked. Use [`PaymentCodeHasher::verify_for`] when the record's
    /// type is known.
    pub fn verify(&self, reference: &str, code: &str) -> bool {
        let Some(decoded) = self.decode(code) else {
            return false;
        };
        let expected = self.encode_raw(reference, decoded.transaction_type);
        expected.as_bytes().ct_eq(code.as_bytes()).into()
    }

    /// Whether `code` is exactly the code of a `transaction_type` record
    /// with this `reference`, compared in constant time.
    pub fn verify_for(
        &self,
        reference: &str,
        transaction_type: TransactionType,
        code: &str,
    ) -> bool {
        let expected = self.encode(reference, transaction_type);
        expected.as_bytes().ct_eq(code.as_bytes()).into()
    }
}

impl Default for PaymentCodeHasher {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
