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

//! Payment-method types and the transaction types they allow.

use crate::base::{CountryId, PaymentMethodTypeId};
use crate::transaction::TransactionType;
use crate::TransactionError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodType {
    pub id: PaymentMethodTypeId,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub country: Option<CountryId>,
    /// `None` allows every transaction type.
    #[serde(default)]
    pub allowed_transactions: Option<Vec<TransactionType>>,
}

impl PaymentMethodType {
    pub fn allows(&self, transaction_type: TransactionType) -> bool {
        self.allowed_transactions
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&transaction_type))
    }
}

/// Registry of known payment-method types.
#[derive(Debug, Default)]
pub struct PaymentMethodTypes {
    types: DashMap<PaymentMethodTypeId, PaymentMethodType>,
}

impl PaymentMethodTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a payment-method type.
    pub fn register(&self, method: PaymentMethodType) {
        self.types.insert(method.id, method);
    }

    pub fn get(&self, id: PaymentMethodTypeId) -> Option<PaymentMethodType> {
        self.types.get(&id).map(|method| method.clone())
    }

    /// Checks that `id`, when given, exists and allows `transaction_type`.
    pub fn check_allowed(
        &self,
        id: Option<PaymentMethodTypeId>,
        transaction_type: TransactionType,
    ) -> Result<(), TransactionError> {
        let Some(id) = id else {
            return Ok(());
        };
        let method = self
            .types
            .get(&id)
            .ok_or(TransactionError::UnknownPaymentMethodType)?;
        if method.allows(transaction_type) {
            Ok(())
        } else {
            Err(TransactionError::TransactionNotAllowed)
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
