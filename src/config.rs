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

//! YAML configuration and seed data.
//!
//! ```yaml
//! payment_code_prefix: vulipay
//! default_currency: USD
//! recipient_credit: charged_amount
//! fee_cache:
//!   enabled: true
//!   ttl_secs: 3600
//! logging:
//!   level: info
//!   json: false
//! countries:
//!   - { id: 1, name: Cameroon, iso_code: CM, currency: XAF }
//! platform_wallets:
//!   - { country: 1 }
//! fees:
//!   - { id: 1, transaction_type: P2P, fee_priority: percentage, percentage_fee: 2.5 }
//! wallets:
//!   - { user: 1, balance: 1000 }
//! ```
//!
//! Seeded wallets receive ids `1, 2, ...` in the order they are listed.

use crate::base::{CountryId, FeeId, PaymentMethodTypeId, UserId};
use crate::engine::{Engine, EngineSettings, RecipientCredit};
use crate::error::ConfigError;
use crate::fee::{FeePriority, FeeRule, TransactionFee};
use crate::fee_cache::FeeCache;
use crate::money::{Currency, deserialize_decimal, deserialize_optional_decimal};
use crate::payment_code::DEFAULT_PREFIX;
use crate::payment_method::PaymentMethodType;
use crate::transaction::TransactionType;
use crate::wallet::WalletType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub payment_code_prefix: String,
    /// Currency of the global platform pool and of wallets seeded without one.
    pub default_currency: Currency,
    pub recipient_credit: RecipientCredit,
    pub max_reference_attempts: u32,
    pub fee_cache: FeeCacheConfig,
    pub logging: LoggingConfig,
    pub countries: Vec<CountrySeed>,
    pub platform_wallets: Vec<PlatformWalletSeed>,
    pub payment_method_types: Vec<PaymentMethodType>,
    pub fees: Vec<FeeSeed>,
    pub wallets: Vec<WalletSeed>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            payment_code_prefix: DEFAULT_PREFIX.to_string(),
            default_currency: Currency::new("USD"),
            recipient_credit: RecipientCredit::default(),
            max_reference_attempts: EngineSettings::default().max_reference_attempts,
            fee_cache: FeeCacheConfig::default(),
            logging: LoggingConfig::default(),
            countries: Vec::new(),
            platform_wallets: Vec::new(),
            payment_method_types: Vec::new(),
            fees: Vec::new(),
            wallets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeCacheConfig {
    pub enabled: bool,
    /// Entry lifetime in seconds; 0 keeps entries until invalidated.
    pub ttl_secs: u64,
}

impl Default for FeeCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: FeeCache::DEFAULT_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountrySeed {
    pub id: CountryId,
    pub name: String,
    pub iso_code: String,
    pub currency: Currency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformWalletSeed {
    pub country: CountryId,
    /// Defaults to the country's currency.
    #[serde(default)]
    pub currency: Option<Currency>,
}

/// Fee record in its stored column form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSeed {
    pub id: FeeId,
    #[serde(default)]
    pub name: Option<String>,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub country: Option<CountryId>,
    #[serde(default)]
    pub payment_method_type: Option<PaymentMethodTypeId>,
    #[serde(default)]
    pub fee_priority: Option<FeePriority>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub fixed_fee: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub percentage_fee: Option<Decimal>,
}

impl FeeSeed {
    pub fn to_fee(&self) -> Result<TransactionFee, ConfigError> {
        let rule = FeeRule::from_columns(self.fee_priority, self.fixed_fee, self.percentage_fee)?;
        Ok(TransactionFee {
            id: self.id,
            name: self
                .name
                .clone()
                .unwrap_or_else(|| format!("{} fee {}", self.transaction_type, self.id)),
            transaction_type: self.transaction_type,
            country: self.country,
            payment_method_type: self.payment_method_type,
            rule,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSeed {
    pub user: UserId,
    #[serde(default = "default_wallet_type")]
    pub wallet_type: WalletType,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default, deserialize_with = "deserialize_decimal")]
    pub balance: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_wallet_type() -> WalletType {
    WalletType::Main
}

fn default_active() -> bool {
    true
}

impl LedgerConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payment_code_prefix.is_empty() || self.payment_code_prefix.contains('$') {
            return Err(ConfigError::Invalid(format!(
                "payment_code_prefix {:?} must be non-empty and must not contain '$'",
                self.payment_code_prefix
            )));
        }
        if self.max_reference_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_reference_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            recipient_credit: self.recipient_credit,
            max_reference_attempts: self.max_reference_attempts,
        }
    }

    pub fn build_fee_cache(&self) -> FeeCache {
        match (self.fee_cache.enabled, self.fee_cache.ttl_secs) {
            (false, _) => FeeCache::disabled(),
            (true, 0) => FeeCache::new(None),
            (true, secs) => FeeCache::new(Some(Duration::from_secs(secs))),
        }
    }

    /// Builds an engine and loads every seed section into it.
    pub fn build_engine(&self) -> Result<Engine, ConfigError> {
        self.validate()?;
        let engine = Engine::builder()
            .global_currency(self.default_currency.clone())
            .settings(self.engine_settings())
            .payment_code_prefix(self.payment_code_prefix.clone())
            .fee_cache(self.build_fee_cache())
            .build();
        self.seed(&engine)?;
        Ok(engine)
    }

    fn seed(&self, engine: &Engine) -> Result<(), ConfigError> {
        for pool in &self.platform_wallets {
            let currency = match &pool.currency {
                Some(currency) => currency.clone(),
                None => self
                    .countries
                    .iter()
                    .find(|country| country.id == pool.country)
                    .map(|country| country.currency.clone())
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "platform wallet for unknown country {}",
                            pool.country
                        ))
                    })?,
            };
            engine.platform().open_pool(pool.country, currency)?;
        }

        for method in &self.payment_method_types {
            engine.payment_methods().register(method.clone());
        }

        for fee in &self.fees {
            engine.fees().insert(fee.to_fee()?)?;
        }

        for seed in &self.wallets {
            let currency = seed
                .currency
                .clone()
                .unwrap_or_else(|| self.default_currency.clone());
            let id = engine
                .wallets()
                .open_wallet(seed.user, seed.wallet_type, currency)?;
            if seed.balance > Decimal::ZERO {
                engine.wallets().credit(id, seed.balance)?;
            }
            if !seed.active {
                engine.wallets().deactivate(id)?;
            }
            debug!(wallet = %id, user = %seed.user, "wallet seeded");
        }
        Ok(())
    }
}
