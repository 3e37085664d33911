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

//! Transaction orchestration.
//!
//! The [`Engine`] owns the wallet ledger, the platform fee pools, the fee
//! schedule and the transaction journal, and is the only component that
//! moves money. Every settlement runs as one critical section:
//!
//! 1. lock the wallets involved (ascending id) and then the platform pool,
//! 2. compute every new balance without writing it,
//! 3. write the transaction record to the journal,
//! 4. apply the staged balances.
//!
//! Only step 3 can fail once the locks are held, and it happens before any
//! balance changes, so a failed settlement leaves no trace.
//!
//! # Flows
//!
//! | Operation | Resulting status |
//! |-----------|------------------|
//! | [`Engine::process`] | `COMPLETED` in one step |
//! | [`Engine::create_p2p`] | `INITIATED`, waiting for a payer |
//! | [`Engine::pair`] | `INITIATED` -> `PENDING`, fee frozen |
//! | [`Engine::create_merchant_payment`], [`Engine::create_cash_out`], [`Engine::create_cash_in`] | `PENDING` |
//! | [`Engine::confirm`] | `PENDING` -> `COMPLETED` |
//! | [`Engine::settle_cash_in`] | `PENDING` -> `COMPLETED` or `FAILED` |
//! | [`Engine::cancel`], [`Engine::fail`] | `CANCELLED`, `FAILED` |

use crate::base::{CountryId, PaymentMethodTypeId, PhoneNumber, WalletId};
use crate::error::JournalError;
use crate::fee_cache::FeeCache;
use crate::fee_calculator::FeeCalculator;
use crate::fee_resolver::{FeeResolver, FeeSchedule};
use crate::money::{Currency, validate_amount};
use crate::payment_code::{PaymentCodeHasher, make_reference};
use crate::payment_method::PaymentMethodTypes;
use crate::platform::PlatformFeeCollector;
use crate::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::transaction_log::{TransactionJournal, TransactionLog};
use crate::wallet::{WalletData, WalletLedger};
use crate::TransactionError;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What the receiving wallet of a P2P or merchant payment is credited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientCredit {
    /// The charged amount (nominal plus fee). The fee is collected on top.
    #[default]
    ChargedAmount,
    /// The nominal amount. The fee moves from the payer to the platform pool,
    /// so no money is created.
    NominalAmount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub recipient_credit: RecipientCredit,
    /// Inserts retried with a fresh reference after a collision.
    pub max_reference_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            recipient_credit: RecipientCredit::default(),
            max_reference_attempts: 5,
        }
    }
}

/// Optional scope and metadata of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionDetails {
    pub country: Option<CountryId>,
    pub payment_method_type: Option<PaymentMethodTypeId>,
    /// Must match the wallets' currency when given.
    pub currency: Option<Currency>,
    pub notes: Option<String>,
}

/// Request handed to [`Engine::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub source_wallet: Option<WalletId>,
    pub target_wallet: Option<WalletId>,
    pub phone_number: Option<PhoneNumber>,
    pub details: TransactionDetails,
}

impl TransactionRequest {
    pub fn new(transaction_type: TransactionType, amount: Decimal) -> Self {
        Self {
            transaction_type,
            amount,
            source_wallet: None,
            target_wallet: None,
            phone_number: None,
            details: TransactionDetails::default(),
        }
    }

    pub fn p2p(source: WalletId, target: WalletId, amount: Decimal) -> Self {
        Self {
            source_wallet: Some(source),
            target_wallet: Some(target),
            ..Self::new(TransactionType::P2P, amount)
        }
    }

    pub fn merchant_payment(payer: WalletId, merchant: WalletId, amount: Decimal) -> Self {
        Self {
            source_wallet: Some(payer),
            target_wallet: Some(merchant),
            ..Self::new(TransactionType::MerchantPayment, amount)
        }
    }

    pub fn cash_in(target: WalletId, phone_number: PhoneNumber, amount: Decimal) -> Self {
        Self {
            target_wallet: Some(target),
            phone_number: Some(phone_number),
            ..Self::new(TransactionType::CashIn, amount)
        }
    }

    pub fn cash_out(source: WalletId, phone_number: PhoneNumber, amount: Decimal) -> Self {
        Self {
            source_wallet: Some(source),
            phone_number: Some(phone_number),
            ..Self::new(TransactionType::CashOut, amount)
        }
    }

    pub fn with_country(mut self, country: CountryId) -> Self {
        self.details.country = Some(country);
        self
    }

    pub fn with_payment_method_type(mut self, payment_method_type: PaymentMethodTypeId) -> Self {
        self.details.payment_method_type = Some(payment_method_type);
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.details.currency = Some(currency);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.details.notes = Some(notes.into());
        self
    }
}

/// Callback outcome reported by the external cash-in processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CashInOutcome {
    Succeeded { processor_reference: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy)]
enum JournalWrite {
    Insert,
    /// Compare-and-set against the status read before settlement.
    Update(TransactionStatus),
}

#[derive(Debug, Clone, Copy)]
enum Movement {
    Transfer {
        source: WalletId,
        target: WalletId,
        debit: Decimal,
        credit: Decimal,
    },
    Debit {
        source: WalletId,
        amount: Decimal,
    },
    Credit {
        target: WalletId,
        amount: Decimal,
    },
}

/// Builds an [`Engine`] with non-default collaborators.
pub struct EngineBuilder {
    global_currency: Currency,
    settings: EngineSettings,
    hasher: PaymentCodeHasher,
    fee_cache: Option<FeeCache>,
    journal: Option<Arc<dyn TransactionJournal>>,
}

impl EngineBuilder {
    /// Currency of the global platform pool.
    pub fn global_currency(mut self, currency: Currency) -> Self {
        self.global_currency = currency;
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn payment_code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.hasher = PaymentCodeHasher::new(prefix);
        self
    }

    pub fn fee_cache(mut self, cache: FeeCache) -> Self {
        self.fee_cache = Some(cache);
        self
    }

    pub fn journal(mut self, journal: Arc<dyn TransactionJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn build(self) -> Engine {
        let fees = Arc::new(FeeSchedule::new());
        let cache = Arc::new(self.fee_cache.unwrap_or_default());
        fees.subscribe(cache.clone());
        let resolver = FeeResolver::new(fees.clone(), cache);
        let journal = self
            .journal
            .unwrap_or_else(|| Arc::new(TransactionLog::new()));

        Engine {
            wallets: WalletLedger::new(),
            platform: PlatformFeeCollector::new(self.global_currency),
            fees,
            resolver,
            payment_methods: PaymentMethodTypes::new(),
            journal,
            hasher: self.hasher,
            settings: self.settings,
        }
    }
}

/// Transaction orchestrator.
///
/// Thread-safe: operations on disjoint wallets run in parallel, operations
/// sharing a wallet serialize on that wallet's lock.
pub struct Engine {
    wallets: WalletLedger,
    platform: PlatformFeeCollector,
    fees: Arc<FeeSchedule>,
    resolver: FeeResolver,
    payment_methods: PaymentMethodTypes,
    journal: Arc<dyn TransactionJournal>,
    hasher: PaymentCodeHasher,
    settings: EngineSettings,
}

impl Engine {
    /// Creates an engine with a USD global pool, an in-memory journal and
    /// default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            global_currency: Currency::new("USD"),
            settings: EngineSettings::default(),
            hasher: PaymentCodeHasher::default(),
            fee_cache: None,
            journal: None,
        }
    }

    pub fn wallets(&self) -> &WalletLedger {
        &self.wallets
    }

    pub fn platform(&self) -> &PlatformFeeCollector {
        &self.platform
    }

    /// Fee configuration. Writes invalidate the resolver cache.
    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn fee_resolver(&self) -> &FeeResolver {
        &self.resolver
    }

    pub fn payment_methods(&self) -> &PaymentMethodTypes {
        &self.payment_methods
    }

    pub fn payment_codes(&self) -> &PaymentCodeHasher {
        &self.hasher
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn transaction(&self, reference: &str) -> Option<Transaction> {
        self.journal.get(reference)
    }

    /// Looks a transaction up by payment code.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::InvalidPaymentCode`] - wrong prefix, unknown type,
    ///   or a code that is not the stored record's own code.
    /// - [`TransactionError::TransactionNotFound`] - well-formed but unknown.
    pub fn find_by_payment_code(&self, payment_code: &str) -> Result<Transaction, TransactionError> {
        if !self.hasher.is_valid(payment_code) {
            return Err(TransactionError::InvalidPaymentCode);
        }
        let transaction = self
            .journal
            .find_by_payment_code(payment_code)
            .ok_or(TransactionError::TransactionNotFound)?;
        if !self
            .hasher
            .verify_for(&transaction.reference, transaction.transaction_type, payment_code)
        {
            return Err(TransactionError::InvalidPaymentCode);
        }
        Ok(transaction)
    }

    /// Every transaction, oldest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.journal.transactions()
    }

    /// Validates, prices and settles a transaction with both parties known.
    ///
    /// Nothing is recorded unless the whole operation succeeds.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::InvalidAmount`] - amount not positive, too precise,
    ///   or too large to price.
    /// - [`TransactionError::WalletNotFound`] / [`TransactionError::TargetWalletNotFound`].
    /// - [`TransactionError::InsufficientFunds`] - payer cannot cover the charged amount.
    /// - [`TransactionError::Processing`] - the journal write failed.
    pub fn process(&self, request: TransactionRequest) -> Result<Transaction, TransactionError> {
        let result = self.prepare(&request, TransactionStatus::Pending).and_then(|mut transaction| {
            self.price(&mut transaction)?;
            self.settle(transaction, JournalWrite::Insert)
        });
        log_settlement(request.transaction_type, &result);
        result
    }

    /// Records a P2P request from the receiving wallet. The payer joins
    /// later through [`Engine::pair`] with the returned payment code.
    pub fn create_p2p(
        &self,
        target: WalletId,
        amount: Decimal,
        details: TransactionDetails,
    ) -> Result<Transaction, TransactionError> {
        let request = TransactionRequest {
            target_wallet: Some(target),
            details,
            ..TransactionRequest::new(TransactionType::P2P, amount)
        };
        let mut transaction = self.prepare(&request, TransactionStatus::Initiated)?;
        self.record(&mut transaction)?;
        Ok(transaction)
    }

    /// Attaches the payer to an `INITIATED` transaction and freezes its fee.
    ///
    /// A payer that cannot cover the charged amount is rejected and the
    /// record stays `INITIATED`.
    pub fn pair(&self, payment_code: &str, payer: WalletId) -> Result<Transaction, TransactionError> {
        let mut transaction = self.find_by_payment_code(payment_code)?;
        if transaction.status != TransactionStatus::Initiated || transaction.source_wallet.is_some() {
            return Err(TransactionError::InvalidStatusTransition {
                from: transaction.status,
                to: TransactionStatus::Pending,
            });
        }
        if transaction.target_wallet == Some(payer) {
            return Err(TransactionError::SameWallet);
        }
        let currency = self.active_wallet_currency(payer, TransactionError::WalletNotFound)?;
        if currency != transaction.currency {
            return Err(TransactionError::CurrencyMismatch);
        }

        transaction.source_wallet = Some(payer);
        self.price(&mut transaction)?;
        self.check_funds(&transaction)?;
        transaction.transition(TransactionStatus::Pending)?;
        self.journal
            .update(transaction.clone(), TransactionStatus::Initiated)
            .map_err(|err| journal_error(err, TransactionStatus::Pending))?;

        info!(reference = %transaction.reference, payer = %payer, "transaction paired");
        Ok(transaction)
    }

    /// Records a merchant payment with both parties known, fee frozen.
    pub fn create_merchant_payment(
        &self,
        payer: WalletId,
        merchant: WalletId,
        amount: Decimal,
        details: TransactionDetails,
    ) -> Result<Transaction, TransactionError> {
        let request = TransactionRequest {
            details,
            ..TransactionRequest::merchant_payment(payer, merchant, amount)
        };
        self.create_pending(&request)
    }

    /// Records a withdrawal to an external phone number, fee frozen.
    pub fn create_cash_out(
        &self,
        source: WalletId,
        phone_number: PhoneNumber,
        amount: Decimal,
        details: TransactionDetails,
    ) -> Result<Transaction, TransactionError> {
        let request = TransactionRequest {
            details,
            ..TransactionRequest::cash_out(source, phone_number, amount)
        };
        self.create_pending(&request)
    }

    /// Records a top-up awaiting the external processor's callback.
    pub fn create_cash_in(
        &self,
        target: WalletId,
        phone_number: PhoneNumber,
        amount: Decimal,
        details: TransactionDetails,
    ) -> Result<Transaction, TransactionError> {
        let request = TransactionRequest {
            details,
            ..TransactionRequest::cash_in(target, phone_number, amount)
        };
        self.create_pending(&request)
    }

    /// Settles a `PENDING` P2P, merchant payment or cash-out.
    ///
    /// Client errors leave the record `PENDING` so it can be retried; a
    /// processing failure moves it to `FAILED`.
    pub fn confirm(&self, reference: &str) -> Result<Transaction, TransactionError> {
        let transaction = self
            .transaction(reference)
            .ok_or(TransactionError::TransactionNotFound)?;
        if transaction.transaction_type == TransactionType::CashIn {
            return Err(TransactionError::TransactionNotAllowed);
        }
        self.complete(transaction)
    }

    /// Applies the cash-in processor callback.
    pub fn settle_cash_in(
        &self,
        reference: &str,
        outcome: CashInOutcome,
    ) -> Result<Transaction, TransactionError> {
        let mut transaction = self
            .transaction(reference)
            .ok_or(TransactionError::TransactionNotFound)?;
        if transaction.transaction_type != TransactionType::CashIn {
            return Err(TransactionError::TransactionNotAllowed);
        }
        match outcome {
            CashInOutcome::Succeeded {
                processor_reference,
            } => {
                transaction.append_note(format!("processor reference: {processor_reference}"));
                self.complete(transaction)
            }
            CashInOutcome::Failed { reason } => {
                self.terminate(transaction, TransactionStatus::Failed, Some(reason))
            }
        }
    }

    pub fn cancel(&self, reference: &str) -> Result<Transaction, TransactionError> {
        let transaction = self
            .transaction(reference)
            .ok_or(TransactionError::TransactionNotFound)?;
        self.terminate(transaction, TransactionStatus::Cancelled, None)
    }

    pub fn fail(&self, reference: &str, reason: &str) -> Result<Transaction, TransactionError> {
        let transaction = self
            .transaction(reference)
            .ok_or(TransactionError::TransactionNotFound)?;
        self.terminate(transaction, TransactionStatus::Failed, Some(reason.to_string()))
    }

    fn create_pending(&self, request: &TransactionRequest) -> Result<Transaction, TransactionError> {
        let mut transaction = self.prepare(request, TransactionStatus::Pending)?;
        self.price(&mut transaction)?;
        if transaction.source_wallet.is_some() {
            self.check_funds(&transaction)?;
        }
        self.record(&mut transaction)?;
        Ok(transaction)
    }

    /// Validates a request and builds its unpriced record.
    fn prepare(
        &self,
        request: &TransactionRequest,
        status: TransactionStatus,
    ) -> Result<Transaction, TransactionError> {
        let transaction_type = request.transaction_type;
        if request.amount <= Decimal::ZERO {
            return Err(TransactionError::InvalidAmount);
        }

        let source = request
            .source_wallet
            .filter(|_| transaction_type.has_source_wallet());
        let target = request
            .target_wallet
            .filter(|_| transaction_type.has_target_wallet());
        // Only an INITIATED P2P may lack its payer.
        let payer_pending = status == TransactionStatus::Initiated;
        if transaction_type.has_source_wallet() && source.is_none() && !payer_pending {
            return Err(TransactionError::WalletNotFound);
        }
        if transaction_type.has_target_wallet() && target.is_none() {
            return Err(TransactionError::TargetWalletNotFound);
        }
        if source.is_some() && source == target {
            return Err(TransactionError::SameWallet);
        }

        let source_currency = source
            .map(|id| self.active_wallet_currency(id, TransactionError::WalletNotFound))
            .transpose()?;
        let target_currency = target
            .map(|id| self.active_wallet_currency(id, TransactionError::TargetWalletNotFound))
            .transpose()?;
        let currency = agree_on_currency(
            request.details.currency.as_ref(),
            [source_currency, target_currency],
        )?;
        let amount = validate_amount(request.amount, &currency)?;
        self.payment_methods
            .check_allowed(request.details.payment_method_type, transaction_type)?;

        let now = Utc::now();
        let mut transaction = Transaction {
            reference: String::new(),
            payment_code: String::new(),
            transaction_type,
            status,
            amount,
            calculated_fee: None,
            charged_amount: None,
            currency,
            country: request.details.country,
            payment_method_type: request.details.payment_method_type,
            fee_id: None,
            source_wallet: source,
            target_wallet: target,
            phone_number: request.phone_number.clone(),
            notes: request.details.notes.clone(),
            created_on: now,
            updated_on: now,
        };
        self.assign_reference(&mut transaction);
        Ok(transaction)
    }

    fn active_wallet_currency(
        &self,
        id: WalletId,
        missing: TransactionError,
    ) -> Result<Currency, TransactionError> {
        let wallet = self.wallets.wallet(id).ok_or(missing)?;
        if !wallet.is_active() {
            return Err(TransactionError::WalletInactive);
        }
        Ok(wallet.currency())
    }

    /// Resolves the fee and freezes it on the record.
    fn price(&self, transaction: &mut Transaction) -> Result<(), TransactionError> {
        let resolution = self.resolver.resolve(
            transaction.country,
            transaction.transaction_type,
            transaction.payment_method_type,
        );
        let breakdown =
            FeeCalculator::apply(transaction.amount, &resolution, &transaction.currency)?;
        transaction.freeze_fee(&breakdown, resolution.fee().map(|fee| fee.id))
    }

    /// Rejects a payer that cannot currently cover the charged amount.
    fn check_funds(&self, transaction: &Transaction) -> Result<(), TransactionError> {
        let Some(source) = transaction.source_wallet else {
            return Err(TransactionError::MissingCounterparty);
        };
        let charged = frozen_fee(transaction)?.1;
        self.wallets
            .with_wallet(source, TransactionError::WalletNotFound, |wallet| {
                wallet.check_debit(charged).map(|_| ())
            })
    }

    fn assign_reference(&self, transaction: &mut Transaction) {
        transaction.reference = make_reference(
            transaction.transaction_type,
            Utc::now(),
            &mut rand::thread_rng(),
        );
        transaction.payment_code = self
            .hasher
            .encode(&transaction.reference, transaction.transaction_type);
    }

    /// Inserts a new record, regenerating the reference on collision.
    fn record(&self, transaction: &mut Transaction) -> Result<(), TransactionError> {
        let attempts = self.settings.max_reference_attempts.max(1);
        for attempt in 1..=attempts {
            match self.journal.insert(transaction.clone()) {
                Ok(()) => {
                    debug!(reference = %transaction.reference, status = %transaction.status, "transaction recorded");
                    return Ok(());
                }
                Err(JournalError::DuplicateReference(_) | JournalError::DuplicatePaymentCode)
                    if attempt < attempts =>
                {
                    debug!(reference = %transaction.reference, attempt, "reference collision");
                    self.assign_reference(transaction);
                }
                Err(err) => return Err(journal_error(err, transaction.status)),
            }
        }
        Err(TransactionError::processing("no reference attempts configured"))
    }

    fn write(&self, transaction: &mut Transaction, write: JournalWrite) -> Result<(), TransactionError> {
        match write {
            JournalWrite::Insert => self.record(transaction),
            JournalWrite::Update(expected) => self
                .journal
                .update(transaction.clone(), expected)
                .map_err(|err| journal_error(err, transaction.status)),
        }
    }

    /// Settles a `PENDING` record that already exists in the journal.
    fn complete(&self, transaction: Transaction) -> Result<Transaction, TransactionError> {
        if transaction.status != TransactionStatus::Pending {
            return Err(TransactionError::InvalidStatusTransition {
                from: transaction.status,
                to: TransactionStatus::Completed,
            });
        }
        let reference = transaction.reference.clone();
        let transaction_type = transaction.transaction_type;
        let result = self.settle(transaction, JournalWrite::Update(TransactionStatus::Pending));
        if let Err(err) = &result {
            if !err.is_client_error() {
                self.mark_failed(&reference, err);
            }
        }
        log_settlement(transaction_type, &result);
        result
    }

    /// Moves money for a priced `PENDING` record and stores it `COMPLETED`.
    fn settle(&self, mut transaction: Transaction, write: JournalWrite) -> Result<Transaction, TransactionError> {
        let (movement, fee) = self.movement(&transaction)?;
        transaction.transition(TransactionStatus::Completed)?;
        let currency = transaction.currency.clone();

        match movement {
            Movement::Transfer {
                source,
                target,
                debit,
                credit,
            } => self.wallets.with_pair(source, target, |payer, payee| {
                ensure_currency(payer, &currency)?;
                ensure_currency(payee, &currency)?;
                let payer_balance = payer.check_debit(debit)?;
                let payee_balance = payee.check_credit(credit)?;
                self.commit(&mut transaction, write, fee, || {
                    payer.set_balance(payer_balance);
                    payee.set_balance(payee_balance);
                })
            })?,
            Movement::Debit { source, amount } => {
                self.wallets
                    .with_wallet(source, TransactionError::WalletNotFound, |wallet| {
                        ensure_currency(wallet, &currency)?;
                        let balance = wallet.check_debit(amount)?;
                        self.commit(&mut transaction, write, fee, || wallet.set_balance(balance))
                    })?
            }
            Movement::Credit { target, amount } => {
                self.wallets
                    .with_wallet(target, TransactionError::TargetWalletNotFound, |wallet| {
                        ensure_currency(wallet, &currency)?;
                        let balance = wallet.check_credit(amount)?;
                        self.commit(&mut transaction, write, fee, || wallet.set_balance(balance))
                    })?
            }
        }
        Ok(transaction)
    }

    /// Final step of a settlement, called with the wallet locks held: locks
    /// the pool, stages the fee, writes the record, then applies everything.
    fn commit(
        &self,
        transaction: &mut Transaction,
        write: JournalWrite,
        fee: Decimal,
        apply: impl FnOnce(),
    ) -> Result<(), TransactionError> {
        self.platform.with_pool(transaction.country, |pool| {
            let pool_balance = pool.check_collect(fee, &transaction.currency)?;
            self.write(transaction, write)?;
            apply();
            pool.set_balance(pool_balance);
            Ok(())
        })
    }

    /// Balance movements for a priced record, and the fee to collect.
    fn movement(&self, transaction: &Transaction) -> Result<(Movement, Decimal), TransactionError> {
        let (fee, charged) = frozen_fee(transaction)?;
        let movement = match transaction.transaction_type {
            TransactionType::P2P | TransactionType::MerchantPayment => {
                let source = transaction
                    .source_wallet
                    .ok_or(TransactionError::MissingCounterparty)?;
                let target = transaction
                    .target_wallet
                    .ok_or(TransactionError::TargetWalletNotFound)?;
                let credit = match self.settings.recipient_credit {
                    RecipientCredit::ChargedAmount => charged,
                    RecipientCredit::NominalAmount => transaction.amount,
                };
                Movement::Transfer {
                    source,
                    target,
                    debit: charged,
                    credit,
                }
            }
            // The fee is paid on top by the external funding source.
            TransactionType::CashIn => Movement::Credit {
                target: transaction
                    .target_wallet
                    .ok_or(TransactionError::TargetWalletNotFound)?,
                amount: transaction.amount,
            },
            TransactionType::CashOut => Movement::Debit {
                source: transaction
                    .source_wallet
                    .ok_or(TransactionError::WalletNotFound)?,
                amount: charged,
            },
        };
        Ok((movement, fee))
    }

    fn terminate(
        &self,
        mut transaction: Transaction,
        status: TransactionStatus,
        note: Option<String>,
    ) -> Result<Transaction, TransactionError> {
        let expected = transaction.status;
        transaction.transition(status)?;
        if let Some(note) = note {
            transaction.append_note(note);
        }
        self.journal
            .update(transaction.clone(), expected)
            .map_err(|err| journal_error(err, status))?;
        info!(reference = %transaction.reference, %status, "transaction closed");
        Ok(transaction)
    }

    fn mark_failed(&self, reference: &str, cause: &TransactionError) {
        let Some(mut transaction) = self.transaction(reference) else {
            return;
        };
        if transaction.status != TransactionStatus::Pending {
            return;
        }
        if transaction.transition(TransactionStatus::Failed).is_err() {
            return;
        }
        transaction.append_note(format!("settlement failed: {}", cause.detail().unwrap_or("unknown")));
        if let Err(err) = self.journal.update(transaction, TransactionStatus::Pending) {
            error!(%reference, error = %err, "could not mark transaction failed");
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn frozen_fee(transaction: &Transaction) -> Result<(Decimal, Decimal), TransactionError> {
    transaction
        .fee_breakdown()
        .map(|breakdown| (breakdown.calculated_fee, breakdown.charged_amount))
        .ok_or_else(|| {
            TransactionError::processing(format!("fee not frozen on {}", transaction.reference))
        })
}

fn ensure_currency(wallet: &WalletData, currency: &Currency) -> Result<(), TransactionError> {
    if wallet.currency() == currency {
        Ok(())
    } else {
        debug!(wallet = %wallet.id(), "currency mismatch at settlement");
        Err(TransactionError::CurrencyMismatch)
    }
}

/// The currency every party agrees on, or `CurrencyMismatch`.
fn agree_on_currency(
    requested: Option<&Currency>,
    wallets: [Option<Currency>; 2],
) -> Result<Currency, TransactionError> {
    let mut agreed = requested.cloned();
    for currency in wallets.into_iter().flatten() {
        match &agreed {
            Some(existing) if *existing != currency => {
                return Err(TransactionError::CurrencyMismatch);
            }
            Some(_) => {}
            None => agreed = Some(currency),
        }
    }
    agreed.ok_or(TransactionError::WalletNotFound)
}

fn journal_error(err: JournalError, to: TransactionStatus) -> TransactionError {
    match err {
        JournalError::StatusConflict { actual, .. } => {
            TransactionError::InvalidStatusTransition { from: actual, to }
        }
        JournalError::NotFound(_) => TransactionError::TransactionNotFound,
        other => TransactionError::processing(other.to_string()),
    }
}

fn log_settlement(transaction_type: TransactionType, result: &Result<Transaction, TransactionError>) {
    match result {
        Ok(transaction) => info!(
            reference = %transaction.reference,
            %transaction_type,
            amount = %transaction.amount,
            fee = ?transaction.calculated_fee,
            charged = ?transaction.charged_amount,
            "transaction completed"
        ),
        Err(err) if err.is_client_error() => {
            warn!(%transaction_type, code = err.code(), "transaction rejected")
        }
        Err(err) => error!(
            %transaction_type,
            detail = err.detail().unwrap_or_default(),
            "transaction processing failed"
        ),
    }
}
