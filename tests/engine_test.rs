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

//! Engine public API integration tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use vulipay_ledger::money::parse_amount;
use vulipay_ledger::{
    CashInOutcome, CountryId, Currency, Engine, EngineSettings, FeeId, FeeResolution, FeeRule,
    JournalError, PaymentMethodType, PaymentMethodTypeId, PhoneNumber, RecipientCredit,
    Transaction, TransactionDetails, TransactionError, TransactionFee, TransactionJournal,
    TransactionLog, TransactionRequest, TransactionStatus, TransactionType, UserId, WalletId,
};

fn usd() -> Currency {
    Currency::new("USD")
}

fn phone() -> PhoneNumber {
    PhoneNumber::new("+243810000000")
}

fn make_fee(id: u32, transaction_type: TransactionType, rule: FeeRule) -> TransactionFee {
    TransactionFee {
        id: FeeId(id),
        name: format!("{transaction_type} fee"),
        transaction_type,
        country: None,
        payment_method_type: None,
        rule,
    }
}

/// Opens a main wallet for `user` and funds it.
fn open_funded(engine: &Engine, user: u32, balance: Decimal) -> WalletId {
    let id = engine.wallets().open_main_wallet(UserId(user), usd()).unwrap();
    if balance > Decimal::ZERO {
        engine.wallets().credit(id, balance).unwrap();
    }
    id
}

/// Engine with wallets A (1000) and B (0) and a 2.5% P2P fee.
fn scenario_engine(mode: RecipientCredit) -> (Engine, WalletId, WalletId) {
    let engine = Engine::builder()
        .settings(EngineSettings {
            recipient_credit: mode,
            ..EngineSettings::default()
        })
        .build();
    let a = open_funded(&engine, 1, dec!(1000));
    let b = open_funded(&engine, 2, Decimal::ZERO);
    engine
        .fees()
        .insert(make_fee(1, TransactionType::P2P, FeeRule::Percentage(dec!(2.5))))
        .unwrap();
    (engine, a, b)
}

fn balance(engine: &Engine, id: WalletId) -> Decimal {
    engine.wallets().balance(id).unwrap()
}

fn global_pool(engine: &Engine) -> Decimal {
    engine.platform().balance(None).unwrap()
}

// === End-to-end scenarios ===

#[test]
fn p2p_with_percentage_fee_credits_charged_amount() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);

    let tx = engine.process(TransactionRequest::p2p(a, b, dec!(100))).unwrap();

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.calculated_fee, Some(dec!(2.50)));
    assert_eq!(tx.charged_amount, Some(dec!(102.50)));
    assert_eq!(tx.fee_id, Some(FeeId(1)));
    assert_eq!(balance(&engine, a), dec!(897.50));
    assert_eq!(balance(&engine, b), dec!(102.50));
    assert_eq!(global_pool(&engine), dec!(2.50));
    assert_eq!(engine.transaction(&tx.reference), Some(tx));
}

#[test]
fn insufficient_funds_leaves_no_trace() {
    let engine = Engine::new();
    let a = open_funded(&engine, 1, dec!(50));
    let b = open_funded(&engine, 2, Decimal::ZERO);

    let result = engine.process(TransactionRequest::p2p(a, b, dec!(100)));

    assert_eq!(result, Err(TransactionError::InsufficientFunds));
    assert_eq!(balance(&engine, a), dec!(50));
    assert_eq!(balance(&engine, b), Decimal::ZERO);
    assert!(engine.transactions().is_empty());
}

#[test]
fn fee_on_top_can_exceed_balance() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);
    engine.wallets().debit(a, dec!(900)).unwrap();

    // 100 nominal + 2.50 fee > 100 available
    assert_eq!(
        engine.process(TransactionRequest::p2p(a, b, dec!(100))),
        Err(TransactionError::InsufficientFunds)
    );
    assert_eq!(balance(&engine, a), dec!(100));
}

#[test]
fn unconfigured_fee_charges_nothing() {
    let engine = Engine::new();
    let target = open_funded(&engine, 1, Decimal::ZERO);

    assert_eq!(
        engine
            .fee_resolver()
            .resolve(Some(CountryId(1)), TransactionType::CashIn, None),
        FeeResolution::NotConfigured
    );

    let tx = engine
        .process(TransactionRequest::cash_in(target, phone(), dec!(40)).with_country(CountryId(1)))
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.calculated_fee, Some(Decimal::ZERO));
    assert_eq!(tx.charged_amount, Some(dec!(40)));
    assert_eq!(tx.fee_id, None);
    assert_eq!(balance(&engine, target), dec!(40));
    assert_eq!(engine.platform().total_balance(), Decimal::ZERO);
}

#[test]
fn nominal_credit_conserves_money() {
    let (engine, a, b) = scenario_engine(RecipientCredit::NominalAmount);

    engine.process(TransactionRequest::p2p(a, b, dec!(100))).unwrap();

    assert_eq!(balance(&engine, a), dec!(897.50));
    assert_eq!(balance(&engine, b), dec!(100));
    assert_eq!(global_pool(&engine), dec!(2.50));
    assert_eq!(
        engine.wallets().total_balance() + engine.platform().total_balance(),
        dec!(1000)
    );
}

#[test]
fn country_fee_lands_in_country_pool() {
    let (engine, a, b) = scenario_engine(RecipientCredit::NominalAmount);
    let congo = CountryId(243);
    engine.platform().open_pool(congo, usd()).unwrap();
    engine
        .fees()
        .insert(TransactionFee {
            country: Some(congo),
            ..make_fee(2, TransactionType::P2P, FeeRule::Fixed(dec!(1.00)))
        })
        .unwrap();

    let tx = engine
        .process(TransactionRequest::p2p(a, b, dec!(100)).with_country(congo))
        .unwrap();

    assert_eq!(tx.calculated_fee, Some(dec!(1.00)));
    assert_eq!(tx.fee_id, Some(FeeId(2)));
    assert_eq!(engine.platform().balance(Some(congo)), Some(dec!(1.00)));
    assert_eq!(global_pool(&engine), Decimal::ZERO);
}

#[test]
fn country_without_pool_falls_back_to_global() {
    let (engine, a, b) = scenario_engine(RecipientCredit::NominalAmount);

    engine
        .process(TransactionRequest::p2p(a, b, dec!(100)).with_country(CountryId(7)))
        .unwrap();

    assert_eq!(engine.platform().balance(Some(CountryId(7))), None);
    assert_eq!(global_pool(&engine), dec!(2.50));
}

#[test]
fn cash_out_debits_charged_amount() {
    let engine = Engine::new();
    let source = open_funded(&engine, 1, dec!(1000));
    engine
        .fees()
        .insert(make_fee(1, TransactionType::CashOut, FeeRule::Percentage(dec!(2))))
        .unwrap();

    let tx = engine
        .process(TransactionRequest::cash_out(source, phone(), dec!(100)))
        .unwrap();

    assert_eq!(tx.charged_amount, Some(dec!(102)));
    assert_eq!(tx.phone_number, Some(phone()));
    assert_eq!(tx.target_wallet, None);
    assert_eq!(balance(&engine, source), dec!(898));
    assert_eq!(global_pool(&engine), dec!(2));
}

#[test]
fn fee_change_applies_to_next_transaction() {
    let (engine, a, b) = scenario_engine(RecipientCredit::NominalAmount);
    let first = engine.process(TransactionRequest::p2p(a, b, dec!(100))).unwrap();

    engine
        .fees()
        .update(make_fee(1, TransactionType::P2P, FeeRule::Fixed(dec!(1))))
        .unwrap();
    let second = engine.process(TransactionRequest::p2p(a, b, dec!(100))).unwrap();

    assert_eq!(first.calculated_fee, Some(dec!(2.50)));
    assert_eq!(second.calculated_fee, Some(dec!(1)));
}

// === Validation ===

#[test]
fn rejects_invalid_amounts() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);

    for amount in [Decimal::ZERO, dec!(-5), dec!(10.005)] {
        assert_eq!(
            engine.process(TransactionRequest::p2p(a, b, amount)),
            Err(TransactionError::InvalidAmount)
        );
    }
    assert!(engine.transactions().is_empty());
}

#[test]
fn amount_too_large_to_price_is_rejected() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);
    let amount = parse_amount("79228162514264337593543950335", &usd()).unwrap();

    assert_eq!(
        engine.process(TransactionRequest::p2p(a, b, amount)),
        Err(TransactionError::InvalidAmount)
    );
    assert_eq!(balance(&engine, a), dec!(1000));
    assert_eq!(balance(&engine, b), Decimal::ZERO);
    assert_eq!(global_pool(&engine), Decimal::ZERO);
    assert!(engine.transactions().is_empty());
}

#[test]
fn fixed_fee_is_charged_in_currency_units() {
    let engine = Engine::new();
    let a = open_funded(&engine, 1, dec!(1000));
    let b = open_funded(&engine, 2, Decimal::ZERO);
    engine
        .fees()
        .insert(make_fee(1, TransactionType::P2P, FeeRule::Fixed(dec!(0.125))))
        .unwrap();

    let tx = engine.process(TransactionRequest::p2p(a, b, dec!(100))).unwrap();

    assert_eq!(tx.calculated_fee, Some(dec!(0.13)));
    assert_eq!(tx.charged_amount, Some(dec!(100.13)));
    assert_eq!(balance(&engine, a), dec!(899.87));
    assert_eq!(balance(&engine, b), dec!(100.13));
    assert_eq!(global_pool(&engine), dec!(0.13));
}

#[test]
fn rejects_missing_and_identical_wallets() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);

    assert_eq!(
        engine.process(TransactionRequest::p2p(WalletId(99), b, dec!(1))),
        Err(TransactionError::WalletNotFound)
    );
    assert_eq!(
        engine.process(TransactionRequest::p2p(a, WalletId(99), dec!(1))),
        Err(TransactionError::TargetWalletNotFound)
    );
    assert_eq!(
        engine.process(TransactionRequest::p2p(a, a, dec!(1))),
        Err(TransactionError::SameWallet)
    );
    assert_eq!(
        engine.process(TransactionRequest::new(TransactionType::P2P, dec!(1))),
        Err(TransactionError::WalletNotFound)
    );
}

#[test]
fn rejects_inactive_wallets() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);
    engine.wallets().deactivate(b).unwrap();

    assert_eq!(
        engine.process(TransactionRequest::p2p(a, b, dec!(10))),
        Err(TransactionError::WalletInactive)
    );

    engine.wallets().activate(b).unwrap();
    assert!(engine.process(TransactionRequest::p2p(a, b, dec!(10))).is_ok());
}

#[test]
fn rejects_currency_mismatch() {
    let engine = Engine::new();
    let dollars = open_funded(&engine, 1, dec!(100));
    let francs = engine
        .wallets()
        .open_main_wallet(UserId(2), Currency::new("CDF"))
        .unwrap();

    assert_eq!(
        engine.process(TransactionRequest::p2p(dollars, francs, dec!(10))),
        Err(TransactionError::CurrencyMismatch)
    );

    let other = open_funded(&engine, 3, Decimal::ZERO);
    assert_eq!(
        engine.process(
            TransactionRequest::p2p(dollars, other, dec!(10)).with_currency(Currency::new("EUR"))
        ),
        Err(TransactionError::CurrencyMismatch)
    );
    assert_eq!(balance(&engine, dollars), dec!(100));
}

#[test]
fn payment_method_restricts_transaction_types() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);
    engine.payment_methods().register(PaymentMethodType {
        id: PaymentMethodTypeId(7),
        name: "Mobile money".to_string(),
        code: "MOMO".to_string(),
        country: None,
        allowed_transactions: Some(vec![TransactionType::CashIn, TransactionType::CashOut]),
    });

    assert_eq!(
        engine.process(
            TransactionRequest::p2p(a, b, dec!(10)).with_payment_method_type(PaymentMethodTypeId(7))
        ),
        Err(TransactionError::TransactionNotAllowed)
    );
    assert_eq!(
        engine.process(
            TransactionRequest::p2p(a, b, dec!(10)).with_payment_method_type(PaymentMethodTypeId(8))
        ),
        Err(TransactionError::UnknownPaymentMethodType)
    );
    assert!(
        engine
            .process(
                TransactionRequest::cash_out(a, phone(), dec!(10))
                    .with_payment_method_type(PaymentMethodTypeId(7))
            )
            .is_ok()
    );
}

// === Two-phase flows ===

#[test]
fn p2p_request_pair_confirm() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);

    let requested = engine
        .create_p2p(b, dec!(100), TransactionDetails::default())
        .unwrap();
    assert_eq!(requested.status, TransactionStatus::Initiated);
    assert_eq!(requested.source_wallet, None);
    assert_eq!(requested.calculated_fee, None);
    assert_eq!(
        engine.find_by_payment_code(&requested.payment_code).unwrap(),
        requested
    );

    let paired = engine.pair(&requested.payment_code, a).unwrap();
    assert_eq!(paired.status, TransactionStatus::Pending);
    assert_eq!(paired.source_wallet, Some(a));
    assert_eq!(paired.calculated_fee, Some(dec!(2.50)));
    assert_eq!(balance(&engine, a), dec!(1000));

    let completed = engine.confirm(&requested.reference).unwrap();
    assert_eq!(completed.status, TransactionStatus::Completed);
    assert_eq!(balance(&engine, a), dec!(897.50));
    assert_eq!(balance(&engine, b), dec!(102.50));
    assert_eq!(global_pool(&engine), dec!(2.50));

    assert_eq!(
        engine.confirm(&requested.reference),
        Err(TransactionError::InvalidStatusTransition {
            from: TransactionStatus::Completed,
            to: TransactionStatus::Completed,
        })
    );
    assert_eq!(balance(&engine, a), dec!(897.50));
}

#[test]
fn pair_without_funds_keeps_request_open() {
    let (engine, _, b) = scenario_engine(RecipientCredit::ChargedAmount);
    let poor = open_funded(&engine, 3, dec!(50));
    let rich = open_funded(&engine, 4, dec!(500));
    let requested = engine
        .create_p2p(b, dec!(100), TransactionDetails::default())
        .unwrap();

    assert_eq!(
        engine.pair(&requested.payment_code, poor),
        Err(TransactionError::InsufficientFunds)
    );
    let stored = engine.transaction(&requested.reference).unwrap();
    assert_eq!(stored.status, TransactionStatus::Initiated);
    assert_eq!(stored.source_wallet, None);
    assert_eq!(stored.calculated_fee, None);

    let paired = engine.pair(&requested.payment_code, rich).unwrap();
    assert_eq!(paired.source_wallet, Some(rich));
}

#[test]
fn pair_rejects_payee_and_second_payer() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);
    let requested = engine
        .create_p2p(b, dec!(10), TransactionDetails::default())
        .unwrap();

    assert_eq!(
        engine.pair(&requested.payment_code, b),
        Err(TransactionError::SameWallet)
    );
    engine.pair(&requested.payment_code, a).unwrap();
    assert_eq!(
        engine.pair(&requested.payment_code, a),
        Err(TransactionError::InvalidStatusTransition {
            from: TransactionStatus::Pending,
            to: TransactionStatus::Pending,
        })
    );
}

#[test]
fn confirm_before_pairing_is_rejected() {
    let (engine, _, b) = scenario_engine(RecipientCredit::ChargedAmount);
    let requested = engine
        .create_p2p(b, dec!(10), TransactionDetails::default())
        .unwrap();

    assert_eq!(
        engine.confirm(&requested.reference),
        Err(TransactionError::InvalidStatusTransition {
            from: TransactionStatus::Initiated,
            to: TransactionStatus::Completed,
        })
    );
}

#[test]
fn payment_code_lookup_errors() {
    let (engine, _, b) = scenario_engine(RecipientCredit::ChargedAmount);
    engine
        .create_p2p(b, dec!(10), TransactionDetails::default())
        .unwrap();

    assert_eq!(
        engine.find_by_payment_code("not-a-code"),
        Err(TransactionError::InvalidPaymentCode)
    );
    assert_eq!(
        engine.find_by_payment_code("other$P2P$ABCDEF"),
        Err(TransactionError::InvalidPaymentCode)
    );
    let unknown = engine
        .payment_codes()
        .encode("P2P.BA0000.1", TransactionType::P2P);
    assert_eq!(
        engine.find_by_payment_code(&unknown),
        Err(TransactionError::TransactionNotFound)
    );
}

/// Journal that indexes payment codes by their hash segment only.
#[derive(Default)]
struct DigestIndexedJournal {
    inner: TransactionLog,
}

impl TransactionJournal for DigestIndexedJournal {
    fn insert(&self, transaction: Transaction) -> Result<(), JournalError> {
        self.inner.insert(transaction)
    }

    fn update(
        &self,
        transaction: Transaction,
        expected: TransactionStatus,
    ) -> Result<(), JournalError> {
        self.inner.update(transaction, expected)
    }

    fn get(&self, reference: &str) -> Option<Transaction> {
        self.inner.get(reference)
    }

    fn find_by_payment_code(&self, payment_code: &str) -> Option<Transaction> {
        let digest = payment_code.rsplit('$').next()?;
        self.inner
            .transactions()
            .into_iter()
            .find(|tx| tx.payment_code.ends_with(digest))
    }

    fn transactions(&self) -> Vec<Transaction> {
        self.inner.transactions()
    }
}

#[test]
fn payment_code_must_carry_the_record_type() {
    let engine = Engine::builder()
        .journal(Arc::new(DigestIndexedJournal::default()))
        .build();
    let b = open_funded(&engine, 2, Decimal::ZERO);
    let request = engine
        .create_p2p(b, dec!(10), TransactionDetails::default())
        .unwrap();

    assert_eq!(
        engine.find_by_payment_code(&request.payment_code),
        Ok(request.clone())
    );
    let relabelled = request.payment_code.replacen("$P2P$", "$CO$", 1);
    assert_ne!(relabelled, request.payment_code);
    assert_eq!(
        engine.find_by_payment_code(&relabelled),
        Err(TransactionError::InvalidPaymentCode)
    );
}

#[test]
fn merchant_payment_uses_frozen_fee() {
    let engine = Engine::new();
    let payer = open_funded(&engine, 1, dec!(500));
    let merchant = engine
        .wallets()
        .open_wallet(UserId(2), vulipay_ledger::WalletType::Business, usd())
        .unwrap();
    engine
        .fees()
        .insert(make_fee(1, TransactionType::MerchantPayment, FeeRule::Percentage(dec!(1))))
        .unwrap();

    let pending = engine
        .create_merchant_payment(payer, merchant, dec!(200), TransactionDetails::default())
        .unwrap();
    assert_eq!(pending.status, TransactionStatus::Pending);
    assert_eq!(pending.calculated_fee, Some(dec!(2)));

    engine
        .fees()
        .update(make_fee(1, TransactionType::MerchantPayment, FeeRule::Percentage(dec!(5))))
        .unwrap();
    let completed = engine.confirm(&pending.reference).unwrap();

    assert_eq!(completed.calculated_fee, Some(dec!(2)));
    assert_eq!(balance(&engine, payer), dec!(298));
    assert_eq!(balance(&engine, merchant), dec!(202));
    assert_eq!(global_pool(&engine), dec!(2));
}

#[test]
fn confirm_rechecks_funds() {
    let engine = Engine::new();
    let payer = open_funded(&engine, 1, dec!(100));
    let merchant = open_funded(&engine, 2, Decimal::ZERO);
    let pending = engine
        .create_merchant_payment(payer, merchant, dec!(80), TransactionDetails::default())
        .unwrap();

    engine.wallets().debit(payer, dec!(50)).unwrap();

    assert_eq!(
        engine.confirm(&pending.reference),
        Err(TransactionError::InsufficientFunds)
    );
    assert_eq!(
        engine.transaction(&pending.reference).unwrap().status,
        TransactionStatus::Pending
    );
    assert_eq!(balance(&engine, merchant), Decimal::ZERO);
}

#[test]
fn cash_in_settles_on_processor_success() {
    let engine = Engine::new();
    let target = open_funded(&engine, 1, Decimal::ZERO);
    engine
        .fees()
        .insert(make_fee(1, TransactionType::CashIn, FeeRule::Fixed(dec!(1))))
        .unwrap();

    let pending = engine
        .create_cash_in(target, phone(), dec!(100), TransactionDetails::default())
        .unwrap();
    assert_eq!(pending.charged_amount, Some(dec!(101)));
    assert_eq!(
        engine.confirm(&pending.reference),
        Err(TransactionError::TransactionNotAllowed)
    );

    let completed = engine
        .settle_cash_in(
            &pending.reference,
            CashInOutcome::Succeeded {
                processor_reference: "PR-1".to_string(),
            },
        )
        .unwrap();

    assert_eq!(completed.status, TransactionStatus::Completed);
    assert!(completed.notes.unwrap().contains("processor reference: PR-1"));
    assert_eq!(balance(&engine, target), dec!(100));
    assert_eq!(global_pool(&engine), dec!(1));
}

#[test]
fn cash_in_processor_failure_moves_nothing() {
    let engine = Engine::new();
    let target = open_funded(&engine, 1, Decimal::ZERO);
    let pending = engine
        .create_cash_in(target, phone(), dec!(100), TransactionDetails::default())
        .unwrap();

    let failed = engine
        .settle_cash_in(
            &pending.reference,
            CashInOutcome::Failed {
                reason: "declined by operator".to_string(),
            },
        )
        .unwrap();

    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(failed.notes.as_deref(), Some("declined by operator"));
    assert_eq!(balance(&engine, target), Decimal::ZERO);
}

#[test]
fn cash_out_two_phase() {
    let engine = Engine::new();
    let source = open_funded(&engine, 1, dec!(100));
    let pending = engine
        .create_cash_out(source, phone(), dec!(60), TransactionDetails::default())
        .unwrap();
    assert_eq!(
        engine.settle_cash_in(
            &pending.reference,
            CashInOutcome::Succeeded {
                processor_reference: "PR-2".to_string(),
            },
        ),
        Err(TransactionError::TransactionNotAllowed)
    );

    engine.confirm(&pending.reference).unwrap();
    assert_eq!(balance(&engine, source), dec!(40));
}

#[test]
fn cancel_and_fail_are_terminal() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);
    let first = engine
        .create_merchant_payment(a, b, dec!(10), TransactionDetails::default())
        .unwrap();
    let second = engine
        .create_merchant_payment(a, b, dec!(10), TransactionDetails::default())
        .unwrap();

    let cancelled = engine.cancel(&first.reference).unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
    assert_eq!(
        engine.confirm(&first.reference),
        Err(TransactionError::InvalidStatusTransition {
            from: TransactionStatus::Cancelled,
            to: TransactionStatus::Completed,
        })
    );

    let failed = engine.fail(&second.reference, "payer disputed").unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(failed.notes.as_deref(), Some("payer disputed"));
    assert_eq!(
        engine.cancel(&second.reference),
        Err(TransactionError::InvalidStatusTransition {
            from: TransactionStatus::Failed,
            to: TransactionStatus::Cancelled,
        })
    );

    assert_eq!(balance(&engine, a), dec!(1000));
    assert_eq!(
        engine.cancel("P2P.BA0000.1"),
        Err(TransactionError::TransactionNotFound)
    );
}

#[test]
fn transactions_are_listed_oldest_first() {
    let (engine, a, b) = scenario_engine(RecipientCredit::ChargedAmount);
    let first = engine.process(TransactionRequest::p2p(a, b, dec!(1))).unwrap();
    let second = engine
        .create_p2p(a, dec!(2), TransactionDetails::default())
        .unwrap();

    let references: Vec<String> = engine
        .transactions()
        .into_iter()
        .map(|tx| tx.reference)
        .collect();
    assert_eq!(references, [first.reference, second.reference]);
}

// === Journal failures ===

/// Journal wrapper that fails a configurable number of writes.
#[derive(Default)]
struct FlakyJournal {
    inner: TransactionLog,
    failing_inserts: AtomicU32,
    colliding_inserts: AtomicU32,
    failing_updates: AtomicU32,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl TransactionJournal for FlakyJournal {
    fn insert(&self, transaction: Transaction) -> Result<(), JournalError> {
        if take(&self.failing_inserts) {
            return Err(JournalError::Unavailable("disk full".to_string()));
        }
        if take(&self.colliding_inserts) {
            return Err(JournalError::DuplicateReference(transaction.reference));
        }
        self.inner.insert(transaction)
    }

    fn update(
        &self,
        transaction: Transaction,
        expected: TransactionStatus,
    ) -> Result<(), JournalError> {
        if take(&self.failing_updates) {
            return Err(JournalError::Unavailable("disk full".to_string()));
        }
        self.inner.update(transaction, expected)
    }

    fn get(&self, reference: &str) -> Option<Transaction> {
        self.inner.get(reference)
    }

    fn find_by_payment_code(&self, payment_code: &str) -> Option<Transaction> {
        self.inner.find_by_payment_code(payment_code)
    }

    fn transactions(&self) -> Vec<Transaction> {
        self.inner.transactions()
    }
}

fn flaky_engine() -> (Engine, Arc<FlakyJournal>, WalletId, WalletId) {
    let journal = Arc::new(FlakyJournal::default());
    let engine = Engine::builder().journal(journal.clone()).build();
    let a = open_funded(&engine, 1, dec!(1000));
    let b = open_funded(&engine, 2, Decimal::ZERO);
    engine
        .fees()
        .insert(make_fee(1, TransactionType::P2P, FeeRule::Percentage(dec!(2.5))))
        .unwrap();
    (engine, journal, a, b)
}

#[test]
fn journal_failure_rolls_back_settlement() {
    let (engine, journal, a, b) = flaky_engine();
    journal.failing_inserts.store(1, Ordering::SeqCst);

    let err = engine
        .process(TransactionRequest::p2p(a, b, dec!(100)))
        .unwrap_err();

    assert!(matches!(err, TransactionError::Processing(_)));
    assert!(!err.is_client_error());
    assert_eq!(err.to_string(), "transaction processing failed");
    assert_eq!(balance(&engine, a), dec!(1000));
    assert_eq!(balance(&engine, b), Decimal::ZERO);
    assert_eq!(global_pool(&engine), Decimal::ZERO);
    assert!(engine.transactions().is_empty());
}

#[test]
fn failed_confirmation_marks_record_failed() {
    let (engine, journal, a, b) = flaky_engine();
    let pending = engine
        .create_merchant_payment(a, b, dec!(100), TransactionDetails::default())
        .unwrap();
    journal.failing_updates.store(1, Ordering::SeqCst);

    let err = engine.confirm(&pending.reference).unwrap_err();

    assert!(matches!(err, TransactionError::Processing(_)));
    assert_eq!(balance(&engine, a), dec!(1000));
    assert_eq!(balance(&engine, b), Decimal::ZERO);
    let stored = engine.transaction(&pending.reference).unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert!(stored.notes.unwrap().starts_with("settlement failed"));
}

#[test]
fn reference_collision_is_retried() {
    let (engine, journal, a, b) = flaky_engine();
    journal.colliding_inserts.store(2, Ordering::SeqCst);

    let tx = engine.process(TransactionRequest::p2p(a, b, dec!(10))).unwrap();

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(engine.transactions().len(), 1);
    assert!(engine.payment_codes().verify(&tx.reference, &tx.payment_code));
}

#[test]
fn reference_collisions_give_up_after_limit() {
    let (engine, journal, a, b) = flaky_engine();
    let attempts = engine.settings().max_reference_attempts;
    journal.colliding_inserts.store(attempts, Ordering::SeqCst);

    let err = engine
        .process(TransactionRequest::p2p(a, b, dec!(10)))
        .unwrap_err();

    assert!(matches!(err, TransactionError::Processing(_)));
    assert_eq!(balance(&engine, a), dec!(1000));
    assert!(engine.transactions().is_empty());
}
