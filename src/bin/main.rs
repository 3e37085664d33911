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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use tracing::{info, warn};
use vulipay_ledger::logging::init_logging;
use vulipay_ledger::{
    AmountInput, CountryId, Currency, Engine, LedgerConfig, PaymentMethodTypeId, PhoneNumber,
    TransactionError, TransactionRequest, TransactionType, WalletId,
};

/// Vulipay Ledger - Settle transaction request CSV files
///
/// Seeds wallets, fees and platform pools from a YAML config, settles every
/// request in the CSV file and writes the resulting transactions, wallet
/// balances and platform pools to stdout.
#[derive(Parser, Debug)]
#[command(name = "vulipay-ledger")]
#[command(about = "Settles mobile-money transaction request CSVs", long_about = None)]
struct Args {
    /// YAML config with settings and seed data (defaults apply when omitted)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Path to CSV file with transaction requests
    ///
    /// Expected format: type,amount,source,target,country,payment_method_type,currency,phone,notes
    /// Example: cargo run -- --config ledger.yaml requests.csv > report.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match LedgerConfig::from_path(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => LedgerConfig::default(),
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    let engine = match config.build_engine() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error seeding ledger: {}", e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = process_requests(&engine, BufReader::new(file)) {
        eprintln!("Error processing requests: {}", e);
        process::exit(1);
    }

    if let Err(e) = write_report(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, amount, source, target, country, payment_method_type,
/// currency, phone, notes`. Every field after `amount` may be empty.
#[derive(Debug, serde::Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    tx_type: String,
    amount: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    source: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    target: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    country: Option<u16>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    payment_method_type: Option<u32>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

impl CsvRecord {
    /// Converts the record to a request. Amount precision is checked by the
    /// engine against the wallet currency.
    fn into_request(self) -> Result<TransactionRequest, TransactionError> {
        let transaction_type = TransactionType::from_str(&self.tx_type)?;
        let amount = AmountInput::Text(self.amount)
            .to_decimal()
            .ok_or(TransactionError::InvalidAmount)?;

        let mut request = TransactionRequest::new(transaction_type, amount);
        request.source_wallet = self.source.map(WalletId);
        request.target_wallet = self.target.map(WalletId);
        request.phone_number = non_empty(self.phone).map(PhoneNumber::new);
        request.details.country = self.country.map(CountryId);
        request.details.payment_method_type = self.payment_method_type.map(PaymentMethodTypeId);
        request.details.currency = non_empty(self.currency).map(Currency::new);
        request.details.notes = non_empty(self.notes);
        Ok(request)
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.trim().is_empty())
}

/// Settles every request from a CSV reader through [`Engine::process`].
///
/// Rows are streamed, so arbitrarily large files are fine. Malformed rows
/// and rejected requests are logged and skipped. Returns the number of
/// completed transactions.
///
/// # CSV Format
///
/// ```csv
/// type,amount,source,target,country,payment_method_type,currency,phone,notes
/// P2P,100,1,2,,,,,rent
/// CI,50,,2,1,3,,+237600000000,
/// CO,20,1,,1,3,,+237600000001,
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
pub fn process_requests<R: Read>(engine: &Engine, reader: R) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut completed = 0;
    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let line = row + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                warn!(line, error = %e, "skipping malformed row");
                continue;
            }
        };

        let request = match record.into_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(line, code = e.code(), "skipping invalid request");
                continue;
            }
        };

        if engine.process(request).is_ok() {
            completed += 1;
        }
    }

    info!(completed, "requests processed");
    Ok(completed)
}

/// Writes the transaction summaries, wallet balances and platform pools as
/// three CSV tables separated by a blank line.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_report<W: Write>(engine: &Engine, mut writer: W) -> Result<(), csv::Error> {
    {
        let mut wtr = Writer::from_writer(&mut writer);
        for transaction in engine.transactions() {
            wtr.serialize(transaction.summary())?;
        }
        wtr.flush()?;
    }
    writeln!(writer)?;

    {
        let mut wallets: Vec<_> = engine
            .wallets()
            .wallets()
            .map(|entry| entry.value().clone())
            .collect();
        wallets.sort_by_key(|wallet| wallet.id());

        let mut wtr = Writer::from_writer(&mut writer);
        for wallet in &wallets {
            wtr.serialize(wallet.as_ref())?;
        }
        wtr.flush()?;
    }
    writeln!(writer)?;

    let mut wtr = Writer::from_writer(&mut writer);
    for pool in engine.platform().pools() {
        wtr.serialize(pool.as_ref())?;
    }
    wtr.flush()?;
    Ok(())
}
