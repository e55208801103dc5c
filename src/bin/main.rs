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
use gym_wallet_rs::{BillingConfig, BookingRef, Member, MemberId, SettlementEngine, SystemClock};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

/// Gym Wallet - Replay wallet command CSV files
///
/// Reads wallet commands from a CSV file and outputs wallet states to stdout.
/// Supports top-ups, balance corrections, refunds, booking charges and bonus
/// credit grants.
#[derive(Parser, Debug)]
#[command(name = "gym-wallet-rs")]
#[command(about = "Replays gym wallet commands and prints resulting wallets", long_about = None)]
struct Args {
    /// Path to CSV file with wallet commands
    ///
    /// Expected format: type,member,amount,reference
    /// Example: cargo run -- commands.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Print the ledger rows instead of wallet balances
    #[arg(long)]
    ledger: bool,

    /// Compare-and-set attempts when draining a short balance
    #[arg(long, default_value_t = BillingConfig::DEFAULT_MAX_DRAIN_ATTEMPTS)]
    max_drain_attempts: u32,

    /// Cancellations fewer than this many hours before class start are billed
    #[arg(long, default_value_t = BillingConfig::DEFAULT_SAME_DAY_THRESHOLD_HOURS)]
    same_day_threshold_hours: i64,

    /// Late cancellations that cancel a subscription and block the member
    #[arg(long, default_value_t = BillingConfig::DEFAULT_LATE_CANCELLATION_LIMIT)]
    late_cancellation_limit: u32,
}

impl Args {
    fn config(&self) -> BillingConfig {
        BillingConfig {
            same_day_threshold_hours: self.same_day_threshold_hours,
            max_drain_attempts: self.max_drain_attempts,
            late_cancellation_limit: self.late_cancellation_limit,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match process_commands(BufReader::new(file), args.config()) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Error processing commands: {}", e);
            process::exit(1);
        }
    };

    let written = if args.ledger {
        write_ledger(&engine, std::io::stdout())
    } else {
        write_wallets(&engine, std::io::stdout())
    };
    if let Err(e) = written {
        error!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, member, amount, reference`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    command: String,
    member: u32,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Debug)]
enum Command {
    TopUp(Decimal),
    Set(Decimal),
    Refund(Decimal),
    Charge(Decimal),
    Bonus(u32),
}

impl CsvRecord {
    /// Returns `None` for unknown command types or missing/invalid amounts.
    fn into_command(self) -> Option<(MemberId, Command, Option<String>)> {
        let member_id = MemberId(self.member);
        let amount = self.amount?;
        let reference = self.reference.filter(|r| !r.is_empty());

        let command = match self.command.to_lowercase().as_str() {
            "topup" => Command::TopUp(amount),
            "set" => Command::Set(amount),
            "refund" => Command::Refund(amount),
            "charge" => Command::Charge(amount),
            "bonus" => {
                if amount.fract() != Decimal::ZERO {
                    return None;
                }
                Command::Bonus(amount.to_u32()?)
            }
            _ => return None,
        };
        Some((member_id, command, reference))
    }
}

fn apply(
    engine: &SettlementEngine,
    member_id: MemberId,
    command: &Command,
    reference: Option<String>,
) -> Result<(), gym_wallet_rs::BillingError> {
    if !engine.ledger().contains(member_id) {
        engine.register_member(Member::new(member_id, format!("member-{member_id}")))?;
    }
    match *command {
        Command::TopUp(amount) => engine.top_up(member_id, amount, reference).map(|_| ()),
        Command::Set(amount) => engine.set_balance(member_id, amount, reference).map(|_| ()),
        Command::Refund(amount) => engine.refund(member_id, amount, reference).map(|_| ()),
        Command::Charge(amount) => {
            let booking = reference
                .as_deref()
                .and_then(|r| r.trim_start_matches("booking:").parse().ok())
                .map(BookingRef);
            let outcome = engine.charge_for_booking(member_id, amount, booking)?;
            if !outcome.fully_settled {
                warn!(member = %member_id, %amount, charged = %outcome.charged_amount, "charge not fully settled");
            }
            Ok(())
        }
        Command::Bonus(credits) => engine.set_bonus_credits(member_id, credits),
    }
}

/// Replays wallet commands from a CSV reader.
///
/// Rows are streamed, so arbitrarily large files are fine. Malformed rows and
/// rejected commands are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, member, amount, reference`
/// - `type`: Command (topup, set, refund, charge, bonus)
/// - `member`: Member ID (u32)
/// - `amount`: Decimal amount; for `bonus`, the whole number of credits
/// - `reference`: Optional free text; for `charge`, a booking id such as `booking:12`
///
/// # Example
///
/// ```csv
/// type,member,amount,reference
/// topup,1,100.00,card-4411
/// bonus,1,2,
/// charge,1,40.00,booking:12
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_commands<R: Read>(reader: R, config: BillingConfig) -> Result<SettlementEngine, csv::Error> {
    let engine = SettlementEngine::with_config(config, Arc::new(SystemClock));

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some((member_id, command, reference)) = record.into_command() else {
                    warn!("Skipping invalid command record");
                    continue;
                };
                debug!(member = %member_id, ?command, "applying command");

                if let Err(e) = apply(&engine, member_id, &command, reference) {
                    warn!(member = %member_id, ?command, "Skipping command: {}", e);
                }
            }
            Err(e) => {
                warn!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(engine)
}

/// Writes wallet states as CSV, ordered by member.
///
/// Columns: `member, balance, bonus_credits`
pub fn write_wallets<W: Write>(engine: &SettlementEngine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut wallets: Vec<_> = engine.ledger().wallets().collect();
    wallets.sort_by_key(|w| *w.key());
    for wallet in &wallets {
        wtr.serialize(wallet.value())?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes every ledger row as CSV, grouped by member, oldest first.
pub fn write_ledger<W: Write>(engine: &SettlementEngine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut members: Vec<MemberId> = engine.ledger().wallets().map(|w| *w.key()).collect();
    members.sort();
    for member_id in members {
        let Ok(mut rows) = engine.get_transactions(member_id) else {
            continue;
        };
        rows.reverse();
        for row in &rows {
            wtr.serialize(row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}
