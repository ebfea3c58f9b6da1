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

use banco::{
    CancellationToken, DriverConfig, Iterations, LedgerSnapshot, NoopObserver, ObserverPlacement,
    Route, StrategyKind, TracingObserver, TransferObserver, driver,
};
use clap::{Parser, ValueEnum};
use csv::Writer;
use rust_decimal::Decimal;
use std::io::Write;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Banco - concurrent transfer simulation
///
/// Runs worker threads that move random amounts between the accounts of one
/// shared ledger, then writes the final balances to stdout as CSV.
#[derive(Parser, Debug)]
#[command(name = "banco")]
#[command(about = "Compare ledger synchronization strategies under concurrent transfers", long_about = None)]
struct Args {
    /// Synchronization strategy: unsynchronized, intrinsic or explicit
    #[arg(long, default_value = "explicit")]
    strategy: StrategyKind,

    /// Worker layout
    #[arg(long, value_enum, default_value_t = Scenario::FanOut)]
    scenario: Scenario,

    /// Number of accounts (fan-out only)
    #[arg(long)]
    accounts: Option<usize>,

    /// Starting balance of every account
    #[arg(long)]
    initial_balance: Option<Decimal>,

    /// Number of workers (fan-out only, defaults to one per account)
    #[arg(long)]
    workers: Option<usize>,

    /// Largest single transfer
    #[arg(long)]
    max_amount: Option<Decimal>,

    /// Largest pause between two transfers of a worker, in milliseconds
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Transfers per worker
    #[arg(long, conflicts_with = "unbounded")]
    transfers: Option<u64>,

    /// Keep transferring until --duration-secs elapses
    #[arg(long, requires = "duration_secs")]
    unbounded: bool,

    /// Stop all workers after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Give up a single wait for funds after this many milliseconds
    #[arg(long)]
    wait_timeout_ms: Option<u64>,

    /// How often to log the ledger total, in milliseconds (0 disables)
    #[arg(long, default_value_t = 1000)]
    report_interval_ms: u64,

    /// Where per-transfer records are emitted
    #[arg(long, value_enum, default_value_t = ObserverMode::Outside)]
    observer: ObserverMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// One worker per account, random destinations
    FanOut,
    /// Four pinned workers on accounts 0/1 and 2/3
    Needle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ObserverMode {
    /// Log inside the critical section
    Inside,
    /// Log after the critical section
    Outside,
    /// No per-transfer records
    Off,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();

    let config = build_config(&args);
    let (observer, placement): (Arc<dyn TransferObserver>, ObserverPlacement) = match args.observer
    {
        ObserverMode::Inside => (Arc::new(TracingObserver), ObserverPlacement::InsideLock),
        ObserverMode::Outside => (Arc::new(TracingObserver), ObserverPlacement::OutsideLock),
        ObserverMode::Off => (Arc::new(NoopObserver), ObserverPlacement::OutsideLock),
    };
    if placement == ObserverPlacement::InsideLock {
        tracing::warn!("observer runs inside the lock; every worker serializes on log output");
    }

    let cancel = CancellationToken::new();
    let report = match driver::simulate(&config, args.strategy, observer, placement, &cancel) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error running simulation: {}", e);
            process::exit(1);
        }
    };

    tracing::info!(
        strategy = %report.strategy,
        expected = %report.expected_total,
        total = %report.final_total(),
        conserved = report.conserved(),
        min_balance = %report.min_balance(),
        cancelled_workers = report.cancelled_workers(),
        stalled = report.stalled,
        "summary"
    );

    if let Err(e) = write_snapshot(&report.final_snapshot, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Merges CLI overrides into the chosen scenario's defaults.
fn build_config(args: &Args) -> DriverConfig {
    let mut config = match args.scenario {
        Scenario::FanOut => {
            let defaults = DriverConfig::default();
            let accounts = args.accounts.unwrap_or(defaults.accounts);
            let mut config = DriverConfig::fan_out(
                accounts,
                args.initial_balance.unwrap_or(defaults.initial_balance),
            );
            if let Some(workers) = args.workers {
                config.routes = (0..workers)
                    .map(|worker| Route::from_account(worker % accounts.max(1)))
                    .collect();
            }
            config
        }
        Scenario::Needle => {
            let mut config = DriverConfig::needle();
            if let Some(initial_balance) = args.initial_balance {
                config.initial_balance = initial_balance;
            }
            config
        }
    };

    if let Some(max_amount) = args.max_amount {
        config.max_amount = max_amount;
    }
    if let Some(max_delay_ms) = args.max_delay_ms {
        config.max_delay = Duration::from_millis(max_delay_ms);
    }
    if let Some(transfers) = args.transfers {
        config.iterations = Iterations::Fixed(transfers);
    }
    if args.unbounded {
        config.iterations = Iterations::Unbounded;
    }
    config.duration = args.duration_secs.map(Duration::from_secs);
    config.wait_timeout = args.wait_timeout_ms.map(Duration::from_millis);
    config.report_interval =
        (args.report_interval_ms > 0).then(|| Duration::from_millis(args.report_interval_ms));
    config
}

/// Write final balances as CSV.
///
/// # CSV Format
///
/// Columns: `account, balance`
///
/// ```csv
/// account,balance
/// 0,24512.07
/// 1,25487.93
/// ```
fn write_snapshot<W: Write>(snapshot: &LedgerSnapshot, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for row in snapshot.rows() {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use banco::AccountPick;
    use rust_decimal_macros::dec;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("banco").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_build_fan_out() {
        let args = parse(&[]);
        assert_eq!(args.strategy, StrategyKind::ExplicitLockCondition);
        let config = build_config(&args);
        assert_eq!(config.accounts, 100);
        assert_eq!(config.routes.len(), 100);
        assert_eq!(config.report_interval, Some(Duration::from_secs(1)));
    }

    #[test]
    fn overrides_apply() {
        let args = parse(&[
            "--strategy",
            "unsynchronized",
            "--accounts",
            "3",
            "--workers",
            "5",
            "--max-amount",
            "12.5",
            "--transfers",
            "7",
            "--report-interval-ms",
            "0",
        ]);
        assert_eq!(args.strategy, StrategyKind::Unsynchronized);
        let config = build_config(&args);
        assert_eq!(config.accounts, 3);
        assert_eq!(config.routes.len(), 5);
        assert_eq!(config.routes[4].from, AccountPick::Fixed(1));
        assert_eq!(config.max_amount, dec!(12.5));
        assert_eq!(config.iterations, Iterations::Fixed(7));
        assert_eq!(config.report_interval, None);
    }

    #[test]
    fn needle_scenario_keeps_pinned_routes() {
        let config = build_config(&parse(&["--scenario", "needle"]));
        assert_eq!(config.accounts, 4);
        assert_eq!(config.routes[0], Route::fixed(0, 1));
    }

    #[test]
    fn unbounded_requires_duration() {
        assert!(
            Args::try_parse_from(["banco", "--unbounded"]).is_err(),
            "unbounded without a duration must be rejected"
        );
        let config = build_config(&parse(&["--unbounded", "--duration-secs", "2"]));
        assert_eq!(config.iterations, Iterations::Unbounded);
        assert_eq!(config.duration, Some(Duration::from_secs(2)));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(Args::try_parse_from(["banco", "--strategy", "optimistic"]).is_err());
    }

    #[test]
    fn write_snapshot_to_csv() {
        let snapshot = LedgerSnapshot {
            balances: vec![dec!(24512.07), dec!(25487.93)],
            total: dec!(50000.00),
        };
        let mut output = Vec::new();
        write_snapshot(&snapshot, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert_eq!(output_str, "account,balance\n0,24512.07\n1,25487.93\n");
    }
}
