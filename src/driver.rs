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

//! Worker driver.
//!
//! [`run`] starts one named OS thread per [`Route`] against a borrowed
//! [`Ledger`]. Each worker repeatedly draws an amount in `(0, max_amount]`,
//! resolves its source and destination, transfers, and sleeps for a random
//! interval in `[0, max_delay]`.
//!
//! The calling thread supervises: it collects worker reports over a channel,
//! asks the ledger's observer to record the total on every report tick, and
//! cancels the shared token when the configured run duration elapses.
//!
//! Only workers refill accounts. Without a wait timeout, once every worker
//! still running has been waiting for funds across two stall checks with no
//! transfer applied in between, nothing can wake them; the supervisor
//! cancels the run and marks the report as stalled.

use crate::base::{ObserverPlacement, StrategyKind};
use crate::cancel::CancellationToken;
use crate::ledger::{Ledger, LedgerSnapshot, TransferOutcome};
use crate::observer::TransferObserver;
use crate::LedgerError;
use crossbeam::channel;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often the supervisor looks for workers that can never be refilled.
const STALL_CHECK: Duration = Duration::from_millis(100);

/// How a worker chooses an account on each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountPick {
    /// Uniform over `[0, size)`, drawn fresh every iteration.
    Random,
    Fixed(usize),
}

impl AccountPick {
    fn resolve(self, rng: &mut impl Rng, size: usize) -> usize {
        match self {
            AccountPick::Random => rng.gen_range(0..size),
            AccountPick::Fixed(account) => account,
        }
    }
}

/// Source and destination of one worker's transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub from: AccountPick,
    pub to: AccountPick,
}

impl Route {
    pub fn fixed(from: usize, to: usize) -> Self {
        Self {
            from: AccountPick::Fixed(from),
            to: AccountPick::Fixed(to),
        }
    }

    /// Pinned source, random destination.
    pub fn from_account(from: usize) -> Self {
        Self {
            from: AccountPick::Fixed(from),
            to: AccountPick::Random,
        }
    }
}

/// How many transfers each worker attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Iterations {
    Fixed(u64),
    /// Until the run is cancelled.
    Unbounded,
}

impl Iterations {
    fn allows(self, done: u64) -> bool {
        match self {
            Iterations::Fixed(limit) => done < limit,
            Iterations::Unbounded => true,
        }
    }
}

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub accounts: usize,
    pub initial_balance: Decimal,
    /// Upper bound of a single transfer. Amounts are drawn in cents.
    pub max_amount: Decimal,
    /// Upper bound of the pause between two transfers of one worker.
    pub max_delay: Duration,
    pub iterations: Iterations,
    /// Cancels every worker once elapsed.
    pub duration: Option<Duration>,
    /// Bounds each wait for funds; `None` waits until funds or cancellation.
    pub wait_timeout: Option<Duration>,
    /// How often the ledger total is handed to the observer.
    pub report_interval: Option<Duration>,
    /// One worker per route.
    pub routes: Vec<Route>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::fan_out(100, dec!(1000))
    }
}

impl DriverConfig {
    /// One worker per account, each draining its own account into random
    /// destinations.
    pub fn fan_out(accounts: usize, initial_balance: Decimal) -> Self {
        Self {
            accounts,
            initial_balance,
            max_amount: dec!(1000),
            max_delay: Duration::from_millis(10),
            iterations: Iterations::Fixed(100),
            duration: None,
            wait_timeout: None,
            report_interval: Some(Duration::from_secs(1)),
            routes: (0..accounts).map(Route::from_account).collect(),
        }
    }

    /// Four accounts, four pinned workers shuttling money both ways between
    /// the pairs `0/1` and `2/3`.
    pub fn needle() -> Self {
        Self {
            accounts: 4,
            initial_balance: dec!(25000),
            max_amount: dec!(25000),
            max_delay: Duration::from_millis(10),
            iterations: Iterations::Fixed(5000),
            duration: None,
            wait_timeout: None,
            report_interval: Some(Duration::from_secs(1)),
            routes: vec![
                Route::fixed(0, 1),
                Route::fixed(2, 3),
                Route::fixed(1, 0),
                Route::fixed(3, 2),
            ],
        }
    }

    /// Checks the config against its own account count.
    pub fn validate(&self) -> Result<(), LedgerError> {
        self.validate_for(self.accounts)
    }

    /// Checks the config against a ledger of `size` accounts.
    pub fn validate_for(&self, size: usize) -> Result<(), LedgerError> {
        if size == 0 {
            return Err(LedgerError::NoAccounts);
        }
        if self.routes.is_empty() {
            return Err(LedgerError::InvalidConfig(
                "at least one worker is required".to_string(),
            ));
        }
        self.max_cents()?;
        for route in &self.routes {
            for pick in [route.from, route.to] {
                if let AccountPick::Fixed(index) = pick {
                    if index >= size {
                        return Err(LedgerError::AccountOutOfRange { index, size });
                    }
                }
            }
        }
        Ok(())
    }

    /// `max_amount` in whole cents; at least one.
    fn max_cents(&self) -> Result<i64, LedgerError> {
        let cents = self
            .max_amount
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.trunc().to_i64())
            .ok_or_else(|| {
                LedgerError::InvalidConfig(format!(
                    "max amount {} is too large",
                    self.max_amount
                ))
            })?;
        if cents < 1 {
            return Err(LedgerError::InvalidConfig(format!(
                "max amount {} must be at least 0.01",
                self.max_amount
            )));
        }
        Ok(cents)
    }
}

/// Counters for one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub index: usize,
    pub name: String,
    pub applied: u64,
    pub skipped: u64,
    pub timed_out: u64,
    pub rejected: u64,
    /// Stopped by cancellation rather than by running out of iterations.
    pub cancelled: bool,
}

impl WorkerReport {
    pub fn attempts(&self) -> u64 {
        self.applied + self.skipped + self.timed_out + self.rejected
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub strategy: StrategyKind,
    /// Ordered by worker index.
    pub workers: Vec<WorkerReport>,
    pub expected_total: Decimal,
    pub final_snapshot: LedgerSnapshot,
    pub elapsed: Duration,
    /// The run was cancelled because every remaining worker was starved.
    pub stalled: bool,
}

impl RunReport {
    pub fn final_total(&self) -> Decimal {
        self.final_snapshot.total
    }

    /// Whether the ledger still holds exactly what it started with.
    pub fn conserved(&self) -> bool {
        self.final_total() == self.expected_total
    }

    pub fn has_overdraft(&self) -> bool {
        self.final_snapshot.has_overdraft()
    }

    pub fn min_balance(&self) -> Decimal {
        self.final_snapshot.min_balance()
    }

    pub fn applied(&self) -> u64 {
        self.workers.iter().map(|worker| worker.applied).sum()
    }

    pub fn cancelled_workers(&self) -> usize {
        self.workers.iter().filter(|worker| worker.cancelled).count()
    }
}

/// Runs every route in `config` against `ledger` and waits for all workers.
///
/// Workers stop when they exhaust their iterations, when `cancel` fires, or
/// when `config.duration` elapses (which fires `cancel`). A run whose
/// remaining workers all wait on accounts nobody will refill is cancelled
/// too, and reported as [`stalled`](RunReport::stalled).
///
/// # Errors
///
/// Returns an error if the config does not fit the ledger or a worker thread
/// cannot be started. In the latter case the already running workers are
/// cancelled and joined first.
pub fn run(
    ledger: &Ledger,
    config: &DriverConfig,
    cancel: &CancellationToken,
) -> Result<RunReport, LedgerError> {
    config.validate_for(ledger.size())?;
    let max_cents = config.max_cents()?;
    let started = Instant::now();

    tracing::info!(
        strategy = %ledger.strategy(),
        accounts = ledger.size(),
        workers = config.routes.len(),
        expected_total = %ledger.opening_total(),
        "starting run"
    );

    let mut stalled = false;
    let mut workers = thread::scope(|scope| -> Result<Vec<WorkerReport>, LedgerError> {
        let (done_tx, done_rx) = channel::unbounded::<WorkerReport>();

        for (index, route) in config.routes.iter().copied().enumerate() {
            let done_tx = done_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("T-{index:02}"))
                .spawn_scoped(scope, move || {
                    let report = run_worker(ledger, index, route, config, max_cents, cancel);
                    let _ = done_tx.send(report);
                });
            if let Err(e) = spawned {
                cancel.cancel();
                return Err(LedgerError::WorkerSpawn(e.to_string()));
            }
        }
        drop(done_tx);

        let ticker = config
            .report_interval
            .map(channel::tick)
            .unwrap_or_else(channel::never);
        let deadline = config
            .duration
            .map(channel::after)
            .unwrap_or_else(channel::never);
        // Bounded waits always return, so only untimed waits can starve.
        let stall_check = match config.wait_timeout {
            Some(_) => channel::never(),
            None => channel::tick(STALL_CHECK),
        };
        // Applied count at the previous check, if every worker was waiting then.
        let mut idle_since = None;

        let mut reports = Vec::with_capacity(config.routes.len());
        while reports.len() < config.routes.len() {
            crossbeam::select! {
                recv(done_rx) -> report => match report {
                    Ok(report) => reports.push(report),
                    // A worker panicked; the scope re-raises it on join.
                    Err(_) => break,
                },
                recv(ticker) -> _ => ledger.report_total(),
                recv(deadline) -> _ => {
                    tracing::info!("run duration elapsed, cancelling workers");
                    cancel.cancel();
                }
                recv(stall_check) -> _ => {
                    let running = config.routes.len() - reports.len();
                    let applied = ledger.applied_transfers();
                    let idle = ledger.waiting_transfers() >= running;
                    if idle && idle_since == Some(applied) && !cancel.is_cancelled() {
                        tracing::warn!(running, "every running worker is starved, cancelling");
                        stalled = true;
                        cancel.cancel();
                    }
                    idle_since = idle.then_some(applied);
                }
            }
        }
        Ok(reports)
    })?;

    workers.sort_by_key(|worker| worker.index);
    let report = RunReport {
        strategy: ledger.strategy(),
        workers,
        expected_total: ledger.opening_total(),
        final_snapshot: ledger.snapshot(),
        elapsed: started.elapsed(),
        stalled,
    };

    if report.conserved() && !report.has_overdraft() {
        tracing::info!(
            total = %report.final_total(),
            applied = report.applied(),
            stalled = report.stalled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished, total conserved"
        );
    } else {
        tracing::warn!(
            total = %report.final_total(),
            expected = %report.expected_total,
            min_balance = %report.min_balance(),
            applied = report.applied(),
            "run finished, ledger corrupted"
        );
    }
    Ok(report)
}

/// Builds a ledger for `config`, runs it, and returns the report.
pub fn simulate(
    config: &DriverConfig,
    kind: StrategyKind,
    observer: Arc<dyn TransferObserver>,
    placement: ObserverPlacement,
    cancel: &CancellationToken,
) -> Result<RunReport, LedgerError> {
    config.validate()?;
    let ledger = Ledger::new(config.accounts, config.initial_balance, kind)?
        .with_observer(observer, placement);
    run(&ledger, config, cancel)
}

fn run_worker(
    ledger: &Ledger,
    index: usize,
    route: Route,
    config: &DriverConfig,
    max_cents: i64,
    cancel: &CancellationToken,
) -> WorkerReport {
    let mut rng = rand::thread_rng();
    let mut report = WorkerReport {
        index,
        name: thread::current().name().unwrap_or("worker").to_string(),
        ..WorkerReport::default()
    };
    let max_delay_us = u64::try_from(config.max_delay.as_micros()).unwrap_or(u64::MAX);
    let size = ledger.size();

    tracing::debug!(worker = %report.name, ?route, "worker started");

    let mut done = 0u64;
    while config.iterations.allows(done) {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let from = route.from.resolve(&mut rng, size);
        let to = route.to.resolve(&mut rng, size);
        let amount = Decimal::new(rng.gen_range(1..=max_cents), 2);

        match ledger.transfer_with(from, to, amount, Some(cancel), config.wait_timeout) {
            Ok(TransferOutcome::Applied) => report.applied += 1,
            Ok(TransferOutcome::Skipped) => report.skipped += 1,
            Err(LedgerError::Cancelled) => {
                report.cancelled = true;
                break;
            }
            Err(LedgerError::TimedOut) => report.timed_out += 1,
            Err(e) => {
                tracing::warn!(worker = %report.name, from, to, %amount, error = %e, "transfer rejected");
                report.rejected += 1;
            }
        }
        done += 1;

        if max_delay_us > 0 {
            thread::sleep(Duration::from_micros(rng.gen_range(0..=max_delay_us)));
        }
    }

    tracing::debug!(
        worker = %report.name,
        applied = report.applied,
        skipped = report.skipped,
        timed_out = report.timed_out,
        cancelled = report.cancelled,
        "worker stopped"
    );
    report
}
