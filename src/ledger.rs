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

//! The shared ledger of account balances.
//!
//! # Example
//!
//! ```
//! use banco::{Ledger, StrategyKind, TransferOutcome};
//! use rust_decimal_macros::dec;
//!
//! let ledger = Ledger::new(4, dec!(25000), StrategyKind::ExplicitLockCondition).unwrap();
//! assert_eq!(ledger.transfer(0, 1, dec!(100)).unwrap(), TransferOutcome::Applied);
//! assert_eq!(ledger.balance(1).unwrap(), dec!(25100));
//! assert_eq!(ledger.total_balance(), dec!(100000));
//! ```

use crate::base::{ObserverPlacement, StrategyKind};
use crate::cancel::CancellationToken;
use crate::observer::{NoopObserver, TransferEvent, TransferObserver};
use crate::strategy::{CriticalSection, LockStrategy, strategy_for};
use crate::LedgerError;
use crossbeam::atomic::AtomicCell;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single suspension while a cancellable or bounded transfer waits
/// for funds. Cancellation is noticed within one slice.
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// Result of a transfer that passed its preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Both balances were updated.
    Applied,
    /// Source balance was short and the strategy does not wait.
    Skipped,
}

/// One row of a ledger dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub account: usize,
    pub balance: Decimal,
}

/// All balances and their sum, read in one critical section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub balances: Vec<Decimal>,
    pub total: Decimal,
}

impl LedgerSnapshot {
    pub fn rows(&self) -> impl Iterator<Item = AccountBalance> + '_ {
        self.balances
            .iter()
            .enumerate()
            .map(|(account, &balance)| AccountBalance { account, balance })
    }

    pub fn min_balance(&self) -> Decimal {
        self.balances.iter().copied().min().unwrap_or(Decimal::ZERO)
    }

    pub fn has_overdraft(&self) -> bool {
        self.min_balance() < Decimal::ZERO
    }
}

/// A fixed-size table of account balances guarded by a [`LockStrategy`].
///
/// # Invariants
///
/// Under a blocking strategy:
/// - The sum of all balances never changes across completed transfers.
/// - No balance is ever negative.
///
/// The unsynchronized strategy keeps neither, on purpose.
pub struct Ledger {
    /// Cells are only touched inside the critical section unless the
    /// strategy is unsynchronized.
    balances: Box<[AtomicCell<Decimal>]>,
    opening_total: Decimal,
    strategy: Box<dyn LockStrategy>,
    observer: Arc<dyn TransferObserver>,
    placement: ObserverPlacement,
    /// Transfers currently suspended in WAIT.
    waiting: AtomicUsize,
    applied: AtomicU64,
}

/// Counts a transfer as waiting for funds until dropped.
struct WaitRegistration<'a>(&'a AtomicUsize);

impl<'a> WaitRegistration<'a> {
    fn new(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::SeqCst);
        Self(waiting)
    }
}

impl Drop for WaitRegistration<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Ledger {
    /// Creates `accounts` accounts holding `initial_balance` each.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NoAccounts`] if `accounts` is zero.
    /// - [`LedgerError::NegativeBalance`] if `initial_balance` is below zero.
    /// - [`LedgerError::BalanceOverflow`] if the total does not fit in a [`Decimal`].
    pub fn new(
        accounts: usize,
        initial_balance: Decimal,
        kind: StrategyKind,
    ) -> Result<Self, LedgerError> {
        Self::from_balances(vec![initial_balance; accounts], kind)
    }

    /// Creates a ledger with the given starting balances.
    pub fn from_balances(balances: Vec<Decimal>, kind: StrategyKind) -> Result<Self, LedgerError> {
        Self::with_strategy(balances, strategy_for(kind))
    }

    /// Creates a ledger guarded by a caller-supplied strategy.
    pub fn with_strategy(
        balances: Vec<Decimal>,
        strategy: Box<dyn LockStrategy>,
    ) -> Result<Self, LedgerError> {
        if balances.is_empty() {
            return Err(LedgerError::NoAccounts);
        }
        if balances.iter().any(|balance| *balance < Decimal::ZERO) {
            return Err(LedgerError::NegativeBalance);
        }

        // Every balance stays at or below this total, so no later credit overflows.
        let opening_total = balances
            .iter()
            .try_fold(Decimal::ZERO, |total, balance| total.checked_add(*balance))
            .ok_or(LedgerError::BalanceOverflow)?;
        Ok(Self {
            balances: balances.into_iter().map(AtomicCell::new).collect(),
            opening_total,
            strategy,
            observer: Arc::new(NoopObserver),
            placement: ObserverPlacement::default(),
            waiting: AtomicUsize::new(0),
            applied: AtomicU64::new(0),
        })
    }

    /// Attaches an observer, invoked after every applied transfer.
    pub fn with_observer(
        mut self,
        observer: Arc<dyn TransferObserver>,
        placement: ObserverPlacement,
    ) -> Self {
        self.observer = observer;
        self.placement = placement;
        self
    }

    /// Number of accounts. Fixed at construction.
    pub fn size(&self) -> usize {
        self.balances.len()
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Sum of the balances the ledger was created with.
    pub fn opening_total(&self) -> Decimal {
        self.opening_total
    }

    /// Moves `amount` from `from` to `to`.
    ///
    /// Blocking strategies wait as long as it takes for `from` to hold at
    /// least `amount`; the unsynchronized strategy returns
    /// [`TransferOutcome::Skipped`] instead.
    ///
    /// A self-transfer debits and credits the same slot and leaves it
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountOutOfRange`] if either index is not below [`size`](Self::size).
    /// - [`LedgerError::InvalidAmount`] if `amount` is not positive.
    pub fn transfer(
        &self,
        from: usize,
        to: usize,
        amount: Decimal,
    ) -> Result<TransferOutcome, LedgerError> {
        self.transfer_with(from, to, amount, None, None)
    }

    /// Like [`transfer`](Self::transfer), but a wait for funds gives up with
    /// [`LedgerError::Cancelled`] once `cancel` fires. No balance is touched.
    pub fn transfer_cancellable(
        &self,
        from: usize,
        to: usize,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, LedgerError> {
        self.transfer_with(from, to, amount, Some(cancel), None)
    }

    /// Like [`transfer`](Self::transfer), but gives up with
    /// [`LedgerError::TimedOut`] after `timeout`. A zero timeout checks the
    /// balance once without waiting.
    pub fn transfer_timeout(
        &self,
        from: usize,
        to: usize,
        amount: Decimal,
        timeout: Duration,
    ) -> Result<TransferOutcome, LedgerError> {
        self.transfer_with(from, to, amount, None, Some(timeout))
    }

    /// General form of the transfer operations: the wait for funds (and,
    /// for strategies that support it, the wait to enter) ends early on
    /// cancellation or once `timeout` has elapsed.
    pub fn transfer_with(
        &self,
        from: usize,
        to: usize,
        amount: Decimal,
        cancel: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> Result<TransferOutcome, LedgerError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        self.check_index(from)?;
        self.check_index(to)?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        if !self.strategy.is_blocking() {
            return Ok(self.transfer_unsynchronized(from, to, amount));
        }

        let section = CriticalSection::enter(self.strategy.as_ref(), deadline)
            .ok_or(LedgerError::TimedOut)?;

        // Every wakeup is only a hint; the predicate is re-tested each time.
        let mut registration = None;
        while self.balances[from].load() < amount {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(LedgerError::Cancelled);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(LedgerError::TimedOut);
                    }
                    Some(remaining)
                }
                None => None,
            };
            let timeout = match (remaining, cancel) {
                (Some(remaining), Some(_)) => Some(remaining.min(WAIT_SLICE)),
                (Some(remaining), None) => Some(remaining),
                (None, Some(_)) => Some(WAIT_SLICE),
                (None, None) => None,
            };
            registration.get_or_insert_with(|| WaitRegistration::new(&self.waiting));
            section.wait(timeout);
        }
        drop(registration);

        self.apply(from, to, amount);
        let event = self
            .observer
            .is_enabled()
            .then(|| self.event(from, to, amount));
        if self.placement == ObserverPlacement::InsideLock {
            if let Some(event) = &event {
                self.observer.on_transfer(event);
            }
        }

        // Any waiter may now have enough; there is no way to tell which.
        section.signal_all();
        drop(section);

        if self.placement == ObserverPlacement::OutsideLock {
            if let Some(event) = &event {
                self.observer.on_transfer(event);
            }
        }
        Ok(TransferOutcome::Applied)
    }

    fn transfer_unsynchronized(&self, from: usize, to: usize, amount: Decimal) -> TransferOutcome {
        if self.balances[from].load() < amount {
            return TransferOutcome::Skipped;
        }

        // Nothing stops another thread from draining `from` right here.
        thread::yield_now();

        let debited = self.balances[from].load() - amount;
        thread::yield_now();
        self.balances[from].store(debited);

        // Lost debits can inflate the total without bound.
        let credited = self.balances[to].load().saturating_add(amount);
        thread::yield_now();
        self.balances[to].store(credited);
        self.applied.fetch_add(1, Ordering::Relaxed);

        if self.observer.is_enabled() {
            self.observer.on_transfer(&self.event(from, to, amount));
        }
        TransferOutcome::Applied
    }

    /// Debit then credit. Caller holds the critical section.
    fn apply(&self, from: usize, to: usize, amount: Decimal) {
        let from_cell = &self.balances[from];
        from_cell.store(from_cell.load() - amount);
        let to_cell = &self.balances[to];
        to_cell.store(to_cell.load() + amount);
        self.applied.fetch_add(1, Ordering::Relaxed);
        debug_assert!(
            from_cell.load() >= Decimal::ZERO,
            "Invariant violated: balance of account {from} went negative: {}",
            from_cell.load()
        );
    }

    fn event(&self, from: usize, to: usize, amount: Decimal) -> TransferEvent {
        let current = thread::current();
        TransferEvent {
            thread: current
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{:?}", current.id())),
            strategy: self.strategy.kind(),
            from,
            to,
            amount,
            from_balance: self.balances[from].load(),
            to_balance: self.balances[to].load(),
            // Re-enters the critical section when called from a transfer.
            total: self.total_balance(),
            accounts: self.size(),
        }
    }

    /// Sum of all balances, read inside the critical section.
    pub fn total_balance(&self) -> Decimal {
        let _section = CriticalSection::enter(self.strategy.as_ref(), None);
        self.balances.iter().map(AtomicCell::load).sum()
    }

    /// Current balance of one account.
    pub fn balance(&self, account: usize) -> Result<Decimal, LedgerError> {
        self.check_index(account)?;
        let _section = CriticalSection::enter(self.strategy.as_ref(), None);
        Ok(self.balances[account].load())
    }

    /// Reads every balance and the total in one critical section.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let _section = CriticalSection::enter(self.strategy.as_ref(), None);
        let balances: Vec<Decimal> = self.balances.iter().map(AtomicCell::load).collect();
        let total = balances.iter().copied().sum();
        LedgerSnapshot { balances, total }
    }

    /// Runs `f` while holding the ledger's critical section.
    ///
    /// Ledger methods called from `f` re-enter the same lock.
    pub fn locked<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _section = CriticalSection::enter(self.strategy.as_ref(), None);
        f(self)
    }

    /// Hands the current total to the observer.
    pub fn report_total(&self) {
        if self.observer.is_enabled() {
            self.observer
                .on_total(self.total_balance(), self.opening_total);
        }
    }

    /// Transfers currently suspended waiting for funds.
    pub fn waiting_transfers(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Transfers applied since construction, under any strategy.
    pub fn applied_transfers(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Reentrant holds owned by the calling thread.
    pub fn hold_count(&self) -> usize {
        self.strategy.hold_count()
    }

    fn check_index(&self, index: usize) -> Result<(), LedgerError> {
        if index < self.size() {
            Ok(())
        } else {
            Err(LedgerError::AccountOutOfRange {
                index,
                size: self.size(),
            })
        }
    }
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("accounts", &self.size())
            .field("strategy", &self.strategy.kind())
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}
