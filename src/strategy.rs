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

//! Pluggable synchronization strategies.
//!
//! A [`Ledger`](crate::Ledger) runs the same transfer logic under whichever
//! [`LockStrategy`] it was built with. Blocking strategies drive each
//! transfer through the state machine below; the unsynchronized strategy
//! only ever goes `CHECK ──► APPLY | EXIT`.
//!
//! ```text
//!   ENTER ──acquire──► CHECK ──funds ok──► APPLY ──signal_all──► EXIT
//!                        ▲  │
//!                        │  └──short──► WAIT (lock released)
//!                        └──── woken ─────┘
//! ```

use crate::base::StrategyKind;
use crate::monitor::ReentrantLock;
use parking_lot::Condvar;
use std::time::{Duration, Instant};

/// Acquire / wait / signal / release over a ledger's balances.
///
/// Implementations must be reentrant: a thread that already holds the lock
/// may acquire it again, and must release it as many times as it acquired it.
pub trait LockStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether short balances suspend the caller (`true`) or skip the
    /// transfer (`false`).
    fn is_blocking(&self) -> bool {
        self.kind().is_blocking()
    }

    /// Enters the critical section. Returns `false` if `deadline` passed
    /// before the lock could be taken.
    fn acquire(&self, deadline: Option<Instant>) -> bool;

    fn release(&self);

    /// Releases the lock, suspends until signalled (or `timeout` elapses),
    /// then reacquires it. Returns `true` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Wakes every thread suspended in [`wait`](Self::wait).
    fn signal_all(&self);

    /// Holds currently owned by the calling thread.
    fn hold_count(&self) -> usize;
}

/// RAII guard over a strategy's critical section.
pub struct CriticalSection<'a> {
    strategy: &'a dyn LockStrategy,
}

impl<'a> CriticalSection<'a> {
    /// Enters the critical section, or returns `None` if `deadline` passed.
    pub fn enter(strategy: &'a dyn LockStrategy, deadline: Option<Instant>) -> Option<Self> {
        strategy
            .acquire(deadline)
            .then(|| CriticalSection { strategy })
    }

    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.strategy.wait(timeout)
    }

    pub fn signal_all(&self) {
        self.strategy.signal_all();
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.strategy.release();
    }
}

/// No mutual exclusion at all.
#[derive(Debug, Default)]
pub struct Unsynchronized;

impl LockStrategy for Unsynchronized {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Unsynchronized
    }

    fn acquire(&self, _deadline: Option<Instant>) -> bool {
        true
    }

    fn release(&self) {}

    fn wait(&self, _timeout: Option<Duration>) -> bool {
        std::thread::yield_now();
        false
    }

    fn signal_all(&self) {}

    fn hold_count(&self) -> usize {
        0
    }
}

/// Monitor-style lock with one implicit wait set.
///
/// Waiters park on the same condvar as threads queued to enter, so
/// [`signal_all`](LockStrategy::signal_all) wakes both. Entering cannot be
/// bounded; a deadline only limits the time spent waiting for funds.
#[derive(Debug, Default)]
pub struct IntrinsicLock {
    monitor: ReentrantLock,
}

impl IntrinsicLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStrategy for IntrinsicLock {
    fn kind(&self) -> StrategyKind {
        StrategyKind::IntrinsicLock
    }

    fn acquire(&self, _deadline: Option<Instant>) -> bool {
        self.monitor.lock();
        true
    }

    fn release(&self) {
        self.monitor.unlock();
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        self.monitor.await_on(self.monitor.entry(), timeout)
    }

    fn signal_all(&self) {
        self.monitor.entry().notify_all();
    }

    fn hold_count(&self) -> usize {
        self.monitor.hold_count()
    }
}

/// Reentrant lock with a dedicated `sufficient_funds` condition.
#[derive(Debug, Default)]
pub struct ExplicitLock {
    lock: ReentrantLock,
    sufficient_funds: Condvar,
}

impl ExplicitLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStrategy for ExplicitLock {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ExplicitLockCondition
    }

    fn acquire(&self, deadline: Option<Instant>) -> bool {
        self.lock.try_lock_until(deadline)
    }

    fn release(&self) {
        self.lock.unlock();
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        self.lock.await_on(&self.sufficient_funds, timeout)
    }

    fn signal_all(&self) {
        self.sufficient_funds.notify_all();
    }

    fn hold_count(&self) -> usize {
        self.lock.hold_count()
    }
}

/// Builds the stock strategy for `kind`.
pub fn strategy_for(kind: StrategyKind) -> Box<dyn LockStrategy> {
    match kind {
        StrategyKind::Unsynchronized => Box::new(Unsynchronized),
        StrategyKind::IntrinsicLock => Box::new(IntrinsicLock::new()),
        StrategyKind::ExplicitLockCondition => Box::new(ExplicitLock::new()),
    }
}
