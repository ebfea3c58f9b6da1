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

//! Owner-tracked reentrant lock with condition support.
//!
//! `parking_lot::ReentrantMutex` cannot be paired with a `Condvar`, so the
//! lock keeps its own ownership record (owning thread + hold count) behind a
//! short-lived [`Mutex`]. Threads that find the lock owned by someone else
//! park on the `entry` condvar until the owner's hold count drops to zero.
//!
//! ```text
//!   lock()  ──owner == me──► holds += 1
//!     │
//!     ├──owner == None──► owner = me, holds = 1
//!     │
//!     └──owner == other──► park on `entry` ──► retry
//!
//!   await_on(cond) ──► stash holds, owner = None, wake one entrant
//!                  ──► park on `cond` ──► reacquire with stashed holds
//! ```

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    holds: usize,
}

/// A reentrant mutual-exclusion lock.
///
/// The same thread may call [`lock`](Self::lock) repeatedly; each call must be
/// matched by an [`unlock`](Self::unlock) before other threads can enter.
#[derive(Debug, Default)]
pub struct ReentrantLock {
    state: Mutex<Ownership>,
    entry: Condvar,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, blocking until it is available.
    pub fn lock(&self) {
        let acquired = self.try_lock_until(None);
        debug_assert!(acquired, "unbounded acquire cannot time out");
    }

    /// Acquires the lock, giving up at `deadline`.
    ///
    /// Returns `false` if the deadline passed while another thread held the
    /// lock. With `None` the call blocks indefinitely and always succeeds.
    pub fn try_lock_until(&self, deadline: Option<Instant>) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                Some(owner) if owner == me => {
                    state.holds += 1;
                    return true;
                }
                None => {
                    state.owner = Some(me);
                    state.holds = 1;
                    return true;
                }
                Some(_) => match deadline {
                    Some(deadline) => {
                        if self.entry.wait_until(&mut state, deadline).timed_out()
                            && state.owner.is_some()
                        {
                            return false;
                        }
                    }
                    None => self.entry.wait(&mut state),
                },
            }
        }
    }

    /// Releases one hold. The lock becomes available once the hold count
    /// reaches zero.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not own the lock.
    pub fn unlock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert_eq!(
            state.owner,
            Some(me),
            "unlock called by a thread that does not own the lock"
        );
        state.holds -= 1;
        if state.holds == 0 {
            state.owner = None;
            drop(state);
            self.entry.notify_one();
        }
    }

    /// Number of outstanding holds by the calling thread.
    pub fn hold_count(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(thread::current().id()) {
            state.holds
        } else {
            0
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.hold_count() > 0
    }

    /// The condvar entrants park on while the lock is owned.
    pub fn entry(&self) -> &Condvar {
        &self.entry
    }

    /// Fully releases the lock, parks on `condition`, then reacquires the lock
    /// with the original hold count.
    ///
    /// Releasing and parking happen under the internal state mutex, so a
    /// signal sent by the next owner cannot be missed. Wakeups carry no
    /// guarantee about the caller's predicate; callers must re-check it.
    ///
    /// Returns `true` if the wait ended because `timeout` elapsed.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not own the lock.
    pub fn await_on(&self, condition: &Condvar, timeout: Option<Duration>) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert_eq!(
            state.owner,
            Some(me),
            "await called by a thread that does not own the lock"
        );

        let holds = std::mem::take(&mut state.holds);
        state.owner = None;
        self.entry.notify_one();

        let timed_out = match timeout {
            Some(timeout) => condition.wait_for(&mut state, timeout).timed_out(),
            None => {
                condition.wait(&mut state);
                false
            }
        };

        while state.owner.is_some() {
            self.entry.wait(&mut state);
        }
        state.owner = Some(me);
        state.holds = holds;
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::sync::Arc;

    #[test]
    fn nested_lock_tracks_hold_count() {
        let lock = ReentrantLock::new();
        assert_eq!(lock.hold_count(), 0);
        lock.lock();
        lock.lock();
        assert_eq!(lock.hold_count(), 2);
        lock.unlock();
        assert_eq!(lock.hold_count(), 1);
        assert!(lock.is_held_by_current_thread());
        lock.unlock();
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    fn other_thread_waits_for_full_release() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock();
        lock.lock();

        let (tx, rx) = channel::bounded(1);
        let contender = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.lock();
                tx.send(()).unwrap();
                lock.unlock();
            })
        };

        lock.unlock();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        lock.unlock();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        contender.join().unwrap();
    }

    #[test]
    fn bounded_acquire_times_out_while_owned_elsewhere() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock();

        let acquired = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.try_lock_until(Some(Instant::now() + Duration::from_millis(20)))
            })
            .join()
            .unwrap()
        };

        assert!(!acquired);
        lock.unlock();
    }

    #[test]
    fn await_releases_and_restores_holds() {
        let lock = Arc::new(ReentrantLock::new());
        let condition = Arc::new(Condvar::new());
        lock.lock();
        lock.lock();

        let entered = {
            let lock = Arc::clone(&lock);
            let condition = Arc::clone(&condition);
            thread::spawn(move || {
                lock.lock();
                condition.notify_all();
                lock.unlock();
            })
        };

        let timed_out = lock.await_on(&condition, Some(Duration::from_secs(5)));
        assert!(!timed_out);
        assert_eq!(lock.hold_count(), 2);
        lock.unlock();
        lock.unlock();
        entered.join().unwrap();
    }

    #[test]
    fn await_reports_timeout() {
        let lock = ReentrantLock::new();
        let condition = Condvar::new();
        lock.lock();
        assert!(lock.await_on(&condition, Some(Duration::from_millis(5))));
        assert_eq!(lock.hold_count(), 1);
        lock.unlock();
    }

    #[test]
    #[should_panic(expected = "does not own the lock")]
    fn unlock_without_ownership_panics() {
        ReentrantLock::new().unlock();
    }
}
