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

//! # Banco
//!
//! A shared-ledger concurrency benchmark: a fixed table of account balances,
//! mutated by many threads performing random transfers, under a pluggable
//! synchronization strategy.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Account balances plus the transfer and total operations
//! - [`LockStrategy`]: Acquire / wait / signal / release over a ledger
//! - [`StrategyKind`]: Unsynchronized, intrinsic monitor, or explicit lock + condition
//! - [`driver::run`]: Spawns workers that hammer a shared ledger
//! - [`TransferObserver`]: Diagnostic sink for applied transfers and totals
//! - [`LedgerError`]: Precondition, cancellation and configuration errors
//!
//! ## Example
//!
//! ```
//! use banco::{Ledger, StrategyKind};
//! use rust_decimal_macros::dec;
//! use std::thread;
//!
//! let ledger = Ledger::new(4, dec!(25000), StrategyKind::ExplicitLockCondition).unwrap();
//!
//! thread::scope(|s| {
//!     s.spawn(|| {
//!         for _ in 0..100 {
//!             ledger.transfer(0, 1, dec!(10)).unwrap();
//!         }
//!     });
//!     s.spawn(|| {
//!         for _ in 0..100 {
//!             ledger.transfer(2, 3, dec!(10)).unwrap();
//!         }
//!     });
//! });
//!
//! assert_eq!(ledger.total_balance(), dec!(100000));
//! assert_eq!(ledger.balance(1).unwrap(), dec!(26000));
//! ```
//!
//! ## Thread Safety
//!
//! Under the blocking strategies every transfer is linearizable and the
//! total is conserved. [`StrategyKind::Unsynchronized`] exists to show what
//! happens without a lock: lost updates and overdrafts.

mod base;
mod cancel;
pub mod driver;
pub mod error;
mod ledger;
pub mod monitor;
mod observer;
pub mod strategy;

pub use base::{ObserverPlacement, StrategyKind};
pub use cancel::CancellationToken;
pub use driver::{AccountPick, DriverConfig, Iterations, Route, RunReport, WorkerReport};
pub use error::LedgerError;
pub use ledger::{AccountBalance, Ledger, LedgerSnapshot, TransferOutcome};
pub use monitor::ReentrantLock;
pub use observer::{
    NoopObserver, RecordingObserver, TracingObserver, TransferEvent, TransferObserver,
};
pub use strategy::{
    CriticalSection, ExplicitLock, IntrinsicLock, LockStrategy, Unsynchronized, strategy_for,
};
