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

//! Transfer observers.
//!
//! Observers are diagnostic only. A ledger calls them after every applied
//! transfer, either inside or outside its critical section depending on its
//! [`ObserverPlacement`](crate::ObserverPlacement).

use crate::base::StrategyKind;
use crossbeam::queue::SegQueue;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// State of the ledger right after one applied transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    /// Name of the thread that performed the transfer.
    pub thread: String,
    pub strategy: StrategyKind,
    pub from: usize,
    pub to: usize,
    pub amount: Decimal,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
    /// Ledger total as seen by the transferring thread.
    pub total: Decimal,
    pub accounts: usize,
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}: {:.2} Bal: {}:{:.2}, {}:{:.2} Total({}): {:.2}",
            self.thread,
            self.from,
            self.to,
            self.amount,
            self.from,
            self.from_balance,
            self.to,
            self.to_balance,
            self.accounts,
            self.total
        )
    }
}

/// Sink for per-transfer records and periodic totals.
pub trait TransferObserver: Send + Sync {
    /// When `false` the ledger skips building events entirely.
    fn is_enabled(&self) -> bool {
        true
    }

    fn on_transfer(&self, event: &TransferEvent);

    /// Called by the driver on every report tick.
    fn on_total(&self, _total: Decimal, _expected: Decimal) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn is_enabled(&self) -> bool {
        false
    }

    fn on_transfer(&self, _event: &TransferEvent) {}
}

/// Emits one `tracing` event per transfer and per total.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn on_transfer(&self, event: &TransferEvent) {
        tracing::info!(
            target: "banco::transfer",
            thread = %event.thread,
            strategy = %event.strategy,
            from = event.from,
            to = event.to,
            amount = %event.amount,
            from_balance = %event.from_balance,
            to_balance = %event.to_balance,
            total = %event.total,
            "{event}"
        );
    }

    fn on_total(&self, total: Decimal, expected: Decimal) {
        if total == expected {
            tracing::info!(target: "banco::total", %total, "total balance conserved");
        } else {
            tracing::warn!(
                target: "banco::total",
                %total,
                %expected,
                drift = %(total - expected),
                "total balance diverged"
            );
        }
    }
}

/// Collects events in lock-free queues for later inspection.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: SegQueue<TransferEvent>,
    totals: SegQueue<Decimal>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Removes and returns every recorded transfer, oldest first.
    pub fn drain_events(&self) -> Vec<TransferEvent> {
        std::iter::from_fn(|| self.events.pop()).collect()
    }

    /// Removes and returns every recorded total, oldest first.
    pub fn drain_totals(&self) -> Vec<Decimal> {
        std::iter::from_fn(|| self.totals.pop()).collect()
    }
}

impl TransferObserver for RecordingObserver {
    fn on_transfer(&self, event: &TransferEvent) {
        self.events.push(event.clone());
    }

    fn on_total(&self, total: Decimal, _expected: Decimal) {
        self.totals.push(total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_event() -> TransferEvent {
        TransferEvent {
            thread: "T-00".to_string(),
            strategy: StrategyKind::ExplicitLockCondition,
            from: 0,
            to: 1,
            amount: dec!(12.5),
            from_balance: dec!(87.5),
            to_balance: dec!(112.5),
            total: dec!(200),
            accounts: 2,
        }
    }

    #[test]
    fn event_display_matches_console_format() {
        assert_eq!(
            sample_event().to_string(),
            "T-00 0 -> 1: 12.50 Bal: 0:87.50, 1:112.50 Total(2): 200.00"
        );
    }

    #[test]
    fn event_serializes_amounts_as_strings() {
        let json = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(json["strategy"], "explicit-lock-condition");
        assert_eq!(json["amount"], "12.5");
        assert_eq!(json["total"], "200");
    }

    #[test]
    fn recording_observer_drains_in_order() {
        let observer = RecordingObserver::new();
        let mut second = sample_event();
        second.amount = dec!(1);
        observer.on_transfer(&sample_event());
        observer.on_transfer(&second);
        observer.on_total(dec!(200), dec!(200));

        assert_eq!(observer.event_count(), 2);
        let events = observer.drain_events();
        assert_eq!(events[0].amount, dec!(12.5));
        assert_eq!(events[1].amount, dec!(1));
        assert_eq!(observer.event_count(), 0);
        assert_eq!(observer.drain_totals(), vec![dec!(200)]);
    }

    #[test]
    fn noop_observer_is_disabled() {
        assert!(!NoopObserver.is_enabled());
        assert!(TracingObserver.is_enabled());
    }
}
