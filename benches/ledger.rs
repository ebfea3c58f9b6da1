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

//! Benchmarks for the ledger strategies.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded transfer cost per strategy
//! - Reentrant total reads
//! - Thread scaling on a shared ledger
//! - Contention as the account count shrinks

use banco::{Ledger, StrategyKind};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::thread;

// =============================================================================
// Helper Functions
// =============================================================================

/// Large enough that no benchmark ever drains an account.
const OPENING: Decimal = dec!(1000000000);

fn ledger(accounts: usize, kind: StrategyKind) -> Ledger {
    Ledger::new(accounts, OPENING, kind).unwrap()
}

/// Each thread walks the ring of accounts, so every account is debited and
/// credited equally often.
fn ring_transfers(ledger: &Ledger, threads: usize, per_thread: usize) {
    let size = ledger.size();
    thread::scope(|s| {
        for t in 0..threads {
            s.spawn(move || {
                for i in 0..per_thread {
                    let from = (t + i) % size;
                    ledger.transfer(from, (from + 1) % size, dec!(1)).unwrap();
                }
            });
        }
    });
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_single_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_transfer");

    for kind in StrategyKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            let ledger = ledger(2, kind);
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let (from, to) = if flip { (0, 1) } else { (1, 0) };
                ledger.transfer(black_box(from), black_box(to), dec!(1.25)).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_total_balance(c: &mut Criterion) {
    let mut group = c.benchmark_group("total_balance");

    for accounts in [4, 100, 10_000].iter() {
        group.throughput(Throughput::Elements(*accounts as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(accounts),
            accounts,
            |b, &accounts| {
                let ledger = ledger(accounts, StrategyKind::ExplicitLockCondition);
                b.iter(|| black_box(ledger.total_balance()))
            },
        );
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_thread_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_scaling");
    let total_transfers = 8_000usize;

    for kind in [
        StrategyKind::IntrinsicLock,
        StrategyKind::ExplicitLockCondition,
    ] {
        for threads in [1, 2, 4, 8].iter() {
            group.throughput(Throughput::Elements(total_transfers as u64));
            group.bench_with_input(
                BenchmarkId::new(kind.to_string(), threads),
                threads,
                |b, &threads| {
                    b.iter(|| {
                        let ledger = ledger(16, kind);
                        ring_transfers(&ledger, threads, total_transfers / threads);
                        black_box(&ledger);
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");
    let threads = 8usize;
    let per_thread = 1_000usize;

    // One global lock, so the account count only changes which cells are hot.
    for accounts in [2, 16, 1_000].iter() {
        group.throughput(Throughput::Elements((threads * per_thread) as u64));
        group.bench_with_input(
            BenchmarkId::new("accounts", accounts),
            accounts,
            |b, &accounts| {
                b.iter(|| {
                    let ledger = ledger(accounts, StrategyKind::ExplicitLockCondition);
                    ring_transfers(&ledger, threads, per_thread);
                    black_box(&ledger);
                })
            },
        );
    }
    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(single_threaded, bench_single_transfer, bench_total_balance,);

criterion_group!(scaling, bench_thread_scaling, bench_contention,);

criterion_main!(single_threaded, scaling);
