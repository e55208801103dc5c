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

//! Concurrent charge tests.
//!
//! These run the real engine from many threads with parking_lot's deadlock
//! detector watching the lock graph, then check that no money was spent
//! twice and that every ledger still replays to its balance.

use gym_wallet_rs::{
    BillingConfig, FixedClock, Member, MemberId, SettlementEngine, SubscriptionStatus,
    TransactionKind,
};
use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

fn engine_with_members(count: u32) -> Arc<SettlementEngine> {
    let clock = Arc::new(FixedClock::new(
        chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap(),
    ));
    let engine = SettlementEngine::with_config(BillingConfig::default(), clock);
    for id in 1..=count {
        engine
            .register_member(Member::new(MemberId(id), format!("member-{id}")))
            .unwrap();
    }
    Arc::new(engine)
}

// === Tests ===

/// Two simultaneous charges for the whole balance: exactly one debits it.
#[test]
fn concurrent_full_charges_never_double_spend() {
    for _ in 0..200 {
        let engine = engine_with_members(1);
        engine.top_up(MemberId(1), dec!(50.00), None).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine
                        .charge_for_booking(MemberId(1), dec!(50.00), None)
                        .unwrap()
                })
            })
            .collect();
        let outcomes: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("Thread panicked"))
            .collect();

        let settled = outcomes.iter().filter(|o| o.fully_settled).count();
        assert_eq!(settled, 1);
        let loser = outcomes.iter().find(|o| !o.fully_settled).unwrap();
        assert_eq!(loser.charged_amount, Decimal::ZERO);
        assert!(!loser.bonus_consumed);

        assert_eq!(engine.get_balance(MemberId(1)).unwrap(), Decimal::ZERO);
        let rows = engine.get_transactions(MemberId(1)).unwrap();
        assert_eq!(
            rows.iter()
                .filter(|r| r.kind == TransactionKind::Charge)
                .count(),
            1
        );
        assert!(rows.iter().all(|r| r.kind != TransactionKind::ChargePartial));
    }
}

/// Many small charges against one wallet while top-ups land concurrently.
#[test]
fn no_deadlock_high_contention_single_wallet() {
    let detector = start_deadlock_detector();
    let engine = engine_with_members(1);
    engine.top_up(MemberId(1), dec!(100.00), None).unwrap();
    engine.set_bonus_credits(MemberId(1), 25).unwrap();

    const NUM_THREADS: usize = 32;
    const OPS_PER_THREAD: usize = 100;

    let total_topped_up = Arc::new(parking_lot::Mutex::new(dec!(100.00)));
    let bonus_used = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::with_capacity(NUM_THREADS);

    for t in 0..NUM_THREADS {
        let engine = engine.clone();
        let total_topped_up = total_topped_up.clone();
        let bonus_used = bonus_used.clone();

        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                match (t + i) % 4 {
                    0 => {
                        engine.top_up(MemberId(1), dec!(3.00), None).unwrap();
                        *total_topped_up.lock() += dec!(3.00);
                    }
                    1 | 2 => {
                        let outcome = engine
                            .charge_for_booking(MemberId(1), dec!(4.50), None)
                            .unwrap();
                        if outcome.bonus_consumed {
                            bonus_used.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    _ => {
                        let _ = engine.get_balance(MemberId(1));
                        let _ = engine.get_transactions(MemberId(1));
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let balance = engine.get_balance(MemberId(1)).unwrap();
    assert!(balance >= Decimal::ZERO);
    assert_eq!(engine.ledger().replay(MemberId(1)).unwrap(), balance);

    // Everything that left the wallet is a recorded charge.
    let spent: Decimal = engine
        .get_transactions(MemberId(1))
        .unwrap()
        .iter()
        .filter(|r| r.is_debit())
        .map(|r| -r.signed_amount)
        .sum();
    assert_eq!(*total_topped_up.lock() - spent, balance);

    let remaining_bonus = engine.bonus_credits(MemberId(1)).unwrap() as usize;
    assert_eq!(remaining_bonus + bonus_used.load(Ordering::SeqCst), 25);
}

/// Members are independent: charges for different members run in parallel.
#[test]
fn no_deadlock_many_members() {
    let detector = start_deadlock_detector();
    const MEMBERS: u32 = 16;
    let engine = engine_with_members(MEMBERS);
    for id in 1..=MEMBERS {
        engine.top_up(MemberId(id), dec!(100.00), None).unwrap();
        engine
            .create_subscription(MemberId(id), dec!(50.00), 1)
            .unwrap();
    }

    let handles: Vec<_> = (1..=MEMBERS)
        .flat_map(|id| {
            (0..4).map({
                let engine = engine.clone();
                move |_| {
                    let engine = engine.clone();
                    thread::spawn(move || {
                        for _ in 0..5 {
                            engine
                                .charge_for_booking(MemberId(id), dec!(5.00), None)
                                .unwrap();
                        }
                    })
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // 4 threads x 5 charges x 5.00 drains each wallet exactly.
    for id in 1..=MEMBERS {
        assert_eq!(engine.get_balance(MemberId(id)).unwrap(), Decimal::ZERO);
        assert_eq!(engine.ledger().replay(MemberId(id)).unwrap(), Decimal::ZERO);
        let sub = engine.active_subscription(MemberId(id)).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }
}
