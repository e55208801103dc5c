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

//! Settlement engine public API integration tests.

use chrono::{NaiveDate, NaiveDateTime};
use gym_wallet_rs::{
    BillingConfig, BillingError, BookingRef, FixedClock, Member, MemberId, SettlementEngine,
    SubscriptionStatus, TransactionKind,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 2)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn engine_with(balance: Decimal, bonus: u32) -> SettlementEngine {
    let engine =
        SettlementEngine::with_config(BillingConfig::default(), Arc::new(FixedClock::new(noon())));
    engine
        .register_member(Member::new(MemberId(1), "Ana"))
        .unwrap();
    if balance > Decimal::ZERO {
        engine.top_up(MemberId(1), balance, None).unwrap();
    }
    engine.set_bonus_credits(MemberId(1), bonus).unwrap();
    engine
}

#[test]
fn zero_charge_is_a_no_op() {
    let engine = engine_with(dec!(20.00), 2);
    let before = engine.get_transactions(MemberId(1)).unwrap();

    let outcome = engine
        .charge_for_booking(MemberId(1), Decimal::ZERO, Some(BookingRef(1)))
        .unwrap();

    assert!(outcome.fully_settled);
    assert!(!outcome.bonus_consumed);
    assert_eq!(outcome.charged_amount, Decimal::ZERO);
    assert_eq!(engine.get_balance(MemberId(1)).unwrap(), dec!(20.00));
    assert_eq!(engine.bonus_credits(MemberId(1)).unwrap(), 2);
    assert_eq!(engine.get_transactions(MemberId(1)).unwrap(), before);
}

#[test]
fn full_debit() {
    let engine = engine_with(dec!(100.00), 0);

    let outcome = engine
        .charge_for_booking(MemberId(1), dec!(40.00), Some(BookingRef(3)))
        .unwrap();

    assert!(outcome.fully_settled);
    assert!(!outcome.bonus_consumed);
    assert_eq!(outcome.charged_amount, dec!(40.00));
    assert_eq!(engine.get_balance(MemberId(1)).unwrap(), dec!(60.00));

    let charges: Vec<_> = engine
        .get_transactions(MemberId(1))
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Charge)
        .collect();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].signed_amount, dec!(-40.00));
    assert_eq!(charges[0].reference.as_deref(), Some("booking:3"));
}

#[test]
fn bonus_fallback_after_partial_drain() {
    let engine = engine_with(dec!(10.00), 1);

    let outcome = engine
        .charge_for_booking(MemberId(1), dec!(40.00), Some(BookingRef(4)))
        .unwrap();

    assert!(outcome.fully_settled);
    assert!(outcome.bonus_consumed);
    assert_eq!(outcome.charged_amount, dec!(10.00));
    assert_eq!(engine.get_balance(MemberId(1)).unwrap(), Decimal::ZERO);
    assert_eq!(engine.bonus_credits(MemberId(1)).unwrap(), 0);

    let latest = &engine.get_transactions(MemberId(1)).unwrap()[0];
    assert_eq!(latest.kind, TransactionKind::ChargePartial);
    assert_eq!(latest.signed_amount, dec!(-10.00));
}

#[test]
fn bonus_alone_covers_charge_on_empty_wallet() {
    let engine = engine_with(Decimal::ZERO, 3);

    let outcome = engine
        .charge_for_booking(MemberId(1), dec!(25.00), None)
        .unwrap();

    assert!(outcome.fully_settled);
    assert!(outcome.bonus_consumed);
    assert_eq!(outcome.charged_amount, Decimal::ZERO);
    assert_eq!(engine.bonus_credits(MemberId(1)).unwrap(), 2);
    assert!(engine.get_transactions(MemberId(1)).unwrap().is_empty());
}

#[test]
fn unsettled_when_nothing_to_pay_with() {
    let engine = engine_with(Decimal::ZERO, 0);

    let outcome = engine
        .charge_for_booking(MemberId(1), dec!(25.00), None)
        .unwrap();

    assert!(!outcome.fully_settled);
    assert!(!outcome.bonus_consumed);
    assert_eq!(outcome.charged_amount, Decimal::ZERO);
    assert!(engine.get_transactions(MemberId(1)).unwrap().is_empty());
}

#[test]
fn charge_unknown_member_returns_error() {
    let engine = engine_with(Decimal::ZERO, 0);
    assert_eq!(
        engine.charge_for_booking(MemberId(99), dec!(5.00), None),
        Err(BillingError::MemberNotFound(MemberId(99)))
    );
}

#[test]
fn set_balance_records_delta() {
    let engine = engine_with(dec!(50.00), 0);

    let row = engine
        .set_balance(MemberId(1), dec!(80.00), Some("admin correction".into()))
        .unwrap();

    assert_eq!(row.kind, TransactionKind::Set);
    assert_eq!(row.signed_amount, dec!(30.00));
    assert_eq!(engine.get_balance(MemberId(1)).unwrap(), dec!(80.00));
    assert_eq!(engine.ledger().replay(MemberId(1)).unwrap(), dec!(80.00));
}

#[test]
fn ledger_replay_matches_balance_after_mixed_operations() {
    let engine = engine_with(dec!(100.00), 1);
    engine
        .charge_for_booking(MemberId(1), dec!(30.00), None)
        .unwrap();
    engine.refund(MemberId(1), dec!(5.00), None).unwrap();
    engine
        .charge_for_booking(MemberId(1), dec!(200.00), None)
        .unwrap();
    engine.set_balance(MemberId(1), dec!(12.34), None).unwrap();
    engine.top_up(MemberId(1), dec!(0.66), None).unwrap();

    assert_eq!(engine.get_balance(MemberId(1)).unwrap(), dec!(13.00));
    assert_eq!(engine.ledger().replay(MemberId(1)).unwrap(), dec!(13.00));
}

#[test]
fn duplicate_member_registration_fails() {
    let engine = engine_with(Decimal::ZERO, 0);
    assert_eq!(
        engine.register_member(Member::new(MemberId(1), "Ana")),
        Err(BillingError::DuplicateMember(MemberId(1)))
    );
}

#[test]
fn draining_charge_starts_pending_subscription() {
    let engine = engine_with(dec!(15.00), 1);
    let pending = engine
        .create_subscription(MemberId(1), dec!(90.00), 2)
        .unwrap();
    assert_eq!(pending.status, SubscriptionStatus::Pending);

    // Short balance: partial drain to zero, then bonus.
    engine
        .charge_for_booking(MemberId(1), dec!(20.00), None)
        .unwrap();

    let active = engine.active_subscription(MemberId(1)).unwrap();
    assert_eq!(active.id, pending.id);
    assert_eq!(active.start_date, Some(noon().date()));
    assert_eq!(active.end_date, NaiveDate::from_ymd_opt(2025, 8, 2));
}
