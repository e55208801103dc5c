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

//! Subscriptions and their coupling to the wallet.
//!
//! A subscription bought while the member still has prepaid balance waits in
//! [`Pending`](SubscriptionStatus::Pending) so the balance is consumed first.
//! The charge path calls [`SubscriptionManager::start_pending`] whenever a
//! charge drains the balance to zero.
//!
//! ```text
//!  Pending ──balance drained──► Active ──end date passed──► Expired
//!                                 │
//!                                 ├──admin cancel──────────► Cancelled
//!                                 └──Nth late cancellation─► Cancelled + member blocked
//! ```

use crate::base::{MemberId, SubscriptionId};
use crate::clock::Clock;
use crate::config::BillingConfig;
use crate::ledger::Ledger;
use crate::member::MemberDirectory;
use crate::wallet::has_money_scale;
use crate::BillingError;
use chrono::{Months, NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub member_id: MemberId,
    pub status: SubscriptionStatus,
    pub initial_payment: Decimal,
    pub months: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub late_cancellations: u32,
}

impl Subscription {
    fn activate(&mut self, today: NaiveDate) {
        self.status = SubscriptionStatus::Active;
        self.start_date = Some(today);
        self.end_date = Some(add_months(today, self.months));
    }

    fn cancel(&mut self, today: NaiveDate) {
        self.status = SubscriptionStatus::Cancelled;
        self.end_date = Some(today);
    }
}

fn add_months(start: NaiveDate, months: u32) -> NaiveDate {
    start
        .checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionEventKind {
    Created,
    Started,
    Cancelled,
    LateCancellation,
    AutoCancelled,
    Expired,
}

/// Audit trail entry for a subscription transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub subscription_id: SubscriptionId,
    pub kind: SubscriptionEventKind,
    pub detail: String,
    pub at: NaiveDateTime,
}

#[derive(Debug, Default)]
struct MemberSubscriptions {
    /// Oldest first.
    subscriptions: Vec<Subscription>,
    history: Vec<SubscriptionEvent>,
}

impl MemberSubscriptions {
    fn find(&mut self, status: SubscriptionStatus) -> Option<&mut Subscription> {
        self.subscriptions.iter_mut().find(|s| s.status == status)
    }

    fn record(
        &mut self,
        subscription_id: SubscriptionId,
        kind: SubscriptionEventKind,
        detail: String,
        at: NaiveDateTime,
    ) {
        self.history.push(SubscriptionEvent {
            subscription_id,
            kind,
            detail,
            at,
        });
    }
}

pub struct SubscriptionManager {
    records: DashMap<MemberId, MemberSubscriptions>,
    sequence: AtomicU64,
    ledger: Arc<Ledger>,
    members: Arc<MemberDirectory>,
    clock: Arc<dyn Clock>,
    late_cancellation_limit: u32,
}

impl SubscriptionManager {
    pub fn new(
        ledger: Arc<Ledger>,
        members: Arc<MemberDirectory>,
        clock: Arc<dyn Clock>,
        config: &BillingConfig,
    ) -> Self {
        Self {
            records: DashMap::new(),
            sequence: AtomicU64::new(0),
            ledger,
            members,
            clock,
            late_cancellation_limit: config.late_cancellation_limit,
        }
    }

    /// Creates a subscription, `Active` from today if the balance is already
    /// zero, `Pending` otherwise.
    ///
    /// # Errors
    ///
    /// - [`BillingError::MemberNotFound`] - Unknown member.
    /// - [`BillingError::InvalidMonths`] - `months` is zero.
    /// - [`BillingError::InvalidAmount`] - `initial_payment` is negative or finer than a cent.
    /// - [`BillingError::ActiveSubscriptionExists`] - Member already has one running.
    /// - [`BillingError::PendingSubscriptionExists`] - Member already has one waiting.
    pub fn create_subscription(
        &self,
        member_id: MemberId,
        initial_payment: Decimal,
        months: u32,
    ) -> Result<Subscription, BillingError> {
        if months == 0 {
            return Err(BillingError::InvalidMonths);
        }
        if initial_payment < Decimal::ZERO || !has_money_scale(initial_payment) {
            return Err(BillingError::InvalidAmount);
        }
        self.members.get(member_id)?;

        let mut record = self.records.entry(member_id).or_default();
        if record.find(SubscriptionStatus::Active).is_some() {
            return Err(BillingError::ActiveSubscriptionExists);
        }
        if record.find(SubscriptionStatus::Pending).is_some() {
            return Err(BillingError::PendingSubscriptionExists);
        }

        // Read under the member's subscription lock so a concurrent drain
        // either sees this subscription as pending or we see the zero balance.
        let balance = self.ledger.balance(member_id)?;
        let now = self.clock.now();
        let id = SubscriptionId(self.sequence.fetch_add(1, Ordering::Relaxed) + 1);

        let mut subscription = Subscription {
            id,
            member_id,
            status: SubscriptionStatus::Pending,
            initial_payment,
            months,
            start_date: None,
            end_date: None,
            late_cancellations: 0,
        };
        if balance <= Decimal::ZERO {
            subscription.activate(now.date());
        }

        record.subscriptions.push(subscription.clone());
        record.record(
            id,
            SubscriptionEventKind::Created,
            format!(
                "initial_payment={initial_payment}, months={months}, status={:?}",
                subscription.status
            ),
            now,
        );
        info!(member = %member_id, subscription = %id, status = ?subscription.status, "subscription created");
        Ok(subscription)
    }

    /// Starts the member's pending subscription, if any. Called after a
    /// charge leaves the balance at zero.
    ///
    /// A member never holds two active subscriptions: while one is running
    /// the pending one keeps waiting.
    pub fn start_pending(&self, member_id: MemberId) -> Option<Subscription> {
        let mut record = self.records.get_mut(&member_id)?;
        if record.find(SubscriptionStatus::Active).is_some() {
            return None;
        }
        let now = self.clock.now();
        let subscription = record.find(SubscriptionStatus::Pending)?;
        subscription.activate(now.date());
        let started = subscription.clone();
        record.record(
            started.id,
            SubscriptionEventKind::Started,
            "started after wallet drained".to_string(),
            now,
        );
        info!(member = %member_id, subscription = %started.id, end_date = ?started.end_date, "pending subscription started");
        Some(started)
    }

    /// Counts a same-day cancellation against the active subscription.
    ///
    /// Reaching the configured limit cancels the subscription and blocks the
    /// member from booking. Returns the updated subscription, or `None` if the
    /// member has no active subscription.
    pub fn record_late_cancellation(
        &self,
        member_id: MemberId,
    ) -> Result<Option<Subscription>, BillingError> {
        let Some(mut record) = self.records.get_mut(&member_id) else {
            return Ok(None);
        };
        let now = self.clock.now();
        let limit = self.late_cancellation_limit;
        let Some(subscription) = record.find(SubscriptionStatus::Active) else {
            return Ok(None);
        };

        subscription.late_cancellations += 1;
        let count = subscription.late_cancellations;
        let auto_cancel = count >= limit;
        if auto_cancel {
            subscription.cancel(now.date());
        }
        let updated = subscription.clone();

        if auto_cancel {
            self.members.set_booking_blocked(member_id, true)?;
            record.record(
                updated.id,
                SubscriptionEventKind::AutoCancelled,
                format!("late_cancellations={count}"),
                now,
            );
            warn!(member = %member_id, subscription = %updated.id, count, "subscription cancelled after late cancellations, member blocked");
        } else {
            record.record(
                updated.id,
                SubscriptionEventKind::LateCancellation,
                format!("late_cancellations={count}"),
                now,
            );
            info!(member = %member_id, subscription = %updated.id, count, "late cancellation recorded");
        }
        Ok(Some(updated))
    }

    /// Administrative cancellation.
    pub fn cancel_subscription(
        &self,
        member_id: MemberId,
        subscription_id: SubscriptionId,
        reason: &str,
    ) -> Result<Subscription, BillingError> {
        let mut record = self
            .records
            .get_mut(&member_id)
            .ok_or(BillingError::SubscriptionNotFound(subscription_id))?;
        let now = self.clock.now();
        let subscription = record
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .ok_or(BillingError::SubscriptionNotFound(subscription_id))?;
        subscription.cancel(now.date());
        let cancelled = subscription.clone();
        record.record(
            subscription_id,
            SubscriptionEventKind::Cancelled,
            reason.to_string(),
            now,
        );
        info!(member = %member_id, subscription = %subscription_id, reason, "subscription cancelled");
        Ok(cancelled)
    }

    /// Moves active subscriptions whose end date is before `today` to
    /// `Expired`. Returns the subscriptions that expired.
    pub fn expire_lapsed(&self, today: NaiveDate) -> Vec<Subscription> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for mut record in self.records.iter_mut() {
            let lapsed: Vec<SubscriptionId> = record
                .subscriptions
                .iter_mut()
                .filter(|s| {
                    s.status == SubscriptionStatus::Active
                        && s.end_date.is_some_and(|end| end < today)
                })
                .map(|s| {
                    s.status = SubscriptionStatus::Expired;
                    expired.push(s.clone());
                    s.id
                })
                .collect();
            for id in lapsed {
                record.record(id, SubscriptionEventKind::Expired, String::new(), now);
            }
        }
        expired
    }

    pub fn active_subscription(&self, member_id: MemberId) -> Option<Subscription> {
        self.records.get(&member_id).and_then(|record| {
            record
                .subscriptions
                .iter()
                .find(|s| s.status == SubscriptionStatus::Active)
                .cloned()
        })
    }

    /// All subscriptions for the member, oldest first.
    pub fn subscriptions(&self, member_id: MemberId) -> Vec<Subscription> {
        self.records
            .get(&member_id)
            .map(|record| record.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Transition history for the member, newest first.
    pub fn subscription_history(&self, member_id: MemberId) -> Vec<SubscriptionEvent> {
        self.records
            .get(&member_id)
            .map(|record| record.history.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::member::Member;
    use crate::transaction::TransactionKind;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    fn setup() -> (SubscriptionManager, Arc<Ledger>, Arc<MemberDirectory>) {
        let clock: Arc<dyn Clock> =
            Arc::new(FixedClock::new(today().and_hms_opt(10, 0, 0).unwrap()));
        let ledger = Arc::new(Ledger::new(clock.clone()));
        let members = Arc::new(MemberDirectory::new());
        members.insert(Member::new(MemberId(1), "Ana")).unwrap();
        ledger.open_wallet(MemberId(1));
        let manager = SubscriptionManager::new(
            ledger.clone(),
            members.clone(),
            clock,
            &BillingConfig::default(),
        );
        (manager, ledger, members)
    }

    #[test]
    fn end_date_clamps_to_month_end() {
        assert_eq!(
            add_months(today(), 1),
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
        );
    }

    #[test]
    fn zero_balance_starts_immediately() {
        let (manager, _, _) = setup();
        let sub = manager
            .create_subscription(MemberId(1), dec!(120.00), 3)
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.start_date, Some(today()));
        assert_eq!(sub.end_date, NaiveDate::from_ymd_opt(2025, 4, 30));
    }

    #[test]
    fn positive_balance_waits() {
        let (manager, ledger, _) = setup();
        ledger
            .credit(MemberId(1), dec!(5.00), TransactionKind::Topup, None)
            .unwrap();
        let sub = manager
            .create_subscription(MemberId(1), dec!(120.00), 3)
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Pending);
        assert_eq!(sub.start_date, None);

        let started = manager.start_pending(MemberId(1)).unwrap();
        assert_eq!(started.status, SubscriptionStatus::Active);
        assert_eq!(started.start_date, Some(today()));
        assert!(manager.start_pending(MemberId(1)).is_none());
    }

    #[test]
    fn second_active_subscription_is_rejected() {
        let (manager, _, _) = setup();
        manager.create_subscription(MemberId(1), dec!(0), 1).unwrap();
        assert_eq!(
            manager.create_subscription(MemberId(1), dec!(0), 1),
            Err(BillingError::ActiveSubscriptionExists)
        );
    }

    #[test]
    fn second_pending_subscription_is_rejected() {
        let (manager, ledger, _) = setup();
        ledger
            .credit(MemberId(1), dec!(10.00), TransactionKind::Topup, None)
            .unwrap();
        manager.create_subscription(MemberId(1), dec!(90.00), 1).unwrap();

        assert_eq!(
            manager.create_subscription(MemberId(1), dec!(90.00), 1),
            Err(BillingError::PendingSubscriptionExists)
        );
        assert_eq!(manager.subscriptions(MemberId(1)).len(), 1);
    }

    #[test]
    fn start_pending_waits_while_one_is_active() {
        let (manager, ledger, _) = setup();
        manager.create_subscription(MemberId(1), dec!(0), 1).unwrap();
        // A pending record left behind next to a running one.
        ledger
            .credit(MemberId(1), dec!(5.00), TransactionKind::Topup, None)
            .unwrap();
        manager
            .records
            .get_mut(&MemberId(1))
            .unwrap()
            .subscriptions
            .push(Subscription {
                id: SubscriptionId(50),
                member_id: MemberId(1),
                status: SubscriptionStatus::Pending,
                initial_payment: dec!(40.00),
                months: 1,
                start_date: None,
                end_date: None,
                late_cancellations: 0,
            });

        assert!(manager.start_pending(MemberId(1)).is_none());
        let statuses: Vec<_> = manager
            .subscriptions(MemberId(1))
            .iter()
            .map(|s| s.status)
            .collect();
        assert_eq!(
            statuses,
            vec![SubscriptionStatus::Active, SubscriptionStatus::Pending]
        );
    }

    #[test]
    fn zero_months_is_invalid() {
        let (manager, _, _) = setup();
        assert_eq!(
            manager.create_subscription(MemberId(1), dec!(10), 0),
            Err(BillingError::InvalidMonths)
        );
    }

    #[test]
    fn limit_reached_cancels_and_blocks() {
        let (manager, _, members) = setup();
        manager.create_subscription(MemberId(1), dec!(0), 1).unwrap();

        for expected in 1..4 {
            let sub = manager.record_late_cancellation(MemberId(1)).unwrap().unwrap();
            assert_eq!(sub.late_cancellations, expected);
            assert_eq!(sub.status, SubscriptionStatus::Active);
        }
        assert!(!members.get(MemberId(1)).unwrap().booking_blocked);

        let sub = manager.record_late_cancellation(MemberId(1)).unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert_eq!(sub.end_date, Some(today()));
        assert!(members.get(MemberId(1)).unwrap().booking_blocked);
        assert_eq!(
            manager.subscription_history(MemberId(1))[0].kind,
            SubscriptionEventKind::AutoCancelled
        );

        // Nothing active left to count against.
        assert_eq!(manager.record_late_cancellation(MemberId(1)).unwrap(), None);
    }

    #[test]
    fn expire_lapsed_moves_past_end_date() {
        let (manager, _, _) = setup();
        manager.create_subscription(MemberId(1), dec!(0), 1).unwrap();

        assert!(manager
            .expire_lapsed(NaiveDate::from_ymd_opt(2025, 2, 28).unwrap())
            .is_empty());
        let expired = manager.expire_lapsed(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, SubscriptionStatus::Expired);
        assert!(manager.active_subscription(MemberId(1)).is_none());
    }

    #[test]
    fn cancel_unknown_subscription() {
        let (manager, _, _) = setup();
        assert_eq!(
            manager.cancel_subscription(MemberId(1), SubscriptionId(99), "typo"),
            Err(BillingError::SubscriptionNotFound(SubscriptionId(99)))
        );
    }
}
