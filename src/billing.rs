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

//! Billing events.
//!
//! A [`BillingEvent`] records what a member owes for a same-day cancellation
//! or a completed class, and how (or whether) it was settled. Events are never
//! deleted; only `settled` and `settlement_type` change after creation.

use crate::base::{BillingEventId, BookingRef, MemberId};
use crate::booking::Booking;
use crate::clock::Clock;
use crate::config::BillingConfig;
use crate::ledger::Ledger;
use crate::member::MemberDirectory;
use crate::orchestrator::{ChargeOrchestrator, ChargeOutcome};
use crate::subscription::SubscriptionManager;
use crate::BillingError;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementType {
    None,
    Payment,
    Bonus,
    Subscription,
}

impl From<&ChargeOutcome> for SettlementType {
    fn from(outcome: &ChargeOutcome) -> Self {
        if outcome.bonus_consumed {
            SettlementType::Bonus
        } else if outcome.fully_settled {
            SettlementType::Payment
        } else {
            SettlementType::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: BillingEventId,
    pub member_id: MemberId,
    pub booking_ref: Option<BookingRef>,
    /// Full amount owed, regardless of how much cash was collected.
    pub amount: Decimal,
    pub reason: String,
    pub event_date: NaiveDateTime,
    pub settled: bool,
    pub settlement_type: SettlementType,
}

pub struct BillingManager {
    events: DashMap<BillingEventId, BillingEvent>,
    sequence: AtomicU64,
    members: Arc<MemberDirectory>,
    ledger: Arc<Ledger>,
    orchestrator: Arc<ChargeOrchestrator>,
    subscriptions: Arc<SubscriptionManager>,
    clock: Arc<dyn Clock>,
    same_day_threshold_hours: i64,
}

impl BillingManager {
    pub fn new(
        members: Arc<MemberDirectory>,
        ledger: Arc<Ledger>,
        orchestrator: Arc<ChargeOrchestrator>,
        subscriptions: Arc<SubscriptionManager>,
        clock: Arc<dyn Clock>,
        config: &BillingConfig,
    ) -> Self {
        Self {
            events: DashMap::new(),
            sequence: AtomicU64::new(0),
            members,
            ledger,
            orchestrator,
            subscriptions,
            clock,
            same_day_threshold_hours: config.same_day_threshold_hours,
        }
    }

    /// Price of a class kind for this member.
    pub fn charge_amount_for(&self, booking: &Booking) -> Result<Decimal, BillingError> {
        let member = self.members.get(booking.member_id)?;
        Ok(member.pricing.charge_for(booking.class.kind))
    }

    /// Bills a member-initiated cancellation.
    ///
    /// Only cancellations made fewer than the threshold's whole hours before
    /// class start are billed; otherwise returns `Ok(None)`. A billed
    /// cancellation also counts against the member's active subscription.
    pub fn create_cancellation_charge(
        &self,
        booking: &Booking,
    ) -> Result<Option<BillingEvent>, BillingError> {
        let cancelled_at = booking.cancelled_at.unwrap_or_else(|| self.clock.now());
        let hours_before = (booking.class.start_time - cancelled_at).num_hours();

        if hours_before >= self.same_day_threshold_hours {
            debug!(
                booking = %booking.booking_ref,
                hours_before,
                "cancellation outside same-day window, not billed"
            );
            return Ok(None);
        }

        let event = self.charge(
            booking,
            format!("Same-day cancellation (cancelled {hours_before} hours before class)"),
        )?;
        self.subscriptions
            .record_late_cancellation(booking.member_id)?;
        Ok(Some(event))
    }

    /// Bills a completed class. No time window applies.
    pub fn create_completion_charge(&self, booking: &Booking) -> Result<BillingEvent, BillingError> {
        self.charge(booking, "Class completed".to_string())
    }

    fn charge(&self, booking: &Booking, reason: String) -> Result<BillingEvent, BillingError> {
        let amount = self.charge_amount_for(booking)?;
        let outcome = self.orchestrator.charge_for_booking(
            booking.member_id,
            amount,
            Some(booking.booking_ref),
        )?;

        let id = BillingEventId(self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let event = BillingEvent {
            id,
            member_id: booking.member_id,
            booking_ref: Some(booking.booking_ref),
            amount,
            reason,
            event_date: self.clock.now(),
            settled: outcome.fully_settled,
            settlement_type: SettlementType::from(&outcome),
        };
        self.events.insert(id, event.clone());
        info!(
            event = %id,
            member = %booking.member_id,
            %amount,
            settled = event.settled,
            settlement = ?event.settlement_type,
            "billing event created"
        );
        Ok(event)
    }

    fn update<F>(&self, event_id: BillingEventId, f: F) -> Result<BillingEvent, BillingError>
    where
        F: FnOnce(&mut BillingEvent),
    {
        let mut event = self
            .events
            .get_mut(&event_id)
            .ok_or(BillingError::BillingEventNotFound(event_id))?;
        f(&mut event);
        Ok(event.clone())
    }

    fn member_of(&self, event_id: BillingEventId) -> Result<MemberId, BillingError> {
        self.events
            .get(&event_id)
            .map(|e| e.member_id)
            .ok_or(BillingError::BillingEventNotFound(event_id))
    }

    /// Marks the event paid out of band. The ledger is not touched.
    pub fn settle_as_payment(&self, event_id: BillingEventId) -> Result<BillingEvent, BillingError> {
        let event = self.update(event_id, |e| {
            e.settled = true;
            e.settlement_type = SettlementType::Payment;
        })?;
        info!(event = %event_id, "billing event settled as payment");
        Ok(event)
    }

    /// Redeems one of the member's bonus credits against the event.
    ///
    /// The event's current state is not checked: settling an event that is
    /// already settled, even by bonus, spends another credit.
    ///
    /// # Errors
    ///
    /// - [`BillingError::BillingEventNotFound`] - Unknown event.
    /// - [`BillingError::NoBonusCredits`] - Member has no bonus credit left.
    pub fn settle_as_bonus(&self, event_id: BillingEventId) -> Result<BillingEvent, BillingError> {
        let member_id = self.member_of(event_id)?;
        if !self.ledger.decrement_bonus_if_positive(member_id)? {
            return Err(BillingError::NoBonusCredits);
        }
        let event = self.update(event_id, |e| {
            e.settled = true;
            e.settlement_type = SettlementType::Bonus;
        })?;
        info!(event = %event_id, member = %member_id, "billing event settled with bonus credit");
        Ok(event)
    }

    /// Marks the event covered by the member's running subscription.
    pub fn settle_as_subscription(
        &self,
        event_id: BillingEventId,
    ) -> Result<BillingEvent, BillingError> {
        let member_id = self.member_of(event_id)?;
        if self.subscriptions.active_subscription(member_id).is_none() {
            return Err(BillingError::NoActiveSubscription);
        }
        let event = self.update(event_id, |e| {
            e.settled = true;
            e.settlement_type = SettlementType::Subscription;
        })?;
        info!(event = %event_id, member = %member_id, "billing event settled by subscription");
        Ok(event)
    }

    /// Marks the event settled, defaulting the settlement type to payment.
    pub fn mark_as_settled(&self, event_id: BillingEventId) -> Result<BillingEvent, BillingError> {
        self.update(event_id, |e| {
            e.settled = true;
            if e.settlement_type == SettlementType::None {
                e.settlement_type = SettlementType::Payment;
            }
        })
    }

    /// Settles every listed event, or none if any ID is unknown.
    pub fn mark_as_settled_bulk(&self, event_ids: &[BillingEventId]) -> Result<(), BillingError> {
        if let Some(missing) = event_ids.iter().find(|id| !self.events.contains_key(*id)) {
            return Err(BillingError::BillingEventNotFound(*missing));
        }
        for &id in event_ids {
            self.mark_as_settled(id)?;
        }
        info!(count = event_ids.len(), "billing events settled in bulk");
        Ok(())
    }

    pub fn get_event(&self, event_id: BillingEventId) -> Result<BillingEvent, BillingError> {
        self.events
            .get(&event_id)
            .map(|e| e.clone())
            .ok_or(BillingError::BillingEventNotFound(event_id))
    }

    /// All events for the member, oldest first.
    pub fn billing_events(&self, member_id: MemberId) -> Result<Vec<BillingEvent>, BillingError> {
        self.members.get(member_id)?;
        let mut events: Vec<BillingEvent> = self
            .events
            .iter()
            .filter(|e| e.member_id == member_id)
            .map(|e| e.clone())
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    /// Events the member still owes, read fresh on every call.
    pub fn unsettled_charges(&self, member_id: MemberId) -> Result<Vec<BillingEvent>, BillingError> {
        let mut events = self.billing_events(member_id)?;
        events.retain(|e| !e.settled);
        Ok(events)
    }

    pub fn total_owed(&self, member_id: MemberId) -> Result<Decimal, BillingError> {
        Ok(self
            .unsettled_charges(member_id)?
            .iter()
            .map(|e| e.amount)
            .sum())
    }
}
