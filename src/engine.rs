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

//! Settlement engine.
//!
//! The [`SettlementEngine`] wires the ledger, charge orchestrator, billing
//! manager, admission check and subscription coupling over shared state and
//! exposes the settlement API used by the presentation layer.
//!
//! # Flow
//!
//! ```text
//! cancellation / completion
//!     └─► BillingManager  (price from the member's pricing profile)
//!           └─► ChargeOrchestrator  (debit ─► drain ─► bonus)
//!                 ├─► Ledger  (balance + one ledger row per mutation)
//!                 └─► SubscriptionManager  (start pending when balance hits zero)
//! ```
//!
//! # Thread Safety
//!
//! All components are `Send + Sync`. Requests for different members never
//! contend; requests for the same member serialize on each ledger primitive.

use crate::admission::Admission;
use crate::base::{BillingEventId, BookingRef, ClassKind, MemberId, SubscriptionId};
use crate::billing::{BillingEvent, BillingManager};
use crate::booking::Booking;
use crate::clock::{Clock, SystemClock};
use crate::config::BillingConfig;
use crate::ledger::Ledger;
use crate::member::{Member, MemberDirectory, PricingProfile};
use crate::orchestrator::{ChargeOrchestrator, ChargeOutcome};
use crate::subscription::{Subscription, SubscriptionEvent, SubscriptionManager};
use crate::transaction::LedgerTransaction;
use crate::BillingError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

pub struct SettlementEngine {
    members: Arc<MemberDirectory>,
    ledger: Arc<Ledger>,
    subscriptions: Arc<SubscriptionManager>,
    orchestrator: Arc<ChargeOrchestrator>,
    billing: BillingManager,
    admission: Admission,
    config: BillingConfig,
}

impl SettlementEngine {
    /// Creates an engine with the default policy and the system clock.
    pub fn new() -> Self {
        Self::with_config(BillingConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(config: BillingConfig, clock: Arc<dyn Clock>) -> Self {
        let members = Arc::new(MemberDirectory::new());
        let ledger = Arc::new(Ledger::new(clock.clone()));
        let subscriptions = Arc::new(SubscriptionManager::new(
            ledger.clone(),
            members.clone(),
            clock.clone(),
            &config,
        ));
        let orchestrator = Arc::new(ChargeOrchestrator::new(
            ledger.clone(),
            subscriptions.clone(),
            &config,
        ));
        let billing = BillingManager::new(
            members.clone(),
            ledger.clone(),
            orchestrator.clone(),
            subscriptions.clone(),
            clock,
            &config,
        );
        let admission = Admission::new(members.clone(), ledger.clone());

        SettlementEngine {
            members,
            ledger,
            subscriptions,
            orchestrator,
            billing,
            admission,
            config,
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    // === Members ===

    /// Registers a member and opens a zero wallet for them.
    pub fn register_member(&self, member: Member) -> Result<(), BillingError> {
        let member_id = member.id;
        self.members.insert(member)?;
        self.ledger.open_wallet(member_id);
        info!(member = %member_id, "member registered");
        Ok(())
    }

    pub fn member(&self, member_id: MemberId) -> Result<Member, BillingError> {
        self.members.get(member_id)
    }

    pub fn set_pricing(&self, member_id: MemberId, pricing: PricingProfile) -> Result<(), BillingError> {
        self.members.set_pricing(member_id, pricing)
    }

    pub fn set_booking_blocked(&self, member_id: MemberId, blocked: bool) -> Result<(), BillingError> {
        self.members.set_booking_blocked(member_id, blocked)
    }

    pub fn bonus_credits(&self, member_id: MemberId) -> Result<u32, BillingError> {
        self.ledger.bonus_credits(member_id)
    }

    pub fn set_bonus_credits(&self, member_id: MemberId, credits: u32) -> Result<(), BillingError> {
        self.ledger.set_bonus_credits(member_id, credits)
    }

    // === Wallet ===

    pub fn get_balance(&self, member_id: MemberId) -> Result<Decimal, BillingError> {
        self.orchestrator.get_balance(member_id)
    }

    pub fn top_up(
        &self,
        member_id: MemberId,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<LedgerTransaction, BillingError> {
        self.orchestrator.top_up(member_id, amount, reference)
    }

    pub fn refund(
        &self,
        member_id: MemberId,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<LedgerTransaction, BillingError> {
        self.orchestrator.refund(member_id, amount, reference)
    }

    pub fn set_balance(
        &self,
        member_id: MemberId,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<LedgerTransaction, BillingError> {
        self.orchestrator.set_balance(member_id, amount, reference)
    }

    pub fn get_transactions(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<LedgerTransaction>, BillingError> {
        self.orchestrator.get_transactions(member_id)
    }

    pub fn charge_for_booking(
        &self,
        member_id: MemberId,
        amount: Decimal,
        booking: Option<BookingRef>,
    ) -> Result<ChargeOutcome, BillingError> {
        self.orchestrator.charge_for_booking(member_id, amount, booking)
    }

    // === Bookings ===

    /// Pre-booking check. See [`Admission::check`].
    pub fn admit_booking(
        &self,
        member_id: MemberId,
        kind: Option<ClassKind>,
    ) -> Result<Decimal, BillingError> {
        self.admission.check(member_id, kind)
    }

    pub fn create_cancellation_charge(
        &self,
        booking: &Booking,
    ) -> Result<Option<BillingEvent>, BillingError> {
        self.billing.create_cancellation_charge(booking)
    }

    pub fn create_completion_charge(&self, booking: &Booking) -> Result<BillingEvent, BillingError> {
        self.billing.create_completion_charge(booking)
    }

    // === Billing ===

    pub fn settle_as_payment(&self, event_id: BillingEventId) -> Result<BillingEvent, BillingError> {
        self.billing.settle_as_payment(event_id)
    }

    pub fn settle_as_bonus(&self, event_id: BillingEventId) -> Result<BillingEvent, BillingError> {
        self.billing.settle_as_bonus(event_id)
    }

    pub fn settle_as_subscription(
        &self,
        event_id: BillingEventId,
    ) -> Result<BillingEvent, BillingError> {
        self.billing.settle_as_subscription(event_id)
    }

    pub fn mark_as_settled(&self, event_id: BillingEventId) -> Result<BillingEvent, BillingError> {
        self.billing.mark_as_settled(event_id)
    }

    pub fn mark_as_settled_bulk(&self, event_ids: &[BillingEventId]) -> Result<(), BillingError> {
        self.billing.mark_as_settled_bulk(event_ids)
    }

    pub fn billing_event(&self, event_id: BillingEventId) -> Result<BillingEvent, BillingError> {
        self.billing.get_event(event_id)
    }

    pub fn billing_events(&self, member_id: MemberId) -> Result<Vec<BillingEvent>, BillingError> {
        self.billing.billing_events(member_id)
    }

    pub fn get_unsettled_charges(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<BillingEvent>, BillingError> {
        self.billing.unsettled_charges(member_id)
    }

    pub fn calculate_total_owed(&self, member_id: MemberId) -> Result<Decimal, BillingError> {
        self.billing.total_owed(member_id)
    }

    // === Subscriptions ===

    pub fn create_subscription(
        &self,
        member_id: MemberId,
        initial_payment: Decimal,
        months: u32,
    ) -> Result<Subscription, BillingError> {
        self.subscriptions
            .create_subscription(member_id, initial_payment, months)
    }

    pub fn active_subscription(&self, member_id: MemberId) -> Option<Subscription> {
        self.subscriptions.active_subscription(member_id)
    }

    pub fn cancel_subscription(
        &self,
        member_id: MemberId,
        subscription_id: SubscriptionId,
        reason: &str,
    ) -> Result<Subscription, BillingError> {
        self.subscriptions
            .cancel_subscription(member_id, subscription_id, reason)
    }

    pub fn subscription_history(&self, member_id: MemberId) -> Vec<SubscriptionEvent> {
        self.subscriptions.subscription_history(member_id)
    }

    pub fn expire_lapsed_subscriptions(&self, today: NaiveDate) -> Vec<Subscription> {
        self.subscriptions.expire_lapsed(today)
    }
}

impl Default for SettlementEngine {
    fn default() -> Self {
        Self::new()
    }
}
