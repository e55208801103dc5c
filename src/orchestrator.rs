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

//! Charge settlement.
//!
//! [`ChargeOrchestrator::charge_for_booking`] resolves a charge against the
//! member's wallet in this order:
//!
//! 1. A zero charge is settled without touching the ledger.
//! 2. Full debit if the balance covers the charge (`CHARGE` row).
//! 3. Otherwise drain whatever is left with compare-and-set, retrying a
//!    bounded number of times when the balance moves under us
//!    (`CHARGE_PARTIAL` row). A lost race past the cap leaves the balance
//!    untouched for this call.
//! 4. Consume one bonus credit. One credit settles the whole charge, even
//!    when only part of it was covered in cash.
//! 5. Otherwise the charge is left unsettled.
//!
//! Insufficient funds is never an error here; it is `fully_settled == false`.
//! Any charge that leaves the balance at zero starts a pending subscription.

use crate::base::{BookingRef, MemberId};
use crate::config::BillingConfig;
use crate::ledger::Ledger;
use crate::subscription::SubscriptionManager;
use crate::transaction::{LedgerTransaction, TransactionKind};
use crate::wallet::has_money_scale;
use crate::BillingError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub fully_settled: bool,
    pub bonus_consumed: bool,
    /// Cash actually taken from the balance.
    pub charged_amount: Decimal,
}

impl ChargeOutcome {
    fn free() -> Self {
        Self {
            fully_settled: true,
            bonus_consumed: false,
            charged_amount: Decimal::ZERO,
        }
    }
}

pub struct ChargeOrchestrator {
    ledger: Arc<Ledger>,
    subscriptions: Arc<SubscriptionManager>,
    max_drain_attempts: u32,
}

impl ChargeOrchestrator {
    pub fn new(
        ledger: Arc<Ledger>,
        subscriptions: Arc<SubscriptionManager>,
        config: &BillingConfig,
    ) -> Self {
        Self {
            ledger,
            subscriptions,
            max_drain_attempts: config.max_drain_attempts,
        }
    }

    /// Charges `amount` to the member for a booking.
    ///
    /// # Errors
    ///
    /// - [`BillingError::InvalidAmount`] - `amount` is negative or finer than a cent.
    /// - [`BillingError::MemberNotFound`] - Member has no wallet.
    pub fn charge_for_booking(
        &self,
        member_id: MemberId,
        amount: Decimal,
        booking: Option<BookingRef>,
    ) -> Result<ChargeOutcome, BillingError> {
        if amount < Decimal::ZERO || !has_money_scale(amount) {
            return Err(BillingError::InvalidAmount);
        }
        if amount.is_zero() {
            // Still an unknown member, even for free classes.
            if !self.ledger.contains(member_id) {
                return Err(BillingError::MemberNotFound(member_id));
            }
            return Ok(ChargeOutcome::free());
        }
        let reference = booking.map(|b| b.ledger_reference());

        if let Some(row) = self
            .ledger
            .debit_if_sufficient(member_id, amount, reference.clone())?
        {
            info!(member = %member_id, %amount, "charge settled from balance");
            self.after_drain(&row);
            return Ok(ChargeOutcome {
                fully_settled: true,
                bonus_consumed: false,
                charged_amount: amount,
            });
        }

        let charged_amount = self.drain_remaining(member_id, reference)?;

        if self.ledger.decrement_bonus_if_positive(member_id)? {
            if charged_amount < amount {
                warn!(
                    member = %member_id,
                    %amount,
                    cash = %charged_amount,
                    "bonus credit settled charge, uncovered remainder written off"
                );
            }
            info!(member = %member_id, %amount, cash = %charged_amount, "charge settled with bonus credit");
            return Ok(ChargeOutcome {
                fully_settled: true,
                bonus_consumed: true,
                charged_amount,
            });
        }

        info!(member = %member_id, %amount, cash = %charged_amount, "charge left unsettled");
        Ok(ChargeOutcome {
            fully_settled: false,
            bonus_consumed: false,
            charged_amount,
        })
    }

    /// Takes whatever is left in the wallet. Returns the amount drained.
    fn drain_remaining(
        &self,
        member_id: MemberId,
        reference: Option<String>,
    ) -> Result<Decimal, BillingError> {
        for attempt in 1..=self.max_drain_attempts {
            let current = self.ledger.balance(member_id)?;
            if current <= Decimal::ZERO {
                return Ok(Decimal::ZERO);
            }
            if let Some(row) = self.ledger.compare_and_set_balance(
                member_id,
                current,
                Decimal::ZERO,
                TransactionKind::ChargePartial,
                reference.clone(),
            )? {
                debug!(member = %member_id, drained = %current, attempt, "balance drained");
                self.after_drain(&row);
                return Ok(current);
            }
        }
        warn!(
            member = %member_id,
            attempts = self.max_drain_attempts,
            "gave up draining balance after repeated concurrent updates"
        );
        Ok(Decimal::ZERO)
    }

    fn after_drain(&self, row: &LedgerTransaction) {
        if row.balance_after.is_zero() {
            self.subscriptions.start_pending(row.member_id);
        }
    }

    pub fn get_balance(&self, member_id: MemberId) -> Result<Decimal, BillingError> {
        self.ledger.balance(member_id)
    }

    /// Credits a member-initiated top-up.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidAmount`] unless `amount` is positive.
    pub fn top_up(
        &self,
        member_id: MemberId,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<LedgerTransaction, BillingError> {
        let row = self
            .ledger
            .credit(member_id, amount, TransactionKind::Topup, reference)?;
        info!(member = %member_id, %amount, "wallet topped up");
        Ok(row)
    }

    /// Returns money to the member's balance.
    pub fn refund(
        &self,
        member_id: MemberId,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<LedgerTransaction, BillingError> {
        let row = self
            .ledger
            .credit(member_id, amount, TransactionKind::Refund, reference)?;
        info!(member = %member_id, %amount, "refund credited");
        Ok(row)
    }

    /// Administrative balance correction.
    pub fn set_balance(
        &self,
        member_id: MemberId,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<LedgerTransaction, BillingError> {
        let row = self.ledger.set_balance(member_id, amount, reference)?;
        info!(member = %member_id, %amount, delta = %row.signed_amount, "wallet balance set");
        Ok(row)
    }

    /// Ledger rows, newest first.
    pub fn get_transactions(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<LedgerTransaction>, BillingError> {
        self.ledger.transactions(member_id)
    }
}
