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

//! Ledger store.
//!
//! The [`Ledger`] owns every member's [`Wallet`] and is the only way to mutate
//! a balance. It exposes the conditional primitives the settlement layer is
//! built on:
//!
//! - **credit**: unconditional increase (top-ups, refunds).
//! - **debit_if_sufficient**: decrease only when the balance covers the amount.
//! - **set_balance**: administrative overwrite.
//! - **compare_and_set_balance**: overwrite only when the balance still equals
//!   the value the caller read.
//! - **decrement_bonus_if_positive**: consume one bonus credit if any is left.
//!
//! Each balance primitive either changes the balance and appends exactly one
//! ledger row, or changes nothing.
//!
//! # Thread Safety
//!
//! Wallets live in a [`DashMap`]; each primitive holds the member's wallet
//! lock for its whole check-mutate-append step. Different members never
//! contend with each other.

use crate::base::MemberId;
use crate::clock::Clock;
use crate::transaction::{LedgerTransaction, TransactionKind};
use crate::wallet::{Stamp, Wallet};
use crate::BillingError;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tracing::debug;

pub struct Ledger {
    /// Wallets indexed by member ID.
    wallets: DashMap<MemberId, Wallet>,
    /// Global ledger row sequence.
    sequence: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Ledger {
            wallets: DashMap::new(),
            sequence: AtomicU64::new(0),
            clock,
        }
    }

    fn stamp(&self) -> Stamp<'_> {
        Stamp {
            sequence: &self.sequence,
            clock: self.clock.as_ref(),
        }
    }

    fn wallet(
        &self,
        member_id: MemberId,
    ) -> Result<dashmap::mapref::one::Ref<'_, MemberId, Wallet>, BillingError> {
        self.wallets
            .get(&member_id)
            .ok_or(BillingError::MemberNotFound(member_id))
    }

    /// Creates a zero wallet for the member if none exists.
    ///
    /// Returns `true` when a new wallet was created.
    pub fn open_wallet(&self, member_id: MemberId) -> bool {
        let mut created = false;
        self.wallets.entry(member_id).or_insert_with(|| {
            created = true;
            Wallet::new(member_id)
        });
        created
    }

    pub fn contains(&self, member_id: MemberId) -> bool {
        self.wallets.contains_key(&member_id)
    }

    /// Increases the balance by `amount` and appends a row of the given kind.
    ///
    /// # Errors
    ///
    /// - [`BillingError::MemberNotFound`] - No wallet for the member.
    /// - [`BillingError::InvalidAmount`] - `amount` is not positive.
    pub fn credit(
        &self,
        member_id: MemberId,
        amount: Decimal,
        kind: TransactionKind,
        reference: Option<String>,
    ) -> Result<LedgerTransaction, BillingError> {
        let row = self
            .wallet(member_id)?
            .credit(amount, kind, reference, &self.stamp())?;
        debug!(member = %member_id, %amount, ?kind, balance = %row.balance_after, "credited wallet");
        Ok(row)
    }

    /// Decrements the balance by `amount` only if it is at least `amount`.
    ///
    /// Returns the `CHARGE` row when the debit happened, `None` when the
    /// balance was short.
    pub fn debit_if_sufficient(
        &self,
        member_id: MemberId,
        amount: Decimal,
        reference: Option<String>,
    ) -> Result<Option<LedgerTransaction>, BillingError> {
        let row = self
            .wallet(member_id)?
            .debit_if_sufficient(amount, reference, &self.stamp())?;
        match &row {
            Some(row) => {
                debug!(member = %member_id, %amount, balance = %row.balance_after, "debited wallet")
            }
            None => debug!(member = %member_id, %amount, "debit refused, balance short"),
        }
        Ok(row)
    }

    /// Overwrites the balance. The `SET` row carries `new - old`.
    pub fn set_balance(
        &self,
        member_id: MemberId,
        new_amount: Decimal,
        reference: Option<String>,
    ) -> Result<LedgerTransaction, BillingError> {
        let row = self
            .wallet(member_id)?
            .set_balance(new_amount, reference, &self.stamp())?;
        debug!(member = %member_id, balance = %new_amount, delta = %row.signed_amount, "balance set");
        Ok(row)
    }

    /// Overwrites the balance only if it currently equals `expected`.
    pub fn compare_and_set_balance(
        &self,
        member_id: MemberId,
        expected: Decimal,
        new_amount: Decimal,
        kind: TransactionKind,
        reference: Option<String>,
    ) -> Result<Option<LedgerTransaction>, BillingError> {
        let row = self.wallet(member_id)?.compare_and_set_balance(
            expected,
            new_amount,
            kind,
            reference,
            &self.stamp(),
        )?;
        if row.is_none() {
            debug!(member = %member_id, %expected, "compare-and-set lost race");
        }
        Ok(row)
    }

    /// Consumes one bonus credit if the member has any.
    pub fn decrement_bonus_if_positive(&self, member_id: MemberId) -> Result<bool, BillingError> {
        let matched = self.wallet(member_id)?.decrement_bonus_if_positive();
        debug!(member = %member_id, matched, "bonus decrement");
        Ok(matched)
    }

    /// Administrative overwrite of the bonus counter.
    pub fn set_bonus_credits(&self, member_id: MemberId, credits: u32) -> Result<(), BillingError> {
        self.wallet(member_id)?.set_bonus_credits(credits);
        debug!(member = %member_id, credits, "bonus credits set");
        Ok(())
    }

    pub fn balance(&self, member_id: MemberId) -> Result<Decimal, BillingError> {
        Ok(self.wallet(member_id)?.balance())
    }

    pub fn bonus_credits(&self, member_id: MemberId) -> Result<u32, BillingError> {
        Ok(self.wallet(member_id)?.bonus_credits())
    }

    /// Ledger rows for a member, newest first.
    pub fn transactions(&self, member_id: MemberId) -> Result<Vec<LedgerTransaction>, BillingError> {
        let mut rows = self.wallet(member_id)?.transactions();
        rows.reverse();
        Ok(rows)
    }

    /// Replays the member's ledger from zero.
    pub fn replay(&self, member_id: MemberId) -> Result<Decimal, BillingError> {
        Ok(self.wallet(member_id)?.replay())
    }

    /// Returns an iterator over all wallets.
    pub fn wallets(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, MemberId, Wallet>> {
        self.wallets.iter()
    }
}
