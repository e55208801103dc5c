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

//! Member wallet.
//!
//! A wallet holds a member's prepaid balance, bonus credit counter and the
//! member's append-only ledger. All three live behind one mutex, so every
//! conditional primitive checks, mutates and appends its ledger row in a
//! single critical section. Nothing outside this module writes the balance.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use gym_wallet_rs::{MemberId, Wallet};
//!
//! let wallet = Wallet::new(MemberId(1));
//! assert_eq!(wallet.balance(), dec!(0.00));
//! assert_eq!(wallet.bonus_credits(), 0);
//! ```

use crate::BillingError;
use crate::base::{LedgerTransactionId, MemberId};
use crate::clock::Clock;
use crate::transaction::{LedgerTransaction, TransactionKind};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates ids and timestamps for new ledger rows.
pub(crate) struct Stamp<'a> {
    pub(crate) sequence: &'a AtomicU64,
    pub(crate) clock: &'a dyn Clock,
}

impl Stamp<'_> {
    fn next(&self) -> (LedgerTransactionId, chrono::NaiveDateTime) {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        (LedgerTransactionId(id), self.clock.now())
    }
}

/// Whether `amount` fits the wallet's fixed-point precision.
///
/// Trailing zeros are ignored, so `10.500` is accepted and `10.505` is not.
pub(crate) fn has_money_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= Wallet::DECIMAL_PRECISION
}

#[derive(Debug)]
struct WalletData {
    member_id: MemberId,
    balance: Decimal,
    bonus_credits: u32,
    /// Append-only, in application order.
    transactions: Vec<LedgerTransaction>,
}

impl WalletData {
    fn new(member_id: MemberId) -> Self {
        Self {
            member_id,
            balance: Decimal::ZERO,
            bonus_credits: 0,
            transactions: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
        debug_assert_eq!(
            crate::transaction::replay(&self.transactions),
            self.balance,
            "Invariant violated: ledger replay diverged from balance"
        );
    }

    fn append(
        &mut self,
        signed_amount: Decimal,
        kind: TransactionKind,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> LedgerTransaction {
        let (id, timestamp) = stamp.next();
        let row = LedgerTransaction {
            id,
            member_id: self.member_id,
            signed_amount,
            kind,
            reference,
            timestamp,
            balance_after: self.balance,
        };
        self.transactions.push(row.clone());
        self.assert_invariants();
        row
    }

    /// Unconditionally increases the balance.
    fn credit(
        &mut self,
        amount: Decimal,
        kind: TransactionKind,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> Result<LedgerTransaction, BillingError> {
        if amount <= Decimal::ZERO || !has_money_scale(amount) {
            return Err(BillingError::InvalidAmount);
        }
        self.balance += amount;
        Ok(self.append(amount, kind, reference, stamp))
    }

    /// Decreases the balance only when it covers `amount`.
    fn debit_if_sufficient(
        &mut self,
        amount: Decimal,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> Result<Option<LedgerTransaction>, BillingError> {
        if amount <= Decimal::ZERO || !has_money_scale(amount) {
            return Err(BillingError::InvalidAmount);
        }
        if self.balance < amount {
            return Ok(None);
        }
        self.balance -= amount;
        Ok(Some(self.append(
            -amount,
            TransactionKind::Charge,
            reference,
            stamp,
        )))
    }

    /// Overwrites the balance, recording the difference.
    fn set_balance(
        &mut self,
        new_amount: Decimal,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> Result<LedgerTransaction, BillingError> {
        if new_amount < Decimal::ZERO || !has_money_scale(new_amount) {
            return Err(BillingError::InvalidAmount);
        }
        let delta = new_amount - self.balance;
        self.balance = new_amount;
        Ok(self.append(delta, TransactionKind::Set, reference, stamp))
    }

    /// Overwrites the balance only when it still equals `expected`.
    fn compare_and_set_balance(
        &mut self,
        expected: Decimal,
        new_amount: Decimal,
        kind: TransactionKind,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> Result<Option<LedgerTransaction>, BillingError> {
        if new_amount < Decimal::ZERO || !has_money_scale(new_amount) {
            return Err(BillingError::InvalidAmount);
        }
        if self.balance != expected {
            return Ok(None);
        }
        self.balance = new_amount;
        Ok(Some(self.append(
            new_amount - expected,
            kind,
            reference,
            stamp,
        )))
    }

    fn decrement_bonus_if_positive(&mut self) -> bool {
        if self.bonus_credits == 0 {
            return false;
        }
        self.bonus_credits -= 1;
        true
    }
}

/// A member's balance, bonus credits and ledger.
#[derive(Debug)]
pub struct Wallet {
    inner: Mutex<WalletData>,
}

impl Wallet {
    /// Decimal places used when presenting balances.
    pub const DECIMAL_PRECISION: u32 = 2;

    pub fn new(member_id: MemberId) -> Self {
        Self {
            inner: Mutex::new(WalletData::new(member_id)),
        }
    }

    pub fn member_id(&self) -> MemberId {
        self.inner.lock().member_id
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub fn bonus_credits(&self) -> u32 {
        self.inner.lock().bonus_credits
    }

    /// Copy of the ledger in append order.
    pub fn transactions(&self) -> Vec<LedgerTransaction> {
        self.inner.lock().transactions.clone()
    }

    /// Replays the ledger from zero.
    pub fn replay(&self) -> Decimal {
        crate::transaction::replay(&self.inner.lock().transactions)
    }

    pub(crate) fn credit(
        &self,
        amount: Decimal,
        kind: TransactionKind,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> Result<LedgerTransaction, BillingError> {
        self.inner.lock().credit(amount, kind, reference, stamp)
    }

    pub(crate) fn debit_if_sufficient(
        &self,
        amount: Decimal,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> Result<Option<LedgerTransaction>, BillingError> {
        self.inner.lock().debit_if_sufficient(amount, reference, stamp)
    }

    pub(crate) fn set_balance(
        &self,
        new_amount: Decimal,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> Result<LedgerTransaction, BillingError> {
        self.inner.lock().set_balance(new_amount, reference, stamp)
    }

    pub(crate) fn compare_and_set_balance(
        &self,
        expected: Decimal,
        new_amount: Decimal,
        kind: TransactionKind,
        reference: Option<String>,
        stamp: &Stamp<'_>,
    ) -> Result<Option<LedgerTransaction>, BillingError> {
        self.inner
            .lock()
            .compare_and_set_balance(expected, new_amount, kind, reference, stamp)
    }

    pub(crate) fn decrement_bonus_if_positive(&self) -> bool {
        self.inner.lock().decrement_bonus_if_positive()
    }

    pub(crate) fn set_bonus_credits(&self, credits: u32) {
        self.inner.lock().bonus_credits = credits;
    }
}

impl Serialize for Wallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut balance = data.balance.round_dp(Wallet::DECIMAL_PRECISION);
        balance.rescale(Wallet::DECIMAL_PRECISION);

        let mut state = serializer.serialize_struct("Wallet", 3)?;
        state.serialize_field("member", &data.member_id)?;
        state.serialize_field("balance", &balance)?;
        state.serialize_field("bonus_credits", &data.bonus_credits)?;
        state.end()
    }
}
