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

//! Ledger transaction rows.
//!
//! Each successful balance mutation appends exactly one [`LedgerTransaction`].
//! Rows are immutable once written. Replaying a member's signed amounts in
//! append order from zero reproduces the member's current balance.

use crate::base::{LedgerTransactionId, MemberId};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Member-initiated credit.
    Topup,
    /// Administrative overwrite; the signed amount is `new - old`.
    Set,
    /// Full debit of a booking charge.
    Charge,
    /// Drain of a balance that could not cover the whole charge.
    ChargePartial,
    /// Credit returned to the member.
    Refund,
}

/// Immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: LedgerTransactionId,
    pub member_id: MemberId,
    /// Positive for credits, negative for debits.
    pub signed_amount: Decimal,
    pub kind: TransactionKind,
    pub reference: Option<String>,
    pub timestamp: NaiveDateTime,
    /// Balance right after this row was applied.
    pub balance_after: Decimal,
}

impl LedgerTransaction {
    pub fn is_debit(&self) -> bool {
        self.signed_amount < Decimal::ZERO
    }
}

/// Sums signed amounts from zero. For a single member's log this must equal
/// the current balance.
pub fn replay<'a, I>(transactions: I) -> Decimal
where
    I: IntoIterator<Item = &'a LedgerTransaction>,
{
    transactions
        .into_iter()
        .fold(Decimal::ZERO, |acc, tx| acc + tx.signed_amount)
}
