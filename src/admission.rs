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

//! Booking admission check.
//!
//! Run before a booking is created. It only reads the wallet: nothing is
//! reserved, so two bookings admitted concurrently may later compete for the
//! same balance and one of the resulting charges can end up unsettled.

use crate::base::{ClassKind, MemberId};
use crate::ledger::Ledger;
use crate::member::MemberDirectory;
use crate::BillingError;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

pub struct Admission {
    members: Arc<MemberDirectory>,
    ledger: Arc<Ledger>,
}

impl Admission {
    pub fn new(members: Arc<MemberDirectory>, ledger: Arc<Ledger>) -> Self {
        Self { members, ledger }
    }

    /// Checks whether the member may book a class of `kind`.
    ///
    /// A priced class is admitted when the balance covers the price or at
    /// least one bonus credit is left. Returns the price that will be charged.
    ///
    /// # Errors
    ///
    /// - [`BillingError::MemberNotFound`] - Unknown member.
    /// - [`BillingError::StaffSelfBooking`] - Trainers and admins cannot book themselves.
    /// - [`BillingError::BookingBlocked`] - Member lost booking rights.
    /// - [`BillingError::InsufficientFunds`] - Neither balance nor bonus covers the class.
    pub fn check(&self, member_id: MemberId, kind: Option<ClassKind>) -> Result<Decimal, BillingError> {
        let member = self.members.get(member_id)?;
        if member.role.is_staff() {
            return Err(BillingError::StaffSelfBooking);
        }
        if member.booking_blocked {
            return Err(BillingError::BookingBlocked);
        }

        let required = member.pricing.charge_for(kind);
        if required > Decimal::ZERO {
            let balance = self.ledger.balance(member_id)?;
            let bonus_credits = self.ledger.bonus_credits(member_id)?;
            if balance < required && bonus_credits == 0 {
                debug!(member = %member_id, %balance, %required, "booking refused");
                return Err(BillingError::InsufficientFunds {
                    balance,
                    bonus_credits,
                    required,
                });
            }
        }
        Ok(required)
    }
}
