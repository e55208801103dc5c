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

//! Booking values handed over by the booking service.
//!
//! Only the fields billing reads are modelled here.

use crate::base::{BookingRef, ClassKind, MemberId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The scheduled class a booking is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSlot {
    /// `None` for legacy classes without a kind; those are free.
    pub kind: Option<ClassKind>,
    pub start_time: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_ref: BookingRef,
    pub member_id: MemberId,
    pub class: ClassSlot,
    /// When the member cancelled. Billing falls back to "now" if unset.
    pub cancelled_at: Option<NaiveDateTime>,
}

impl Booking {
    pub fn new(booking_ref: BookingRef, member_id: MemberId, class: ClassSlot) -> Self {
        Self {
            booking_ref,
            member_id,
            class,
            cancelled_at: None,
        }
    }

    pub fn cancelled(mut self, at: NaiveDateTime) -> Self {
        self.cancelled_at = Some(at);
        self
    }
}
