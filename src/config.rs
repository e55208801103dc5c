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

//! Billing policy configuration.

use serde::{Deserialize, Serialize};

/// Tunable billing policy.
///
/// Defaults match the gym's published rules: cancellations less than 12 hours
/// before class start are billable, the partial drain gives up after 3 lost
/// races, and the 4th late cancellation on a subscription cancels it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Cancellations with fewer whole hours than this before class start are charged.
    pub same_day_threshold_hours: i64,
    /// Compare-and-set attempts made when draining a short balance.
    pub max_drain_attempts: u32,
    /// Late cancellations that force-cancel a subscription and block the member.
    pub late_cancellation_limit: u32,
}

impl BillingConfig {
    pub const DEFAULT_SAME_DAY_THRESHOLD_HOURS: i64 = 12;
    pub const DEFAULT_MAX_DRAIN_ATTEMPTS: u32 = 3;
    pub const DEFAULT_LATE_CANCELLATION_LIMIT: u32 = 4;
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            same_day_threshold_hours: Self::DEFAULT_SAME_DAY_THRESHOLD_HOURS,
            max_drain_attempts: Self::DEFAULT_MAX_DRAIN_ATTEMPTS,
            late_cancellation_limit: Self::DEFAULT_LATE_CANCELLATION_LIMIT,
        }
    }
}
