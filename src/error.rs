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

//! Error types for wallet, billing and subscription operations.
//!
//! Insufficient funds at charge time is not an error: it is reported through
//! [`ChargeOutcome`](crate::ChargeOutcome). The only place it surfaces as an
//! error is the booking admission check.

use crate::base::{BillingEventId, MemberId, SubscriptionId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Coarse classification of a [`BillingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced member, billing event or subscription does not exist.
    NotFound,
    /// Bad input: negative amount, zero months, no bonus credit to redeem.
    InvalidArgument,
    /// Request is well formed but refused by policy or current state.
    Rejected,
}

/// Wallet and billing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),

    #[error("billing event {0} not found")]
    BillingEventNotFound(BillingEventId),

    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    /// A member with the same ID is already registered
    #[error("member {0} already exists")]
    DuplicateMember(MemberId),

    /// Amount is negative, or zero where a positive amount is required
    #[error("invalid amount")]
    InvalidAmount,

    #[error("subscription length must be at least one month")]
    InvalidMonths,

    /// Explicit bonus settlement with no bonus credit left
    #[error("member has no bonus credits available")]
    NoBonusCredits,

    /// Booking admission refused: neither the balance nor a bonus credit covers the class
    #[error(
        "insufficient funds: balance={balance} bonus_credits={bonus_credits} required={required}"
    )]
    InsufficientFunds {
        balance: Decimal,
        bonus_credits: u32,
        required: Decimal,
    },

    /// Member was blocked after too many late cancellations
    #[error("member is blocked from booking")]
    BookingBlocked,

    #[error("staff cannot book themselves into classes")]
    StaffSelfBooking,

    #[error("member already has an active subscription")]
    ActiveSubscriptionExists,

    #[error("member already has a subscription waiting to start")]
    PendingSubscriptionExists,

    #[error("member has no active subscription")]
    NoActiveSubscription,
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MemberNotFound(_)
            | Self::BillingEventNotFound(_)
            | Self::SubscriptionNotFound(_) => ErrorKind::NotFound,
            Self::InvalidAmount | Self::InvalidMonths | Self::NoBonusCredits => {
                ErrorKind::InvalidArgument
            }
            Self::DuplicateMember(_)
            | Self::InsufficientFunds { .. }
            | Self::BookingBlocked
            | Self::StaffSelfBooking
            | Self::ActiveSubscriptionExists
            | Self::PendingSubscriptionExists
            | Self::NoActiveSubscription => ErrorKind::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            BillingError::MemberNotFound(MemberId(7)).to_string(),
            "member 7 not found"
        );
        assert_eq!(
            BillingError::BillingEventNotFound(BillingEventId(3)).to_string(),
            "billing event 3 not found"
        );
        assert_eq!(BillingError::InvalidAmount.to_string(), "invalid amount");
        assert_eq!(
            BillingError::NoBonusCredits.to_string(),
            "member has no bonus credits available"
        );
        assert_eq!(
            BillingError::InsufficientFunds {
                balance: dec!(5.00),
                bonus_credits: 0,
                required: dec!(20.00),
            }
            .to_string(),
            "insufficient funds: balance=5.00 bonus_credits=0 required=20.00"
        );
        assert_eq!(
            BillingError::BookingBlocked.to_string(),
            "member is blocked from booking"
        );
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            BillingError::MemberNotFound(MemberId(1)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            BillingError::SubscriptionNotFound(SubscriptionId(1)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(BillingError::InvalidAmount.kind(), ErrorKind::InvalidArgument);
        assert_eq!(BillingError::NoBonusCredits.kind(), ErrorKind::InvalidArgument);
        assert_eq!(BillingError::BookingBlocked.kind(), ErrorKind::Rejected);
        assert_eq!(
            BillingError::PendingSubscriptionExists.kind(),
            ErrorKind::Rejected
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = BillingError::NoActiveSubscription;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
