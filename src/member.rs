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

//! Member records.
//!
//! Identity is resolved elsewhere; this module only keeps the fields billing
//! needs: role, per-kind pricing and the booking-blocked flag. Balance and
//! bonus credits are owned by the [`Ledger`](crate::Ledger).

use crate::base::{ClassKind, MemberId};
use crate::wallet::has_money_scale;
use crate::BillingError;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Trainer,
    #[default]
    Member,
}

impl Role {
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Trainer)
    }
}

/// Per-member price for each class kind. A missing entry charges nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingProfile {
    pub group: Option<Decimal>,
    pub small_group: Option<Decimal>,
    pub personal: Option<Decimal>,
    pub open_gym: Option<Decimal>,
}

impl PricingProfile {
    /// Price for a class kind; zero when the kind or its price is absent.
    pub fn charge_for(&self, kind: Option<ClassKind>) -> Decimal {
        let price = match kind {
            Some(ClassKind::Group) => self.group,
            Some(ClassKind::SmallGroup) => self.small_group,
            Some(ClassKind::Personal) => self.personal,
            Some(ClassKind::OpenGym) => self.open_gym,
            None => None,
        };
        price.unwrap_or(Decimal::ZERO)
    }

    /// Every listed price must be non-negative and whole cents.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidAmount`] for the first bad price.
    pub fn validate(&self) -> Result<(), BillingError> {
        let prices = [self.group, self.small_group, self.personal, self.open_gym];
        if prices
            .into_iter()
            .flatten()
            .any(|p| p < Decimal::ZERO || !has_money_scale(p))
        {
            return Err(BillingError::InvalidAmount);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub role: Role,
    pub pricing: PricingProfile,
    /// Set when a subscription is force-cancelled for late cancellations.
    pub booking_blocked: bool,
}

impl Member {
    pub fn new(id: MemberId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: Role::Member,
            pricing: PricingProfile::default(),
            booking_blocked: false,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingProfile) -> Self {
        self.pricing = pricing;
        self
    }
}

/// Member records fetched and saved by ID.
#[derive(Debug, Default)]
pub struct MemberDirectory {
    members: DashMap<MemberId, Member>,
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// - [`BillingError::InvalidAmount`] - The pricing profile has a bad price.
    /// - [`BillingError::DuplicateMember`] - The ID is taken.
    pub fn insert(&self, member: Member) -> Result<(), BillingError> {
        use dashmap::mapref::entry::Entry;

        member.pricing.validate()?;
        match self.members.entry(member.id) {
            Entry::Occupied(_) => Err(BillingError::DuplicateMember(member.id)),
            Entry::Vacant(entry) => {
                entry.insert(member);
                Ok(())
            }
        }
    }

    pub fn get(&self, member_id: MemberId) -> Result<Member, BillingError> {
        self.members
            .get(&member_id)
            .map(|m| m.clone())
            .ok_or(BillingError::MemberNotFound(member_id))
    }

    /// Applies `f` to the stored record in place.
    pub fn update<F>(&self, member_id: MemberId, f: F) -> Result<Member, BillingError>
    where
        F: FnOnce(&mut Member),
    {
        let mut member = self
            .members
            .get_mut(&member_id)
            .ok_or(BillingError::MemberNotFound(member_id))?;
        f(&mut member);
        Ok(member.clone())
    }

    /// Replaces the member's pricing after validating it.
    pub fn set_pricing(&self, member_id: MemberId, pricing: PricingProfile) -> Result<(), BillingError> {
        pricing.validate()?;
        self.update(member_id, |m| m.pricing = pricing).map(|_| ())
    }

    pub fn set_booking_blocked(&self, member_id: MemberId, blocked: bool) -> Result<(), BillingError> {
        self.update(member_id, |m| m.booking_blocked = blocked)
            .map(|_| ())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
