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

//! # Gym Wallet
//!
//! This library provides the wallet ledger and billing settlement engine for
//! gym class bookings: prepaid balances, bonus credits, charges for same-day
//! cancellations and completed classes, and subscriptions that start once the
//! prepaid balance is used up.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Per-member balance and bonus credits with atomic conditional updates
//! - [`ChargeOrchestrator`]: Pays a charge from balance, partial drain or bonus credit
//! - [`BillingManager`]: Billing events for cancellations and completions, manual settlement
//! - [`SubscriptionManager`]: Pending/active subscriptions and late-cancellation limits
//! - [`SettlementEngine`]: Wires the above together
//!
//! ## Example
//!
//! ```
//! use gym_wallet_rs::{BookingRef, Member, MemberId, SettlementEngine};
//! use rust_decimal_macros::dec;
//!
//! let engine = SettlementEngine::new();
//! engine.register_member(Member::new(MemberId(1), "Ana")).unwrap();
//! engine.top_up(MemberId(1), dec!(100.00), Some("card".into())).unwrap();
//!
//! let outcome = engine
//!     .charge_for_booking(MemberId(1), dec!(40.00), Some(BookingRef(7)))
//!     .unwrap();
//! assert!(outcome.fully_settled);
//! assert_eq!(engine.get_balance(MemberId(1)).unwrap(), dec!(60.00));
//! ```
//!
//! ## Thread Safety
//!
//! Every balance mutation is a single conditional step against the member's
//! wallet, so concurrent charges never spend the same money twice.

pub mod admission;
mod base;
pub mod billing;
pub mod booking;
pub mod clock;
pub mod config;
mod engine;
pub mod error;
pub mod ledger;
pub mod member;
pub mod orchestrator;
pub mod subscription;
mod transaction;
mod wallet;

pub use admission::Admission;
pub use base::{BillingEventId, BookingRef, ClassKind, LedgerTransactionId, MemberId, SubscriptionId};
pub use billing::{BillingEvent, BillingManager, SettlementType};
pub use booking::{Booking, ClassSlot};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::BillingConfig;
pub use engine::SettlementEngine;
pub use error::{BillingError, ErrorKind};
pub use ledger::Ledger;
pub use member::{Member, MemberDirectory, PricingProfile, Role};
pub use orchestrator::{ChargeOrchestrator, ChargeOutcome};
pub use subscription::{
    Subscription, SubscriptionEvent, SubscriptionEventKind, SubscriptionManager,
    SubscriptionStatus,
};
pub use transaction::{LedgerTransaction, TransactionKind, replay};
pub use wallet::Wallet;
