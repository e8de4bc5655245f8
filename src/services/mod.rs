// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain services shared by the HTTP API and the real-time channel.
//!
//! - `accounts` - registration, credentials, profiles
//! - `calls` - call lifecycle state machine
//! - `messages` - message persistence and delivery
//! - `wallet` - wallet ledger at the remote provider

pub mod accounts;
pub mod calls;
pub mod messages;
pub mod wallet;

pub use accounts::AccountService;
pub use calls::CallService;
pub use messages::DeliveryCoordinator;
pub use wallet::WalletService;
