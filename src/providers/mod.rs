// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External provider integrations.

pub mod wallet;

pub use wallet::{WalletProviderClient, WalletProviderConfig, WalletProviderError};
