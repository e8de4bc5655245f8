// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::TokenService;
use crate::realtime::{PresenceRegistry, SignalingRelay};
use crate::services::{AccountService, CallService, DeliveryCoordinator, WalletService};
use crate::storage::Store;

/// Shared application state, cloned into every handler and connection.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub presence: Arc<PresenceRegistry>,
    pub tokens: Arc<TokenService>,
    pub accounts: AccountService,
    pub calls: CallService,
    pub messages: DeliveryCoordinator,
    pub signaling: SignalingRelay,
    /// `None` when no wallet provider is configured
    pub wallet: Option<WalletService>,
    /// Cancelled at shutdown; every live connection holds a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Store, tokens: TokenService) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let accounts = AccountService::new(store.clone());
        let calls = CallService::new(store.clone(), accounts.clone());
        let messages = DeliveryCoordinator::new(store.clone(), presence.clone(), accounts.clone());
        let signaling = SignalingRelay::new(calls.clone(), presence.clone());

        Self {
            store,
            presence,
            tokens: Arc::new(tokens),
            accounts,
            calls,
            messages,
            signaling,
            wallet: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_wallet(mut self, wallet: WalletService) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

#[cfg(test)]
pub(crate) const TEST_JWT_SECRET: &[u8] = b"test-secret-for-unit-tests-only!";

#[cfg(test)]
pub(crate) fn test_state() -> (AppState, tempfile::TempDir) {
    let (store, dir) = crate::storage::database::temp_store();
    let tokens = TokenService::new(TEST_JWT_SECRET, "parley-test", 3600);
    (AppState::new(store, tokens), dir)
}
