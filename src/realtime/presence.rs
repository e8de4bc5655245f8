// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Presence registry: which user currently owns which live connection.
//!
//! One handle per user (last connected wins). The map is guarded by a
//! `std::sync::RwLock` that is only held for the map operation itself, never
//! across an await or a push, so slow peers cannot stall other connections.
//!
//! Every map change takes the next value of a process-wide epoch while the
//! write lock is held. Status broadcasts carry it, so a receiver can discard
//! a `user_status` that arrives after a newer one for the same user.
//!
//! Presence is process-local and intentionally not persisted; reconnecting
//! clients register again after a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::{ServerEvent, UserStatusPush};

/// Outbound half of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: String,
    pub session_id: Uuid,
    pub connected_at: DateTime<Utc>,
    outbox: mpsc::UnboundedSender<ServerEvent>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        user_id: impl Into<String>,
        outbox: mpsc::UnboundedSender<ServerEvent>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4(),
            connected_at: Utc::now(),
            outbox,
            closer,
        }
    }

    /// Queue an event for the connection's writer.
    ///
    /// Returns `false` if the connection is already gone. Never blocks.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.outbox.send(event).is_ok()
    }

    /// Ask the connection to shut down.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled() || self.outbox.is_closed()
    }
}

/// Point-in-time copy of the registry. Iterating it is restartable.
#[derive(Debug, Clone, Default)]
pub struct PresenceSnapshot {
    entries: Arc<Vec<(String, ConnectionHandle)>>,
}

impl PresenceSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConnectionHandle)> + '_ {
        self.entries.iter().map(|(user, handle)| (user.as_str(), handle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry of live connections, owned by `AppState`.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
    epoch: AtomicU64,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the user's connection.
    ///
    /// Returns the handle it replaced, if any, so the caller can notify and
    /// close it. Broadcasts `user_status` online to everyone else.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = handle.user_id.clone();
        let (previous, epoch) = {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let previous = connections.insert(user_id.clone(), handle);
            (previous, self.next_epoch())
        };

        tracing::debug!(
            user_id = %user_id,
            replaced = previous.is_some(),
            epoch,
            "Connection registered"
        );
        self.broadcast_status(&user_id, true, epoch);
        previous
    }

    /// Remove the user's mapping only if it still belongs to `session_id`.
    ///
    /// Returns `true` if an entry was removed; a stale session is a no-op and
    /// broadcasts nothing.
    pub fn unregister(&self, user_id: &str, session_id: Uuid) -> bool {
        let removed = {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match connections.get(user_id) {
                Some(current) if current.session_id == session_id => {
                    connections.remove(user_id);
                    Some(self.next_epoch())
                }
                _ => None,
            }
        };

        match removed {
            Some(epoch) => {
                tracing::debug!(user_id = %user_id, epoch, "Connection unregistered");
                self.broadcast_status(user_id, false, epoch);
                true
            }
            None => {
                tracing::debug!(user_id = %user_id, %session_id, "Stale unregister ignored");
                false
            }
        }
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user_id)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        let entries = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(user, handle)| (user.clone(), handle.clone()))
            .collect();
        PresenceSnapshot {
            entries: Arc::new(entries),
        }
    }

    pub fn online_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Push to the user's current connection, if any.
    ///
    /// Returns `false` when the user is offline or vanished mid-push.
    pub fn push_to(&self, user_id: &str, event: ServerEvent) -> bool {
        match self.lookup(user_id) {
            Some(handle) => handle.push(event),
            None => false,
        }
    }

    /// Push to every connection except `except_user`.
    pub fn broadcast(&self, event: &ServerEvent, except_user: &str) {
        for (user_id, handle) in self.snapshot().iter() {
            if user_id != except_user {
                handle.push(event.clone());
            }
        }
    }

    /// Drop every connection, asking each to close. Used at shutdown.
    pub fn clear(&self) -> usize {
        let drained: Vec<ConnectionHandle> = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &drained {
            handle.close();
        }
        drained.len()
    }

    /// Only called with the write lock held.
    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn broadcast_status(&self, user_id: &str, is_online: bool, epoch: u64) {
        let event = ServerEvent::UserStatus(UserStatusPush {
            user_id: user_id.to_string(),
            is_online,
            epoch,
            timestamp: Utc::now(),
        });
        self.broadcast(&event, user_id);
    }
}

#[cfg(test)]
pub(crate) fn test_handle(user_id: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectionHandle::new(user_id, tx, CancellationToken::new()), rx)
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_replaces_and_returns_previous() {
        let registry = PresenceRegistry::new();
        let (h1, _rx1) = test_handle("u1");
        let (h2, _rx2) = test_handle("u1");

        assert!(registry.register(h1.clone()).is_none());
        let previous = registry.register(h2.clone()).unwrap();
        assert_eq!(previous.session_id, h1.session_id);
        assert_eq!(registry.lookup("u1").unwrap().session_id, h2.session_id);
    }

    #[test]
    fn stale_unregister_is_noop() {
        let registry = PresenceRegistry::new();
        let (h1, _rx1) = test_handle("u1");
        let (h2, _rx2) = test_handle("u1");
        registry.register(h1.clone());
        registry.register(h2.clone());

        assert!(!registry.unregister("u1", h1.session_id));
        assert_eq!(registry.lookup("u1").unwrap().session_id, h2.session_id);

        assert!(registry.unregister("u1", h2.session_id));
        assert!(registry.lookup("u1").is_none());
        assert!(!registry.is_online("u1"));
    }

    #[test]
    fn status_changes_broadcast_to_others_only() {
        let registry = PresenceRegistry::new();
        let (watcher, mut watcher_rx) = test_handle("w");
        registry.register(watcher);

        let (h1, mut rx1) = test_handle("u1");
        registry.register(h1.clone());
        registry.unregister("u1", h1.session_id);

        let seen: Vec<(String, bool)> = drain(&mut watcher_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::UserStatus(s) => Some((s.user_id, s.is_online)),
                _ => None,
            })
            .collect();
        assert_eq!(seen, vec![("u1".to_string(), true), ("u1".to_string(), false)]);

        // u1 saw no status event about itself
        assert!(drain(&mut rx1).is_empty());
    }

    #[test]
    fn stale_unregister_broadcasts_nothing() {
        let registry = PresenceRegistry::new();
        let (watcher, mut watcher_rx) = test_handle("w");
        registry.register(watcher);
        let (h1, _rx1) = test_handle("u1");
        let (h2, _rx2) = test_handle("u1");
        registry.register(h1.clone());
        registry.register(h2);
        drain(&mut watcher_rx);

        registry.unregister("u1", h1.session_id);
        assert!(drain(&mut watcher_rx).is_empty());
    }

    #[test]
    fn status_epochs_increase_with_each_change() {
        let registry = PresenceRegistry::new();
        let (watcher, mut watcher_rx) = test_handle("w");
        registry.register(watcher);

        let (h1, _rx1) = test_handle("u1");
        let (h2, _rx2) = test_handle("u1");
        registry.register(h1.clone());
        registry.unregister("u1", h1.session_id);
        registry.register(h2);

        let epochs: Vec<(u64, bool)> = drain(&mut watcher_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::UserStatus(s) => Some((s.epoch, s.is_online)),
                _ => None,
            })
            .collect();
        assert_eq!(epochs.len(), 3);
        assert!(epochs.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(
            epochs.iter().map(|(_, online)| *online).collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }

    #[tokio::test]
    async fn newest_status_epoch_matches_final_presence() {
        let registry = Arc::new(PresenceRegistry::new());
        let (watcher, mut watcher_rx) = test_handle("w");
        registry.register(watcher);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (h, _rx) = test_handle("u1");
                registry.register(h.clone());
                if i % 2 == 0 {
                    registry.unregister("u1", h.session_id);
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let newest = drain(&mut watcher_rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::UserStatus(s) if s.user_id == "u1" => Some(s),
                _ => None,
            })
            .max_by_key(|s| s.epoch)
            .unwrap();
        assert_eq!(newest.is_online, registry.is_online("u1"));
    }

    #[test]
    fn snapshot_is_stable_and_restartable() {
        let registry = PresenceRegistry::new();
        let (a, _ra) = test_handle("a");
        let (b, _rb) = test_handle("b");
        registry.register(a);
        registry.register(b.clone());

        let snapshot = registry.snapshot();
        registry.unregister("b", b.session_id);

        assert_eq!(snapshot.len(), 2);
        let first: Vec<_> = snapshot.iter().map(|(u, _)| u.to_string()).collect();
        let second: Vec<_> = snapshot.iter().map(|(u, _)| u.to_string()).collect();
        assert_eq!(first, second);
        assert_eq!(registry.online_user_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn push_to_vanished_peer_reports_failure() {
        let registry = PresenceRegistry::new();
        let (h, rx) = test_handle("u1");
        registry.register(h);
        drop(rx);

        let event = ServerEvent::TypingStart(super::super::events::TypingPush {
            user_id: "x".into(),
        });
        assert!(!registry.push_to("u1", event.clone()));
        assert!(!registry.push_to("nobody", event));
    }

    #[test]
    fn clear_closes_everything() {
        let registry = PresenceRegistry::new();
        let (a, _ra) = test_handle("a");
        let (b, _rb) = test_handle("b");
        registry.register(a.clone());
        registry.register(b.clone());

        assert_eq!(registry.clear(), 2);
        assert!(registry.snapshot().is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn concurrent_registration_keeps_one_handle_per_user() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (h, _rx) = test_handle("u1");
                registry.register(h.clone());
                registry.unregister("u1", h.session_id);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(registry.snapshot().len() <= 1);
    }
}
