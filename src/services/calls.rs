// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Call state machine.
//!
//! ```text
//! initiated ──► ringing ──► answered ──► ended
//!     │            │
//!     └────────────┴──► ended | missed | rejected
//! ```
//!
//! This service is the only writer of call status. Every transition runs in a
//! single store write transaction, which is where `answered_at`, `ended_at` and
//! the release of the one-active-call slot happen.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::CallStats;
use crate::services::accounts::AccountService;
use crate::storage::{
    CallKind, CallRepository, CallStatus, SignalingMetadata, Store, StoreError, StoredCall,
};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 200;

/// Apply a status change to a loaded call, or explain why it is illegal.
fn apply_transition(
    call: &mut StoredCall,
    target: CallStatus,
    acting: Option<&str>,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> ServiceResult<()> {
    if let Some(actor) = acting {
        if !call.is_participant(actor) {
            return Err(ServiceError::Forbidden(format!(
                "User {actor} is not a participant of call {}",
                call.call_id
            )));
        }
    }
    if !call.status.can_transition_to(target) {
        return Err(ServiceError::InvalidState(format!(
            "Call {} cannot move from {} to {}",
            call.call_id, call.status, target
        )));
    }

    call.status = target;
    if target == CallStatus::Answered {
        call.answered_at = Some(at);
    }
    if target.is_terminal() {
        call.ended_at = Some(at);
        call.end_reason = reason;
    }
    Ok(())
}

fn ensure_participant(call: &StoredCall, user_id: &str) -> ServiceResult<()> {
    if call.is_participant(user_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "User {user_id} is not a participant of call {}",
            call.call_id
        )))
    }
}

#[derive(Clone)]
pub struct CallService {
    store: Store,
    accounts: AccountService,
}

impl CallService {
    pub fn new(store: Store, accounts: AccountService) -> Self {
        Self { store, accounts }
    }

    /// Create a call in `initiated`.
    ///
    /// The active-slot check and the insert are one store transaction, so
    /// concurrent starts for overlapping parties cannot both succeed.
    pub async fn start(
        &self,
        caller_id: &str,
        callee_id: &str,
        kind: CallKind,
    ) -> ServiceResult<StoredCall> {
        if caller_id == callee_id {
            return Err(ServiceError::InvalidArgument(
                "Cannot call yourself".to_string(),
            ));
        }
        if !self.accounts.exists_active(callee_id).await? {
            return Err(ServiceError::NotFound(format!("User {callee_id} not found")));
        }

        let mut call = StoredCall {
            call_id: Uuid::new_v4().to_string(),
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            kind,
            status: CallStatus::Initiated,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            end_reason: None,
            metadata: SignalingMetadata::default(),
            sequence: 0,
        };

        let call = self
            .store
            .run(move |store| {
                CallRepository::new(store)
                    .create(&mut call)
                    .map_err(|e| match e {
                        StoreError::AlreadyExists(_) => ServiceError::Conflict(
                            "A participant is already in an active call".to_string(),
                        ),
                        other => other.into(),
                    })?;
                Ok::<_, ServiceError>(call)
            })
            .await?;

        tracing::info!(
            call_id = %call.call_id,
            caller_id = %call.caller_id,
            callee_id = %call.callee_id,
            kind = ?call.kind,
            "Call started"
        );
        Ok(call)
    }

    /// Move a call to `target`.
    ///
    /// With `acting` set, the actor must be the caller or callee.
    pub async fn transition(
        &self,
        call_id: &str,
        target: CallStatus,
        acting: Option<&str>,
    ) -> ServiceResult<StoredCall> {
        self.transition_at(call_id, target, acting, None, Utc::now())
            .await
    }

    pub(crate) async fn transition_at(
        &self,
        call_id: &str,
        target: CallStatus,
        acting: Option<&str>,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> ServiceResult<StoredCall> {
        let id = call_id.to_string();
        let actor = acting.map(str::to_string);
        let (call, ()) = self
            .store
            .run(move |store| {
                CallRepository::new(store).update(&id, |call| {
                    apply_transition(call, target, actor.as_deref(), reason, at)
                })
            })
            .await?;

        tracing::info!(call_id = %call.call_id, status = %call.status, "Call transitioned");
        Ok(call)
    }

    /// End a call, recording why.
    ///
    /// Fails with `InvalidState` if the call is already terminal.
    pub async fn end(
        &self,
        call_id: &str,
        acting: &str,
        reason: Option<String>,
    ) -> ServiceResult<StoredCall> {
        self.transition_at(call_id, CallStatus::Ended, Some(acting), reason, Utc::now())
            .await
    }

    /// The user's single non-terminal call, if any.
    pub async fn get_active(&self, user_id: &str) -> ServiceResult<Option<StoredCall>> {
        let id = user_id.to_string();
        self.store
            .run(move |store| Ok::<_, ServiceError>(CallRepository::new(store).active_for(&id)?))
            .await
    }

    /// A call visible to `requester`.
    pub async fn get(&self, call_id: &str, requester: &str) -> ServiceResult<StoredCall> {
        let id = call_id.to_string();
        let call = self
            .store
            .run(move |store| Ok::<_, ServiceError>(CallRepository::new(store).get(&id)?))
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Call {call_id} not found")))?;
        ensure_participant(&call, requester)?;
        Ok(call)
    }

    pub async fn record_offer(
        &self,
        call_id: &str,
        acting: &str,
        payload: Value,
    ) -> ServiceResult<StoredCall> {
        self.merge_signal(call_id, acting, move |meta| meta.offer = Some(payload))
            .await
    }

    pub async fn record_answer(
        &self,
        call_id: &str,
        acting: &str,
        payload: Value,
    ) -> ServiceResult<StoredCall> {
        self.merge_signal(call_id, acting, move |meta| meta.answer = Some(payload))
            .await
    }

    /// Candidates accumulate in arrival order; nothing is replaced.
    pub async fn append_ice_candidate(
        &self,
        call_id: &str,
        acting: &str,
        payload: Value,
    ) -> ServiceResult<StoredCall> {
        self.merge_signal(call_id, acting, move |meta| meta.ice_candidates.push(payload))
            .await
    }

    async fn merge_signal<F>(&self, call_id: &str, acting: &str, merge: F) -> ServiceResult<StoredCall>
    where
        F: FnOnce(&mut SignalingMetadata) + Send + 'static,
    {
        let id = call_id.to_string();
        let actor = acting.to_string();
        let (call, ()) = self
            .store
            .run(move |store| {
                CallRepository::new(store).update(&id, |call| {
                    ensure_participant(call, &actor)?;
                    merge(&mut call.metadata);
                    Ok::<_, ServiceError>(())
                })
            })
            .await?;
        Ok(call)
    }

    /// Calls involving the user, newest first.
    pub async fn history(&self, user_id: &str, limit: Option<usize>) -> ServiceResult<Vec<StoredCall>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let id = user_id.to_string();
        self.store
            .run(move |store| Ok::<_, ServiceError>(CallRepository::new(store).history(&id, limit)?))
            .await
    }

    pub async fn stats(&self, user_id: &str) -> ServiceResult<CallStats> {
        let id = user_id.to_string();
        let calls = self
            .store
            .run(move |store| {
                Ok::<_, ServiceError>(CallRepository::new(store).history(&id, usize::MAX)?)
            })
            .await?;

        let mut stats = CallStats::default();
        for call in &calls {
            stats.total += 1;
            if call.answered_at.is_some() {
                stats.answered += 1;
            }
            match call.status {
                CallStatus::Missed => stats.missed += 1,
                CallStatus::Rejected => stats.rejected += 1,
                _ => {}
            }
            stats.total_duration_seconds += call.duration_seconds();
        }
        Ok(stats)
    }

    /// Permanently delete a terminal call the requester took part in.
    pub async fn delete(&self, call_id: &str, requester: &str) -> ServiceResult<()> {
        let call = self.get(call_id, requester).await?;
        if !call.status.is_terminal() {
            return Err(ServiceError::InvalidState(format!(
                "Call {call_id} is still {}",
                call.status
            )));
        }
        let id = call_id.to_string();
        self.store
            .run(move |store| Ok::<_, ServiceError>(CallRepository::new(store).delete(&id)?))
            .await?;
        tracing::info!(call_id = %call_id, user_id = %requester, "Call deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::accounts::register_user;
    use crate::storage::database::temp_store;
    use serde_json::json;

    async fn setup(names: &[&str]) -> (CallService, Vec<String>, tempfile::TempDir) {
        let (store, dir) = temp_store();
        let accounts = AccountService::new(store.clone());
        let mut ids = Vec::new();
        for name in names {
            ids.push(register_user(&accounts, name).await.user_id);
        }
        (CallService::new(store, accounts), ids, dir)
    }

    #[tokio::test]
    async fn start_validates_parties() {
        let (calls, ids, _dir) = setup(&["alice", "bob"]).await;
        let (a, b) = (&ids[0], &ids[1]);

        assert!(matches!(
            calls.start(a, a, CallKind::Voice).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            calls.start(a, "ghost", CallKind::Voice).await,
            Err(ServiceError::NotFound(_))
        ));

        let call = calls.start(a, b, CallKind::Video).await.unwrap();
        assert_eq!(call.status, CallStatus::Initiated);
        assert!(matches!(
            calls.start(b, a, CallKind::Voice).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_starts_for_same_pair_admit_one() {
        let (calls, ids, _dir) = setup(&["alice", "bob"]).await;
        let calls = Arc::new(calls);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let calls = calls.clone();
            let (a, b) = (ids[0].clone(), ids[1].clone());
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    calls.start(&a, &b, CallKind::Voice).await
                } else {
                    calls.start(&b, &a, CallKind::Voice).await
                }
            }));
        }

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ServiceError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn concurrent_starts_for_overlapping_pairs_admit_one() {
        let (calls, ids, _dir) = setup(&["alice", "bob", "carol"]).await;
        let calls = Arc::new(calls);
        let pairs = [(0, 1), (1, 2), (2, 0)];

        let mut tasks = Vec::new();
        for (x, y) in pairs {
            let calls = calls.clone();
            let (a, b) = (ids[x].clone(), ids[y].clone());
            tasks.push(tokio::spawn(async move {
                calls.start(&a, &b, CallKind::Voice).await
            }));
        }
        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);

        // Each user sees at most one active call
        for id in &ids {
            let active = calls.get_active(id).await.unwrap();
            assert!(active.iter().count() <= 1);
        }
    }

    #[tokio::test]
    async fn terminal_states_reject_every_transition() {
        let (calls, ids, _dir) = setup(&["alice", "bob"]).await;
        let (a, b) = (&ids[0], &ids[1]);
        let all = [
            CallStatus::Initiated,
            CallStatus::Ringing,
            CallStatus::Answered,
            CallStatus::Ended,
            CallStatus::Missed,
            CallStatus::Rejected,
        ];

        for terminal in [CallStatus::Ended, CallStatus::Missed, CallStatus::Rejected] {
            let call = calls.start(a, b, CallKind::Voice).await.unwrap();
            calls.transition(&call.call_id, terminal, Some(b.as_str())).await.unwrap();
            for target in all {
                assert!(matches!(
                    calls.transition(&call.call_id, target, None).await,
                    Err(ServiceError::InvalidState(_))
                ));
            }
            assert!(matches!(
                calls.end(&call.call_id, a, None).await,
                Err(ServiceError::InvalidState(_))
            ));
        }
    }

    #[tokio::test]
    async fn transition_checks_actor_and_existence() {
        let (calls, ids, _dir) = setup(&["alice", "bob", "carol"]).await;
        let call = calls.start(&ids[0], &ids[1], CallKind::Voice).await.unwrap();

        assert!(matches!(
            calls
                .transition(&call.call_id, CallStatus::Answered, Some(ids[2].as_str()))
                .await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            calls.transition("missing", CallStatus::Answered, None).await,
            Err(ServiceError::NotFound(_))
        ));
        // Forbidden attempt did not change anything
        assert_eq!(
            calls.get(&call.call_id, &ids[0]).await.unwrap().status,
            CallStatus::Initiated
        );
    }

    #[tokio::test]
    async fn duration_is_answered_to_ended() {
        let (calls, ids, _dir) = setup(&["alice", "bob"]).await;
        let (a, b) = (&ids[0], &ids[1]);
        let t0 = Utc::now();

        let call = calls.start(a, b, CallKind::Voice).await.unwrap();
        calls
            .transition_at(&call.call_id, CallStatus::Answered, Some(b.as_str()), None, t0)
            .await
            .unwrap();
        let ended = calls
            .transition_at(
                &call.call_id,
                CallStatus::Ended,
                Some(a.as_str()),
                Some("hangup".to_string()),
                t0 + chrono::Duration::seconds(42),
            )
            .await
            .unwrap();
        assert_eq!(ended.duration_seconds(), 42);
        assert_eq!(ended.end_reason.as_deref(), Some("hangup"));

        let unanswered = calls.start(a, b, CallKind::Voice).await.unwrap();
        let ended = calls.end(&unanswered.call_id, a, None).await.unwrap();
        assert_eq!(ended.duration_seconds(), 0);
        assert!(ended.ended_at.is_some());
    }

    #[tokio::test]
    async fn offline_callee_finds_initiated_call() {
        let (calls, ids, _dir) = setup(&["alice", "bob"]).await;
        let call = calls.start(&ids[0], &ids[1], CallKind::Voice).await.unwrap();

        let active = calls.get_active(&ids[1]).await.unwrap().unwrap();
        assert_eq!(active.call_id, call.call_id);
        assert_eq!(active.status, CallStatus::Initiated);
    }

    #[tokio::test]
    async fn ice_candidates_accumulate_in_order() {
        let (calls, ids, _dir) = setup(&["alice", "bob"]).await;
        let (a, b) = (&ids[0], &ids[1]);
        let call = calls.start(a, b, CallKind::Video).await.unwrap();

        calls
            .record_offer(&call.call_id, a, json!({"sdp": "offer"}))
            .await
            .unwrap();
        for i in 0..3 {
            calls
                .append_ice_candidate(&call.call_id, a, json!({"candidate": i}))
                .await
                .unwrap();
        }
        let updated = calls
            .record_answer(&call.call_id, b, json!({"sdp": "answer"}))
            .await
            .unwrap();

        assert_eq!(updated.metadata.offer, Some(json!({"sdp": "offer"})));
        assert_eq!(updated.metadata.answer, Some(json!({"sdp": "answer"})));
        assert_eq!(
            updated.metadata.ice_candidates,
            vec![json!({"candidate": 0}), json!({"candidate": 1}), json!({"candidate": 2})]
        );
    }

    #[tokio::test]
    async fn history_stats_and_delete() {
        let (calls, ids, _dir) = setup(&["alice", "bob", "carol"]).await;
        let (a, b, c) = (&ids[0], &ids[1], &ids[2]);
        let t0 = Utc::now();

        let first = calls.start(a, b, CallKind::Voice).await.unwrap();
        calls
            .transition_at(&first.call_id, CallStatus::Answered, Some(b.as_str()), None, t0)
            .await
            .unwrap();
        calls
            .transition_at(
                &first.call_id,
                CallStatus::Ended,
                Some(a.as_str()),
                None,
                t0 + chrono::Duration::seconds(10),
            )
            .await
            .unwrap();
        let second = calls.start(b, a, CallKind::Voice).await.unwrap();
        calls
            .transition(&second.call_id, CallStatus::Missed, None)
            .await
            .unwrap();
        let third = calls.start(a, b, CallKind::Voice).await.unwrap();
        calls
            .transition(&third.call_id, CallStatus::Rejected, Some(b.as_str()))
            .await
            .unwrap();

        let history = calls.history(a, None).await.unwrap();
        let order: Vec<_> = history.iter().map(|c| c.call_id.clone()).collect();
        assert_eq!(order, vec![third.call_id.clone(), second.call_id.clone(), first.call_id.clone()]);

        let stats = calls.stats(a).await.unwrap();
        assert_eq!(
            stats,
            CallStats {
                total: 3,
                answered: 1,
                missed: 1,
                rejected: 1,
                total_duration_seconds: 10,
            }
        );

        assert!(matches!(
            calls.delete(&first.call_id, c).await,
            Err(ServiceError::Forbidden(_))
        ));
        calls.delete(&first.call_id, a).await.unwrap();
        assert_eq!(calls.history(b, None).await.unwrap().len(), 2);

        let live = calls.start(a, b, CallKind::Voice).await.unwrap();
        assert!(matches!(
            calls.delete(&live.call_id, a).await,
            Err(ServiceError::InvalidState(_))
        ));
    }
}
