// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Call record repository.
//!
//! ## One Active Call Per User
//!
//! `active_calls` maps each user to the id of their single non-terminal call.
//! [`CallRepository::create`] checks both parties and inserts the mapping in
//! the same write transaction as the call row, and [`CallRepository::update`]
//! releases the mapping in the transaction that moves a call into a terminal
//! state. Because redb serializes writers, two concurrent starts for
//! overlapping parties can never both commit.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::storage::database::{
    index_key, index_range, next_sequence, read_row, write_row, Store, StoreError, StoreResult,
    ACTIVE_CALLS, CALLS, USER_CALLS,
};

/// Call lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    Ended,
    Missed,
    Rejected,
}

impl CallStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Missed | Self::Rejected)
    }

    pub fn can_transition_to(self, target: CallStatus) -> bool {
        use CallStatus::*;
        match self {
            Initiated => matches!(target, Ringing | Answered | Ended | Missed | Rejected),
            Ringing => matches!(target, Answered | Ended | Missed | Rejected),
            Answered => matches!(target, Ended),
            Ended | Missed | Rejected => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::Ended => "ended",
            Self::Missed => "missed",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media kind of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
}

/// Signaling payloads exchanged for a call, stored verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SignalingMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub offer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub answer: Option<Value>,
    /// In arrival order, never deduplicated
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub ice_candidates: Vec<Value>,
}

/// A call between two users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCall {
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub kind: CallKind,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    #[serde(default)]
    pub metadata: SignalingMetadata,
    /// Position in the participants' history indexes
    #[serde(default)]
    pub sequence: u64,
}

impl StoredCall {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    /// The participant that is not `user_id`.
    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.caller_id == user_id {
            &self.callee_id
        } else {
            &self.caller_id
        }
    }

    /// Talk time: `ended_at - answered_at`, zero if the call was never answered.
    pub fn duration_seconds(&self) -> i64 {
        match (self.answered_at, self.ended_at) {
            (Some(answered), Some(ended)) => (ended - answered).num_seconds().max(0),
            _ => 0,
        }
    }
}

/// Repository for call rows and the active-call constraint.
pub struct CallRepository<'a> {
    store: &'a Store,
}

impl<'a> CallRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Insert a new non-terminal call, claiming the active slot of both parties.
    ///
    /// # Returns
    /// - `Err(StoreError::AlreadyExists)` if either party already has an active call
    pub fn create(&self, call: &mut StoredCall) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            let mut active = write_txn.open_table(ACTIVE_CALLS)?;
            for party in [&call.caller_id, &call.callee_id] {
                if let Some(existing) = active.get(party.as_str())? {
                    return Err(StoreError::AlreadyExists(format!(
                        "User {party} is already in call {}",
                        existing.value()
                    )));
                }
            }
            active.insert(call.caller_id.as_str(), call.call_id.as_str())?;
            active.insert(call.callee_id.as_str(), call.call_id.as_str())?;

            call.sequence = next_sequence(&write_txn, "calls")?;

            let mut index = write_txn.open_table(USER_CALLS)?;
            for party in [&call.caller_id, &call.callee_id] {
                index.insert(
                    index_key(party, call.sequence).as_str(),
                    call.call_id.as_str(),
                )?;
            }

            let mut calls = write_txn.open_table(CALLS)?;
            write_row(&mut calls, &call.call_id, call)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, call_id: &str) -> StoreResult<Option<StoredCall>> {
        let read_txn = self.store.db().begin_read()?;
        let calls = read_txn.open_table(CALLS)?;
        read_row(&calls, call_id)
    }

    /// Read-modify-write a call in one transaction.
    ///
    /// `mutate` may reject the change by returning an error, in which case
    /// nothing is written. If the call ends up terminal, the active slots of
    /// both parties are released.
    pub fn update<T, E, F>(&self, call_id: &str, mutate: F) -> Result<(StoredCall, T), E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut StoredCall) -> Result<T, E>,
    {
        let write_txn = self.store.db().begin_write().map_err(StoreError::from)?;
        let (call, out) = {
            let mut calls = write_txn.open_table(CALLS).map_err(StoreError::from)?;
            let mut call: StoredCall = read_row(&calls, call_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Call {call_id}")))?;

            let out = mutate(&mut call)?;
            write_row(&mut calls, call_id, &call)?;

            if call.status.is_terminal() {
                release_active(&write_txn, &call)?;
            }
            (call, out)
        };
        write_txn.commit().map_err(StoreError::from)?;
        Ok((call, out))
    }

    /// The single non-terminal call of `user_id`, if any.
    pub fn active_for(&self, user_id: &str) -> StoreResult<Option<StoredCall>> {
        let read_txn = self.store.db().begin_read()?;
        let active = read_txn.open_table(ACTIVE_CALLS)?;
        let call_id = match active.get(user_id)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };
        let calls = read_txn.open_table(CALLS)?;
        read_row(&calls, &call_id)
    }

    /// Calls involving `user_id`, newest first.
    pub fn history(&self, user_id: &str, limit: usize) -> StoreResult<Vec<StoredCall>> {
        let read_txn = self.store.db().begin_read()?;
        let index = read_txn.open_table(USER_CALLS)?;
        let calls = read_txn.open_table(CALLS)?;

        let (start, end) = index_range(user_id);
        let mut results = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())?.rev() {
            let (_, call_id) = entry?;
            if let Some(call) = read_row::<StoredCall, _>(&calls, call_id.value())? {
                results.push(call);
            }
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// Permanently remove a call and its index entries.
    pub fn delete(&self, call_id: &str) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            let mut calls = write_txn.open_table(CALLS)?;
            let call: StoredCall = read_row(&calls, call_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Call {call_id}")))?;
            calls.remove(call_id)?;

            let mut index = write_txn.open_table(USER_CALLS)?;
            for party in [&call.caller_id, &call.callee_id] {
                index.remove(index_key(party, call.sequence).as_str())?;
            }
            release_active(&write_txn, &call)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Drop `active_calls` entries that still point at this call.
fn release_active(write_txn: &WriteTransaction, call: &StoredCall) -> StoreResult<()> {
    let mut active = write_txn.open_table(ACTIVE_CALLS)?;
    for party in [&call.caller_id, &call.callee_id] {
        let owned = active
            .get(party.as_str())?
            .map(|v| v.value() == call.call_id)
            .unwrap_or(false);
        if owned {
            active.remove(party.as_str())?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_call(call_id: &str, caller: &str, callee: &str) -> StoredCall {
    StoredCall {
        call_id: call_id.to_string(),
        caller_id: caller.to_string(),
        callee_id: callee.to_string(),
        kind: CallKind::Voice,
        status: CallStatus::Initiated,
        started_at: Utc::now(),
        answered_at: None,
        ended_at: None,
        end_reason: None,
        metadata: SignalingMetadata::default(),
        sequence: 0,
    }
}
