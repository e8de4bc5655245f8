// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Direct message repository.
//!
//! Every message is indexed under both participants in `user_messages`, keyed
//! by a global sequence so a range scan yields a user's messages in the order
//! they were stored. Messages are never physically removed: a participant's
//! delete only sets `is_deleted`.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::storage::database::{
    index_key, index_range, next_sequence, read_row, write_row, Store, StoreError, StoreResult,
    MESSAGES, USER_MESSAGES,
};

/// Kind of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

/// A direct message between two users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sequence: u64,
}

impl StoredMessage {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }

    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }
}

/// Repository for message rows.
pub struct MessageRepository<'a> {
    store: &'a Store,
}

impl<'a> MessageRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Persist a new message, assigning its sequence.
    pub fn create(&self, message: &mut StoredMessage) -> StoreResult<()> {
        let write_txn = self.store.db().begin_write()?;
        {
            message.sequence = next_sequence(&write_txn, "messages")?;

            let mut messages = write_txn.open_table(MESSAGES)?;
            if messages.get(message.message_id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "Message {}",
                    message.message_id
                )));
            }
            write_row(&mut messages, &message.message_id, message)?;

            let mut index = write_txn.open_table(USER_MESSAGES)?;
            for party in [&message.sender_id, &message.recipient_id] {
                index.insert(
                    index_key(party, message.sequence).as_str(),
                    message.message_id.as_str(),
                )?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, message_id: &str) -> StoreResult<Option<StoredMessage>> {
        let read_txn = self.store.db().begin_read()?;
        let messages = read_txn.open_table(MESSAGES)?;
        read_row(&messages, message_id)
    }

    /// Read-modify-write a message in one transaction.
    ///
    /// Nothing is written when `mutate` returns an error.
    pub fn update<T, E, F>(&self, message_id: &str, mutate: F) -> Result<(StoredMessage, T), E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut StoredMessage) -> Result<T, E>,
    {
        let write_txn = self.store.db().begin_write().map_err(StoreError::from)?;
        let result = {
            let mut messages = write_txn.open_table(MESSAGES).map_err(StoreError::from)?;
            let mut message: StoredMessage = read_row(&messages, message_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Message {message_id}")))?;
            let out = mutate(&mut message)?;
            write_row(&mut messages, message_id, &message)?;
            (message, out)
        };
        write_txn.commit().map_err(StoreError::from)?;
        Ok(result)
    }

    /// Mark every unread message from `sender_id` to `reader_id` as read.
    ///
    /// Returns the messages that changed.
    pub fn mark_all_read(
        &self,
        sender_id: &str,
        reader_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredMessage>> {
        let write_txn = self.store.db().begin_write()?;
        let changed = {
            let index = write_txn.open_table(USER_MESSAGES)?;
            let mut messages = write_txn.open_table(MESSAGES)?;

            let (start, end) = index_range(reader_id);
            let mut ids = Vec::new();
            for entry in index.range(start.as_str()..end.as_str())? {
                let (_, id) = entry?;
                ids.push(id.value().to_string());
            }

            let mut changed = Vec::new();
            for id in ids {
                let Some(mut message) = read_row::<StoredMessage, _>(&messages, &id)? else {
                    continue;
                };
                if message.sender_id != sender_id
                    || message.recipient_id != reader_id
                    || message.is_read
                    || message.is_deleted
                {
                    continue;
                }
                message.is_read = true;
                message.read_at = Some(at);
                write_row(&mut messages, &id, &message)?;
                changed.push(message);
            }
            changed
        };
        write_txn.commit()?;
        Ok(changed)
    }

    /// Scan `user_id`'s messages newest first.
    ///
    /// Starts strictly below `before_sequence` when given, keeps messages
    /// accepted by `filter` and stops after `limit` matches.
    pub fn scan<F>(
        &self,
        user_id: &str,
        before_sequence: Option<u64>,
        limit: usize,
        mut filter: F,
    ) -> StoreResult<Vec<StoredMessage>>
    where
        F: FnMut(&StoredMessage) -> bool,
    {
        let read_txn = self.store.db().begin_read()?;
        let index = read_txn.open_table(USER_MESSAGES)?;
        let messages = read_txn.open_table(MESSAGES)?;

        let (start, mut end) = index_range(user_id);
        if let Some(seq) = before_sequence {
            end = index_key(user_id, seq);
        }

        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }
        for entry in index.range(start.as_str()..end.as_str())?.rev() {
            let (_, id) = entry?;
            let Some(message) = read_row::<StoredMessage, _>(&messages, id.value())? else {
                continue;
            };
            if filter(&message) {
                results.push(message);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) fn sample_message(id: &str, sender: &str, recipient: &str, content: &str) -> StoredMessage {
    StoredMessage {
        message_id: id.to_string(),
        sender_id: sender.to_string(),
        recipient_id: recipient.to_string(),
        content: content.to_string(),
        message_type: MessageType::Text,
        file_url: None,
        is_read: false,
        read_at: None,
        is_deleted: false,
        deleted_at: None,
        metadata: None,
        created_at: Utc::now(),
        sequence: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::temp_store;

    #[test]
    fn create_indexes_both_participants_in_order() {
        let (store, _dir) = temp_store();
        let repo = MessageRepository::new(&store);
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            let mut msg = sample_message(&format!("m{i}"), "a", "b", text);
            repo.create(&mut msg).unwrap();
            assert_eq!(msg.sequence, i as u64 + 1);
        }

        let for_b: Vec<_> = repo
            .scan("b", None, 10, |_| true)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(for_b, vec!["three", "two", "one"]);
        assert_eq!(repo.scan("a", None, 10, |_| true).unwrap().len(), 3);
        assert!(repo.scan("c", None, 10, |_| true).unwrap().is_empty());
    }

    #[test]
    fn scan_respects_cursor_and_limit() {
        let (store, _dir) = temp_store();
        let repo = MessageRepository::new(&store);
        for i in 0..5 {
            repo.create(&mut sample_message(&format!("m{i}"), "a", "b", "x"))
                .unwrap();
        }

        let page = repo.scan("a", Some(4), 2, |_| true).unwrap();
        let seqs: Vec<_> = page.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![3, 2]);
    }

    #[test]
    fn update_and_mark_all_read() {
        let (store, _dir) = temp_store();
        let repo = MessageRepository::new(&store);
        repo.create(&mut sample_message("m1", "a", "b", "hi")).unwrap();
        repo.create(&mut sample_message("m2", "a", "b", "there")).unwrap();
        repo.create(&mut sample_message("m3", "b", "a", "yo")).unwrap();

        let (deleted, ()) = repo
            .update::<_, StoreError, _>("m2", |m| {
                m.is_deleted = true;
                Ok(())
            })
            .unwrap();
        assert!(deleted.is_deleted);

        let changed = repo.mark_all_read("a", "b", Utc::now()).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].message_id, "m1");
        assert!(repo.get("m1").unwrap().unwrap().is_read);
        assert!(!repo.get("m3").unwrap().unwrap().is_read);

        // Second pass finds nothing left
        assert!(repo.mark_all_read("a", "b", Utc::now()).unwrap().is_empty());
    }
}
