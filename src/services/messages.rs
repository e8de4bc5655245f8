// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Message delivery coordinator.
//!
//! A message is committed to the store before anything is pushed; the push to
//! a connected recipient is best effort and its failure is not an error. The
//! stored record is what clients fetch on reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{ConversationSummary, MessageStats, MessageView, ReadReceipt, SendMessageRequest};
use crate::realtime::events::{MessageReadPush, NewMessagePush, ServerEvent};
use crate::realtime::presence::PresenceRegistry;
use crate::services::accounts::AccountService;
use crate::storage::{MessageRepository, Store, StoredMessage};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;
pub const MAX_CONTENT_CHARS: usize = 10_000;

fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

#[derive(Clone)]
pub struct DeliveryCoordinator {
    store: Store,
    presence: Arc<PresenceRegistry>,
    accounts: AccountService,
}

impl DeliveryCoordinator {
    pub fn new(store: Store, presence: Arc<PresenceRegistry>, accounts: AccountService) -> Self {
        Self {
            store,
            presence,
            accounts,
        }
    }

    /// Persist a message, then push `new_message` if the recipient is online.
    pub async fn send(
        &self,
        sender_id: &str,
        request: SendMessageRequest,
    ) -> ServiceResult<StoredMessage> {
        let has_attachment = request
            .file_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if request.content.trim().is_empty() && !has_attachment {
            return Err(ServiceError::InvalidArgument(
                "Message content must not be empty".to_string(),
            ));
        }
        if request.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ServiceError::InvalidArgument(format!(
                "Message content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        if !self.accounts.exists_active(&request.recipient_id).await? {
            return Err(ServiceError::NotFound(format!(
                "User {} not found",
                request.recipient_id
            )));
        }

        let mut message = StoredMessage {
            message_id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: request.recipient_id,
            content: request.content,
            message_type: request.message_type,
            file_url: request.file_url.filter(|u| !u.trim().is_empty()),
            is_read: false,
            read_at: None,
            is_deleted: false,
            deleted_at: None,
            metadata: request.metadata,
            created_at: Utc::now(),
            sequence: 0,
        };

        let message = self
            .store
            .run(move |store| {
                MessageRepository::new(store).create(&mut message)?;
                Ok::<_, ServiceError>(message)
            })
            .await?;

        tracing::debug!(
            message_id = %message.message_id,
            sender_id = %message.sender_id,
            recipient_id = %message.recipient_id,
            "Message stored"
        );

        // Sender info is decoration; a lookup failure must not fail the send
        let sender = self.accounts.display_summary(sender_id).await;
        let delivered = self.presence.push_to(
            &message.recipient_id,
            ServerEvent::NewMessage(NewMessagePush {
                message: MessageView::from(&message),
                sender,
            }),
        );
        tracing::debug!(message_id = %message.message_id, delivered, "Message push attempted");

        Ok(message)
    }

    /// Mark one message read. Only the recipient may do this.
    ///
    /// Already-read messages are left untouched and produce no receipt.
    pub async fn mark_read(&self, message_id: &str, reader_id: &str) -> ServiceResult<ReadReceipt> {
        let id = message_id.to_string();
        let reader = reader_id.to_string();
        let now = Utc::now();

        let (message, changed) = self
            .store
            .run(move |store| {
                MessageRepository::new(store).update(&id, |m| {
                    if m.is_deleted {
                        return Err(ServiceError::NotFound(format!(
                            "Message {} not found",
                            m.message_id
                        )));
                    }
                    if m.recipient_id != reader {
                        return Err(ServiceError::Forbidden(
                            "Only the recipient can mark a message read".to_string(),
                        ));
                    }
                    if m.is_read {
                        return Ok(false);
                    }
                    m.is_read = true;
                    m.read_at = Some(now);
                    Ok(true)
                })
            })
            .await?;

        if changed {
            self.push_receipt(&message, reader_id);
        }

        Ok(ReadReceipt {
            marked: if changed {
                vec![message.message_id.clone()]
            } else {
                Vec::new()
            },
            read_at: message.read_at.unwrap_or(now),
        })
    }

    /// Mark everything `sender_id` sent to `reader_id` as read.
    pub async fn mark_all_read(&self, sender_id: &str, reader_id: &str) -> ServiceResult<ReadReceipt> {
        let sender = sender_id.to_string();
        let reader = reader_id.to_string();
        let now = Utc::now();

        let changed = self
            .store
            .run(move |store| {
                Ok::<_, ServiceError>(
                    MessageRepository::new(store).mark_all_read(&sender, &reader, now)?,
                )
            })
            .await?;

        for message in &changed {
            self.push_receipt(message, reader_id);
        }

        Ok(ReadReceipt {
            marked: changed.into_iter().map(|m| m.message_id).collect(),
            read_at: now,
        })
    }

    fn push_receipt(&self, message: &StoredMessage, reader_id: &str) {
        let Some(read_at) = message.read_at else {
            return;
        };
        self.presence.push_to(
            &message.sender_id,
            ServerEvent::MessageRead(MessageReadPush {
                read_by: reader_id.to_string(),
                message_id: message.message_id.clone(),
                read_at,
            }),
        );
    }

    /// Hide a message from both participants.
    pub async fn soft_delete(&self, message_id: &str, acting_id: &str) -> ServiceResult<()> {
        let id = message_id.to_string();
        let actor = acting_id.to_string();
        self.store
            .run(move |store| {
                MessageRepository::new(store).update(&id, |m| {
                    if m.is_deleted {
                        return Err(ServiceError::NotFound(format!(
                            "Message {} not found",
                            m.message_id
                        )));
                    }
                    if !m.is_participant(&actor) {
                        return Err(ServiceError::Forbidden(
                            "Only a participant can delete a message".to_string(),
                        ));
                    }
                    m.is_deleted = true;
                    m.deleted_at = Some(Utc::now());
                    Ok(())
                })
            })
            .await?;
        tracing::debug!(message_id = %message_id, user_id = %acting_id, "Message deleted");
        Ok(())
    }

    /// Messages between `user_id` and `other_id`, newest first.
    ///
    /// `before` is a message id; only older messages are returned.
    pub async fn history(
        &self,
        user_id: &str,
        other_id: &str,
        before: Option<&str>,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<StoredMessage>> {
        let limit = page_limit(limit);
        let before_sequence = match before {
            Some(cursor) => {
                let anchor = self.visible(cursor, user_id).await?;
                Some(anchor.sequence)
            }
            None => None,
        };

        let user = user_id.to_string();
        let other = other_id.to_string();
        self.store
            .run(move |store| {
                let messages = MessageRepository::new(store).scan(&user, before_sequence, limit, |m| {
                    !m.is_deleted && m.counterpart(&user) == other && m.is_participant(&other)
                })?;
                Ok::<_, ServiceError>(messages)
            })
            .await
    }

    /// One entry per counterpart, newest conversation first.
    pub async fn conversations(&self, user_id: &str) -> ServiceResult<Vec<ConversationSummary>> {
        let user = user_id.to_string();
        let messages = self
            .store
            .run(move |store| {
                Ok::<_, ServiceError>(
                    MessageRepository::new(store).scan(&user, None, usize::MAX, |m| !m.is_deleted)?,
                )
            })
            .await?;

        // Newest first, so the first message seen per counterpart is the latest
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, (StoredMessage, u64)> = HashMap::new();
        for message in messages {
            let counterpart = message.counterpart(user_id).to_string();
            let unread = u64::from(message.recipient_id == user_id && !message.is_read);
            match latest.get_mut(&counterpart) {
                Some((_, count)) => *count += unread,
                None => {
                    order.push(counterpart.clone());
                    latest.insert(counterpart, (message, unread));
                }
            }
        }

        let mut conversations = Vec::with_capacity(order.len());
        for counterpart_id in order {
            let Some((message, unread_count)) = latest.remove(&counterpart_id) else {
                continue;
            };
            let counterpart = self.accounts.display_summary(&counterpart_id).await;
            conversations.push(ConversationSummary {
                counterpart_id,
                counterpart,
                last_message: MessageView::from(&message),
                unread_count,
            });
        }
        Ok(conversations)
    }

    /// Case-insensitive substring search over the user's visible messages.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<StoredMessage>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "search query must not be empty".to_string(),
            ));
        }
        let limit = page_limit(limit);
        let user = user_id.to_string();
        self.store
            .run(move |store| {
                let messages = MessageRepository::new(store).scan(&user, None, limit, |m| {
                    !m.is_deleted && m.content.to_lowercase().contains(&needle)
                })?;
                Ok::<_, ServiceError>(messages)
            })
            .await
    }

    pub async fn unread_count(&self, user_id: &str) -> ServiceResult<u64> {
        Ok(self.stats(user_id).await?.unread)
    }

    pub async fn stats(&self, user_id: &str) -> ServiceResult<MessageStats> {
        let user = user_id.to_string();
        let messages = self
            .store
            .run(move |store| {
                Ok::<_, ServiceError>(
                    MessageRepository::new(store).scan(&user, None, usize::MAX, |m| !m.is_deleted)?,
                )
            })
            .await?;

        let mut stats = MessageStats::default();
        for m in &messages {
            if m.sender_id == user_id {
                stats.sent += 1;
            }
            if m.recipient_id == user_id {
                stats.received += 1;
                if !m.is_read {
                    stats.unread += 1;
                }
            }
        }
        Ok(stats)
    }

    /// A non-deleted message the user participates in.
    async fn visible(&self, message_id: &str, user_id: &str) -> ServiceResult<StoredMessage> {
        let id = message_id.to_string();
        let message = self
            .store
            .run(move |store| Ok::<_, ServiceError>(MessageRepository::new(store).get(&id)?))
            .await?;
        match message {
            Some(m) if !m.is_deleted && m.is_participant(user_id) => Ok(m),
            _ => Err(ServiceError::NotFound(format!("Message {message_id} not found"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::presence::{drain, test_handle};
    use crate::services::accounts::register_user;
    use crate::storage::database::{overwrite_row, temp_store, USERS};
    use crate::storage::MessageType;

    struct Fixture {
        store: Store,
        delivery: DeliveryCoordinator,
        presence: Arc<PresenceRegistry>,
        alice: String,
        bob: String,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let (store, dir) = temp_store();
        let accounts = AccountService::new(store.clone());
        let alice = register_user(&accounts, "alice").await.user_id;
        let bob = register_user(&accounts, "bob").await.user_id;
        let presence = Arc::new(PresenceRegistry::new());
        Fixture {
            store: store.clone(),
            delivery: DeliveryCoordinator::new(store, presence.clone(), accounts),
            presence,
            alice,
            bob,
            _dir: dir,
        }
    }

    fn text(to: &str, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            recipient_id: to.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            file_url: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn send_pushes_to_online_recipient_and_tracks_unread() {
        let f = fixture().await;
        let (handle, mut rx) = test_handle(&f.bob);
        f.presence.register(handle);

        let sent = f.delivery.send(&f.alice, text(&f.bob, "hi")).await.unwrap();

        let pushes: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::NewMessage(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].message.content, "hi");
        assert_eq!(pushes[0].sender.as_ref().unwrap().username, "alice");

        assert_eq!(f.delivery.unread_count(&f.bob).await.unwrap(), 1);
        f.delivery.mark_read(&sent.message_id, &f.bob).await.unwrap();
        assert_eq!(f.delivery.unread_count(&f.bob).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_survives_unreadable_sender_profile() {
        let f = fixture().await;
        overwrite_row(&f.store, USERS, &f.alice, b"not json");
        let (handle, mut rx) = test_handle(&f.bob);
        f.presence.register(handle);

        let sent = f.delivery.send(&f.alice, text(&f.bob, "still here")).await.unwrap();

        let push = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::NewMessage(p) => Some(p),
                _ => None,
            })
            .unwrap();
        assert_eq!(push.message.message_id, sent.message_id);
        assert!(push.sender.is_none());
    }

    #[tokio::test]
    async fn send_to_offline_recipient_still_persists() {
        let f = fixture().await;
        let sent = f.delivery.send(&f.alice, text(&f.bob, "later")).await.unwrap();
        let history = f.delivery.history(&f.bob, &f.alice, None, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message_id, sent.message_id);
    }

    #[tokio::test]
    async fn send_validates_input() {
        let f = fixture().await;
        assert!(matches!(
            f.delivery.send(&f.alice, text(&f.bob, "   ")).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.delivery.send(&f.alice, text("ghost", "hi")).await,
            Err(ServiceError::NotFound(_))
        ));

        let mut attachment = text(&f.bob, "");
        attachment.message_type = MessageType::Image;
        attachment.file_url = Some("https://cdn.example.com/cat.png".to_string());
        assert!(f.delivery.send(&f.alice, attachment).await.is_ok());
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_without_double_receipt() {
        let f = fixture().await;
        let (handle, mut alice_rx) = test_handle(&f.alice);
        f.presence.register(handle);

        let sent = f.delivery.send(&f.alice, text(&f.bob, "hi")).await.unwrap();
        drain(&mut alice_rx);

        let first = f.delivery.mark_read(&sent.message_id, &f.bob).await.unwrap();
        assert_eq!(first.marked, vec![sent.message_id.clone()]);
        let second = f.delivery.mark_read(&sent.message_id, &f.bob).await.unwrap();
        assert!(second.marked.is_empty());
        assert_eq!(second.read_at, first.read_at);

        let receipts = drain(&mut alice_rx)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::MessageRead(_)))
            .count();
        assert_eq!(receipts, 1);

        // Sender cannot mark their own message read
        assert!(matches!(
            f.delivery.mark_read(&sent.message_id, &f.alice).await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn mark_all_read_only_touches_that_sender() {
        let f = fixture().await;
        f.delivery.send(&f.alice, text(&f.bob, "one")).await.unwrap();
        f.delivery.send(&f.alice, text(&f.bob, "two")).await.unwrap();
        f.delivery.send(&f.bob, text(&f.alice, "reply")).await.unwrap();

        let receipt = f.delivery.mark_all_read(&f.alice, &f.bob).await.unwrap();
        assert_eq!(receipt.marked.len(), 2);
        assert_eq!(f.delivery.unread_count(&f.bob).await.unwrap(), 0);
        assert_eq!(f.delivery.unread_count(&f.alice).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleted_messages_disappear_everywhere() {
        let f = fixture().await;
        let keep = f.delivery.send(&f.alice, text(&f.bob, "keep me")).await.unwrap();
        let gone = f.delivery.send(&f.alice, text(&f.bob, "secret me")).await.unwrap();

        f.delivery.soft_delete(&gone.message_id, &f.bob).await.unwrap();

        for (me, other) in [(&f.alice, &f.bob), (&f.bob, &f.alice)] {
            let history = f.delivery.history(me, other, None, None).await.unwrap();
            assert!(history.iter().all(|m| m.message_id != gone.message_id));
            assert_eq!(history.len(), 1);

            let found = f.delivery.search(me, "me", None).await.unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].message_id, keep.message_id);

            let conversations = f.delivery.conversations(me).await.unwrap();
            assert_eq!(conversations.len(), 1);
            assert_eq!(conversations[0].last_message.message_id, keep.message_id);
        }

        assert!(matches!(
            f.delivery.soft_delete(&gone.message_id, &f.alice).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn soft_delete_requires_participant() {
        let f = fixture().await;
        let sent = f.delivery.send(&f.alice, text(&f.bob, "hi")).await.unwrap();
        assert!(matches!(
            f.delivery.soft_delete(&sent.message_id, "mallory").await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.delivery.soft_delete("missing", &f.alice).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_pages_backwards_in_send_order() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let m = f
                .delivery
                .send(&f.alice, text(&f.bob, &format!("m{i}")))
                .await
                .unwrap();
            ids.push(m.message_id);
        }

        let page = f
            .delivery
            .history(&f.bob, &f.alice, None, Some(2))
            .await
            .unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3"]);

        let older = f
            .delivery
            .history(&f.bob, &f.alice, Some(&page[1].message_id), Some(10))
            .await
            .unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m1", "m0"]);
    }

    #[tokio::test]
    async fn conversations_and_stats() {
        let f = fixture().await;
        let accounts = AccountService::new(f.delivery.store.clone());
        let carol = register_user(&accounts, "carol").await.user_id;

        f.delivery.send(&f.alice, text(&f.bob, "to bob")).await.unwrap();
        f.delivery.send(&carol, text(&f.bob, "from carol 1")).await.unwrap();
        f.delivery.send(&carol, text(&f.bob, "from carol 2")).await.unwrap();
        f.delivery.send(&f.bob, text(&f.alice, "bob replies")).await.unwrap();

        let conversations = f.delivery.conversations(&f.bob).await.unwrap();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].counterpart_id, f.alice);
        assert_eq!(conversations[0].last_message.content, "bob replies");
        assert_eq!(conversations[0].unread_count, 1);
        assert_eq!(conversations[1].counterpart_id, carol);
        assert_eq!(conversations[1].unread_count, 2);
        assert_eq!(
            conversations[1].counterpart.as_ref().unwrap().username,
            "carol"
        );

        let stats = f.delivery.stats(&f.bob).await.unwrap();
        assert_eq!(
            stats,
            MessageStats {
                sent: 1,
                received: 3,
                unread: 3,
            }
        );
    }
}
