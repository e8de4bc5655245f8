// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Direct message endpoints.
//!
//! Sending over HTTP has the same effect as the `send_message` real-time
//! event, including the push to a connected recipient.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::Auth,
    error::ApiError,
    models::{
        ConversationSummary, HistoryQuery, MessageStats, MessageView, ReadReceipt, SearchQuery,
        SendMessageRequest, UnreadCount,
    },
    state::AppState,
};

/// Send a direct message.
#[utoipa::path(
    post,
    path = "/v1/messages",
    tag = "Messages",
    security(("bearer_auth" = [])),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message stored", body = MessageView),
        (status = 400, description = "Empty or oversized content"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Recipient not found")
    )
)]
pub async fn send_message(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let message = state.messages.send(&user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(MessageView::from(&message))))
}

/// One entry per counterpart, newest conversation first.
#[utoipa::path(
    get,
    path = "/v1/messages/conversations",
    tag = "Messages",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Conversations", body = Vec<ConversationSummary>),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn conversations(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    Ok(Json(state.messages.conversations(&user.user_id).await?))
}

/// Messages exchanged with one user, newest first.
#[utoipa::path(
    get,
    path = "/v1/messages/with/{user_id}",
    tag = "Messages",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Other participant"), HistoryQuery),
    responses(
        (status = 200, description = "Message page", body = Vec<MessageView>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Cursor message not found")
    )
)]
pub async fn history(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(other_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = state
        .messages
        .history(&user.user_id, &other_id, query.before.as_deref(), query.limit)
        .await?;
    Ok(Json(messages.iter().map(MessageView::from).collect()))
}

/// Case-insensitive search over the caller's messages.
#[utoipa::path(
    get,
    path = "/v1/messages/search",
    tag = "Messages",
    security(("bearer_auth" = [])),
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching messages", body = Vec<MessageView>),
        (status = 400, description = "Empty query"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn search_messages(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = state
        .messages
        .search(&user.user_id, &query.q, query.limit)
        .await?;
    Ok(Json(messages.iter().map(MessageView::from).collect()))
}

#[utoipa::path(
    get,
    path = "/v1/messages/unread-count",
    tag = "Messages",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Unread messages addressed to the caller", body = UnreadCount),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn unread_count(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<UnreadCount>, ApiError> {
    let unread = state.messages.unread_count(&user.user_id).await?;
    Ok(Json(UnreadCount { unread }))
}

#[utoipa::path(
    get,
    path = "/v1/messages/stats",
    tag = "Messages",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Message statistics", body = MessageStats),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn stats(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<MessageStats>, ApiError> {
    Ok(Json(state.messages.stats(&user.user_id).await?))
}

/// Mark one message read. Only its recipient may do this.
#[utoipa::path(
    put,
    path = "/v1/messages/{message_id}/read",
    tag = "Messages",
    security(("bearer_auth" = [])),
    params(("message_id" = String, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Read receipt", body = ReadReceipt),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not the recipient"),
        (status = 404, description = "Message not found")
    )
)]
pub async fn mark_read(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<ReadReceipt>, ApiError> {
    Ok(Json(state.messages.mark_read(&message_id, &user.user_id).await?))
}

/// Mark everything a sender sent to the caller as read.
#[utoipa::path(
    put,
    path = "/v1/messages/read-all/{sender_id}",
    tag = "Messages",
    security(("bearer_auth" = [])),
    params(("sender_id" = String, Path, description = "Sender whose messages to mark")),
    responses(
        (status = 200, description = "Read receipt", body = ReadReceipt),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn mark_all_read(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(sender_id): Path<String>,
) -> Result<Json<ReadReceipt>, ApiError> {
    Ok(Json(
        state
            .messages
            .mark_all_read(&sender_id, &user.user_id)
            .await?,
    ))
}

/// Soft-delete a message for both participants.
#[utoipa::path(
    delete,
    path = "/v1/messages/{message_id}",
    tag = "Messages",
    security(("bearer_auth" = [])),
    params(("message_id" = String, Path, description = "Message ID")),
    responses(
        (status = 204, description = "Message deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Message not found")
    )
)]
pub async fn delete_message(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .messages
        .soft_delete(&message_id, &user.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use crate::realtime::presence::{drain, test_handle};
    use crate::realtime::ServerEvent;
    use crate::services::accounts::register_user;
    use crate::state::test_state;
    use crate::storage::{MessageType, StoredUser};

    fn auth(user: &StoredUser) -> Auth {
        Auth(AuthenticatedUser {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            session_id: "s".to_string(),
            issuer: "parley-test".to_string(),
            expires_at: 0,
        })
    }

    fn text(to: &StoredUser, content: &str) -> Json<SendMessageRequest> {
        Json(SendMessageRequest {
            recipient_id: to.user_id.clone(),
            content: content.to_string(),
            message_type: MessageType::Text,
            file_url: None,
            metadata: None,
        })
    }

    #[tokio::test]
    async fn http_send_pushes_like_realtime() {
        let (state, _dir) = test_state();
        let alice = register_user(&state.accounts, "alice").await;
        let bob = register_user(&state.accounts, "bob").await;
        let (handle, mut rx) = test_handle(&bob.user_id);
        state.presence.register(handle);

        let (status, Json(view)) = send_message(auth(&alice), State(state.clone()), text(&bob, "hi"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(view.content, "hi");
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::NewMessage(p) if p.message.message_id == view.message_id)));

        let Json(count) = unread_count(auth(&bob), State(state.clone())).await.unwrap();
        assert_eq!(count.unread, 1);

        let Json(receipt) = mark_read(auth(&bob), State(state.clone()), Path(view.message_id.clone()))
            .await
            .unwrap();
        assert_eq!(receipt.marked, vec![view.message_id.clone()]);

        let Json(count) = unread_count(auth(&bob), State(state)).await.unwrap();
        assert_eq!(count.unread, 0);
    }

    #[tokio::test]
    async fn delete_hides_message_from_history() {
        let (state, _dir) = test_state();
        let alice = register_user(&state.accounts, "alice").await;
        let bob = register_user(&state.accounts, "bob").await;

        let (_, Json(first)) = send_message(auth(&alice), State(state.clone()), text(&bob, "one"))
            .await
            .unwrap();
        let (status, _) = send_message(auth(&alice), State(state.clone()), text(&bob, "two"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let status = delete_message(auth(&alice), State(state.clone()), Path(first.message_id.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(page) = history(
            auth(&bob),
            State(state.clone()),
            Path(alice.user_id.clone()),
            Query(HistoryQuery {
                before: None,
                limit: None,
            }),
        )
        .await
        .unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two"]);

        let err = mark_read(auth(&bob), State(state), Path(first.message_id))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
