// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WebSocket transport for the real-time channel.
//!
//! The credential is verified before the upgrade; an unauthenticated client
//! never reaches `active`. Each connection runs one reader loop and one
//! writer task joined by an unbounded outbox, so pushes from other
//! connections never wait on this socket.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::{authenticate, bearer_token, AuthError, AuthenticatedUser};
use crate::state::AppState;

use super::events::ServerEvent;
use super::session::Session;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Browsers cannot set headers on the upgrade request
    #[serde(default)]
    pub token: Option<String>,
}

/// Real-time channel upgrade
#[utoipa::path(
    get,
    path = "/v1/ws",
    tag = "Realtime",
    params(("token" = Option<String>, Query, description = "Bearer token when the Authorization header cannot be set")),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 401, description = "Missing or invalid credential")
    ),
    security(("bearer_auth" = []))
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Result<Response, AuthError> {
    let token = handshake_token(&headers, query)?;
    let user = authenticate(&state, &token).await.inspect_err(|e| {
        tracing::debug!(error_code = e.error_code(), "Real-time handshake refused");
    })?;

    Ok(ws
        .on_upgrade(move |socket| run_connection(socket, state, user))
        .into_response())
}

/// The Authorization header wins; the query token is only consulted when no
/// header was sent. A malformed header is refused outright.
fn handshake_token(headers: &HeaderMap, query: WsQuery) -> Result<String, AuthError> {
    match bearer_token(headers) {
        Ok(token) => Ok(token.to_string()),
        Err(AuthError::MissingAuthHeader) => query
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::MissingAuthHeader),
        Err(e) => Err(e),
    }
}

async fn run_connection(socket: WebSocket, state: AppState, user: AuthenticatedUser) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerEvent>();
    let closer = state.shutdown.child_token();

    let mut session = Session::new(state, user);
    let handle = session.activate(outbox.clone(), closer.clone());
    tracing::info!(user_id = %handle.user_id, session_id = %handle.session_id, "Real-time session active");

    let writer_closer = closer.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                biased;
                event = inbox.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                _ = writer_closer.cancelled() => {
                    // Flush what is already queued, e.g. a session_replaced notice
                    while let Ok(event) = inbox.try_recv() {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = closer.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(ack) = session.handle_text(text.as_str()).await {
                        let _ = outbox.send(ServerEvent::Ack(ack));
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(user_id = %session.user_id(), "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    tracing::debug!(user_id = %session.user_id(), error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    closer.cancel();
    session.close().await;
    drop(outbox);
    if let Err(e) = writer.await {
        tracing::warn!(error = %e, "WebSocket writer task failed");
    }
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "Failed to serialize event");
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
