// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-connection session: `connecting → authenticated → active → closed`.
//!
//! The socket layer authenticates before upgrading, creates the session in
//! `Authenticated`, and activates it once the outbox exists. While active,
//! every inbound frame is dispatched to the services; request/response
//! events produce an [`Ack`], typing relays never do.

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthenticatedUser;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{CallView, MessageView};
use crate::state::AppState;
use crate::storage::{CallStatus, StoredCall};

use super::events::{
    Ack, CallEndedPush, CallUpdatePush, ClientEvent, InboundFrame, IncomingCallPush,
    MarkReadRequest, ServerEvent, SessionReplacedPush, SignalKind, SignalRequest, TypingPush,
};
use super::presence::ConnectionHandle;

/// End reason recorded when a participant's last connection drops.
pub const DISCONNECT_REASON: &str = "disconnected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

pub struct Session {
    state: AppState,
    user: AuthenticatedUser,
    phase: SessionPhase,
    handle: Option<ConnectionHandle>,
}

impl Session {
    /// A session for a user whose credential has already been verified.
    pub fn new(state: AppState, user: AuthenticatedUser) -> Self {
        Self {
            state,
            user,
            phase: SessionPhase::Authenticated,
            handle: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }

    /// Register the connection in the presence registry.
    ///
    /// A connection this one displaces is told so and closed.
    pub fn activate(
        &mut self,
        outbox: mpsc::UnboundedSender<ServerEvent>,
        closer: CancellationToken,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle::new(self.user.user_id.clone(), outbox, closer);
        if let Some(previous) = self.state.presence.register(handle.clone()) {
            if previous.session_id != handle.session_id {
                tracing::info!(
                    user_id = %self.user.user_id,
                    replaced = %previous.session_id,
                    session_id = %handle.session_id,
                    "Connection replaced by newer session"
                );
                previous.push(ServerEvent::SessionReplaced(SessionReplacedPush {
                    session_id: handle.session_id.to_string(),
                }));
                previous.close();
            }
        }
        self.phase = SessionPhase::Active;
        self.handle = Some(handle.clone());
        handle
    }

    /// Dispatch one inbound text frame.
    pub async fn handle_text(&self, text: &str) -> Option<Ack> {
        if self.phase != SessionPhase::Active {
            return None;
        }

        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(user_id = %self.user.user_id, error = %err.message, "Rejected inbound frame");
                return Some(Ack::invalid_frame(err));
            }
        };

        let InboundFrame { ack_id, event } = frame;
        if let ClientEvent::TypingStart(req) | ClientEvent::TypingStop(req) = &event {
            let start = matches!(event, ClientEvent::TypingStart(_));
            self.relay_typing(&req.recipient_id, start);
            return None;
        }

        let name = event_name(&event);
        match self.dispatch(event).await {
            Ok(data) => Some(Ack::ok(ack_id, data)),
            Err(err) => {
                err.log_if_internal(name);
                tracing::debug!(user_id = %self.user.user_id, event = name, error = %err, "Event failed");
                Some(Ack::failed(ack_id, &err))
            }
        }
    }

    async fn dispatch(&self, event: ClientEvent) -> ServiceResult<Option<Value>> {
        let me = self.user.user_id.as_str();
        match event {
            ClientEvent::SendMessage(req) => {
                let message = self.state.messages.send(me, req).await?;
                to_data(&MessageView::from(&message))
            }
            ClientEvent::MarkRead(req) => self.mark_read(req).await,
            ClientEvent::StartCall(req) => {
                let call = self.start_call(&req.callee_id, req.call_type).await?;
                to_data(&CallView::from(&call))
            }
            ClientEvent::AnswerCall(req) => {
                let call = self.respond(&req.call_id, CallStatus::Answered).await?;
                to_data(&CallView::from(&call))
            }
            ClientEvent::RejectCall(req) => {
                let call = self.respond(&req.call_id, CallStatus::Rejected).await?;
                to_data(&CallView::from(&call))
            }
            ClientEvent::EndCall(req) => {
                let call = self.state.calls.end(&req.call_id, me, req.end_reason).await?;
                notify_call_ended(&self.state, &call, me);
                to_data(&CallView::from(&call))
            }
            ClientEvent::WebrtcOffer(req) => self.signal(SignalKind::Offer, req).await,
            ClientEvent::WebrtcAnswer(req) => self.signal(SignalKind::Answer, req).await,
            ClientEvent::WebrtcIceCandidate(req) => self.signal(SignalKind::IceCandidate, req).await,
            ClientEvent::TypingStart(_) | ClientEvent::TypingStop(_) => Ok(None),
        }
    }

    async fn mark_read(&self, req: MarkReadRequest) -> ServiceResult<Option<Value>> {
        let me = self.user.user_id.as_str();
        let receipt = match (req.message_id, req.sender_id) {
            (Some(message_id), _) => self.state.messages.mark_read(&message_id, me).await?,
            (None, Some(sender_id)) => self.state.messages.mark_all_read(&sender_id, me).await?,
            (None, None) => {
                return Err(ServiceError::InvalidArgument(
                    "mark_read needs message_id or sender_id".to_string(),
                ))
            }
        };
        to_data(&receipt)
    }

    /// Create the call, ring the callee if connected.
    ///
    /// The call only moves to `ringing` once the push reached a live
    /// connection; an offline callee finds it later via the active-call query.
    async fn start_call(
        &self,
        callee_id: &str,
        kind: crate::storage::CallKind,
    ) -> ServiceResult<StoredCall> {
        let me = self.user.user_id.as_str();
        let call = self.state.calls.start(me, callee_id, kind).await?;

        let caller = self.state.accounts.display_summary(me).await;
        let rang = self.state.presence.push_to(
            callee_id,
            ServerEvent::IncomingCall(IncomingCallPush {
                call: CallView::from(&call),
                caller,
            }),
        );
        if !rang {
            return Ok(call);
        }

        match self
            .state
            .calls
            .transition(&call.call_id, CallStatus::Ringing, Some(me))
            .await
        {
            Ok(ringing) => Ok(ringing),
            // The callee may already have answered or rejected
            Err(ServiceError::InvalidState(_)) => self.state.calls.get(&call.call_id, me).await,
            Err(e) => Err(e),
        }
    }

    /// Callee answers or rejects; the caller is notified.
    async fn respond(&self, call_id: &str, target: CallStatus) -> ServiceResult<StoredCall> {
        let me = self.user.user_id.as_str();
        let call = self.state.calls.get(call_id, me).await?;
        if call.callee_id != me {
            return Err(ServiceError::Forbidden(
                "Only the callee can answer or reject a call".to_string(),
            ));
        }

        let call = self.state.calls.transition(call_id, target, Some(me)).await?;
        let update = CallUpdatePush {
            call_id: call.call_id.clone(),
            by_user_id: me.to_string(),
        };
        let event = match target {
            CallStatus::Answered => ServerEvent::CallAnswered(update),
            _ => ServerEvent::CallRejected(update),
        };
        self.state.presence.push_to(&call.caller_id, event);
        Ok(call)
    }

    async fn signal(&self, kind: SignalKind, req: SignalRequest) -> ServiceResult<Option<Value>> {
        let delivered = self
            .state
            .signaling
            .relay(
                kind,
                &req.call_id,
                req.payload,
                &req.target_user_id,
                &self.user.user_id,
            )
            .await?;
        Ok(Some(json!({ "delivered": delivered })))
    }

    fn relay_typing(&self, recipient_id: &str, start: bool) {
        if recipient_id == self.user.user_id {
            return;
        }
        let push = TypingPush {
            user_id: self.user.user_id.clone(),
        };
        let event = if start {
            ServerEvent::TypingStart(push)
        } else {
            ServerEvent::TypingStop(push)
        };
        // Offline recipients simply miss it
        self.state.presence.push_to(recipient_id, event);
    }

    /// Tear the session down after the transport closed.
    ///
    /// Only the connection still owning the user's presence entry touches
    /// `last_seen_at` and ends a dangling call; a displaced one does nothing.
    pub async fn close(&mut self) {
        if self.phase == SessionPhase::Closed {
            return;
        }
        self.phase = SessionPhase::Closed;

        let Some(handle) = self.handle.take() else {
            return;
        };
        let user_id = self.user.user_id.clone();
        if !self.state.presence.unregister(&user_id, handle.session_id) {
            return;
        }

        if let Err(e) = self.state.accounts.touch_last_seen(&user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to record last seen");
        }

        let active = match self.state.calls.get_active(&user_id).await {
            Ok(active) => active,
            Err(e) => {
                e.log_if_internal("close_session");
                None
            }
        };
        if let Some(call) = active {
            match self
                .state
                .calls
                .end(&call.call_id, &user_id, Some(DISCONNECT_REASON.to_string()))
                .await
            {
                Ok(ended) => notify_call_ended(&self.state, &ended, &user_id),
                Err(e) => {
                    tracing::debug!(call_id = %call.call_id, error = %e, "Call not ended on disconnect")
                }
            }
        }
        tracing::info!(user_id = %user_id, session_id = %handle.session_id, "Session closed");
    }
}

/// Tell the other participant that `call` ended.
pub fn notify_call_ended(state: &AppState, call: &StoredCall, by_user_id: &str) {
    let event = ServerEvent::CallEnded(CallEndedPush {
        call_id: call.call_id.clone(),
        by_user_id: by_user_id.to_string(),
        end_reason: call.end_reason.clone(),
        duration_seconds: call.duration_seconds(),
    });
    state.presence.push_to(call.counterpart(by_user_id), event);
}

fn to_data<T: Serialize>(value: &T) -> ServiceResult<Option<Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| ServiceError::Internal(format!("serialize ack payload: {e}")))
}

fn event_name(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::SendMessage(_) => "send_message",
        ClientEvent::MarkRead(_) => "mark_read",
        ClientEvent::TypingStart(_) => "typing_start",
        ClientEvent::TypingStop(_) => "typing_stop",
        ClientEvent::StartCall(_) => "start_call",
        ClientEvent::AnswerCall(_) => "answer_call",
        ClientEvent::RejectCall(_) => "reject_call",
        ClientEvent::EndCall(_) => "end_call",
        ClientEvent::WebrtcOffer(_) => "webrtc_offer",
        ClientEvent::WebrtcAnswer(_) => "webrtc_answer",
        ClientEvent::WebrtcIceCandidate(_) => "webrtc_ice_candidate",
    }
}
