// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Real-time event catalog.
//!
//! Every WebSocket text frame is a JSON object
//! `{"event": "<name>", "data": {...}, "ack_id": "<optional>"}`. Client frames
//! that carry an `ack_id` are answered with an `ack` event echoing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;
use crate::models::{CallView, MessageView, SendMessageRequest};
use crate::storage::{CallKind, UserSummary};

/// Opaque WebRTC negotiation payload, stored and forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(pub Value);

/// Which signaling message is being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

// =============================================================================
// Client → Server
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MarkReadRequest {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingRequest {
    pub recipient_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartCallRequest {
    pub callee_id: String,
    #[serde(default = "default_call_type")]
    pub call_type: CallKind,
}

fn default_call_type() -> CallKind {
    CallKind::Voice
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallRef {
    pub call_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndCallEvent {
    pub call_id: String,
    #[serde(default)]
    pub end_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalRequest {
    pub call_id: String,
    pub payload: SignalPayload,
    pub target_user_id: String,
}

/// Inbound named events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage(SendMessageRequest),
    MarkRead(MarkReadRequest),
    TypingStart(TypingRequest),
    TypingStop(TypingRequest),
    StartCall(StartCallRequest),
    AnswerCall(CallRef),
    RejectCall(CallRef),
    EndCall(EndCallEvent),
    WebrtcOffer(SignalRequest),
    WebrtcAnswer(SignalRequest),
    WebrtcIceCandidate(SignalRequest),
}

/// A parsed inbound frame.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub ack_id: Option<String>,
    pub event: ClientEvent,
}

/// Why an inbound frame could not be dispatched.
#[derive(Debug, Clone)]
pub struct FrameError {
    pub ack_id: Option<String>,
    pub message: String,
}

impl InboundFrame {
    /// Parse a text frame, keeping the `ack_id` even when the event is invalid
    /// so the client still gets a failed acknowledgement.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let mut value: Value = serde_json::from_str(text).map_err(|e| FrameError {
            ack_id: None,
            message: format!("invalid JSON: {e}"),
        })?;

        let ack_id = value
            .as_object_mut()
            .and_then(|obj| obj.remove("ack_id"))
            .and_then(|v| match v {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        match serde_json::from_value::<ClientEvent>(value) {
            Ok(event) => Ok(Self { ack_id, event }),
            Err(e) => Err(FrameError {
                ack_id,
                message: format!("invalid event: {e}"),
            }),
        }
    }
}

// =============================================================================
// Server → Client
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct NewMessagePush {
    pub message: MessageView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReadPush {
    pub read_by: String,
    pub message_id: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypingPush {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomingCallPush {
    pub call: CallView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallUpdatePush {
    pub call_id: String,
    /// The participant whose action caused the update
    pub by_user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEndedPush {
    pub call_id: String,
    pub by_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalPush {
    pub call_id: String,
    pub payload: SignalPayload,
    pub from_user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStatusPush {
    pub user_id: String,
    pub is_online: bool,
    /// Increases with every presence change; older statuses are superseded
    pub epoch: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReplacedPush {
    /// Session that took over
    pub session_id: String,
}

/// Acknowledgement of a request/response style client event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Ack {
    pub fn ok(ack_id: Option<String>, data: Option<Value>) -> Self {
        Self {
            ack_id,
            success: true,
            data,
            error: None,
            code: None,
        }
    }

    pub fn failed(ack_id: Option<String>, err: &ServiceError) -> Self {
        Self {
            ack_id,
            success: false,
            data: None,
            error: Some(err.public_message()),
            code: Some(err.code().to_string()),
        }
    }

    pub fn invalid_frame(err: FrameError) -> Self {
        Self {
            ack_id: err.ack_id,
            success: false,
            data: None,
            error: Some(err.message),
            code: Some("invalid_argument".to_string()),
        }
    }
}

/// Outbound events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(NewMessagePush),
    MessageRead(MessageReadPush),
    TypingStart(TypingPush),
    TypingStop(TypingPush),
    IncomingCall(IncomingCallPush),
    CallAnswered(CallUpdatePush),
    CallRejected(CallUpdatePush),
    CallEnded(CallEndedPush),
    WebrtcOffer(SignalPush),
    WebrtcAnswer(SignalPush),
    WebrtcIceCandidate(SignalPush),
    UserStatus(UserStatusPush),
    SessionReplaced(SessionReplacedPush),
    Ack(Ack),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageRead(_) => "message_read",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::IncomingCall(_) => "incoming_call",
            Self::CallAnswered(_) => "call_answered",
            Self::CallRejected(_) => "call_rejected",
            Self::CallEnded(_) => "call_ended",
            Self::WebrtcOffer(_) => "webrtc_offer",
            Self::WebrtcAnswer(_) => "webrtc_answer",
            Self::WebrtcIceCandidate(_) => "webrtc_ice_candidate",
            Self::UserStatus(_) => "user_status",
            Self::SessionReplaced(_) => "session_replaced",
            Self::Ack(_) => "ack",
        }
    }

    pub fn signal(kind: SignalKind, push: SignalPush) -> Self {
        match kind {
            SignalKind::Offer => Self::WebrtcOffer(push),
            SignalKind::Answer => Self::WebrtcAnswer(push),
            SignalKind::IceCandidate => Self::WebrtcIceCandidate(push),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_event_with_ack_id() {
        let frame = InboundFrame::parse(
            r#"{"event":"send_message","data":{"recipient_id":"u2","content":"hi"},"ack_id":"7"}"#,
        )
        .unwrap();
        assert_eq!(frame.ack_id.as_deref(), Some("7"));
        match frame.event {
            ClientEvent::SendMessage(req) => {
                assert_eq!(req.recipient_id, "u2");
                assert_eq!(req.content, "hi");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn numeric_ack_id_is_accepted() {
        let frame =
            InboundFrame::parse(r#"{"event":"answer_call","data":{"call_id":"c1"},"ack_id":3}"#)
                .unwrap();
        assert_eq!(frame.ack_id.as_deref(), Some("3"));
    }

    #[test]
    fn signal_payload_is_kept_verbatim() {
        let frame = InboundFrame::parse(
            r#"{"event":"webrtc_ice_candidate","data":{"call_id":"c1","target_user_id":"u2","payload":{"candidate":"a=1","sdpMLineIndex":0}}}"#,
        )
        .unwrap();
        let ClientEvent::WebrtcIceCandidate(req) = frame.event else {
            panic!("expected ice candidate");
        };
        assert_eq!(req.payload.0, json!({"candidate": "a=1", "sdpMLineIndex": 0}));
    }

    #[test]
    fn unknown_event_keeps_ack_id_for_error_reply() {
        let err = InboundFrame::parse(r#"{"event":"fly","data":{},"ack_id":"9"}"#).unwrap_err();
        assert_eq!(err.ack_id.as_deref(), Some("9"));

        let err = InboundFrame::parse("not json").unwrap_err();
        assert!(err.ack_id.is_none());
    }

    #[test]
    fn server_events_use_event_and_data_envelope() {
        let event = ServerEvent::UserStatus(UserStatusPush {
            user_id: "u1".into(),
            is_online: true,
            epoch: 7,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "user_status");
        assert_eq!(json["data"]["user_id"], "u1");
        assert_eq!(json["data"]["epoch"], 7);
        assert_eq!(event.name(), "user_status");
    }

    #[test]
    fn failed_ack_carries_code() {
        let ack = Ack::failed(Some("1".into()), &ServiceError::Conflict("busy".into()));
        let json = serde_json::to_value(ServerEvent::Ack(ack)).unwrap();
        assert_eq!(json["event"], "ack");
        assert_eq!(json["data"]["success"], false);
        assert_eq!(json["data"]["code"], "conflict");
        assert_eq!(json["data"]["error"], "busy");
    }
}
