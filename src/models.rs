// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response structures shared by the REST API and the real-time
//! channel. All types derive `Serialize`, `Deserialize`, and `ToSchema` for
//! JSON handling and OpenAPI documentation.
//!
//! ## Model Categories
//!
//! - **Accounts**: registration, login, profiles
//! - **Messages**: direct messages, conversations, statistics
//! - **Calls**: call records and statistics
//! - **Wallet**: balances and transfers through the external provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::storage::{
    CallKind, CallStatus, MessageType, SignalingMetadata, StoredCall, StoredMessage, StoredUser,
    UserSummary,
};

// =============================================================================
// Account Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    /// At least 8 characters
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    /// Unix timestamp
    pub expires_at: i64,
    pub user: UserProfile,
}

/// The caller's own profile.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredUser> for UserProfile {
    fn from(user: &StoredUser) -> Self {
        Self {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            created_at: user.created_at,
        }
    }
}

/// Another user's profile as seen by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicUser {
    #[serde(flatten)]
    pub summary: UserSummary,
    pub is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

// =============================================================================
// Message Models
// =============================================================================

/// Payload of `send_message` and `POST /v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub recipient_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
}

/// A non-deleted message as returned to its participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MessageView {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredMessage> for MessageView {
    fn from(m: &StoredMessage) -> Self {
        Self {
            message_id: m.message_id.clone(),
            sender_id: m.sender_id.clone(),
            recipient_id: m.recipient_id.clone(),
            content: m.content.clone(),
            message_type: m.message_type,
            file_url: m.file_url.clone(),
            is_read: m.is_read,
            read_at: m.read_at,
            metadata: m.metadata.clone(),
            created_at: m.created_at,
        }
    }
}

/// Latest message and unread count with one counterpart.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationSummary {
    pub counterpart_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<UserSummary>,
    pub last_message: MessageView,
    pub unread_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageStats {
    pub sent: u64,
    pub received: u64,
    pub unread: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct UnreadCount {
    pub unread: u64,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Return messages older than this message id
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Result of a mark-read request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadReceipt {
    /// Ids whose read state changed with this request
    pub marked: Vec<String>,
    pub read_at: DateTime<Utc>,
}

// =============================================================================
// Call Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallView {
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub call_type: CallKind,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    pub signaling: SignalingMetadata,
}

impl From<&StoredCall> for CallView {
    fn from(c: &StoredCall) -> Self {
        Self {
            call_id: c.call_id.clone(),
            caller_id: c.caller_id.clone(),
            callee_id: c.callee_id.clone(),
            call_type: c.kind,
            status: c.status,
            started_at: c.started_at,
            answered_at: c.answered_at,
            ended_at: c.ended_at,
            duration_seconds: c.duration_seconds(),
            end_reason: c.end_reason.clone(),
            signaling: c.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CallStats {
    pub total: u64,
    pub answered: u64,
    pub missed: u64,
    pub rejected: u64,
    pub total_duration_seconds: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EndCallRequest {
    #[serde(default)]
    pub end_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

// =============================================================================
// Wallet Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    pub account_id: String,
    pub currency: String,
    /// Decimal string, two fractional digits
    pub balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositRequest {
    /// Decimal string, at most two fractional digits (e.g. "12.50")
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    pub recipient_id: String,
    /// Decimal string, at most two fractional digits
    pub amount: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletTransaction {
    pub transaction_id: String,
    /// `deposit`, `transfer_in` or `transfer_out`
    pub kind: String,
    /// Decimal string
    pub amount: String,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletTransactionList {
    pub transactions: Vec<WalletTransaction>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::calls::sample_call;
    use crate::storage::repository::messages::sample_message;

    #[test]
    fn send_message_request_defaults() {
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"recipient_id":"u2","content":"hi"}"#).unwrap();
        assert_eq!(req.message_type, MessageType::Text);
        assert!(req.file_url.is_none());
    }

    #[test]
    fn call_view_derives_duration() {
        let mut call = sample_call("c1", "a", "b");
        let t0 = Utc::now();
        call.status = CallStatus::Ended;
        call.answered_at = Some(t0);
        call.ended_at = Some(t0 + chrono::Duration::seconds(7));

        let view = CallView::from(&call);
        assert_eq!(view.duration_seconds, 7);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["call_type"], "voice");
        assert_eq!(json["status"], "ended");
    }

    #[test]
    fn message_view_omits_empty_optionals() {
        let view = MessageView::from(&sample_message("m1", "a", "b", "hi"));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["content"], "hi");
        assert!(json.get("file_url").is_none());
        assert!(json.get("is_deleted").is_none());
    }

    #[test]
    fn public_user_flattens_summary() {
        let user = PublicUser {
            summary: UserSummary {
                user_id: "u1".into(),
                username: "alice".into(),
                display_name: None,
                avatar_url: None,
            },
            is_online: true,
            last_seen_at: None,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["is_online"], true);
    }
}
