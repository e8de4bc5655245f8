// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Claims carried by issued bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Username at issuance, informational only
    pub username: String,
    /// Session ID, unique per issued token
    pub sid: String,
    /// Issuer
    pub iss: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

/// Authenticated user information extracted from a verified token.
///
/// This is the primary type used throughout the application to represent
/// the caller of an HTTP request or the owner of a real-time connection.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical user ID (`sub` claim)
    pub user_id: String,

    pub username: String,

    /// Session ID (`sid` claim)
    pub session_id: String,

    /// Original issuer (used for validation, not serialized)
    #[serde(skip)]
    pub issuer: String,

    /// Token expiration (Unix timestamp, not serialized)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
            session_id: claims.sid,
            issuer: claims.iss,
            expires_at: claims.exp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_claims_maps_fields() {
        let user = AuthenticatedUser::from_claims(Claims {
            sub: "user_123".to_string(),
            username: "alice".to_string(),
            sid: "sess_abc".to_string(),
            iss: "parley".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_003_600,
        });
        assert_eq!(user.user_id, "user_123");
        assert_eq!(user.username, "alice");
        assert_eq!(user.session_id, "sess_abc");
        assert_eq!(user.expires_at, 1_700_003_600);
    }

    #[test]
    fn serialization_hides_validation_fields() {
        let user = AuthenticatedUser {
            user_id: "u".to_string(),
            username: "alice".to_string(),
            session_id: "s".to_string(),
            issuer: "parley".to_string(),
            expires_at: 42,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("issuer").is_none());
        assert!(json.get("expires_at").is_none());
    }
}
