// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use super::{AuthError, AuthenticatedUser};
use crate::state::AppState;

/// Extractor for authenticated users.
///
/// Validates the bearer token from the `Authorization` header and checks
/// that its subject is still an active account.
///
/// # Example
///
/// ```rust,ignore
/// async fn conversations(
///     Auth(user): Auth,
///     State(state): State<AppState>,
/// ) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
///     // user.user_id is the caller
/// }
/// ```
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let user = authenticate(state, token).await?;
        Ok(Auth(user))
    }
}

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}

/// Verify `token` and resolve it to an active account.
///
/// Shared by the HTTP extractor and the real-time handshake.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthenticatedUser, AuthError> {
    let user = state.tokens.verify(token)?;
    match state.accounts.exists_active(&user.user_id).await {
        Ok(true) => Ok(user),
        Ok(false) => {
            tracing::debug!(user_id = %user.user_id, "Token subject is not an active account");
            Err(AuthError::UnknownAccount)
        }
        Err(e) => Err(AuthError::InternalError(e.to_string())),
    }
}
