// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Registration and login.

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    auth::AuthError,
    error::ApiError,
    models::{AuthResponse, LoginRequest, RegisterRequest, UserProfile},
    state::AppState,
    storage::StoredUser,
};

fn issue_for(state: &AppState, user: &StoredUser) -> Result<AuthResponse, ApiError> {
    let issued = state.tokens.issue(&user.user_id, &user.username)?;
    Ok(AuthResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user: UserProfile::from(user),
    })
}

/// Create an account and return a bearer token for it.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Username or email already taken")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let user = state.accounts.register(request).await?;
    tracing::info!(user_id = %user.user_id, username = %user.username, "Account registered");
    Ok((StatusCode::CREATED, Json(issue_for(&state, &user)?)))
}

/// Exchange username/email and password for a bearer token.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .accounts
        .verify_credentials(&request.login, &request.password)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    tracing::debug!(user_id = %user.user_id, "Login succeeded");
    Ok(Json(issue_for(&state, &user)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;

    fn registration(username: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password: "correct horse".to_string(),
            display_name: Some("Alice".to_string()),
        }
    }

    #[tokio::test]
    async fn register_then_login_by_username_or_email() {
        let (state, _dir) = test_state();
        let (status, Json(created)) = register(State(state.clone()), Json(registration("Alice")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.user.username, "alice");
        assert!(state.tokens.verify(&created.token).is_ok());

        for login_name in ["alice", "ALICE@example.com"] {
            let Json(session) = login(
                State(state.clone()),
                Json(LoginRequest {
                    login: login_name.to_string(),
                    password: "correct horse".to_string(),
                }),
            )
            .await
            .unwrap();
            assert_eq!(session.user.user_id, created.user.user_id);
        }
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (state, _dir) = test_state();
        let (status, _) = register(State(state.clone()), Json(registration("bob")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let err = register(State(state), Json(registration("bob")))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let (state, _dir) = test_state();
        let (status, _) = register(State(state.clone()), Json(registration("carol")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let err = login(
            State(state),
            Json(LoginRequest {
                login: "carol".to_string(),
                password: "nope-nope".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}
