// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User profile and discovery endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{
    auth::Auth,
    error::ApiError,
    models::{PublicUser, SearchQuery, UpdateProfileRequest, UserProfile},
    state::AppState,
    storage::{StoredUser, UserSummary},
};

const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 50;

fn public_view(state: &AppState, user: &StoredUser) -> PublicUser {
    PublicUser {
        summary: UserSummary::from(user),
        is_online: state.presence.is_online(&user.user_id),
        last_seen_at: user.last_seen_at,
    }
}

/// Get the caller's own profile.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_me(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, ApiError> {
    let stored = state.accounts.get(&user.user_id).await?;
    Ok(Json(UserProfile::from(&stored)))
}

/// Update display name and/or avatar. An empty string clears the field.
#[utoipa::path(
    put,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn update_me(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let stored = state.accounts.update_profile(&user.user_id, request).await?;
    Ok(Json(UserProfile::from(&stored)))
}

/// Search active users by username or display name.
#[utoipa::path(
    get,
    path = "/v1/users/search",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching users", body = Vec<PublicUser>),
        (status = 400, description = "Empty query"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn search_users(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<PublicUser>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);
    let users = state.accounts.search(&query.q, &user.user_id, limit).await?;
    Ok(Json(users.iter().map(|u| public_view(&state, u)).collect()))
}

/// Ids of users with a live real-time connection.
#[utoipa::path(
    get,
    path = "/v1/users/online",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Online user ids", body = Vec<String>),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn online_users(
    Auth(_user): Auth,
    State(state): State<AppState>,
) -> Json<Vec<String>> {
    Json(state.presence.online_user_ids())
}

/// Another user's public profile with presence.
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}",
    tag = "Users",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User profile", body = PublicUser),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    Auth(_user): Auth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PublicUser>, ApiError> {
    let stored = state.accounts.get(&user_id).await?;
    Ok(Json(public_view(&state, &stored)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use crate::realtime::presence::test_handle;
    use crate::services::accounts::register_user;
    use crate::state::test_state;
    use axum::http::StatusCode;

    fn auth(user: &StoredUser) -> Auth {
        Auth(AuthenticatedUser {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            session_id: "s".to_string(),
            issuer: "parley-test".to_string(),
            expires_at: 0,
        })
    }

    #[tokio::test]
    async fn profile_update_round_trips() {
        let (state, _dir) = test_state();
        let alice = register_user(&state.accounts, "alice").await;

        let Json(updated) = update_me(
            auth(&alice),
            State(state.clone()),
            Json(UpdateProfileRequest {
                display_name: Some("  Alice A.  ".to_string()),
                avatar_url: Some("https://cdn.example.com/a.png".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Alice A."));

        let Json(me) = get_me(auth(&alice), State(state)).await.unwrap();
        assert_eq!(me.avatar_url.as_deref(), Some("https://cdn.example.com/a.png"));
    }

    #[tokio::test]
    async fn get_user_reports_presence() {
        let (state, _dir) = test_state();
        let alice = register_user(&state.accounts, "alice").await;
        let bob = register_user(&state.accounts, "bob").await;

        let Json(view) = get_user(auth(&alice), State(state.clone()), Path(bob.user_id.clone()))
            .await
            .unwrap();
        assert!(!view.is_online);

        let (handle, _rx) = test_handle(&bob.user_id);
        state.presence.register(handle);
        let Json(view) = get_user(auth(&alice), State(state.clone()), Path(bob.user_id.clone()))
            .await
            .unwrap();
        assert!(view.is_online);

        let Json(online) = online_users(auth(&alice), State(state.clone())).await;
        assert_eq!(online, vec![bob.user_id.clone()]);

        let err = get_user(auth(&alice), State(state), Path("ghost".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_excludes_caller() {
        let (state, _dir) = test_state();
        let alice = register_user(&state.accounts, "alice").await;
        register_user(&state.accounts, "alicia").await;

        let Json(found) = search_users(
            auth(&alice),
            State(state.clone()),
            Query(SearchQuery {
                q: "ali".to_string(),
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].summary.username, "alicia");

        let err = search_users(
            auth(&alice),
            State(state),
            Query(SearchQuery {
                q: "  ".to_string(),
                limit: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
