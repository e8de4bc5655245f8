// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Call history and lifecycle endpoints.
//!
//! Calls are started, answered and rejected over the real-time channel; the
//! HTTP surface covers reads, ending a call and deleting finished ones.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::Auth,
    error::ApiError,
    models::{CallStats, CallView, EndCallRequest, LimitQuery},
    realtime::notify_call_ended,
    state::AppState,
};

/// Calls involving the caller, newest first.
#[utoipa::path(
    get,
    path = "/v1/calls",
    tag = "Calls",
    security(("bearer_auth" = [])),
    params(LimitQuery),
    responses(
        (status = 200, description = "Call history", body = Vec<CallView>),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn call_history(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<CallView>>, ApiError> {
    let calls = state.calls.history(&user.user_id, query.limit).await?;
    Ok(Json(calls.iter().map(CallView::from).collect()))
}

/// The caller's non-terminal call, or `null`.
#[utoipa::path(
    get,
    path = "/v1/calls/active",
    tag = "Calls",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Active call or null", body = Option<CallView>),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn active_call(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<Option<CallView>>, ApiError> {
    let call = state.calls.get_active(&user.user_id).await?;
    Ok(Json(call.as_ref().map(CallView::from)))
}

#[utoipa::path(
    get,
    path = "/v1/calls/stats",
    tag = "Calls",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Call statistics", body = CallStats),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn call_stats(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<CallStats>, ApiError> {
    Ok(Json(state.calls.stats(&user.user_id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/calls/{call_id}",
    tag = "Calls",
    security(("bearer_auth" = [])),
    params(("call_id" = String, Path, description = "Call ID")),
    responses(
        (status = 200, description = "Call", body = CallView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Call not found")
    )
)]
pub async fn get_call(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<Json<CallView>, ApiError> {
    let call = state.calls.get(&call_id, &user.user_id).await?;
    Ok(Json(CallView::from(&call)))
}

/// End a call; the other participant receives `call_ended`.
#[utoipa::path(
    post,
    path = "/v1/calls/{call_id}/end",
    tag = "Calls",
    security(("bearer_auth" = [])),
    params(("call_id" = String, Path, description = "Call ID")),
    request_body = EndCallRequest,
    responses(
        (status = 200, description = "Call ended", body = CallView),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Call not found"),
        (status = 409, description = "Call already finished")
    )
)]
pub async fn end_call(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(request): Json<EndCallRequest>,
) -> Result<Json<CallView>, ApiError> {
    let call = state
        .calls
        .end(&call_id, &user.user_id, request.end_reason)
        .await?;
    notify_call_ended(&state, &call, &user.user_id);
    Ok(Json(CallView::from(&call)))
}

/// Permanently delete a finished call.
#[utoipa::path(
    delete,
    path = "/v1/calls/{call_id}",
    tag = "Calls",
    security(("bearer_auth" = [])),
    params(("call_id" = String, Path, description = "Call ID")),
    responses(
        (status = 204, description = "Call deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Call not found"),
        (status = 409, description = "Call still active")
    )
)]
pub async fn delete_call(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.calls.delete(&call_id, &user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
