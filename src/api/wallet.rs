// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet endpoints backed by the external payment provider.
//!
//! Every handler answers 503 when no provider is configured.

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    auth::Auth,
    error::ApiError,
    models::{DepositRequest, TransferRequest, WalletResponse, WalletTransaction, WalletTransactionList},
    services::WalletService,
    state::AppState,
};

fn wallet(state: &AppState) -> Result<&WalletService, ApiError> {
    state
        .wallet
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("Wallet provider is not configured"))
}

/// Balance of the caller's wallet account.
#[utoipa::path(
    get,
    path = "/v1/wallet",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Wallet balance", body = WalletResponse),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Wallet provider unavailable")
    )
)]
pub async fn get_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<WalletResponse>, ApiError> {
    Ok(Json(wallet(&state)?.summary(&user.user_id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/wallet/transactions",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Wallet transactions", body = WalletTransactionList),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Wallet provider unavailable")
    )
)]
pub async fn list_transactions(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<WalletTransactionList>, ApiError> {
    Ok(Json(wallet(&state)?.transactions(&user.user_id).await?))
}

/// Top up the caller's wallet.
#[utoipa::path(
    post,
    path = "/v1/wallet/deposit",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = DepositRequest,
    responses(
        (status = 201, description = "Deposit accepted", body = WalletTransaction),
        (status = 400, description = "Invalid amount"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Wallet provider unavailable")
    )
)]
pub async fn deposit(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<DepositRequest>,
) -> Result<(StatusCode, Json<WalletTransaction>), ApiError> {
    let tx = wallet(&state)?.deposit(&user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// Move funds to another user's wallet.
#[utoipa::path(
    post,
    path = "/v1/wallet/transfer",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = TransferRequest,
    responses(
        (status = 201, description = "Transfer accepted", body = WalletTransaction),
        (status = 400, description = "Invalid amount or recipient"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Recipient not found"),
        (status = 503, description = "Wallet provider unavailable")
    )
)]
pub async fn transfer(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<WalletTransaction>), ApiError> {
    let tx = wallet(&state)?.transfer(&user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}
