// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{
        AuthResponse, CallStats, CallView, ConversationSummary, DepositRequest, EndCallRequest,
        LoginRequest, MessageStats, MessageView, PublicUser, ReadReceipt, RegisterRequest,
        SendMessageRequest, TransferRequest, UnreadCount, UpdateProfileRequest, UserProfile,
        WalletResponse, WalletTransaction, WalletTransactionList,
    },
    realtime,
    state::AppState,
    storage::{CallKind, CallStatus, MessageType, SignalingMetadata, UserSummary},
};

pub mod auth;
pub mod calls;
pub mod health;
pub mod messages;
pub mod users;
pub mod wallet;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        // Auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        // Users
        .route("/users/me", get(users::get_me).put(users::update_me))
        .route("/users/search", get(users::search_users))
        .route("/users/online", get(users::online_users))
        .route("/users/{user_id}", get(users::get_user))
        // Messages
        .route("/messages", post(messages::send_message))
        .route("/messages/conversations", get(messages::conversations))
        .route("/messages/with/{user_id}", get(messages::history))
        .route("/messages/search", get(messages::search_messages))
        .route("/messages/unread-count", get(messages::unread_count))
        .route("/messages/stats", get(messages::stats))
        .route("/messages/read-all/{sender_id}", put(messages::mark_all_read))
        .route("/messages/{message_id}/read", put(messages::mark_read))
        .route("/messages/{message_id}", delete(messages::delete_message))
        // Calls
        .route("/calls", get(calls::call_history))
        .route("/calls/active", get(calls::active_call))
        .route("/calls/stats", get(calls::call_stats))
        .route("/calls/{call_id}", get(calls::get_call).delete(calls::delete_call))
        .route("/calls/{call_id}/end", post(calls::end_call))
        // Wallet
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/wallet/deposit", post(wallet::deposit))
        .route("/wallet/transfer", post(wallet::transfer))
        // Real-time channel
        .route("/ws", get(realtime::ws_handler));

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::register,
        auth::login,
        users::get_me,
        users::update_me,
        users::search_users,
        users::online_users,
        users::get_user,
        messages::send_message,
        messages::conversations,
        messages::history,
        messages::search_messages,
        messages::unread_count,
        messages::stats,
        messages::mark_read,
        messages::mark_all_read,
        messages::delete_message,
        calls::call_history,
        calls::active_call,
        calls::call_stats,
        calls::get_call,
        calls::end_call,
        calls::delete_call,
        wallet::get_wallet,
        wallet::list_transactions,
        wallet::deposit,
        wallet::transfer,
        realtime::socket::ws_handler
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            RegisterRequest,
            LoginRequest,
            AuthResponse,
            UserProfile,
            UserSummary,
            PublicUser,
            UpdateProfileRequest,
            SendMessageRequest,
            MessageType,
            MessageView,
            ConversationSummary,
            MessageStats,
            UnreadCount,
            ReadReceipt,
            CallKind,
            CallStatus,
            SignalingMetadata,
            CallView,
            CallStats,
            EndCallRequest,
            WalletResponse,
            DepositRequest,
            TransferRequest,
            WalletTransaction,
            WalletTransactionList
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Registration and login"),
        (name = "Users", description = "Profiles, search and presence"),
        (name = "Messages", description = "Direct messages and read receipts"),
        (name = "Calls", description = "Voice and video call records"),
        (name = "Wallet", description = "Balances, deposits and transfers"),
        (name = "Realtime", description = "WebSocket channel for pushes, typing and signaling")
    )
)]
struct ApiDoc;
