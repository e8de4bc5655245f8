// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Parley - messaging, calling and wallet backend
//!
//! One process serves the HTTP API and a WebSocket channel per user. The
//! presence registry maps each online user to their live connection so
//! messages, typing indicators, call events and WebRTC signaling can be
//! pushed to them.
//!
//! ## Modules
//!
//! - `api` - HTTP handlers and router (Axum)
//! - `auth` - Bearer tokens, password hashing and the request extractor
//! - `realtime` - Presence registry, WebSocket sessions and signaling relay
//! - `services` - Accounts, delivery, call lifecycle and wallet
//! - `providers` - External wallet provider client
//! - `storage` - redb-backed repositories

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod realtime;
pub mod services;
pub mod state;
pub mod storage;
