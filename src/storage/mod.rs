// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Durable Storage
//!
//! Users, calls and messages live in a single embedded redb database under
//! `DATA_DIR`. The database is the source of truth for everything except
//! presence, which is in-memory only.
//!
//! ## Layout
//!
//! ```text
//! {DATA_DIR}/
//!   parley.redb     # all tables, see `database`
//! ```
//!
//! Repositories are thin, synchronous views over a [`Store`]; async callers
//! go through [`Store::run`] so redb work stays off the runtime threads.

pub mod database;
pub mod repository;
pub mod user_cache;

pub use database::{Store, StoreError, StoreResult};
pub use repository::{
    CallKind, CallRepository, CallStatus, MessageRepository, MessageType, SignalingMetadata,
    StoredCall, StoredMessage, StoredUser, UserRepository, UserSummary,
};
pub use user_cache::UserCache;
