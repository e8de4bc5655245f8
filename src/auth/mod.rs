// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer-token authentication shared by the HTTP API and the real-time
//! channel.
//!
//! ## Auth Flow
//!
//! 1. Client registers or logs in via `/v1/auth/*` and receives an HS256 JWT
//! 2. Client sends `Authorization: Bearer <token>` on HTTP requests, and either
//!    the same header or `?token=<token>` on the WebSocket upgrade
//! 3. Server:
//!    - Verifies signature, expiry and issuer (60 s clock skew tolerance)
//!    - Extracts `sub` → canonical `user_id`, `sid` → session id
//!    - Refuses subjects that no longer resolve to an active account
//!
//! ## Security
//!
//! - Passwords are stored as PBKDF2-HMAC-SHA256 with a per-user random salt
//! - All non-health, non-auth endpoints require authentication

pub mod claims;
pub mod error;
pub mod extractor;
pub mod password;
pub mod tokens;

pub use claims::{AuthenticatedUser, Claims};
pub use error::AuthError;
pub use extractor::{authenticate, bearer_token, Auth};
pub use tokens::{IssuedToken, TokenService};
