// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Real-time Channel
//!
//! - `events` - wire envelope and event catalog
//! - `presence` - user → live connection registry
//! - `session` - per-connection state machine and event dispatch
//! - `signaling` - WebRTC offer/answer/ICE relay
//! - `socket` - WebSocket upgrade and read/write loops

pub mod events;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod socket;

pub use events::{Ack, ClientEvent, ServerEvent, SignalKind, SignalPayload};
pub use presence::{ConnectionHandle, PresenceRegistry, PresenceSnapshot};
pub use session::{notify_call_ended, Session, SessionPhase};
pub use signaling::SignalingRelay;
pub use socket::ws_handler;
