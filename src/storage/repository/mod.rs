// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the redb store.
//!
//! Each repository offers the reads and the transactional read-modify-write
//! operations for one entity type.

pub mod calls;
pub mod messages;
pub mod users;

pub use calls::{CallKind, CallRepository, CallStatus, SignalingMetadata, StoredCall};
pub use messages::{MessageRepository, MessageType, StoredMessage};
pub use users::{StoredUser, UserRepository, UserSummary};
