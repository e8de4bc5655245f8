// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WebRTC signaling relay.
//!
//! Payloads are opaque: they are mirrored into the call record and forwarded
//! to the other participant unchanged.

use std::sync::Arc;

use crate::error::{ServiceError, ServiceResult};
use crate::services::CallService;

use super::events::{ServerEvent, SignalKind, SignalPayload, SignalPush};
use super::presence::PresenceRegistry;

#[derive(Clone)]
pub struct SignalingRelay {
    calls: CallService,
    presence: Arc<PresenceRegistry>,
}

impl SignalingRelay {
    pub fn new(calls: CallService, presence: Arc<PresenceRegistry>) -> Self {
        Self { calls, presence }
    }

    /// Record `payload` on the call, then forward it to `target_id` if online.
    ///
    /// Returns whether the forward reached a live connection.
    pub async fn relay(
        &self,
        kind: SignalKind,
        call_id: &str,
        payload: SignalPayload,
        target_id: &str,
        source_id: &str,
    ) -> ServiceResult<bool> {
        let call = self.calls.get(call_id, source_id).await?;
        if call.counterpart(source_id) != target_id {
            return Err(ServiceError::Forbidden(
                "Signaling target is not the other call participant".to_string(),
            ));
        }

        let stored = payload.0.clone();
        match kind {
            SignalKind::Offer => self.calls.record_offer(call_id, source_id, stored).await?,
            SignalKind::Answer => self.calls.record_answer(call_id, source_id, stored).await?,
            SignalKind::IceCandidate => {
                self.calls
                    .append_ice_candidate(call_id, source_id, stored)
                    .await?
            }
        };

        let delivered = self.presence.push_to(
            target_id,
            ServerEvent::signal(
                kind,
                SignalPush {
                    call_id: call_id.to_string(),
                    payload,
                    from_user_id: source_id.to_string(),
                },
            ),
        );
        tracing::debug!(call_id = %call_id, ?kind, delivered, "Signal relayed");
        Ok(delivered)
    }
}
