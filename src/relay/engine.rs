//! Frame dispatch
//!
//! Maps one decoded client frame onto registry transitions or a relay to
//! the partner. The sender is always the identity bound to the channel the
//! frame arrived on; the `user` field inside the frame is never trusted.

use std::sync::Arc;

use crate::protocol::{FrameKind, Identity, InboundFrame, MediaState};
use crate::registry::{Outbound, PairingOutcome, Registry};

/// Why a frame was not acted upon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Text did not decode
    Malformed,
    /// Sender is not connected
    NotRegistered,
    /// Frame arrived on a channel that has since been replaced
    StaleChannel,
    /// Sender has no partner
    NotPaired,
    /// Frame addressed to someone other than the current partner
    TargetMismatch,
    /// Partner channel is gone or its queue is full
    PartnerGone,
    /// Unknown frame type
    Unrecognized(String),
}

/// Outcome of dispatching one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Forwarded to the partner
    Relayed { to: Identity },
    /// `next` handled; carries the sender's new pairing outcome
    Next(PairingOutcome),
    /// `leave` handled; carries the ex-partner
    Left { partner: Identity },
    /// Media state merged; `forwarded` is true if the partner got the frame
    MediaUpdated { state: MediaState, forwarded: bool },
    /// Nothing happened
    Dropped(DropReason),
}

/// Apply a frame from `sender` (on connection `connection_id`) to the registry
pub fn dispatch(
    registry: &mut Registry,
    sender: &Identity,
    connection_id: u64,
    frame: &InboundFrame,
) -> Dispatch {
    if registry.lookup(sender).is_none() {
        return Dispatch::Dropped(DropReason::NotRegistered);
    }
    if !registry.is_current(sender, connection_id) {
        tracing::debug!(
            identity = %sender,
            connection_id = connection_id,
            "Frame from replaced connection dropped"
        );
        return Dispatch::Dropped(DropReason::StaleChannel);
    }

    match &frame.kind {
        FrameKind::Offer | FrameKind::Answer | FrameKind::Candidate | FrameKind::Chat => {
            relay(registry, sender, frame)
        }
        FrameKind::Next => Dispatch::Next(registry.next(sender)),
        FrameKind::Leave => match registry.leave(sender) {
            Some(partner) => Dispatch::Left { partner },
            None => {
                tracing::debug!(identity = %sender, "Leave without a partner ignored");
                Dispatch::Dropped(DropReason::NotPaired)
            }
        },
        FrameKind::MediaStateChange(update) => {
            let Some(state) = registry.update_media_state(sender, update) else {
                return Dispatch::Dropped(DropReason::NotRegistered);
            };
            let forwarded = match registry.partner_of(sender).cloned() {
                Some(partner) => matches!(
                    forward(registry, sender, &partner, frame),
                    Dispatch::Relayed { .. }
                ),
                None => false,
            };
            Dispatch::MediaUpdated { state, forwarded }
        }
        FrameKind::Unrecognized(kind) => {
            tracing::warn!(identity = %sender, frame_type = %kind, "Unrecognized frame type");
            Dispatch::Dropped(DropReason::Unrecognized(kind.clone()))
        }
    }
}

fn relay(registry: &Registry, sender: &Identity, frame: &InboundFrame) -> Dispatch {
    let Some(partner) = registry.partner_of(sender) else {
        tracing::debug!(
            identity = %sender,
            frame_type = frame.kind.name(),
            "Relay without a partner dropped"
        );
        return Dispatch::Dropped(DropReason::NotPaired);
    };

    if let Some(declared) = &frame.partner {
        if declared != partner {
            tracing::debug!(
                identity = %sender,
                declared = %declared,
                partner = %partner,
                frame_type = frame.kind.name(),
                "Frame addressed to a previous partner dropped"
            );
            return Dispatch::Dropped(DropReason::TargetMismatch);
        }
    }

    forward(registry, sender, partner, frame)
}

fn forward(
    registry: &Registry,
    sender: &Identity,
    partner: &Identity,
    frame: &InboundFrame,
) -> Dispatch {
    let Some(channel) = registry.lookup(partner) else {
        return Dispatch::Dropped(DropReason::PartnerGone);
    };

    let payload = match frame.payload_for(sender) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(identity = %sender, error = %e, "Failed to re-encode frame");
            return Dispatch::Dropped(DropReason::Malformed);
        }
    };

    if channel.send(Outbound::Relay(Arc::from(payload))) {
        Dispatch::Relayed {
            to: partner.clone(),
        }
    } else {
        Dispatch::Dropped(DropReason::PartnerGone)
    }
}
