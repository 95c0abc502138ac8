//! Error types for the signaling client

use crate::transport::TransportRole;
use crate::types::{MediaKind, PeerId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Channel unavailable: cannot emit {action} while not connected")]
    ChannelUnavailable { action: String },

    #[error("Ack timeout: {action}")]
    AckTimeout { action: String },

    #[error("Ack error for {action}: {reason}")]
    AckRejected { action: String, reason: String },

    #[error("Malformed event {event}: {reason}")]
    MalformedEvent { event: String, reason: String },

    #[error("Producer unavailable: {peer_id} has no {kind} producer")]
    ProducerUnavailable { peer_id: PeerId, kind: MediaKind },

    #[error("Consume failed for {kind} of {peer_id}: {reason}")]
    ConsumeFailed {
        peer_id: PeerId,
        kind: MediaKind,
        reason: String,
    },

    #[error("Transport failed ({role}): {reason}")]
    TransportFailed { role: TransportRole, reason: String },

    #[error("Join failed: {0}")]
    JoinFailed(String),

    #[error("Room lookup failed: {0}")]
    RoomLookupFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session closed")]
    SessionClosed,
}

impl Error {
    pub fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Errors with no safe local recovery, reported to the application
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::JoinFailed(_) | Self::TransportFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
