//! Media transport seam
//!
//! ICE/DTLS/SRTP negotiation and the actual media pipeline live behind these
//! traits. The engine only creates transports, producers and consumers through
//! them and listens to transport signals on the [`TransportSink`].

use crate::engine::Command;
use crate::types::{ConsumerId, MediaKind, ProducerId, TransportId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Direction of a media transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    Send,
    Receive,
}

impl TransportRole {
    /// `transportType` value used by `restartIce`
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
        }
    }
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Error raised by the media layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Server-provided parameters for creating a transport
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    pub role: TransportRole,
    pub id: TransportId,
    /// `iceParameters`, `iceCandidates`, `dtlsParameters`, … as sent by the server
    pub params: Value,
}

/// Parameters for binding a consumer to a remote producer
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeParams {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

/// One simulcast encoding of the local video producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingLayer {
    pub rid: String,
    pub max_bitrate_bps: u32,
    pub max_framerate: u32,
    pub scale_resolution_down_by: f32,
}

/// Simulcast encodings for the local camera, lowest layer first
#[must_use]
pub fn video_encodings(hd_enabled: bool) -> Vec<EncodingLayer> {
    let layer = |rid: &str, max_bitrate_bps, max_framerate, scale_resolution_down_by| EncodingLayer {
        rid: rid.to_string(),
        max_bitrate_bps,
        max_framerate,
        scale_resolution_down_by,
    };

    let mut layers = vec![
        layer("l", 100_000, 10, 4.0),
        layer("m", 400_000, 15, 2.0),
    ];
    if hd_enabled {
        layers.push(layer("h", 700_000, 30, 1.0));
    }
    layers
}

/// A remote feed bound to a receive transport
pub trait ConsumerHandle: Send + Sync {
    fn id(&self) -> &ConsumerId;
    fn producer_id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn is_paused(&self) -> bool;
    fn resume(&self);
    fn pause(&self);
    fn close(&self);
}

/// A local feed published on the send transport
pub trait ProducerHandle: Send + Sync {
    fn kind(&self) -> MediaKind;
    /// RTP parameters to announce in the `produce` request
    fn rtp_parameters(&self) -> Value;
    fn pause(&self);
    fn resume(&self);
    fn close(&self);
    fn set_max_spatial_layer(&self, layer: u8) -> Result<(), TransportError>;
}

/// Behaviour shared by both transport directions
pub trait TransportHandle: Send + Sync {
    fn id(&self) -> &TransportId;
    fn connection_state(&self) -> TransportConnectionState;
    fn restart_ice(&self, ice_parameters: &Value) -> Result<(), TransportError>;
    fn close(&self);
}

pub trait SendTransport: TransportHandle {
    fn produce(
        &self,
        kind: MediaKind,
        encodings: &[EncodingLayer],
    ) -> Result<Box<dyn ProducerHandle>, TransportError>;
}

pub trait ReceiveTransport: TransportHandle {
    fn consume(&self, params: ConsumeParams) -> Result<Box<dyn ConsumerHandle>, TransportError>;
}

/// Factory for the media device and its transports
pub trait TransportFacade: Send + Sync + 'static {
    /// Load the device with the router capabilities; returns the device's own
    /// RTP capabilities to announce on join
    fn load(&self, router_capabilities: &Value) -> Result<Value, TransportError>;

    fn create_send_transport(
        &self,
        options: &TransportOptions,
        sink: TransportSink,
    ) -> Result<Box<dyn SendTransport>, TransportError>;

    fn create_receive_transport(
        &self,
        options: &TransportOptions,
        sink: TransportSink,
    ) -> Result<Box<dyn ReceiveTransport>, TransportError>;
}

/// Signals raised by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// DTLS parameters are ready; the server must be told to connect the transport
    Connect {
        role: TransportRole,
        transport_id: TransportId,
        dtls_parameters: Value,
    },
    StateChanged {
        role: TransportRole,
        state: TransportConnectionState,
    },
}

/// Handle a transport uses to signal the engine
#[derive(Debug, Clone)]
pub struct TransportSink {
    role: TransportRole,
    tx: mpsc::UnboundedSender<Command>,
}

impl TransportSink {
    pub(crate) const fn new(role: TransportRole, tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { role, tx }
    }

    #[must_use]
    pub const fn role(&self) -> TransportRole {
        self.role
    }

    pub fn connect(&self, transport_id: TransportId, dtls_parameters: Value) -> bool {
        self.tx
            .send(Command::Transport(TransportSignal::Connect {
                role: self.role,
                transport_id,
                dtls_parameters,
            }))
            .is_ok()
    }

    pub fn state_changed(&self, state: TransportConnectionState) -> bool {
        self.tx
            .send(Command::Transport(TransportSignal::StateChanged {
                role: self.role,
                state,
            }))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_encodings() {
        let sd = video_encodings(false);
        assert_eq!(sd.len(), 2);
        assert_eq!(sd[0].rid, "l");

        let hd = video_encodings(true);
        assert_eq!(hd.len(), 3);
        assert_eq!(hd[2].max_bitrate_bps, 700_000);
        assert!(hd[2].scale_resolution_down_by < hd[0].scale_resolution_down_by);
    }

    #[test]
    fn test_role_wire_name() {
        assert_eq!(TransportRole::Send.to_string(), "send");
        assert_eq!(TransportRole::Receive.as_str(), "receive");
    }
}
