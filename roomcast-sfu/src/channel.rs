//! Signaling channel seam
//!
//! The engine talks to the server through a [`ChannelClient`]: a reliable,
//! ordered, request/ack message channel (Socket.IO-style) that retries
//! transport-level reconnection on its own. Everything the channel receives is
//! handed back through the [`ChannelSink`] given to [`ChannelClient::connect`],
//! which feeds the engine's serial queue.

use crate::engine::Command;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Connectivity of the signaling channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// A named event pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub name: String,
    pub payload: Value,
}

impl ChannelEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Ack status returned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Acknowledgement of an emitted request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResult {
    pub status: AckStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl AckResult {
    #[must_use]
    pub const fn ok(data: Value) -> Self {
        Self {
            status: AckStatus::Ok,
            data,
            error: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Error,
            data: Value::Null,
            error: Some(reason.into()),
        }
    }

    /// Interpret a raw ack object (`{status, data, error}`)
    ///
    /// Any status other than `ok` (case-insensitive) counts as an error.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .map_or(AckStatus::Error, |s| {
                if s.eq_ignore_ascii_case("ok") {
                    AckStatus::Ok
                } else {
                    AckStatus::Error
                }
            });
        let error = value
            .get("error")
            .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_string));
        let data = value.get("data").cloned().unwrap_or(Value::Null);

        Self {
            status,
            data,
            error,
        }
    }

    /// Unwrap the payload of a successful ack
    pub fn into_data(self, action: EmitAction) -> Result<Value> {
        match self.status {
            AckStatus::Ok => Ok(self.data),
            AckStatus::Error => Err(Error::AckRejected {
                action: action.to_string(),
                reason: self.error.unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }
}

/// Requests the client emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmitAction {
    Join,
    ConnectWebRtcTransport,
    PeerLeave,
    Consume,
    ResumeConsumer,
    PauseConsumer,
    SetConsumerPreferredLayers,
    SetConsumersPriorities,
    Produce,
    CloseProducer,
    PauseProducer,
    ResumeProducer,
    GetTransportStats,
    RestartIce,
    BroadcastMessage,
    BroadcastMessageToPeer,
}

impl EmitAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::ConnectWebRtcTransport => "connectWebRtcTransport",
            Self::PeerLeave => "peerLeave",
            Self::Consume => "consume",
            Self::ResumeConsumer => "resumeConsumer",
            Self::PauseConsumer => "pauseConsumer",
            Self::SetConsumerPreferredLayers => "setConsumerPreferredLayers",
            Self::SetConsumersPriorities => "setConsumersPreferedLayersNPriorities",
            Self::Produce => "produce",
            Self::CloseProducer => "closeProducer",
            Self::PauseProducer => "pauseProducer",
            Self::ResumeProducer => "resumeProducer",
            Self::GetTransportStats => "getTransportStats",
            Self::RestartIce => "restartIce",
            Self::BroadcastMessage => "broadcastMessage",
            Self::BroadcastMessageToPeer => "broadcastMessageToPeer",
        }
    }
}

impl std::fmt::Display for EmitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for opening the channel
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub url: String,
    /// Handshake payload: room id, auth token, display name, device info
    pub payload: Value,
    /// Server events the engine wants delivered
    pub events: Vec<&'static str>,
}

/// Input delivered by the channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelInput {
    Connectivity(ConnectivityState),
    Event(ChannelEvent),
    /// Events the server queued while the client was offline, in send order
    Replay(Vec<ChannelEvent>),
}

/// Handle the channel uses to deliver inputs to the engine
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl ChannelSink {
    pub(crate) const fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    fn deliver(&self, input: ChannelInput) -> bool {
        self.tx.send(Command::Channel(input)).is_ok()
    }

    /// Report a connectivity transition. Returns false once the engine is gone.
    pub fn state(&self, state: ConnectivityState) -> bool {
        self.deliver(ChannelInput::Connectivity(state))
    }

    /// Deliver a live server event
    pub fn event(&self, name: impl Into<String>, payload: Value) -> bool {
        self.deliver(ChannelInput::Event(ChannelEvent::new(name, payload)))
    }

    /// Deliver the events missed during a disconnect
    pub fn replay(&self, events: Vec<ChannelEvent>) -> bool {
        self.deliver(ChannelInput::Replay(events))
    }
}

/// Request/ack message channel to the signaling server
#[async_trait]
pub trait ChannelClient: Send + Sync + 'static {
    /// Open the channel; all inputs are delivered through `sink`
    async fn connect(&self, request: ConnectRequest, sink: ChannelSink) -> Result<()>;

    /// Emit a request and wait for its ack. Timeouts are applied by the caller.
    async fn emit(&self, action: &str, params: Value) -> Result<AckResult>;

    /// Ask the underlying transport to reconnect now
    fn reconnect(&self);

    /// Close the channel for good
    async fn disconnect(&self);
}
