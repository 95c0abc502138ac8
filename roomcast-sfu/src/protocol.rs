//! Wire payloads
//!
//! Inbound server events and acks are parsed into typed values here; the
//! engine never looks at raw JSON. Anything missing a required field becomes
//! [`Error::MalformedEvent`] and is dropped by the caller.

use crate::channel::ChannelEvent;
use crate::error::{Error, Result};
use crate::registry::ProducerRef;
use crate::transport::{ConsumeParams, TransportOptions, TransportRole};
use crate::types::{ConsumerId, LeaveReason, MediaKind, PeerId, ProducerId, TransportId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

/// Server events the client subscribes to
pub const SUBSCRIBED_EVENTS: &[&str] = &[
    event::SOCKET_CONNECTED,
    event::SOCKET_RECONNECTED,
    event::PEER_CONNECTED,
    event::NEW_PEER,
    event::PEER_CLOSED,
    event::NEW_PRODUCER,
    event::PRODUCER_END,
    event::PAUSED_PRODUCER,
    event::RESUMED_PRODUCER,
    event::SCORE,
    event::AUDIO_LEVEL,
    event::LAYERS_CHANGE,
    event::BROADCAST_MESSAGE,
    event::BROADCAST_MESSAGE_TO_PEER,
];

pub mod event {
    pub const SOCKET_CONNECTED: &str = "socketConnected";
    pub const SOCKET_RECONNECTED: &str = "socketReconnected";
    pub const PEER_CONNECTED: &str = "peerConnected";
    pub const NEW_PEER: &str = "newPeer";
    pub const PEER_CLOSED: &str = "peerClosed";
    pub const NEW_PRODUCER: &str = "newProducer";
    pub const PRODUCER_END: &str = "producerEnd";
    pub const PAUSED_PRODUCER: &str = "pausedProducer";
    pub const RESUMED_PRODUCER: &str = "resumedProducer";
    pub const SCORE: &str = "score";
    pub const AUDIO_LEVEL: &str = "audioLevel";
    pub const LAYERS_CHANGE: &str = "layerschange";
    pub const BROADCAST_MESSAGE: &str = "broadcastMessage";
    pub const BROADCAST_MESSAGE_TO_PEER: &str = "broadcastMessageToPeer";
}

/// Capabilities and transport parameters announced on connection
#[derive(Debug, Clone, PartialEq)]
pub struct ServerHello {
    pub rtp_capabilities: Value,
    pub send_transport: Option<Value>,
    pub receive_transport: Option<Value>,
}

/// A remote participant as described by the roster or `newPeer`
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub display_name: String,
    pub producers: Vec<ProducerRef>,
}

/// Remote producer lifecycle change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerUpdate {
    pub peer_id: PeerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
}

/// Which producer lifecycle event arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerChange {
    Published,
    Unpublished,
    Paused,
    Resumed,
}

/// Audio level of an active speaker
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerLevel {
    pub peer_id: PeerId,
    pub volume: i32,
}

/// Room-wide or peer-targeted application message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageScope {
    Room,
    Peer,
}

/// A parsed server event
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ServerHello(ServerHello),
    SelfPeer(PeerId),
    PeerJoined(PeerInfo),
    PeerLeft {
        peer_id: PeerId,
        reason: LeaveReason,
    },
    Producer {
        change: ProducerChange,
        update: ProducerUpdate,
    },
    Score {
        peer_id: PeerId,
        kind: MediaKind,
        score: u8,
    },
    AudioLevels(Vec<SpeakerLevel>),
    Message {
        scope: MessageScope,
        message: Value,
    },
    LayersChanged(Value),
    MissedEvents(Vec<ChannelEvent>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProducer {
    media_type: String,
    producer_id: String,
    #[serde(default)]
    share: bool,
    #[serde(default)]
    paused: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePeer {
    peer_id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    producers: Vec<WireProducer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProducerEvent {
    peer_id: String,
    producer_id: String,
    media_type: String,
    #[serde(default)]
    share: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePeerClosed {
    peer_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct WireScoreValue {
    score: u8,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireScore {
    producer_peer_id: String,
    media_type: String,
    #[serde(default)]
    share: bool,
    score: WireScoreValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAudioLevel {
    #[serde(default)]
    audio_producers: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerHello {
    rtp_capabilities: Value,
    #[serde(default)]
    send_transport: Option<Value>,
    #[serde(default)]
    receive_transport: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJoinData {
    #[serde(default)]
    peer_id: Option<String>,
    #[serde(default)]
    peers: Vec<WirePeer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConsumerInfo {
    producer_peer_id: String,
    consumer_id: String,
    producer_id: String,
    kind: String,
    #[serde(default)]
    rtp_parameters: Value,
    #[serde(default)]
    app_data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConsumeData {
    consumer_info: WireConsumerInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIceRestart {
    consuming: bool,
    ice_parameters: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIceRestartData {
    ice_restart_parameters: Vec<WireIceRestart>,
}

fn decode<T: DeserializeOwned>(event: &str, payload: &Value) -> Result<T> {
    T::deserialize(payload).map_err(|e| Error::malformed(event, e.to_string()))
}

fn kind_of(event: &str, media_type: &str, share: bool) -> Result<MediaKind> {
    MediaKind::from_wire(media_type, share)
        .ok_or_else(|| Error::malformed(event, format!("unknown mediaType {media_type}")))
}

/// Producers with an unrecognised `mediaType` are skipped; the rest of the
/// peer is kept
fn peer_info(event: &str, wire: WirePeer) -> PeerInfo {
    let peer_id = PeerId::from(wire.peer_id);
    let producers = wire
        .producers
        .into_iter()
        .filter_map(|p| match kind_of(event, &p.media_type, p.share) {
            Ok(kind) => Some(ProducerRef {
                kind,
                producer_id: ProducerId::from(p.producer_id),
                paused: p.paused,
            }),
            Err(_) => {
                warn!(
                    event,
                    peer_id = %peer_id,
                    producer_id = %p.producer_id,
                    media_type = %p.media_type,
                    "Skipping producer of unknown media type"
                );
                None
            }
        })
        .collect();

    PeerInfo {
        peer_id,
        display_name: wire.display_name,
        producers,
    }
}

impl InboundEvent {
    /// Parse a server event. Unknown event names yield `Ok(None)`.
    pub fn parse(event: &ChannelEvent) -> Result<Option<Self>> {
        let name = event.name.as_str();
        let payload = &event.payload;

        let parsed = match name {
            event::SOCKET_CONNECTED => {
                let hello: WireServerHello = decode(name, payload)?;
                Self::ServerHello(ServerHello {
                    rtp_capabilities: hello.rtp_capabilities,
                    send_transport: hello.send_transport,
                    receive_transport: hello.receive_transport,
                })
            }
            event::PEER_CONNECTED => {
                let peer_id = payload
                    .get("peerId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::malformed(name, "missing peerId"))?;
                Self::SelfPeer(PeerId::from(peer_id))
            }
            event::NEW_PEER => Self::PeerJoined(peer_info(name, decode(name, payload)?)),
            event::PEER_CLOSED => {
                let closed: WirePeerClosed = decode(name, payload)?;
                Self::PeerLeft {
                    peer_id: PeerId::from(closed.peer_id),
                    reason: LeaveReason::from_wire(closed.reason.as_deref()),
                }
            }
            event::NEW_PRODUCER | event::PRODUCER_END | event::PAUSED_PRODUCER
            | event::RESUMED_PRODUCER => {
                let wire: WireProducerEvent = decode(name, payload)?;
                let change = match name {
                    event::NEW_PRODUCER => ProducerChange::Published,
                    event::PRODUCER_END => ProducerChange::Unpublished,
                    event::PAUSED_PRODUCER => ProducerChange::Paused,
                    _ => ProducerChange::Resumed,
                };
                Self::Producer {
                    change,
                    update: ProducerUpdate {
                        peer_id: PeerId::from(wire.peer_id),
                        producer_id: ProducerId::from(wire.producer_id),
                        kind: kind_of(name, &wire.media_type, wire.share)?,
                    },
                }
            }
            event::SCORE => {
                let wire: WireScore = decode(name, payload)?;
                Self::Score {
                    peer_id: PeerId::from(wire.producer_peer_id),
                    kind: kind_of(name, &wire.media_type, wire.share)?,
                    score: wire.score.score,
                }
            }
            event::AUDIO_LEVEL => {
                let wire: WireAudioLevel = decode(name, payload)?;
                // Entries without a peer id or volume are skipped individually
                let levels = wire
                    .audio_producers
                    .into_iter()
                    .filter_map(|v| serde_json::from_value::<SpeakerLevel>(v).ok())
                    .collect();
                Self::AudioLevels(levels)
            }
            event::BROADCAST_MESSAGE | event::BROADCAST_MESSAGE_TO_PEER => {
                let message = payload
                    .get("msgData")
                    .filter(|m| m.is_object())
                    .cloned()
                    .ok_or_else(|| Error::malformed(name, "missing msgData"))?;
                let scope = if name == event::BROADCAST_MESSAGE {
                    MessageScope::Room
                } else {
                    MessageScope::Peer
                };
                Self::Message { scope, message }
            }
            event::LAYERS_CHANGE => Self::LayersChanged(payload.clone()),
            event::SOCKET_RECONNECTED => Self::MissedEvents(parse_missed_events(payload)?),
            _ => return Ok(None),
        };

        Ok(Some(parsed))
    }
}

/// Split a `socketReconnected` payload into individual events
///
/// Each entry names its event in `eventName` and carries its own payload.
/// Entries without a name are skipped.
pub fn parse_missed_events(payload: &Value) -> Result<Vec<ChannelEvent>> {
    let entries = payload
        .as_array()
        .ok_or_else(|| Error::malformed(event::SOCKET_RECONNECTED, "expected an array"))?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("eventName")?.as_str()?;
            Some(ChannelEvent::new(name, entry.clone()))
        })
        .collect())
}

/// Result of the `join` request
#[derive(Debug, Clone, PartialEq)]
pub struct JoinAck {
    pub self_peer_id: Option<PeerId>,
    pub peers: Vec<PeerInfo>,
}

impl JoinAck {
    pub fn parse(data: &Value) -> Result<Self> {
        let wire: WireJoinData = decode("join", data)?;
        let peers = wire.peers.into_iter().map(|p| peer_info("join", p)).collect();

        Ok(Self {
            self_peer_id: wire.peer_id.map(PeerId::from),
            peers,
        })
    }
}

/// A consumer the server created for us (`consume` ack)
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerReady {
    pub peer_id: PeerId,
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

impl ConsumerReady {
    pub fn parse(data: &Value) -> Result<Self> {
        let wire: WireConsumeData = decode("consume", data)?;
        let info = wire.consumer_info;
        let share = info
            .app_data
            .get("share")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            kind: kind_of("consume", &info.kind, share)?,
            peer_id: PeerId::from(info.producer_peer_id),
            consumer_id: ConsumerId::from(info.consumer_id),
            producer_id: ProducerId::from(info.producer_id),
            rtp_parameters: info.rtp_parameters,
            app_data: info.app_data,
        })
    }

    #[must_use]
    pub fn consume_params(&self) -> ConsumeParams {
        ConsumeParams {
            consumer_id: self.consumer_id.clone(),
            producer_id: self.producer_id.clone(),
            kind: self.kind,
            rtp_parameters: self.rtp_parameters.clone(),
            app_data: self.app_data.clone(),
        }
    }
}

/// Fresh ICE parameters for one transport (`restartIce` ack)
#[derive(Debug, Clone, PartialEq)]
pub struct IceRestart {
    pub role: TransportRole,
    pub ice_parameters: Value,
}

impl IceRestart {
    pub fn parse(data: &Value) -> Result<Vec<Self>> {
        let wire: WireIceRestartData = decode("restartIce", data)?;
        Ok(wire
            .ice_restart_parameters
            .into_iter()
            .map(|p| Self {
                role: if p.consuming {
                    TransportRole::Receive
                } else {
                    TransportRole::Send
                },
                ice_parameters: p.ice_parameters,
            })
            .collect())
    }
}

/// Server-assigned id of a new local producer (`produce` ack)
pub fn parse_produced_id(data: &Value) -> Result<ProducerId> {
    data.get("id")
        .and_then(Value::as_str)
        .map(ProducerId::from)
        .ok_or_else(|| Error::malformed("produce", "missing id"))
}

/// Build transport options from the server hello
pub fn transport_options(role: TransportRole, params: &Value) -> Result<TransportOptions> {
    let id = params
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed("socketConnected", format!("{role} transport without id")))?;

    Ok(TransportOptions {
        role,
        id: TransportId::from(id),
        params: params.clone(),
    })
}

/// Builders for outbound request parameters
pub mod params {
    use super::{json, Value};
    use crate::transport::TransportRole;
    use crate::types::{ConsumerId, MediaKind, PeerId, Priority, ProducerId, RoomId, TransportId};

    #[must_use]
    pub fn connect(room_id: &RoomId, token: &str, display_name: &str, device: &Value) -> Value {
        json!({
            "roomId": room_id,
            "token": token,
            "displayName": display_name,
            "device": device,
        })
    }

    #[must_use]
    pub fn join(display_name: &str, device: &Value, rtp_capabilities: &Value) -> Value {
        json!({
            "displayName": display_name,
            "device": device,
            "rtpCapabilities": rtp_capabilities,
        })
    }

    #[must_use]
    pub fn peer_leave(peer_id: Option<&PeerId>) -> Value {
        json!({ "peerId": peer_id })
    }

    #[must_use]
    pub fn consume(peer_id: &PeerId, producer_id: &ProducerId) -> Value {
        json!({ "producerId": producer_id, "peerId": peer_id })
    }

    #[must_use]
    pub fn consumer(consumer_id: &ConsumerId) -> Value {
        json!({ "consumerId": consumer_id })
    }

    #[must_use]
    pub fn producer(producer_id: &ProducerId) -> Value {
        json!({ "producerId": producer_id })
    }

    #[must_use]
    pub fn preferred_layers(consumer_id: &ConsumerId, spatial: u8, temporal: u8) -> Value {
        json!({
            "consumerId": consumer_id,
            "spatialLayer": spatial,
            "temporalLayer": temporal,
        })
    }

    #[must_use]
    pub fn priorities(consumer_ids: &[ConsumerId], priority: Priority) -> Value {
        let consumers: Vec<Value> = consumer_ids
            .iter()
            .map(|id| json!({ "consumerId": id, "priority": priority.wire_value() }))
            .collect();
        json!({ "consumers": consumers })
    }

    #[must_use]
    pub fn produce(transport_id: &TransportId, kind: MediaKind, rtp_parameters: &Value) -> Value {
        let mut params = json!({
            "transportId": transport_id,
            "kind": kind.transport_kind(),
            "rtpParameters": rtp_parameters,
        });
        if kind.is_screen_share() {
            params["appData"] = json!({ "share": true });
        }
        params
    }

    #[must_use]
    pub fn connect_transport(transport_id: &TransportId, dtls_parameters: &Value) -> Value {
        json!({ "transportId": transport_id, "dtlsParameters": dtls_parameters })
    }

    #[must_use]
    pub fn restart_ice(peer_id: Option<&PeerId>, role: TransportRole) -> Value {
        json!({ "peerId": peer_id, "transportType": role.as_str() })
    }

    #[must_use]
    pub fn transport_stats(peer_id: Option<&PeerId>, transport_ids: &[TransportId]) -> Value {
        json!({ "peerId": peer_id, "transportIds": transport_ids })
    }

    #[must_use]
    pub fn broadcast(event_name: &str, peer_id: Option<&PeerId>, timestamp_ms: i64, message: &Value) -> Value {
        json!({
            "eventName": event_name,
            "timeStamp": timestamp_ms,
            "peerId": peer_id,
            "msgData": message,
        })
    }
}
