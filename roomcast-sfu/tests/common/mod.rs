//! Recording collaborators and a harness driving `MediaSession` end to end

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use roomcast_sfu::channel::{AckResult, ChannelClient, ChannelSink, ConnectRequest, ConnectivityState};
use roomcast_sfu::config::ClientConfig;
use roomcast_sfu::transport::{
    ConsumeParams, ConsumerHandle, EncodingLayer, ProducerHandle, ReceiveTransport, SendTransport,
    TransportConnectionState, TransportError, TransportFacade, TransportHandle, TransportOptions, TransportSink,
};
use roomcast_sfu::types::{ConsumerId, MediaKind, ProducerId, TransportId};
use roomcast_sfu::{JoinOptions, MediaSession, Result, SessionEvent};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub const SELF_PEER: &str = "me";
pub const SEND_TRANSPORT: &str = "send-1";
pub const RECV_TRANSPORT: &str = "recv-1";

/// Let every ready task run to completion
///
/// Tests run with a paused clock, so the sleep only returns once the runtime
/// is otherwise idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Roster entry or `newPeer` payload; producers are `(producerId, mediaType, share)`
pub fn peer(peer_id: &str, display_name: &str, producers: &[(&str, &str, bool)]) -> Value {
    let producers: Vec<Value> = producers
        .iter()
        .map(|(producer_id, media_type, share)| {
            json!({ "producerId": producer_id, "mediaType": media_type, "share": share })
        })
        .collect();
    json!({ "peerId": peer_id, "displayName": display_name, "producers": producers })
}

pub fn producer_event(peer_id: &str, producer_id: &str, media_type: &str, share: bool) -> Value {
    json!({ "peerId": peer_id, "producerId": producer_id, "mediaType": media_type, "share": share })
}

#[derive(Default)]
pub struct MockChannel {
    sink: Mutex<Option<ChannelSink>>,
    connects: Mutex<Vec<ConnectRequest>>,
    emitted: Mutex<Vec<(String, Value)>>,
    roster: Mutex<Vec<Value>>,
    /// producerId -> (mediaType, share)
    producers: Mutex<HashMap<String, (String, bool)>>,
    failures: Mutex<HashMap<String, String>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    stats: Mutex<Value>,
    next_id: AtomicUsize,
    reconnects: AtomicUsize,
    disconnected: AtomicBool,
}

impl MockChannel {
    pub fn sink(&self) -> ChannelSink {
        self.sink.lock().clone().expect("channel not connected")
    }

    pub fn set_roster(&self, peers: Vec<Value>) {
        for peer in &peers {
            self.register_producers(peer);
        }
        *self.roster.lock() = peers;
    }

    /// Make the server aware of the producers listed in a peer payload
    pub fn register_producers(&self, peer: &Value) {
        let Some(producers) = peer.get("producers").and_then(Value::as_array) else {
            return;
        };
        for producer in producers {
            self.register_producer(
                producer["producerId"].as_str().unwrap_or_default(),
                producer["mediaType"].as_str().unwrap_or_default(),
                producer["share"].as_bool().unwrap_or(false),
            );
        }
    }

    pub fn register_producer(&self, producer_id: &str, media_type: &str, share: bool) {
        self.producers
            .lock()
            .insert(producer_id.to_string(), (media_type.to_string(), share));
    }

    /// Reject every further request for `action`
    pub fn fail(&self, action: &str, reason: &str) {
        self.failures
            .lock()
            .insert(action.to_string(), reason.to_string());
    }

    /// Hold acks for `action` until [`Self::release`]
    pub fn hold(&self, action: &str) {
        self.gates
            .lock()
            .insert(action.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, action: &str, count: usize) {
        if let Some(gate) = self.gates.lock().get(action) {
            gate.add_permits(count);
        }
    }

    pub fn set_stats(&self, stats: Value) {
        *self.stats.lock() = stats;
    }

    pub fn emitted(&self, action: &str) -> Vec<Value> {
        self.emitted
            .lock()
            .iter()
            .filter(|(a, _)| a == action)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn actions(&self) -> Vec<String> {
        self.emitted.lock().iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.connects.lock().clone()
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn respond(&self, action: &str, params: &Value) -> AckResult {
        if let Some(reason) = self.failures.lock().get(action) {
            return AckResult::error(reason.clone());
        }

        match action {
            "join" => AckResult::ok(json!({
                "peerId": SELF_PEER,
                "peers": self.roster.lock().clone(),
            })),
            "consume" => {
                let producer_id = params["producerId"].as_str().unwrap_or_default();
                let Some((media_type, share)) = self.producers.lock().get(producer_id).cloned() else {
                    return AckResult::error(format!("producer {producer_id} not found"));
                };
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                AckResult::ok(json!({
                    "consumerInfo": {
                        "producerPeerId": params["peerId"],
                        "consumerId": format!("consumer-{n}"),
                        "producerId": producer_id,
                        "kind": media_type,
                        "rtpParameters": {},
                        "appData": { "share": share },
                    }
                }))
            }
            "produce" => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                AckResult::ok(json!({ "id": format!("server-producer-{n}") }))
            }
            "restartIce" => {
                let consuming = params["transportType"] == "receive";
                AckResult::ok(json!({
                    "iceRestartParameters": [{
                        "consuming": consuming,
                        "iceParameters": { "usernameFragment": "restarted" },
                    }]
                }))
            }
            "getTransportStats" => AckResult::ok(self.stats.lock().clone()),
            _ => AckResult::ok(Value::Null),
        }
    }
}

#[async_trait]
impl ChannelClient for MockChannel {
    async fn connect(&self, request: ConnectRequest, sink: ChannelSink) -> Result<()> {
        self.connects.lock().push(request);
        *self.sink.lock() = Some(sink.clone());

        sink.state(ConnectivityState::Connected);
        sink.event(
            "socketConnected",
            json!({
                "rtpCapabilities": { "codecs": [] },
                "sendTransport": { "id": SEND_TRANSPORT },
                "receiveTransport": { "id": RECV_TRANSPORT },
            }),
        );
        Ok(())
    }

    async fn emit(&self, action: &str, params: Value) -> Result<AckResult> {
        self.emitted.lock().push((action.to_string(), params.clone()));

        let gate = self.gates.lock().get(action).cloned();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Ok(self.respond(action, &params))
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Shared state of a mock consumer
#[derive(Debug)]
pub struct ConsumerState {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub paused: AtomicBool,
    pub closed: AtomicBool,
}

impl ConsumerState {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockConsumer(Arc<ConsumerState>);

impl ConsumerHandle for MockConsumer {
    fn id(&self) -> &ConsumerId {
        &self.0.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.0.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.0.kind
    }

    fn is_paused(&self) -> bool {
        self.0.is_paused()
    }

    fn resume(&self) {
        self.0.paused.store(false, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.0.paused.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

/// Shared state of a mock local producer
#[derive(Debug)]
pub struct ProducerState {
    pub kind: MediaKind,
    pub encodings: usize,
    pub paused: AtomicBool,
    pub closed: AtomicBool,
    pub max_spatial_layer: Mutex<Option<u8>>,
}

struct MockProducer(Arc<ProducerState>);

impl ProducerHandle for MockProducer {
    fn kind(&self) -> MediaKind {
        self.0.kind
    }

    fn rtp_parameters(&self) -> Value {
        json!({ "codecs": [], "encodings": self.0.encodings })
    }

    fn pause(&self) {
        self.0.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.0.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    fn set_max_spatial_layer(&self, layer: u8) -> std::result::Result<(), TransportError> {
        *self.0.max_spatial_layer.lock() = Some(layer);
        Ok(())
    }
}

/// Shared state of a mock transport
#[derive(Debug)]
pub struct TransportState {
    pub id: TransportId,
    pub sink: TransportSink,
    pub state: Mutex<TransportConnectionState>,
    pub ice_restarts: Mutex<Vec<Value>>,
    pub closed: AtomicBool,
}

impl TransportState {
    fn new(options: &TransportOptions, sink: TransportSink) -> Arc<Self> {
        Arc::new(Self {
            id: options.id.clone(),
            sink,
            state: Mutex::new(TransportConnectionState::New),
            ice_restarts: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Move to `state` and tell the engine
    pub fn set_state(&self, state: TransportConnectionState) {
        *self.state.lock() = state;
        self.sink.state_changed(state);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn ice_restarts(&self) -> Vec<Value> {
        self.ice_restarts.lock().clone()
    }
}

struct MockSendTransport {
    state: Arc<TransportState>,
    producers: Arc<Mutex<Vec<Arc<ProducerState>>>>,
}

impl TransportHandle for MockSendTransport {
    fn id(&self) -> &TransportId {
        &self.state.id
    }

    fn connection_state(&self) -> TransportConnectionState {
        *self.state.state.lock()
    }

    fn restart_ice(&self, ice_parameters: &Value) -> std::result::Result<(), TransportError> {
        self.state.ice_restarts.lock().push(ice_parameters.clone());
        Ok(())
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

impl SendTransport for MockSendTransport {
    fn produce(
        &self,
        kind: MediaKind,
        encodings: &[EncodingLayer],
    ) -> std::result::Result<Box<dyn ProducerHandle>, TransportError> {
        let state = Arc::new(ProducerState {
            kind,
            encodings: encodings.len(),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            max_spatial_layer: Mutex::new(None),
        });
        self.producers.lock().push(Arc::clone(&state));
        Ok(Box::new(MockProducer(state)))
    }
}

struct MockReceiveTransport {
    state: Arc<TransportState>,
    consumers: Arc<Mutex<Vec<Arc<ConsumerState>>>>,
}

impl TransportHandle for MockReceiveTransport {
    fn id(&self) -> &TransportId {
        &self.state.id
    }

    fn connection_state(&self) -> TransportConnectionState {
        *self.state.state.lock()
    }

    fn restart_ice(&self, ice_parameters: &Value) -> std::result::Result<(), TransportError> {
        self.state.ice_restarts.lock().push(ice_parameters.clone());
        Ok(())
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

impl ReceiveTransport for MockReceiveTransport {
    fn consume(&self, params: ConsumeParams) -> std::result::Result<Box<dyn ConsumerHandle>, TransportError> {
        let state = Arc::new(ConsumerState {
            id: params.consumer_id,
            producer_id: params.producer_id,
            kind: params.kind,
            // Consumers start paused until the engine resumes them
            paused: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().push(Arc::clone(&state));
        Ok(Box::new(MockConsumer(state)))
    }
}

#[derive(Default)]
pub struct MockTransports {
    send: Mutex<Option<Arc<TransportState>>>,
    recv: Mutex<Option<Arc<TransportState>>>,
    consumers: Arc<Mutex<Vec<Arc<ConsumerState>>>>,
    producers: Arc<Mutex<Vec<Arc<ProducerState>>>>,
    loads: AtomicUsize,
}

impl MockTransports {
    pub fn send(&self) -> Arc<TransportState> {
        self.send.lock().clone().expect("send transport not created")
    }

    pub fn recv(&self) -> Arc<TransportState> {
        self.recv.lock().clone().expect("receive transport not created")
    }

    pub fn consumers(&self) -> Vec<Arc<ConsumerState>> {
        self.consumers.lock().clone()
    }

    /// Every consumer ever bound to `producer_id`
    pub fn consumers_of(&self, producer_id: &str) -> Vec<Arc<ConsumerState>> {
        self.consumers
            .lock()
            .iter()
            .filter(|c| c.producer_id.as_str() == producer_id)
            .cloned()
            .collect()
    }

    /// The single consumer bound to `producer_id`
    pub fn consumer_of(&self, producer_id: &str) -> Arc<ConsumerState> {
        let consumers = self.consumers_of(producer_id);
        assert_eq!(consumers.len(), 1, "consumers of {producer_id}");
        Arc::clone(&consumers[0])
    }

    pub fn producers(&self) -> Vec<Arc<ProducerState>> {
        self.producers.lock().clone()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl TransportFacade for MockTransports {
    fn load(&self, _router_capabilities: &Value) -> std::result::Result<Value, TransportError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "codecs": [{ "mimeType": "audio/opus" }] }))
    }

    fn create_send_transport(
        &self,
        options: &TransportOptions,
        sink: TransportSink,
    ) -> std::result::Result<Box<dyn SendTransport>, TransportError> {
        let state = TransportState::new(options, sink);
        *self.send.lock() = Some(Arc::clone(&state));
        Ok(Box::new(MockSendTransport {
            state,
            producers: Arc::clone(&self.producers),
        }))
    }

    fn create_receive_transport(
        &self,
        options: &TransportOptions,
        sink: TransportSink,
    ) -> std::result::Result<Box<dyn ReceiveTransport>, TransportError> {
        let state = TransportState::new(options, sink);
        *self.recv.lock() = Some(Arc::clone(&state));
        Ok(Box::new(MockReceiveTransport {
            state,
            consumers: Arc::clone(&self.consumers),
        }))
    }
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.stats.enabled = false;
    config
}

pub struct Harness {
    pub session: MediaSession,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub channel: Arc<MockChannel>,
    pub transports: Arc<MockTransports>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let channel = Arc::new(MockChannel::default());
        let transports = Arc::new(MockTransports::default());
        let (session, events) = MediaSession::new(
            config,
            Arc::clone(&channel) as Arc<dyn ChannelClient>,
            Arc::clone(&transports) as Arc<dyn TransportFacade>,
        );
        Self {
            session,
            events,
            channel,
            transports,
        }
    }

    pub fn join_options() -> JoinOptions {
        JoinOptions::new("wss://sfu.test", "room-1", "token", "Me")
    }

    /// Join with `roster` already in the room and let the initial
    /// subscriptions settle
    pub async fn join(&self, roster: Vec<Value>) -> Result<()> {
        self.join_with(Self::join_options(), roster).await
    }

    pub async fn join_with(&self, options: JoinOptions, roster: Vec<Value>) -> Result<()> {
        self.channel.set_roster(roster);
        let result = self.session.join(options).await;
        settle().await;
        result
    }

    /// Deliver a live server event and let the engine react
    pub async fn event(&self, name: &str, payload: Value) {
        self.channel.sink().event(name, payload);
        settle().await;
    }

    pub async fn connectivity(&self, state: ConnectivityState) {
        self.channel.sink().state(state);
        settle().await;
    }

    /// Announce a new remote producer
    pub async fn publish(&self, peer_id: &str, producer_id: &str, media_type: &str, share: bool) {
        self.channel.register_producer(producer_id, media_type, share);
        self.event(
            "newProducer",
            producer_event(peer_id, producer_id, media_type, share),
        )
        .await;
    }

    /// Session events received so far
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Last `setConsumerPreferredLayers` spatial layer sent for a consumer
pub fn last_spatial_layer(channel: &MockChannel, consumer_id: &ConsumerId) -> Option<u64> {
    channel
        .emitted("setConsumerPreferredLayers")
        .iter()
        .rev()
        .find(|p| p["consumerId"] == consumer_id.as_str())
        .and_then(|p| p["spatialLayer"].as_u64())
}

/// Last priority sent for a consumer
pub fn last_priority(channel: &MockChannel, consumer_id: &ConsumerId) -> Option<u64> {
    channel
        .emitted("setConsumersPreferedLayersNPriorities")
        .iter()
        .rev()
        .find_map(|p| {
            p["consumers"]
                .as_array()?
                .iter()
                .find(|c| c["consumerId"] == consumer_id.as_str())
                .and_then(|c| c["priority"].as_u64())
        })
}
