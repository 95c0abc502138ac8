//! Signaling engine
//!
//! A single tokio task owns the peer registry, the session state and every
//! decision component. Application calls, channel events, transport signals,
//! acks and timers all arrive as [`Command`]s on one unbounded queue and are
//! handled strictly one at a time. Channel I/O runs in spawned tasks that post
//! their outcome back onto the queue, so the engine never waits on an ack.

mod feeds;
mod handle;
mod inbound;
mod local;

pub use handle::{JoinOptions, MediaSession, SessionEvent};

use crate::channel::{ChannelClient, ChannelInput, ChannelSink, ConnectRequest, ConnectivityState, EmitAction};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::network::NetworkClass;
use crate::protocol::{self, params, IceRestart, JoinAck, ServerHello, SUBSCRIBED_EVENTS};
use crate::quality::QualityController;
use crate::reconnect::{IceRestartDecision, ReconnectionSupervisor};
use crate::registry::{PeerRegistry, PeerSnapshot};
use crate::session::{EngineState, SessionSnapshot, SessionState};
use crate::transport::{
    ReceiveTransport, SendTransport, TransportConnectionState, TransportError, TransportFacade,
    TransportRole, TransportSignal, TransportSink,
};
use crate::types::{MediaKind, PeerId, ProducerId, QualityLevel};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Everything the engine reacts to
pub(crate) enum Command {
    Join {
        options: JoinOptions,
        reply: Reply<()>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    SubscribeFeed {
        subscribe: bool,
        peer_id: PeerId,
        kind: MediaKind,
        reply: Reply<()>,
    },
    SetAudioOnly {
        enabled: bool,
        peer_ids: Vec<PeerId>,
        reply: Reply<()>,
    },
    SetPreferredQuality {
        peer_id: PeerId,
        level: QualityLevel,
        reply: Reply<()>,
    },
    SetLocalMedia {
        kind: MediaKind,
        enabled: bool,
        reply: Reply<()>,
    },
    SetScreenShare {
        enabled: bool,
        reply: Reply<()>,
    },
    SetLocalQuality {
        level: QualityLevel,
        reply: Reply<()>,
    },
    SetNetworkClass {
        class: NetworkClass,
    },
    SendMessage {
        target: Option<PeerId>,
        message: Value,
        reply: Reply<()>,
    },
    PeerSnapshot {
        peer_id: PeerId,
        reply: oneshot::Sender<Option<PeerSnapshot>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerSnapshot>>,
    },
    Session {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Channel(ChannelInput),
    Transport(TransportSignal),
    Ack {
        route: AckRoute,
        result: Result<Value>,
    },
    WatchdogElapsed {
        generation: u64,
    },
    StatsTick,
}

/// Where an ack is handled once it arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AckRoute {
    /// Only failures are logged
    Ignore(EmitAction),
    Connect,
    Join,
    Consume {
        peer_id: PeerId,
        kind: MediaKind,
        producer_id: ProducerId,
    },
    Produce {
        kind: MediaKind,
    },
    RestartIce {
        role: TransportRole,
    },
    TransportStats,
}

struct PendingJoin {
    options: JoinOptions,
    reply: Reply<()>,
}

pub(crate) struct SignalingEngine {
    config: ClientConfig,
    channel: Arc<dyn ChannelClient>,
    transports: Arc<dyn TransportFacade>,
    tx: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    state: EngineState,
    session: SessionState,
    registry: PeerRegistry,
    quality: QualityController,
    supervisor: ReconnectionSupervisor,
    join: Option<PendingJoin>,
    hello: Option<ServerHello>,
    device_capabilities: Option<Value>,
    send_transport: Option<Box<dyn SendTransport>>,
    recv_transport: Option<Box<dyn ReceiveTransport>>,
    feed_waiters: HashMap<(PeerId, MediaKind), Vec<Reply<()>>>,
    produce_waiters: HashMap<MediaKind, Vec<Reply<()>>>,
    stats_running: bool,
    /// Fatal join error raised by a handler, processed after it returns
    failure: Option<Error>,
}

impl SignalingEngine {
    pub(crate) fn new(
        config: ClientConfig,
        channel: Arc<dyn ChannelClient>,
        transports: Arc<dyn TransportFacade>,
        tx: mpsc::UnboundedSender<Command>,
        events: mpsc::UnboundedSender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let quality = QualityController::new(config.quality.clone());
        let supervisor = ReconnectionSupervisor::new(config.reconnect.clone());
        let session = SessionState::new(false, QualityLevel::High, NetworkClass::Wifi);

        Self {
            config,
            channel,
            transports,
            tx,
            events,
            cancel,
            state: EngineState::Idle,
            session,
            registry: PeerRegistry::new(),
            quality,
            supervisor,
            join: None,
            hello: None,
            device_capabilities: None,
            send_transport: None,
            recv_transport: None,
            feed_waiters: HashMap::new(),
            produce_waiters: HashMap::new(),
            stats_running: false,
            failure: None,
        }
    }

    /// Process commands until the session is left or every handle is dropped
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        debug!("Signaling engine started");

        loop {
            let command = tokio::select! {
                () = self.cancel.cancelled() => None,
                command = rx.recv() => command,
            };
            let Some(command) = command else {
                self.shutdown().await;
                break;
            };

            self.handle(command).await;

            if let Some(error) = self.failure.take() {
                self.fail_join(error).await;
            }
            if self.state == EngineState::Left {
                break;
            }
        }

        debug!("Signaling engine stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Join { options, reply } => self.on_join(options, reply),
            Command::Leave { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
            Command::SubscribeFeed {
                subscribe,
                peer_id,
                kind,
                reply,
            } => self.subscribe_feed(subscribe, &peer_id, kind, reply),
            Command::SetAudioOnly {
                enabled,
                peer_ids,
                reply,
            } => {
                let _ = reply.send(self.set_audio_only(enabled, &peer_ids));
            }
            Command::SetPreferredQuality {
                peer_id,
                level,
                reply,
            } => {
                let _ = reply.send(self.set_preferred_quality(&peer_id, level));
            }
            Command::SetLocalMedia {
                kind,
                enabled,
                reply,
            } => self.set_local_media(kind, enabled, Some(reply)),
            Command::SetScreenShare { enabled, reply } => self.set_screen_share(enabled, reply),
            Command::SetLocalQuality { level, reply } => {
                self.set_local_quality(level);
                let _ = reply.send(Ok(()));
            }
            Command::SetNetworkClass { class } => self.set_network_class(class),
            Command::SendMessage {
                target,
                message,
                reply,
            } => {
                let _ = reply.send(self.send_message(target.as_ref(), message));
            }
            Command::PeerSnapshot { peer_id, reply } => {
                let _ = reply.send(self.registry.get(&peer_id).map(|p| p.snapshot()));
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.registry.iter().map(|p| p.snapshot()).collect());
            }
            Command::Session { reply } => {
                let _ = reply.send(self.session.snapshot(self.state));
            }
            Command::Channel(input) => self.on_channel_input(input),
            Command::Transport(signal) => self.on_transport_signal(signal),
            Command::Ack { route, result } => self.on_ack(route, result),
            Command::WatchdogElapsed { generation } => self.on_watchdog(generation),
            Command::StatsTick => self.poll_transport_stats(),
        }
    }

    fn notify(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "Engine state changed");
        self.state = state;
        self.notify(SessionEvent::StateChanged(state));
    }

    /// Reject application requests unless joined with a live channel
    fn ensure_active(&self, action: &str) -> Result<()> {
        if self.state == EngineState::Joined && self.session.is_connected() {
            return Ok(());
        }
        warn!(
            action,
            state = %self.state,
            connection_state = ?self.session.connection_state,
            "Ignoring request while session is not active"
        );
        Err(Error::ChannelUnavailable {
            action: action.to_string(),
        })
    }

    /// Emit a request on the channel
    ///
    /// Everything except `join` is dropped while the channel is not connected.
    /// The ack, or its timeout, comes back as [`Command::Ack`].
    fn emit(&self, action: EmitAction, params: Value, route: AckRoute) -> Result<()> {
        if action != EmitAction::Join && !self.session.is_connected() {
            warn!(
                action = %action,
                connection_state = ?self.session.connection_state,
                "Dropping request while channel is not connected"
            );
            return Err(Error::ChannelUnavailable {
                action: action.to_string(),
            });
        }

        let timeout = match action {
            EmitAction::Produce | EmitAction::ConnectWebRtcTransport => {
                self.config.signaling.transport_ack_timeout()
            }
            _ => self.config.signaling.ack_timeout(),
        };
        let channel = Arc::clone(&self.channel);
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();

        debug!(action = %action, "Emitting request");
        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = cancel.cancelled() => return,
                outcome = tokio::time::timeout(timeout, channel.emit(action.as_str(), params)) => outcome,
            };
            let result = match outcome {
                Ok(Ok(ack)) => ack.into_data(action),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::AckTimeout {
                    action: action.to_string(),
                }),
            };
            if !matches!(route, AckRoute::Ignore(_)) || result.is_err() {
                let _ = tx.send(Command::Ack { route, result });
            }
        });

        Ok(())
    }

    fn on_ack(&mut self, route: AckRoute, result: Result<Value>) {
        match route {
            AckRoute::Ignore(action) => {
                if let Err(e) = result {
                    warn!(action = %action, error = %e, "Request failed");
                }
            }
            AckRoute::Connect => {
                if let Err(e) = result {
                    self.abort_join(Error::JoinFailed(format!("connect failed: {e}")));
                }
            }
            AckRoute::Join => self.on_join_ack(result),
            AckRoute::Consume {
                peer_id,
                kind,
                producer_id,
            } => self.on_consume_ack(&peer_id, kind, &producer_id, result),
            AckRoute::Produce { kind } => self.on_produce_ack(kind, result),
            AckRoute::RestartIce { role } => self.on_restart_ice_ack(role, result),
            AckRoute::TransportStats => self.on_transport_stats(result),
        }
    }

    fn on_join(&mut self, options: JoinOptions, reply: Reply<()>) {
        if self.state != EngineState::Idle {
            let _ = reply.send(Err(Error::JoinFailed(format!(
                "session is already {}",
                self.state
            ))));
            return;
        }

        self.session = SessionState::new(
            options.hd_enabled,
            options.local_quality,
            self.session.network_class,
        );
        self.set_state(EngineState::Joining);
        info!(room_id = %options.room_id, url = %options.url, "Joining room");

        let request = ConnectRequest {
            url: options.url.clone(),
            payload: params::connect(
                &options.room_id,
                &options.token,
                &options.display_name,
                &options.device,
            ),
            events: SUBSCRIBED_EVENTS.to_vec(),
        };
        self.join = Some(PendingJoin { options, reply });

        let channel = Arc::clone(&self.channel);
        let sink = ChannelSink::new(self.tx.clone());
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = channel.connect(request, sink) => result,
            };
            if let Err(error) = result {
                let _ = tx.send(Command::Ack {
                    route: AckRoute::Connect,
                    result: Err(error),
                });
            }
        });
    }

    fn on_channel_input(&mut self, input: ChannelInput) {
        match input {
            ChannelInput::Connectivity(state) => self.on_connectivity(state),
            ChannelInput::Event(event) => self.on_event(event),
            ChannelInput::Replay(events) => self.on_missed_events(events),
        }
    }

    fn on_connectivity(&mut self, state: ConnectivityState) {
        if self.session.connection_state == state {
            return;
        }
        let previous = std::mem::replace(&mut self.session.connection_state, state);
        info!(from = ?previous, to = ?state, "Channel connectivity changed");
        self.notify(SessionEvent::ConnectionStateChanged(state));

        match state {
            ConnectivityState::Connected => {
                self.supervisor.on_connected();
                if self.state == EngineState::Reconnecting {
                    self.resume_after_reconnect();
                }
            }
            ConnectivityState::Disconnected | ConnectivityState::Reconnecting => {
                if self.state == EngineState::Joined {
                    self.set_state(EngineState::Reconnecting);
                }
                if state == ConnectivityState::Disconnected && self.state == EngineState::Reconnecting {
                    if let Some(generation) = self.supervisor.on_disconnected() {
                        self.spawn_watchdog(generation);
                    }
                }
            }
            ConnectivityState::Connecting => {}
        }
    }

    /// Server hello: first one loads the device and joins, later ones mark a
    /// reconnect
    fn on_server_hello(&mut self, hello: ServerHello) {
        match self.state {
            EngineState::Joining if self.device_capabilities.is_none() => {
                let capabilities = match self.transports.load(&hello.rtp_capabilities) {
                    Ok(capabilities) => capabilities,
                    Err(e) => {
                        self.abort_join(Error::JoinFailed(format!("device load failed: {e}")));
                        return;
                    }
                };
                let Some(join) = &self.join else {
                    return;
                };
                let join_params = params::join(
                    &join.options.display_name,
                    &join.options.device,
                    &capabilities,
                );
                self.device_capabilities = Some(capabilities);
                self.hello = Some(hello);

                info!("Device loaded, sending join request");
                if let Err(e) = self.emit(EmitAction::Join, join_params, AckRoute::Join) {
                    self.abort_join(Error::JoinFailed(e.to_string()));
                }
            }
            EngineState::Joining => debug!("Join already in progress"),
            EngineState::Reconnecting => self.resume_after_reconnect(),
            EngineState::Joined => debug!("Server hello while joined"),
            EngineState::Idle | EngineState::Left => {}
        }
    }

    fn on_join_ack(&mut self, result: Result<Value>) {
        if self.state != EngineState::Joining {
            debug!(state = %self.state, "Ignoring late join ack");
            return;
        }

        let ack = match result.and_then(|data| JoinAck::parse(&data)) {
            Ok(ack) => ack,
            Err(e) => {
                self.abort_join(Error::JoinFailed(e.to_string()));
                return;
            }
        };
        if let Err(e) = self.create_transports() {
            self.abort_join(e);
            return;
        }
        if ack.self_peer_id.is_some() {
            self.session.self_peer_id = ack.self_peer_id;
        }

        self.set_state(EngineState::Joined);
        info!(
            peer_id = ?self.session.self_peer_id,
            peers = ack.peers.len(),
            "Joined room"
        );
        self.notify(SessionEvent::Joined {
            self_peer_id: self.session.self_peer_id.clone(),
        });

        for peer in &ack.peers {
            self.on_peer_joined(peer);
        }

        if let Some(join) = self.join.take() {
            let _ = join.reply.send(Ok(()));
            if join.options.publish_audio {
                self.set_local_media(MediaKind::Audio, true, None);
            }
            if join.options.publish_video {
                self.set_local_media(MediaKind::Video, true, None);
            }
        }

        self.start_stats_poller();
        self.drain_replay();
    }

    fn create_transports(&mut self) -> Result<()> {
        let hello = self
            .hello
            .as_ref()
            .ok_or_else(|| Error::JoinFailed("no server hello".to_string()))?;

        let options = |role: TransportRole, params: Option<&Value>| {
            let params = params.ok_or_else(|| Error::JoinFailed(format!("server sent no {role} transport")))?;
            protocol::transport_options(role, params).map_err(|e| Error::JoinFailed(e.to_string()))
        };
        let send_options = options(TransportRole::Send, hello.send_transport.as_ref())?;
        let recv_options = options(TransportRole::Receive, hello.receive_transport.as_ref())?;

        let send = self
            .transports
            .create_send_transport(&send_options, TransportSink::new(TransportRole::Send, self.tx.clone()))
            .map_err(|e| Error::JoinFailed(format!("send transport: {e}")))?;
        let recv = match self.transports.create_receive_transport(
            &recv_options,
            TransportSink::new(TransportRole::Receive, self.tx.clone()),
        ) {
            Ok(recv) => recv,
            Err(e) => {
                send.close();
                return Err(Error::JoinFailed(format!("receive transport: {e}")));
            }
        };

        debug!(
            send_transport = %send.id(),
            receive_transport = %recv.id(),
            "Transports created"
        );
        self.send_transport = Some(send);
        self.recv_transport = Some(recv);
        Ok(())
    }

    fn abort_join(&mut self, error: Error) {
        if matches!(self.state, EngineState::Joining | EngineState::Idle) && self.failure.is_none() {
            self.failure = Some(error);
        } else {
            warn!(state = %self.state, error = %error, "Ignoring join failure outside of join");
        }
    }

    async fn fail_join(&mut self, error: Error) {
        error!(error = %error, "Join failed");
        self.notify(SessionEvent::Error(error.clone()));
        if let Some(join) = self.join.take() {
            let _ = join.reply.send(Err(error));
        }
        self.shutdown().await;
    }

    fn transport_state(&self, role: TransportRole) -> Option<TransportConnectionState> {
        match role {
            TransportRole::Send => self.send_transport.as_ref().map(|t| t.connection_state()),
            TransportRole::Receive => self.recv_transport.as_ref().map(|t| t.connection_state()),
        }
    }

    fn apply_ice_parameters(&self, role: TransportRole, ice_parameters: &Value) -> std::result::Result<(), TransportError> {
        match role {
            TransportRole::Send => self.send_transport.as_ref().map_or(Ok(()), |t| t.restart_ice(ice_parameters)),
            TransportRole::Receive => self.recv_transport.as_ref().map_or(Ok(()), |t| t.restart_ice(ice_parameters)),
        }
    }

    fn on_transport_signal(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Connect {
                role,
                transport_id,
                dtls_parameters,
            } => {
                debug!(role = %role, transport_id = %transport_id, "Connecting transport");
                let _ = self.emit(
                    EmitAction::ConnectWebRtcTransport,
                    params::connect_transport(&transport_id, &dtls_parameters),
                    AckRoute::Ignore(EmitAction::ConnectWebRtcTransport),
                );
            }
            TransportSignal::StateChanged { role, state } => self.on_transport_state(role, state),
        }
    }

    fn on_transport_state(&mut self, role: TransportRole, state: TransportConnectionState) {
        debug!(role = %role, state = ?state, "Transport state changed");
        match state {
            TransportConnectionState::Failed => {
                warn!(role = %role, "Transport failed");
                self.supervisor.transport_failed(role);
                if matches!(self.state, EngineState::Joined | EngineState::Reconnecting) {
                    self.restart_ice(role);
                }
            }
            TransportConnectionState::Connected => {
                if self.supervisor.is_failed(role) {
                    info!(role = %role, "Transport recovered");
                    self.supervisor.transport_recovered(role);
                }
                self.maybe_rejoined();
            }
            TransportConnectionState::New
            | TransportConnectionState::Connecting
            | TransportConnectionState::Disconnected
            | TransportConnectionState::Closed => {}
        }
    }

    fn restart_ice(&mut self, role: TransportRole) {
        if !self.session.is_connected() {
            debug!(role = %role, "Deferring ICE restart until the channel reconnects");
            return;
        }

        match self.supervisor.begin_ice_restart(role) {
            IceRestartDecision::Request { attempt } => {
                info!(role = %role, attempt, "Restarting ICE");
                let params = params::restart_ice(self.session.self_peer_id.as_ref(), role);
                if self.emit(EmitAction::RestartIce, params, AckRoute::RestartIce { role }).is_err() {
                    self.supervisor.ice_restart_finished(role);
                }
            }
            IceRestartDecision::InFlight | IceRestartDecision::NotNeeded => {}
            IceRestartDecision::Exhausted => {
                let error = Error::TransportFailed {
                    role,
                    reason: "ICE restart attempts exhausted".to_string(),
                };
                error!(role = %role, "ICE restart attempts exhausted");
                self.notify(SessionEvent::Error(error));
            }
        }
    }

    fn on_restart_ice_ack(&mut self, role: TransportRole, result: Result<Value>) {
        self.supervisor.ice_restart_finished(role);

        let restarts = match result.and_then(|data| IceRestart::parse(&data)) {
            Ok(restarts) => restarts,
            Err(e) => {
                warn!(role = %role, error = %e, "ICE restart request failed");
                self.restart_ice(role);
                return;
            }
        };

        for restart in restarts.iter().filter(|r| r.role == role) {
            if let Err(e) = self.apply_ice_parameters(role, &restart.ice_parameters) {
                warn!(role = %role, error = %e, "Transport rejected new ICE parameters");
            }
        }
    }

    /// Channel is back after an outage
    fn resume_after_reconnect(&mut self) {
        if self.state != EngineState::Reconnecting || !self.session.is_connected() {
            return;
        }
        info!("Channel reconnected, resuming session");
        self.drain_replay();
        self.resubscribe_missing();

        for role in [TransportRole::Send, TransportRole::Receive] {
            let failed = self.transport_state(role) == Some(TransportConnectionState::Failed);
            if failed && !self.supervisor.is_failed(role) {
                self.supervisor.transport_failed(role);
            }
        }
        for role in self.supervisor.failed_roles() {
            self.restart_ice(role);
        }
        self.maybe_rejoined();
    }

    /// Leave `Reconnecting` once the channel is up and no transport is failed
    fn maybe_rejoined(&mut self) {
        if self.state == EngineState::Reconnecting
            && self.session.is_connected()
            && self.supervisor.all_transports_healthy()
        {
            self.set_state(EngineState::Joined);
            self.recompute_quality();
            self.apply_local_cap();
        }
    }

    fn spawn_watchdog(&self, generation: u64) {
        let delay = self.supervisor.watchdog_delay();
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        debug!(generation, delay_ms = delay.as_millis() as u64, "Reconnect watchdog armed");

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(Command::WatchdogElapsed { generation });
                }
            }
        });
    }

    fn on_watchdog(&mut self, generation: u64) {
        if self.supervisor.watchdog_fired(generation) && !self.session.is_connected() {
            warn!("Channel still down, requesting reconnect");
            self.channel.reconnect();
        }
    }

    fn start_stats_poller(&mut self) {
        if !self.config.stats.enabled || self.stats_running {
            return;
        }
        self.stats_running = true;

        let interval = self.config.stats.interval();
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(Command::StatsTick).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Close everything and end the session. Safe to call repeatedly.
    async fn shutdown(&mut self) {
        if self.state == EngineState::Left {
            return;
        }
        info!(state = %self.state, "Leaving session");

        if matches!(self.state, EngineState::Joined | EngineState::Reconnecting) && self.session.is_connected() {
            let leave = params::peer_leave(self.session.self_peer_id.as_ref());
            let sent = tokio::time::timeout(
                self.config.signaling.ack_timeout(),
                self.channel.emit(EmitAction::PeerLeave.as_str(), leave),
            )
            .await;
            match sent {
                Ok(Ok(_)) => debug!("Leave acknowledged"),
                Ok(Err(e)) => warn!(error = %e, "Leave request failed"),
                Err(_) => warn!("Leave request timed out"),
            }
        }

        self.release_resources();
        self.cancel.cancel();
        self.channel.disconnect().await;

        self.set_state(EngineState::Left);
        self.notify(SessionEvent::Left);
    }

    fn release_resources(&mut self) {
        let mut closed = 0;
        for mut peer in self.registry.drain() {
            closed += peer.close_all().len();
        }
        self.session.close_local_producers();
        self.session.subscribed_video_peer_ids.clear();
        self.session.active_screen_share_peer_id = None;

        if let Some(send) = self.send_transport.take() {
            send.close();
        }
        if let Some(recv) = self.recv_transport.take() {
            recv.close();
        }
        self.quality.reset();
        self.supervisor.reset();

        if let Some(join) = self.join.take() {
            let _ = join.reply.send(Err(Error::SessionClosed));
        }
        for (_, waiters) in self.feed_waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(Error::SessionClosed));
            }
        }
        for (_, waiters) in self.produce_waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(Error::SessionClosed));
            }
        }

        debug!(consumers_closed = closed, "Session resources released");
    }
}
