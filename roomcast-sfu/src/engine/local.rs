//! Local media, messaging and link statistics

use super::feeds::respond;
use super::{AckRoute, Reply, SessionEvent, SignalingEngine};
use crate::channel::EmitAction;
use crate::error::{Error, Result};
use crate::network::{transport_statistics, NetworkClass};
use crate::protocol::{params, parse_produced_id};
use crate::quality::local_spatial_cap;
use crate::session::{EngineState, LocalProducer};
use crate::transport::{video_encodings, TransportRole};
use crate::types::{MediaKind, PeerId, ProducerId, QualityLevel};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

impl SignalingEngine {
    /// Publish, pause or resume a local feed
    pub(super) fn set_local_media(&mut self, kind: MediaKind, enabled: bool, reply: Option<Reply<()>>) {
        if let Err(e) = self.ensure_active("setLocalMedia") {
            respond(reply, Err(e));
            return;
        }

        let existing = self
            .session
            .local_producers
            .get(&kind)
            .map(|p| (p.server_id.clone(), p.enabled));

        match existing {
            None if !enabled => {
                debug!(kind = %kind, "Local media already off");
                respond(reply, Ok(()));
            }
            None => self.start_producer(kind, reply),
            Some((None, _)) => {
                // Applied once the produce ack names the producer
                if let Some(producer) = self.session.local_producers.get_mut(&kind) {
                    producer.enabled = enabled;
                }
                if let Some(reply) = reply {
                    self.produce_waiters.entry(kind).or_default().push(reply);
                }
            }
            Some((Some(_), current)) if current == enabled => respond(reply, Ok(())),
            Some((Some(server_id), _)) => {
                let outcome = self.toggle_producer(kind, &server_id, enabled);
                respond(reply, outcome);
            }
        }
    }

    /// Publish or withdraw the local screen share
    ///
    /// The share is closed on the server rather than paused.
    pub(super) fn set_screen_share(&mut self, enabled: bool, reply: Reply<()>) {
        let kind = MediaKind::ScreenShareVideo;
        let action = if enabled { "startScreenShare" } else { "stopScreenShare" };
        if let Err(e) = self.ensure_active(action) {
            let _ = reply.send(Err(e));
            return;
        }

        let existing = self
            .session
            .local_producers
            .get(&kind)
            .map(|p| p.server_id.clone());
        match existing {
            None if !enabled => {
                let _ = reply.send(Ok(()));
            }
            None => self.start_producer(kind, Some(reply)),
            Some(None) => {
                // Settled by the produce ack
                if let Some(producer) = self.session.local_producers.get_mut(&kind) {
                    producer.enabled = enabled;
                }
                self.produce_waiters.entry(kind).or_default().push(reply);
            }
            Some(Some(_)) if enabled => {
                let _ = reply.send(Ok(()));
            }
            Some(Some(server_id)) => {
                let _ = reply.send(self.close_producer(kind, &server_id));
            }
        }
    }

    fn close_producer(&mut self, kind: MediaKind, server_id: &ProducerId) -> Result<()> {
        if let Some(producer) = self.session.local_producers.remove(&kind) {
            producer.handle.close();
        }
        info!(kind = %kind, producer_id = %server_id, "Local media closed");
        self.emit(
            EmitAction::CloseProducer,
            params::producer(server_id),
            AckRoute::Ignore(EmitAction::CloseProducer),
        )
    }

    fn toggle_producer(&mut self, kind: MediaKind, server_id: &ProducerId, enabled: bool) -> Result<()> {
        let action = if enabled {
            EmitAction::ResumeProducer
        } else {
            EmitAction::PauseProducer
        };
        self.emit(action, params::producer(server_id), AckRoute::Ignore(action))?;

        if let Some(producer) = self.session.local_producers.get_mut(&kind) {
            if enabled {
                producer.handle.resume();
            } else {
                producer.handle.pause();
            }
            producer.enabled = enabled;
        }
        info!(kind = %kind, producer_id = %server_id, enabled, "Local media toggled");
        Ok(())
    }

    fn start_producer(&mut self, kind: MediaKind, reply: Option<Reply<()>>) {
        let Some(send) = self.send_transport.as_ref() else {
            respond(
                reply,
                Err(Error::TransportFailed {
                    role: TransportRole::Send,
                    reason: "send transport not ready".to_string(),
                }),
            );
            return;
        };

        let encodings = if kind == MediaKind::Video {
            video_encodings(self.session.hd_enabled)
        } else {
            Vec::new()
        };
        let handle = match send.produce(kind, &encodings) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Failed to create local producer");
                respond(
                    reply,
                    Err(Error::TransportFailed {
                        role: TransportRole::Send,
                        reason: e.to_string(),
                    }),
                );
                return;
            }
        };

        let params = params::produce(send.id(), kind, &handle.rtp_parameters());
        if let Err(e) = self.emit(EmitAction::Produce, params, AckRoute::Produce { kind }) {
            handle.close();
            respond(reply, Err(e));
            return;
        }

        info!(kind = %kind, encodings = encodings.len(), "Publishing local media");
        self.session.local_producers.insert(
            kind,
            LocalProducer {
                handle,
                server_id: None,
                enabled: true,
            },
        );
        if kind == MediaKind::Video {
            self.session.local_cap = None;
            self.apply_local_cap();
        }
        if let Some(reply) = reply {
            self.produce_waiters.entry(kind).or_default().push(reply);
        }
    }

    pub(super) fn on_produce_ack(&mut self, kind: MediaKind, result: Result<Value>) {
        let outcome = match result.and_then(|data| parse_produced_id(&data)) {
            Ok(server_id) => {
                let Some(producer) = self.session.local_producers.get_mut(&kind) else {
                    debug!(kind = %kind, "Produce ack for a closed producer");
                    return;
                };
                producer.server_id = Some(server_id.clone());
                let disabled = !producer.enabled;
                info!(kind = %kind, producer_id = %server_id, "Local media published");

                if disabled && kind.is_screen_share() {
                    self.close_producer(kind, &server_id)
                } else {
                    if disabled {
                        producer.handle.pause();
                        let _ = self.emit(
                            EmitAction::PauseProducer,
                            params::producer(&server_id),
                            AckRoute::Ignore(EmitAction::PauseProducer),
                        );
                    }
                    Ok(())
                }
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Produce request failed");
                if let Some(producer) = self.session.local_producers.remove(&kind) {
                    producer.handle.close();
                }
                if kind == MediaKind::Video {
                    self.session.local_cap = None;
                }
                Err(e)
            }
        };

        for waiter in self.produce_waiters.remove(&kind).unwrap_or_default() {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Limit the local camera to what the link and preference allow
    pub(super) fn apply_local_cap(&mut self) {
        let cap = local_spatial_cap(
            self.session.hd_enabled,
            self.session.network_class,
            self.session.local_quality,
        );
        if self.session.local_cap == Some(cap) {
            return;
        }
        let Some(producer) = self.session.local_producers.get(&MediaKind::Video) else {
            return;
        };

        match producer.handle.set_max_spatial_layer(cap.spatial_layer()) {
            Ok(()) => {
                debug!(
                    level = ?cap,
                    network = ?self.session.network_class,
                    "Local video spatial cap applied"
                );
                self.session.local_cap = Some(cap);
            }
            Err(e) => warn!(level = ?cap, error = %e, "Failed to cap local video"),
        }
    }

    pub(super) fn set_local_quality(&mut self, level: QualityLevel) {
        if self.session.local_quality == level {
            return;
        }
        info!(level = ?level, "Local video quality changed");
        self.session.local_quality = level;
        self.apply_local_cap();
    }

    pub(super) fn set_network_class(&mut self, class: NetworkClass) {
        if self.session.network_class == class {
            return;
        }
        info!(from = ?self.session.network_class, to = ?class, "Network class changed");
        self.session.network_class = class;
        self.apply_local_cap();
        self.recompute_quality();
    }

    /// Send an application message to the room, or to one peer
    pub(super) fn send_message(&mut self, target: Option<&PeerId>, message: Value) -> Result<()> {
        let action = if target.is_some() {
            EmitAction::BroadcastMessageToPeer
        } else {
            EmitAction::BroadcastMessage
        };
        self.ensure_active(action.as_str())?;

        let message = match (target, message) {
            (None, message) => message,
            (Some(peer_id), Value::Object(mut fields)) => {
                fields.insert("targetParticipantId".to_string(), json!(peer_id));
                Value::Object(fields)
            }
            (Some(peer_id), other) => json!({ "message": other, "targetParticipantId": peer_id }),
        };
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let params = params::broadcast(
            action.as_str(),
            self.session.self_peer_id.as_ref(),
            timestamp_ms,
            &message,
        );

        debug!(action = %action, target = ?target, "Sending message");
        self.emit(action, params, AckRoute::Ignore(action))
    }

    pub(super) fn poll_transport_stats(&mut self) {
        if self.state != EngineState::Joined || !self.session.is_connected() {
            return;
        }
        let (Some(send), Some(recv)) = (self.send_transport.as_ref(), self.recv_transport.as_ref()) else {
            return;
        };

        let ids = [send.id().clone(), recv.id().clone()];
        let params = params::transport_stats(self.session.self_peer_id.as_ref(), &ids);
        let _ = self.emit(EmitAction::GetTransportStats, params, AckRoute::TransportStats);
    }

    pub(super) fn on_transport_stats(&mut self, result: Result<Value>) {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                debug!(error = %e, "Transport stats unavailable");
                return;
            }
        };
        let (Some(send), Some(recv)) = (self.send_transport.as_ref(), self.recv_transport.as_ref()) else {
            return;
        };

        match transport_statistics(&data, send.id(), recv.id()) {
            Some(stats) => {
                debug!(
                    network_quality = stats.network_quality,
                    local_packet_loss = stats.local_packet_loss,
                    remote_packet_loss = stats.remote_packet_loss,
                    "Transport statistics"
                );
                self.notify(SessionEvent::NetworkStatistics(stats));
            }
            None => debug!("Transport statistics incomplete"),
        }
    }
}
