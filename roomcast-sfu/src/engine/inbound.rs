//! Server event handling

use super::{SessionEvent, SignalingEngine};
use crate::channel::ChannelEvent;
use crate::network::classify_score;
use crate::protocol::{InboundEvent, PeerInfo, ProducerChange, ProducerUpdate};
use crate::registry::ProducerRef;
use crate::session::EngineState;
use crate::types::{LeaveReason, MediaKind, PeerId};
use tracing::{debug, info, warn};

impl SignalingEngine {
    pub(super) fn on_event(&mut self, event: ChannelEvent) {
        let parsed = match InboundEvent::parse(&event) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                debug!(event = %event.name, "Ignoring unhandled event");
                return;
            }
            Err(e) => {
                warn!(event = %event.name, error = %e, "Dropping malformed event");
                return;
            }
        };

        match parsed {
            InboundEvent::ServerHello(hello) => self.on_server_hello(hello),
            InboundEvent::SelfPeer(peer_id) => {
                debug!(peer_id = %peer_id, "Local peer id assigned");
                self.session.self_peer_id = Some(peer_id);
            }
            InboundEvent::PeerJoined(info) => self.on_peer_joined(&info),
            InboundEvent::PeerLeft { peer_id, reason } => self.on_peer_left(&peer_id, reason),
            InboundEvent::Producer { change, update } => self.on_producer(change, update),
            InboundEvent::Score {
                peer_id,
                kind,
                score,
            } => {
                let quality = classify_score(score, self.config.quality.score_cutoff);
                debug!(peer_id = %peer_id, kind = %kind, score, quality = ?quality, "Producer score");
                self.notify(SessionEvent::RemoteQualityChanged {
                    peer_id,
                    kind,
                    quality,
                });
            }
            InboundEvent::AudioLevels(levels) => self.notify(SessionEvent::ActiveSpeakers(levels)),
            InboundEvent::Message { scope, message } => {
                self.notify(SessionEvent::BroadcastMessage { scope, message });
            }
            InboundEvent::LayersChanged(payload) => {
                debug!(payload = %payload, "Consumer layers changed");
            }
            InboundEvent::MissedEvents(events) => self.on_missed_events(events),
        }
    }

    /// Queue events missed while offline; they run before any later live event
    pub(super) fn on_missed_events(&mut self, events: Vec<ChannelEvent>) {
        info!(count = events.len(), "Received missed events");
        self.supervisor.enqueue_replay(events);
        if matches!(self.state, EngineState::Joined | EngineState::Reconnecting) {
            self.drain_replay();
        }
    }

    pub(super) fn drain_replay(&mut self) {
        while let Some(event) = self.supervisor.next_replay() {
            debug!(event = %event.name, "Replaying missed event");
            self.on_event(event);
        }
    }

    pub(super) fn on_peer_joined(&mut self, info: &PeerInfo) {
        if self.session.self_peer_id.as_ref() == Some(&info.peer_id) {
            return;
        }

        let is_new = self
            .registry
            .upsert(info, self.config.quality.default_peer_quality);
        if is_new {
            info!(
                peer_id = %info.peer_id,
                display_name = %info.display_name,
                producers = info.producers.len(),
                "Peer joined"
            );
            self.notify(SessionEvent::PeerJoined {
                peer_id: info.peer_id.clone(),
                display_name: info.display_name.clone(),
            });
        }

        for producer in &info.producers {
            self.close_stale_consumer(&info.peer_id, producer.kind);
            self.set_publish_state(&info.peer_id, producer.kind, !producer.paused);
            if producer.kind == MediaKind::ScreenShareVideo
                && !producer.paused
                && self.session.set_screen_share(&info.peer_id)
            {
                self.recompute_quality();
            }
        }
        for producer in &info.producers {
            if !producer.paused && self.wants(&info.peer_id, producer.kind) {
                self.run_feed(&info.peer_id, producer.kind, true, None);
            }
        }
    }

    fn on_peer_left(&mut self, peer_id: &PeerId, reason: LeaveReason) {
        let Some(mut peer) = self.registry.remove(peer_id) else {
            debug!(peer_id = %peer_id, "Unknown peer left");
            return;
        };

        for consumer_id in peer.close_all() {
            self.quality.forget(&consumer_id);
        }
        self.fail_peer_waiters(peer_id);
        self.session.forget_peer(peer_id);

        info!(peer_id = %peer_id, reason = ?reason, "Peer left");
        self.notify(SessionEvent::PeerLeft {
            peer_id: peer_id.clone(),
            reason,
        });
        self.recompute_quality();
    }

    fn on_producer(&mut self, change: ProducerChange, update: ProducerUpdate) {
        let ProducerUpdate {
            peer_id,
            producer_id,
            kind,
        } = update;

        let Some(peer) = self.registry.get_mut(&peer_id) else {
            debug!(peer_id = %peer_id, kind = %kind, change = ?change, "Producer event for unknown peer");
            return;
        };
        debug!(peer_id = %peer_id, kind = %kind, producer_id = %producer_id, change = ?change, "Producer event");

        match change {
            ProducerChange::Published => {
                peer.set_producer(ProducerRef {
                    kind,
                    producer_id,
                    paused: false,
                });
                self.close_stale_consumer(&peer_id, kind);
                self.set_publish_state(&peer_id, kind, true);
                if kind == MediaKind::ScreenShareVideo && self.session.set_screen_share(&peer_id) {
                    self.recompute_quality();
                }
                if self.wants(&peer_id, kind) {
                    self.run_feed(&peer_id, kind, true, None);
                }
            }
            ProducerChange::Unpublished => {
                if peer.remove_producer(kind, &producer_id).is_none() {
                    debug!(peer_id = %peer_id, kind = %kind, "Ignoring end of unknown producer");
                    return;
                }
                if let Some(consumer) = peer.take_consumer(kind) {
                    consumer.close();
                    self.quality.forget(consumer.id());
                }
                self.set_publish_state(&peer_id, kind, false);
                if kind == MediaKind::ScreenShareVideo {
                    self.session.clear_screen_share(&peer_id);
                }
                if kind.is_video() {
                    self.recompute_quality();
                }
            }
            ProducerChange::Paused => {
                if !peer.set_producer_paused(kind, &producer_id, true) {
                    debug!(peer_id = %peer_id, kind = %kind, "Ignoring pause of unknown producer");
                    return;
                }
                if let Some(consumer) = peer.consumer(kind).filter(|c| !c.is_paused()) {
                    consumer.pause();
                }
                self.set_publish_state(&peer_id, kind, false);
                if kind == MediaKind::ScreenShareVideo && self.session.clear_screen_share(&peer_id) {
                    self.recompute_quality();
                }
            }
            ProducerChange::Resumed => {
                if !peer.set_producer_paused(kind, &producer_id, false) {
                    debug!(peer_id = %peer_id, kind = %kind, "Ignoring resume of unknown producer");
                    return;
                }
                self.set_publish_state(&peer_id, kind, true);
                if kind == MediaKind::ScreenShareVideo && self.session.set_screen_share(&peer_id) {
                    self.recompute_quality();
                }
                if self.wants(&peer_id, kind) {
                    self.run_feed(&peer_id, kind, true, None);
                }
            }
        }
    }

    /// Record the publish state of a remote feed, notifying on transitions
    fn set_publish_state(&mut self, peer_id: &PeerId, kind: MediaKind, enabled: bool) {
        let Some(peer) = self.registry.get_mut(peer_id) else {
            return;
        };
        if !peer.set_media_enabled(kind, enabled) {
            return;
        }

        let peer_id = peer_id.clone();
        if enabled {
            self.notify(SessionEvent::PeerMediaPublished { peer_id, kind });
        } else {
            self.notify(SessionEvent::PeerMediaUnpublished { peer_id, kind });
        }
    }

    /// Close a consumer still bound to a producer the peer replaced
    fn close_stale_consumer(&mut self, peer_id: &PeerId, kind: MediaKind) {
        let Some(peer) = self.registry.get_mut(peer_id) else {
            return;
        };
        let current = peer.producer(kind).map(|p| p.producer_id.clone());
        let stale = peer
            .consumer(kind)
            .is_some_and(|c| Some(c.producer_id()) != current.as_ref());
        if !stale {
            return;
        }

        if let Some(consumer) = peer.take_consumer(kind) {
            debug!(peer_id = %peer_id, kind = %kind, consumer_id = %consumer.id(), "Closing stale consumer");
            consumer.close();
            self.quality.forget(consumer.id());
        }
    }
}
