//! Remote feed subscription and quality steering

use super::{AckRoute, Reply, SignalingEngine};
use crate::channel::EmitAction;
use crate::error::{Error, Result};
use crate::protocol::{params, ConsumerReady};
use crate::quality::{QualityCommand, QualityInputs, VideoConsumer};
use crate::subscription::{decide_feed, plan_audio_only, FeedDecision};
use crate::types::{MediaKind, PeerId, ProducerId, QualityLevel};
use serde_json::Value;
use tracing::{debug, info, warn};

pub(super) fn respond(reply: Option<Reply<()>>, outcome: Result<()>) {
    if let Some(reply) = reply {
        let _ = reply.send(outcome);
    }
}

impl SignalingEngine {
    /// Whether the application wants to receive `kind` from `peer_id`
    pub(super) fn wants(&self, peer_id: &PeerId, kind: MediaKind) -> bool {
        if kind == MediaKind::Video {
            return self.session.is_video_subscribed(peer_id);
        }
        self.registry
            .get(peer_id)
            .is_some_and(|peer| peer.is_subscribed(kind))
    }

    pub(super) fn subscribe_feed(&mut self, subscribe: bool, peer_id: &PeerId, kind: MediaKind, reply: Reply<()>) {
        if let Err(e) = self.ensure_active("subscribeFeed") {
            let _ = reply.send(Err(e));
            return;
        }

        if kind == MediaKind::Video {
            if subscribe {
                self.session.subscribed_video_peer_ids.insert(peer_id.clone());
            } else {
                self.session.subscribed_video_peer_ids.remove(peer_id);
            }
        } else if let Some(peer) = self.registry.get_mut(peer_id) {
            peer.set_subscribed(kind, subscribe);
        }

        self.run_feed(peer_id, kind, subscribe, Some(reply));
    }

    /// Bring one feed to the requested state
    pub(super) fn run_feed(&mut self, peer_id: &PeerId, kind: MediaKind, subscribe: bool, reply: Option<Reply<()>>) {
        let decision = decide_feed(&self.registry, peer_id, kind, subscribe);
        debug!(peer_id = %peer_id, kind = %kind, subscribe, decision = ?decision, "Feed decision");

        let outcome = match decision {
            FeedDecision::PeerUnknown => {
                debug!(peer_id = %peer_id, kind = %kind, "Peer not known yet");
                Ok(())
            }
            FeedDecision::ProducerPaused | FeedDecision::AlreadyResumed | FeedDecision::NothingToPause => Ok(()),
            FeedDecision::NoProducer => Err(Error::ProducerUnavailable {
                peer_id: peer_id.clone(),
                kind,
            }),
            FeedDecision::Resume { consumer_id } => self
                .emit(
                    EmitAction::ResumeConsumer,
                    params::consumer(&consumer_id),
                    AckRoute::Ignore(EmitAction::ResumeConsumer),
                )
                .map(|()| {
                    if let Some(consumer) = self.registry.get(peer_id).and_then(|p| p.consumer(kind)) {
                        consumer.resume();
                    }
                }),
            FeedDecision::Pause { consumer_id } => self
                .emit(
                    EmitAction::PauseConsumer,
                    params::consumer(&consumer_id),
                    AckRoute::Ignore(EmitAction::PauseConsumer),
                )
                .map(|()| {
                    if let Some(consumer) = self.registry.get(peer_id).and_then(|p| p.consumer(kind)) {
                        consumer.pause();
                    }
                }),
            FeedDecision::Consume { producer_id, stale } => {
                if stale {
                    self.close_consumer(peer_id, kind);
                }
                self.request_consume(peer_id, kind, producer_id, reply);
                return;
            }
            FeedDecision::ConsumePending => {
                if let Some(reply) = reply {
                    self.feed_waiters
                        .entry((peer_id.clone(), kind))
                        .or_default()
                        .push(reply);
                }
                return;
            }
        };

        respond(reply, outcome);
    }

    fn close_consumer(&mut self, peer_id: &PeerId, kind: MediaKind) {
        let Some(consumer) = self
            .registry
            .get_mut(peer_id)
            .and_then(|peer| peer.take_consumer(kind))
        else {
            return;
        };
        consumer.close();
        self.quality.forget(consumer.id());
    }

    fn request_consume(&mut self, peer_id: &PeerId, kind: MediaKind, producer_id: ProducerId, reply: Option<Reply<()>>) {
        let Some(peer) = self.registry.get_mut(peer_id) else {
            respond(reply, Ok(()));
            return;
        };
        if !peer.mark_pending(kind) {
            if let Some(reply) = reply {
                self.feed_waiters
                    .entry((peer_id.clone(), kind))
                    .or_default()
                    .push(reply);
            }
            return;
        }

        let params = params::consume(peer_id, &producer_id);
        let route = AckRoute::Consume {
            peer_id: peer_id.clone(),
            kind,
            producer_id: producer_id.clone(),
        };
        match self.emit(EmitAction::Consume, params, route) {
            Ok(()) => {
                info!(peer_id = %peer_id, kind = %kind, producer_id = %producer_id, "Requested consumer");
                if let Some(reply) = reply {
                    self.feed_waiters
                        .entry((peer_id.clone(), kind))
                        .or_default()
                        .push(reply);
                }
            }
            Err(e) => {
                if let Some(peer) = self.registry.get_mut(peer_id) {
                    peer.clear_pending(kind);
                }
                respond(reply, Err(e));
            }
        }
    }

    pub(super) fn on_consume_ack(
        &mut self,
        peer_id: &PeerId,
        kind: MediaKind,
        producer_id: &ProducerId,
        result: Result<Value>,
    ) {
        let outcome = result
            .and_then(|data| ConsumerReady::parse(&data))
            .and_then(|ready| self.on_consumer_ready(peer_id, kind, ready));

        let outcome = match outcome {
            Ok(false) => return,
            Ok(true) => Ok(()),
            Err(e) => {
                if let Some(peer) = self.registry.get_mut(peer_id) {
                    peer.clear_pending(kind);
                }
                warn!(
                    peer_id = %peer_id,
                    kind = %kind,
                    producer_id = %producer_id,
                    error = %e,
                    "Consume failed"
                );
                if self.retry_if_republished(peer_id, kind, producer_id) {
                    return;
                }
                Err(match e {
                    Error::AckRejected { reason, .. } | Error::MalformedEvent { reason, .. } => {
                        Error::ConsumeFailed {
                            peer_id: peer_id.clone(),
                            kind,
                            reason,
                        }
                    }
                    other => other,
                })
            }
        };

        for waiter in self
            .feed_waiters
            .remove(&(peer_id.clone(), kind))
            .unwrap_or_default()
        {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Re-run a wanted feed whose producer changed while a consume was in
    /// flight. Returns true if a new request is now pending.
    fn retry_if_republished(&mut self, peer_id: &PeerId, kind: MediaKind, requested: &ProducerId) -> bool {
        let republished = self
            .registry
            .get(peer_id)
            .and_then(|peer| peer.producer(kind))
            .is_some_and(|p| &p.producer_id != requested);
        if !republished || !self.wants(peer_id, kind) {
            return false;
        }

        self.run_feed(peer_id, kind, true, None);
        self.registry
            .get(peer_id)
            .is_some_and(|p| p.is_pending(kind))
    }

    /// Bind a consumer the server created for us
    ///
    /// Returns false when a fresh consume request replaced this one.
    fn on_consumer_ready(&mut self, peer_id: &PeerId, kind: MediaKind, ready: ConsumerReady) -> Result<bool> {
        if ready.kind != kind || &ready.peer_id != peer_id {
            return Err(Error::malformed("consume", "consumer does not match the request"));
        }
        let Some(peer) = self.registry.get_mut(peer_id) else {
            debug!(peer_id = %peer_id, kind = %kind, "Consumer ready for departed peer");
            return Ok(true);
        };
        peer.clear_pending(kind);

        let current = peer
            .producer(kind)
            .filter(|p| p.producer_id == ready.producer_id)
            .map(|p| p.paused);
        let Some(producer_paused) = current else {
            debug!(
                peer_id = %peer_id,
                kind = %kind,
                producer_id = %ready.producer_id,
                "Dropping consumer for stale producer"
            );
            return Ok(!self.retry_if_republished(peer_id, kind, &ready.producer_id));
        };

        let receiver = self.recv_transport.as_ref().ok_or_else(|| Error::ConsumeFailed {
            peer_id: peer_id.clone(),
            kind,
            reason: "receive transport not ready".to_string(),
        })?;
        let consumer = receiver
            .consume(ready.consume_params())
            .map_err(|e| Error::ConsumeFailed {
                peer_id: peer_id.clone(),
                kind,
                reason: e.to_string(),
            })?;

        let wanted = !producer_paused && self.wants(peer_id, kind);
        if wanted {
            consumer.resume();
        } else {
            consumer.pause();
        }
        let consumer_id = consumer.id().clone();

        if let Some(previous) = self
            .registry
            .get_mut(peer_id)
            .and_then(|peer| peer.attach_consumer(kind, consumer))
        {
            previous.close();
            self.quality.forget(previous.id());
        }
        info!(
            peer_id = %peer_id,
            kind = %kind,
            consumer_id = %consumer_id,
            resumed = wanted,
            "Consumer ready"
        );

        if wanted {
            let _ = self.emit(
                EmitAction::ResumeConsumer,
                params::consumer(&consumer_id),
                AckRoute::Ignore(EmitAction::ResumeConsumer),
            );
        }
        if kind == MediaKind::ScreenShareVideo && !producer_paused {
            self.session.set_screen_share(peer_id);
        }
        if kind.is_video() {
            self.recompute_quality();
        }
        Ok(true)
    }

    /// Request wanted feeds left without a consumer, such as those whose
    /// consume was dropped during an outage
    pub(super) fn resubscribe_missing(&mut self) {
        let missing: Vec<(PeerId, MediaKind)> = self
            .registry
            .iter()
            .flat_map(|peer| {
                peer.producers()
                    .iter()
                    .filter(move |p| !p.paused && peer.consumer(p.kind).is_none() && !peer.is_pending(p.kind))
                    .map(move |p| (peer.peer_id.clone(), p.kind))
            })
            .collect();

        for (peer_id, kind) in missing {
            if self.wants(&peer_id, kind) {
                debug!(peer_id = %peer_id, kind = %kind, "Resubscribing feed");
                self.run_feed(&peer_id, kind, true, None);
            }
        }
    }

    /// Answer callers waiting on feeds of a departed peer
    pub(super) fn fail_peer_waiters(&mut self, peer_id: &PeerId) {
        let keys: Vec<_> = self
            .feed_waiters
            .keys()
            .filter(|(p, _)| p == peer_id)
            .cloned()
            .collect();

        for key in keys {
            let kind = key.1;
            for waiter in self.feed_waiters.remove(&key).unwrap_or_default() {
                let _ = waiter.send(Err(Error::ConsumeFailed {
                    peer_id: peer_id.clone(),
                    kind,
                    reason: "peer left".to_string(),
                }));
            }
        }
    }

    /// Push layer and priority preferences that changed
    pub(super) fn recompute_quality(&mut self) {
        if !self.session.is_connected() {
            return;
        }

        let consumers: Vec<VideoConsumer> = self
            .registry
            .iter()
            .flat_map(|peer| {
                peer.consumers()
                    .filter(|(kind, _)| kind.is_video())
                    .map(move |(kind, consumer)| VideoConsumer {
                        peer_id: peer.peer_id.clone(),
                        consumer_id: consumer.id().clone(),
                        kind,
                        preferred: peer.preferred_quality(),
                    })
            })
            .collect();
        let inputs = QualityInputs {
            hd_enabled: self.session.hd_enabled,
            screen_share_active: self.session.active_screen_share_peer_id.is_some(),
        };

        let commands = self.quality.plan(inputs, &consumers);
        if !commands.is_empty() {
            debug!(
                video_consumers = self.registry.video_consumer_count(),
                screen_share = inputs.screen_share_active,
                commands = commands.len(),
                "Updating consumer preferences"
            );
        }

        for command in commands {
            let (action, params) = match &command {
                QualityCommand::SetLayers {
                    consumer_id,
                    spatial,
                    temporal,
                } => (
                    EmitAction::SetConsumerPreferredLayers,
                    params::preferred_layers(consumer_id, *spatial, *temporal),
                ),
                QualityCommand::SetPriority {
                    consumer_ids,
                    priority,
                } => (
                    EmitAction::SetConsumersPriorities,
                    params::priorities(consumer_ids, *priority),
                ),
            };
            if self.emit(action, params, AckRoute::Ignore(action)).is_ok() {
                self.quality.mark_sent(&command);
            }
        }
    }

    pub(super) fn set_audio_only(&mut self, enabled: bool, peer_ids: &[PeerId]) -> Result<()> {
        self.ensure_active("setAudioOnlyMode")?;

        let plan = plan_audio_only(enabled, &self.session.subscribed_video_peer_ids, peer_ids);
        info!(
            enabled,
            unsubscribe = plan.unsubscribe.len(),
            subscribe = plan.subscribe.len(),
            "Audio-only mode changed"
        );
        self.session.audio_only = enabled;

        for peer_id in &plan.unsubscribe {
            self.session.subscribed_video_peer_ids.remove(peer_id);
            self.run_feed(peer_id, MediaKind::Video, false, None);
        }
        for peer_id in &plan.subscribe {
            self.session.subscribed_video_peer_ids.insert(peer_id.clone());
            self.run_feed(peer_id, MediaKind::Video, true, None);
        }
        Ok(())
    }

    pub(super) fn set_preferred_quality(&mut self, peer_id: &PeerId, level: QualityLevel) -> Result<()> {
        self.ensure_active("setPreferredQuality")?;

        match self.registry.get_mut(peer_id) {
            Some(peer) => {
                info!(peer_id = %peer_id, level = ?level, "Preferred quality changed");
                peer.set_preferred_quality(level);
                self.recompute_quality();
            }
            None => debug!(peer_id = %peer_id, "Preferred quality for unknown peer"),
        }
        Ok(())
    }
}
