//! Remote participant registry
//!
//! The registry is an insertion-ordered arena of [`Peer`] records keyed by
//! peer id. It is owned by the engine and only mutated from its serial queue;
//! every other component refers to peers by id.

use crate::protocol::PeerInfo;
use crate::transport::ConsumerHandle;
use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId, QualityLevel};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A producer announced by a remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRef {
    pub kind: MediaKind,
    pub producer_id: ProducerId,
    pub paused: bool,
}

/// Kinds received without an explicit subscribe
const DEFAULT_SUBSCRIPTIONS: [MediaKind; 3] = [
    MediaKind::Audio,
    MediaKind::ScreenShareVideo,
    MediaKind::ScreenShareAudio,
];

/// One remote participant
pub struct Peer {
    pub peer_id: PeerId,
    pub display_name: String,
    producers: Vec<ProducerRef>,
    consumers: HashMap<MediaKind, Box<dyn ConsumerHandle>>,
    pending: HashSet<MediaKind>,
    media_enabled: HashMap<MediaKind, bool>,
    preferred_quality: QualityLevel,
    /// Non-video kinds the application wants to receive. Video intent is
    /// tracked per session.
    subscriptions: HashSet<MediaKind>,
}

impl Peer {
    pub fn new(peer_id: PeerId, display_name: String, preferred_quality: QualityLevel) -> Self {
        Self {
            peer_id,
            display_name,
            producers: Vec::new(),
            consumers: HashMap::new(),
            pending: HashSet::new(),
            media_enabled: HashMap::new(),
            preferred_quality,
            subscriptions: DEFAULT_SUBSCRIPTIONS.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn producers(&self) -> &[ProducerRef] {
        &self.producers
    }

    #[must_use]
    pub fn producer(&self, kind: MediaKind) -> Option<&ProducerRef> {
        self.producers.iter().find(|p| p.kind == kind)
    }

    /// Replace the producer for `producer.kind`, returning the previous one
    pub fn set_producer(&mut self, producer: ProducerRef) -> Option<ProducerRef> {
        match self.producers.iter_mut().find(|p| p.kind == producer.kind) {
            Some(slot) => Some(std::mem::replace(slot, producer)),
            None => {
                self.producers.push(producer);
                None
            }
        }
    }

    /// Remove the producer of `kind` if its id matches
    pub fn remove_producer(&mut self, kind: MediaKind, producer_id: &ProducerId) -> Option<ProducerRef> {
        let index = self
            .producers
            .iter()
            .position(|p| p.kind == kind && &p.producer_id == producer_id)?;
        Some(self.producers.remove(index))
    }

    /// Set the paused flag of the producer of `kind` if its id matches
    pub fn set_producer_paused(&mut self, kind: MediaKind, producer_id: &ProducerId, paused: bool) -> bool {
        match self
            .producers
            .iter_mut()
            .find(|p| p.kind == kind && &p.producer_id == producer_id)
        {
            Some(producer) => {
                producer.paused = paused;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn consumer(&self, kind: MediaKind) -> Option<&dyn ConsumerHandle> {
        self.consumers.get(&kind).map(|c| &**c)
    }

    /// Iterate held consumers
    pub fn consumers(&self) -> impl Iterator<Item = (MediaKind, &dyn ConsumerHandle)> {
        self.consumers.iter().map(|(kind, c)| (*kind, &**c))
    }

    #[must_use]
    pub fn is_pending(&self, kind: MediaKind) -> bool {
        self.pending.contains(&kind)
    }

    /// Mark a consume request as in flight
    ///
    /// Refused while a request is already pending or a consumer is held.
    pub fn mark_pending(&mut self, kind: MediaKind) -> bool {
        if self.consumers.contains_key(&kind) {
            return false;
        }
        self.pending.insert(kind)
    }

    pub fn clear_pending(&mut self, kind: MediaKind) -> bool {
        self.pending.remove(&kind)
    }

    /// Store a newly created consumer, clearing the pending flag
    ///
    /// Returns the consumer it replaced, which the caller must close.
    pub fn attach_consumer(
        &mut self,
        kind: MediaKind,
        consumer: Box<dyn ConsumerHandle>,
    ) -> Option<Box<dyn ConsumerHandle>> {
        self.pending.remove(&kind);
        self.consumers.insert(kind, consumer)
    }

    /// Detach the consumer of `kind` without closing it
    pub fn take_consumer(&mut self, kind: MediaKind) -> Option<Box<dyn ConsumerHandle>> {
        self.consumers.remove(&kind)
    }

    /// Close every consumer and forget in-flight requests
    ///
    /// Returns the ids of the closed consumers.
    pub fn close_all(&mut self) -> Vec<ConsumerId> {
        self.pending.clear();
        self.consumers
            .drain()
            .map(|(_, consumer)| {
                consumer.close();
                consumer.id().clone()
            })
            .collect()
    }

    #[must_use]
    pub fn is_media_enabled(&self, kind: MediaKind) -> bool {
        self.media_enabled.get(&kind).copied().unwrap_or(false)
    }

    /// Record the publish state of `kind`; returns true on a transition
    pub fn set_media_enabled(&mut self, kind: MediaKind, enabled: bool) -> bool {
        let previous = self.media_enabled.insert(kind, enabled).unwrap_or(false);
        previous != enabled
    }

    #[must_use]
    pub const fn preferred_quality(&self) -> QualityLevel {
        self.preferred_quality
    }

    pub fn set_preferred_quality(&mut self, level: QualityLevel) {
        self.preferred_quality = level;
    }

    #[must_use]
    pub fn is_subscribed(&self, kind: MediaKind) -> bool {
        self.subscriptions.contains(&kind)
    }

    pub fn set_subscribed(&mut self, kind: MediaKind, subscribed: bool) {
        if subscribed {
            self.subscriptions.insert(kind);
        } else {
            self.subscriptions.remove(&kind);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PeerSnapshot {
        let mut consumers: Vec<ConsumerSnapshot> = self
            .consumers
            .iter()
            .map(|(kind, c)| ConsumerSnapshot {
                kind: *kind,
                consumer_id: c.id().clone(),
                producer_id: c.producer_id().clone(),
                paused: c.is_paused(),
            })
            .collect();
        consumers.sort_by_key(|c| c.kind);

        let mut pending: Vec<MediaKind> = self.pending.iter().copied().collect();
        pending.sort();

        let mut media_enabled: Vec<MediaKind> = self
            .media_enabled
            .iter()
            .filter_map(|(kind, enabled)| enabled.then_some(*kind))
            .collect();
        media_enabled.sort();

        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            display_name: self.display_name.clone(),
            producers: self.producers.clone(),
            consumers,
            pending,
            media_enabled,
            preferred_quality: self.preferred_quality,
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("peer_id", &self.peer_id)
            .field("display_name", &self.display_name)
            .field("producers", &self.producers)
            .field("consumers", &self.consumers.keys().collect::<Vec<_>>())
            .field("pending", &self.pending)
            .field("preferred_quality", &self.preferred_quality)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a held consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSnapshot {
    pub kind: MediaKind,
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub paused: bool,
}

/// Read-only view of a peer handed to the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub peer_id: PeerId,
    pub display_name: String,
    pub producers: Vec<ProducerRef>,
    pub consumers: Vec<ConsumerSnapshot>,
    pub pending: Vec<MediaKind>,
    pub media_enabled: Vec<MediaKind>,
    pub preferred_quality: QualityLevel,
}

impl PeerSnapshot {
    #[must_use]
    pub fn consumer(&self, kind: MediaKind) -> Option<&ConsumerSnapshot> {
        self.consumers.iter().find(|c| c.kind == kind)
    }
}

/// Arena of remote peers
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: IndexMap<PeerId, Peer>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer from a roster entry or `newPeer` event
    ///
    /// A peer that is already known keeps its consumers; its display name and
    /// announced producers are refreshed. Returns true if the peer is new.
    pub fn upsert(&mut self, info: &PeerInfo, preferred_quality: QualityLevel) -> bool {
        let is_new = !self.peers.contains_key(&info.peer_id);
        let peer = self.peers.entry(info.peer_id.clone()).or_insert_with(|| {
            Peer::new(info.peer_id.clone(), info.display_name.clone(), preferred_quality)
        });

        if !info.display_name.is_empty() {
            peer.display_name.clone_from(&info.display_name);
        }
        for producer in &info.producers {
            peer.set_producer(producer.clone());
        }
        is_new
    }

    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(peer_id)
    }

    #[must_use]
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Remove a peer, keeping the order of the others
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Peer> {
        self.peers.shift_remove(peer_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Number of held plain video consumers
    #[must_use]
    pub fn video_consumer_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.consumers.contains_key(&MediaKind::Video))
            .count()
    }

    /// Remove every peer, in roster order
    pub fn drain(&mut self) -> Vec<Peer> {
        self.peers.drain(..).map(|(_, peer)| peer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FakeConsumer {
        id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
        closed: Arc<Mutex<bool>>,
    }

    impl ConsumerHandle for FakeConsumer {
        fn id(&self) -> &ConsumerId {
            &self.id
        }
        fn producer_id(&self) -> &ProducerId {
            &self.producer_id
        }
        fn kind(&self) -> MediaKind {
            self.kind
        }
        fn is_paused(&self) -> bool {
            false
        }
        fn resume(&self) {}
        fn pause(&self) {}
        fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    fn info(id: &str, producers: Vec<ProducerRef>) -> PeerInfo {
        PeerInfo {
            peer_id: PeerId::from(id),
            display_name: id.to_uppercase(),
            producers,
        }
    }

    fn audio(id: &str) -> ProducerRef {
        ProducerRef {
            kind: MediaKind::Audio,
            producer_id: ProducerId::from(id),
            paused: false,
        }
    }

    #[test]
    fn test_pending_and_consumer_are_exclusive() {
        let mut peer = Peer::new(PeerId::from("u1"), String::new(), QualityLevel::High);
        assert!(peer.mark_pending(MediaKind::Audio));
        assert!(!peer.mark_pending(MediaKind::Audio));

        let closed = Arc::new(Mutex::new(false));
        peer.attach_consumer(
            MediaKind::Audio,
            Box::new(FakeConsumer {
                id: ConsumerId::from("c1"),
                producer_id: ProducerId::from("p1"),
                kind: MediaKind::Audio,
                closed: closed.clone(),
            }),
        );
        assert!(!peer.is_pending(MediaKind::Audio));
        assert!(!peer.mark_pending(MediaKind::Audio));

        assert_eq!(peer.close_all(), vec![ConsumerId::from("c1")]);
        assert!(*closed.lock());
        assert!(peer.consumer(MediaKind::Audio).is_none());
    }

    #[test]
    fn test_producer_replaced_wholesale() {
        let mut peer = Peer::new(PeerId::from("u1"), String::new(), QualityLevel::High);
        assert!(peer.set_producer(audio("p1")).is_none());
        let old = peer.set_producer(audio("p2")).unwrap();
        assert_eq!(old.producer_id, ProducerId::from("p1"));
        assert_eq!(peer.producers().len(), 1);

        // Stale id does not match
        assert!(peer.remove_producer(MediaKind::Audio, &ProducerId::from("p1")).is_none());
        assert!(peer.remove_producer(MediaKind::Audio, &ProducerId::from("p2")).is_some());
    }

    #[test]
    fn test_media_enabled_transitions() {
        let mut peer = Peer::new(PeerId::from("u1"), String::new(), QualityLevel::High);
        assert!(peer.set_media_enabled(MediaKind::Video, true));
        assert!(!peer.set_media_enabled(MediaKind::Video, true));
        assert!(peer.set_media_enabled(MediaKind::Video, false));
        assert!(!peer.set_media_enabled(MediaKind::Audio, false));
    }

    #[test]
    fn test_default_subscriptions() {
        let peer = Peer::new(PeerId::from("u1"), String::new(), QualityLevel::High);
        assert!(peer.is_subscribed(MediaKind::Audio));
        assert!(peer.is_subscribed(MediaKind::ScreenShareVideo));
        assert!(!peer.is_subscribed(MediaKind::Video));
    }

    #[test]
    fn test_registry_keeps_roster_order() {
        let mut registry = PeerRegistry::new();
        assert!(registry.upsert(&info("b", vec![]), QualityLevel::High));
        assert!(registry.upsert(&info("a", vec![audio("pa")]), QualityLevel::High));
        assert!(registry.upsert(&info("c", vec![]), QualityLevel::High));
        assert!(!registry.upsert(&info("a", vec![]), QualityLevel::Low));

        registry.remove(&PeerId::from("b"));
        let ids: Vec<_> = registry.iter().map(|p| p.peer_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        // Re-announcement keeps known producers
        assert!(registry.get(&PeerId::from("a")).unwrap().producer(MediaKind::Audio).is_some());
    }
}
