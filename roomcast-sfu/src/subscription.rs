//! Feed subscription decisions
//!
//! Everything here is a pure function of the registry. The engine applies the
//! returned decision, which keeps the registry single-writer. At most one
//! consume request per (peer, kind) is ever in flight: a second subscribe while
//! one is pending yields [`FeedDecision::ConsumePending`].

use crate::registry::PeerRegistry;
use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId};
use std::collections::BTreeSet;

/// What the engine should do for one `subscribe_feed` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedDecision {
    /// Peer not known yet (signaling race)
    PeerUnknown,
    /// Peer offers nothing of this kind
    NoProducer,
    /// Deferred until the producer resumes
    ProducerPaused,
    AlreadyResumed,
    Resume { consumer_id: ConsumerId },
    /// Send a consume request. `stale` is set when a consumer bound to an
    /// older producer must be closed first.
    Consume { producer_id: ProducerId, stale: bool },
    ConsumePending,
    Pause { consumer_id: ConsumerId },
    NothingToPause,
}

/// Decide how to bring the feed `(peer_id, kind)` to the requested state
#[must_use]
pub fn decide_feed(
    registry: &PeerRegistry,
    peer_id: &PeerId,
    kind: MediaKind,
    subscribe: bool,
) -> FeedDecision {
    let Some(peer) = registry.get(peer_id) else {
        return FeedDecision::PeerUnknown;
    };
    let Some(producer) = peer.producer(kind) else {
        return FeedDecision::NoProducer;
    };
    let consumer = peer.consumer(kind);

    if !subscribe {
        return match consumer {
            Some(c) if !c.is_paused() => FeedDecision::Pause {
                consumer_id: c.id().clone(),
            },
            _ => FeedDecision::NothingToPause,
        };
    }

    if producer.paused {
        return FeedDecision::ProducerPaused;
    }

    match consumer {
        Some(c) if c.producer_id() == &producer.producer_id => {
            if c.is_paused() {
                FeedDecision::Resume {
                    consumer_id: c.id().clone(),
                }
            } else {
                FeedDecision::AlreadyResumed
            }
        }
        _ if peer.is_pending(kind) => FeedDecision::ConsumePending,
        stale => FeedDecision::Consume {
            producer_id: producer.producer_id.clone(),
            stale: stale.is_some(),
        },
    }
}

/// Video subscription changes for an audio-only transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioOnlyPlan {
    pub unsubscribe: Vec<PeerId>,
    pub subscribe: Vec<PeerId>,
}

/// Plan an audio-only mode change
///
/// Enabling drops every subscribed video feed. Disabling makes `explicit` the
/// new subscribed set; peers outside it are unsubscribed.
#[must_use]
pub fn plan_audio_only(enabled: bool, current: &BTreeSet<PeerId>, explicit: &[PeerId]) -> AudioOnlyPlan {
    if enabled {
        return AudioOnlyPlan {
            unsubscribe: current.iter().cloned().collect(),
            subscribe: Vec::new(),
        };
    }

    let target: BTreeSet<PeerId> = explicit.iter().cloned().collect();
    AudioOnlyPlan {
        unsubscribe: current.difference(&target).cloned().collect(),
        subscribe: target.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerInfo;
    use crate::registry::ProducerRef;
    use crate::transport::ConsumerHandle;
    use crate::types::QualityLevel;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubConsumer {
        id: ConsumerId,
        producer_id: ProducerId,
        paused: AtomicBool,
    }

    impl ConsumerHandle for StubConsumer {
        fn id(&self) -> &ConsumerId {
            &self.id
        }
        fn producer_id(&self) -> &ProducerId {
            &self.producer_id
        }
        fn kind(&self) -> MediaKind {
            MediaKind::Video
        }
        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
        fn resume(&self) {
            self.paused.store(false, Ordering::SeqCst);
        }
        fn pause(&self) {
            self.paused.store(true, Ordering::SeqCst);
        }
        fn close(&self) {}
    }

    fn registry_with_video(producer_id: &str, paused: bool) -> PeerRegistry {
        let mut registry = PeerRegistry::new();
        registry.upsert(
            &PeerInfo {
                peer_id: PeerId::from("u1"),
                display_name: "U1".to_string(),
                producers: vec![ProducerRef {
                    kind: MediaKind::Video,
                    producer_id: ProducerId::from(producer_id),
                    paused,
                }],
            },
            QualityLevel::High,
        );
        registry
    }

    fn attach(registry: &mut PeerRegistry, producer_id: &str, paused: bool) {
        let peer = registry.get_mut(&PeerId::from("u1")).unwrap();
        peer.attach_consumer(
            MediaKind::Video,
            Box::new(StubConsumer {
                id: ConsumerId::from("c1"),
                producer_id: ProducerId::from(producer_id),
                paused: AtomicBool::new(paused),
            }),
        );
    }

    fn u1() -> PeerId {
        PeerId::from("u1")
    }

    #[test]
    fn test_unknown_peer_and_missing_producer() {
        let registry = registry_with_video("p1", false);
        assert_eq!(
            decide_feed(&registry, &PeerId::from("ghost"), MediaKind::Video, true),
            FeedDecision::PeerUnknown
        );
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Audio, true),
            FeedDecision::NoProducer
        );
    }

    #[test]
    fn test_paused_producer_defers_subscribe() {
        let registry = registry_with_video("p1", true);
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Video, true),
            FeedDecision::ProducerPaused
        );
    }

    #[test]
    fn test_consume_then_pending() {
        let mut registry = registry_with_video("p1", false);
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Video, true),
            FeedDecision::Consume {
                producer_id: ProducerId::from("p1"),
                stale: false
            }
        );

        registry.get_mut(&u1()).unwrap().mark_pending(MediaKind::Video);
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Video, true),
            FeedDecision::ConsumePending
        );
    }

    #[test]
    fn test_resume_and_pause_live_consumer() {
        let mut registry = registry_with_video("p1", false);
        attach(&mut registry, "p1", true);
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Video, true),
            FeedDecision::Resume {
                consumer_id: ConsumerId::from("c1")
            }
        );
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Video, false),
            FeedDecision::NothingToPause
        );

        attach(&mut registry, "p1", false);
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Video, true),
            FeedDecision::AlreadyResumed
        );
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Video, false),
            FeedDecision::Pause {
                consumer_id: ConsumerId::from("c1")
            }
        );
    }

    #[test]
    fn test_stale_consumer_is_replaced() {
        let mut registry = registry_with_video("p2", false);
        attach(&mut registry, "p1", false);
        assert_eq!(
            decide_feed(&registry, &u1(), MediaKind::Video, true),
            FeedDecision::Consume {
                producer_id: ProducerId::from("p2"),
                stale: true
            }
        );
    }

    #[test]
    fn test_audio_only_plan_round_trip() {
        let current: BTreeSet<PeerId> = [PeerId::from("a"), PeerId::from("b")].into_iter().collect();

        let on = plan_audio_only(true, &current, &[]);
        assert_eq!(on.unsubscribe, vec![PeerId::from("a"), PeerId::from("b")]);
        assert!(on.subscribe.is_empty());

        let off = plan_audio_only(
            false,
            &BTreeSet::new(),
            &[PeerId::from("b"), PeerId::from("a"), PeerId::from("a")],
        );
        assert!(off.unsubscribe.is_empty());
        assert_eq!(off.subscribe, vec![PeerId::from("a"), PeerId::from("b")]);
    }

    #[test]
    fn test_audio_only_disable_drops_unlisted() {
        let current: BTreeSet<PeerId> = [PeerId::from("a"), PeerId::from("c")].into_iter().collect();
        let plan = plan_audio_only(false, &current, &[PeerId::from("a")]);
        assert_eq!(plan.unsubscribe, vec![PeerId::from("c")]);
        assert_eq!(plan.subscribe, vec![PeerId::from("a")]);
    }
}
