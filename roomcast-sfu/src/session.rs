//! Per-call session state

use crate::channel::ConnectivityState;
use crate::network::NetworkClass;
use crate::transport::ProducerHandle;
use crate::types::{MediaKind, PeerId, ProducerId, QualityLevel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Lifecycle of the signaling engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Joining,
    Joined,
    Reconnecting,
    Left,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Reconnecting => "reconnecting",
            Self::Left => "left",
        };
        f.write_str(name)
    }
}

/// A local producer published on the send transport
pub struct LocalProducer {
    pub handle: Box<dyn ProducerHandle>,
    /// Server-assigned id, known once the `produce` ack arrives
    pub server_id: Option<ProducerId>,
    /// State the application asked for
    pub enabled: bool,
}

impl fmt::Debug for LocalProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProducer")
            .field("kind", &self.handle.kind())
            .field("server_id", &self.server_id)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// State of the active call
#[derive(Debug)]
pub struct SessionState {
    pub connection_state: ConnectivityState,
    pub network_class: NetworkClass,
    pub audio_only: bool,
    pub subscribed_video_peer_ids: BTreeSet<PeerId>,
    pub active_screen_share_peer_id: Option<PeerId>,
    pub self_peer_id: Option<PeerId>,
    pub hd_enabled: bool,
    /// Preferred quality of the local camera
    pub local_quality: QualityLevel,
    /// Spatial cap last applied to the local video producer
    pub local_cap: Option<QualityLevel>,
    pub local_producers: HashMap<MediaKind, LocalProducer>,
}

impl SessionState {
    #[must_use]
    pub fn new(hd_enabled: bool, local_quality: QualityLevel, network_class: NetworkClass) -> Self {
        Self {
            connection_state: ConnectivityState::Connecting,
            network_class,
            audio_only: false,
            subscribed_video_peer_ids: BTreeSet::new(),
            active_screen_share_peer_id: None,
            self_peer_id: None,
            hd_enabled,
            local_quality,
            local_cap: None,
            local_producers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectivityState::Connected
    }

    #[must_use]
    pub fn is_video_subscribed(&self, peer_id: &PeerId) -> bool {
        self.subscribed_video_peer_ids.contains(peer_id)
    }

    /// Clear the active share if `peer_id` holds it; returns true if cleared
    pub fn clear_screen_share(&mut self, peer_id: &PeerId) -> bool {
        if self.active_screen_share_peer_id.as_ref() == Some(peer_id) {
            self.active_screen_share_peer_id = None;
            true
        } else {
            false
        }
    }

    /// Record `peer_id` as sharing; returns true if it changed
    pub fn set_screen_share(&mut self, peer_id: &PeerId) -> bool {
        if self.active_screen_share_peer_id.as_ref() == Some(peer_id) {
            return false;
        }
        self.active_screen_share_peer_id = Some(peer_id.clone());
        true
    }

    /// Forget everything tied to a departed peer
    pub fn forget_peer(&mut self, peer_id: &PeerId) -> bool {
        self.subscribed_video_peer_ids.remove(peer_id);
        self.clear_screen_share(peer_id)
    }

    /// Close all local producers
    pub fn close_local_producers(&mut self) {
        for (_, producer) in self.local_producers.drain() {
            producer.handle.close();
        }
        self.local_cap = None;
    }

    #[must_use]
    pub fn snapshot(&self, engine_state: EngineState) -> SessionSnapshot {
        let mut local_media: Vec<MediaKind> = self
            .local_producers
            .iter()
            .filter_map(|(kind, p)| p.enabled.then_some(*kind))
            .collect();
        local_media.sort();

        SessionSnapshot {
            engine_state,
            connection_state: self.connection_state,
            network_class: self.network_class,
            audio_only: self.audio_only,
            subscribed_video_peer_ids: self.subscribed_video_peer_ids.iter().cloned().collect(),
            active_screen_share_peer_id: self.active_screen_share_peer_id.clone(),
            self_peer_id: self.self_peer_id.clone(),
            local_media,
        }
    }
}

/// Read-only view of the session handed to the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub engine_state: EngineState,
    pub connection_state: ConnectivityState,
    pub network_class: NetworkClass,
    pub audio_only: bool,
    pub subscribed_video_peer_ids: Vec<PeerId>,
    pub active_screen_share_peer_id: Option<PeerId>,
    pub self_peer_id: Option<PeerId>,
    /// Local kinds currently being sent
    pub local_media: Vec<MediaKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_share_tracking() {
        let mut session = SessionState::new(true, QualityLevel::High, NetworkClass::Wifi);
        let p = PeerId::from("p");
        let q = PeerId::from("q");

        assert!(session.set_screen_share(&p));
        assert!(!session.set_screen_share(&p));
        assert!(!session.clear_screen_share(&q));
        assert!(session.forget_peer(&p));
        assert!(session.active_screen_share_peer_id.is_none());
    }

    #[test]
    fn test_snapshot_sorted_video_set() {
        let mut session = SessionState::new(false, QualityLevel::Medium, NetworkClass::Cellular);
        session.subscribed_video_peer_ids.insert(PeerId::from("b"));
        session.subscribed_video_peer_ids.insert(PeerId::from("a"));

        let snapshot = session.snapshot(EngineState::Joined);
        assert_eq!(
            snapshot.subscribed_video_peer_ids,
            vec![PeerId::from("a"), PeerId::from("b")]
        );
        assert_eq!(snapshot.connection_state, ConnectivityState::Connecting);
    }
}
