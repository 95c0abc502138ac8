//! Application-facing session handle

use super::{Command, SignalingEngine};
use crate::channel::{ChannelClient, ConnectivityState};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::network::{NetworkClass, NetworkQuality, NetworkStatistics};
use crate::protocol::{MessageScope, SpeakerLevel};
use crate::registry::PeerSnapshot;
use crate::session::{EngineState, SessionSnapshot};
use crate::transport::TransportFacade;
use crate::types::{LeaveReason, MediaKind, PeerId, QualityLevel, RoomId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Parameters of a join
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOptions {
    /// Signaling server URL
    pub url: String,
    pub room_id: RoomId,
    pub token: String,
    pub display_name: String,
    /// Device description sent with the handshake and join
    pub device: Value,
    /// Allow the high simulcast layer in both directions
    pub hd_enabled: bool,
    /// Preferred quality of the local camera
    pub local_quality: QualityLevel,
    pub publish_audio: bool,
    pub publish_video: bool,
}

impl JoinOptions {
    pub fn new(
        url: impl Into<String>,
        room_id: impl Into<RoomId>,
        token: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            room_id: room_id.into(),
            token: token.into(),
            display_name: display_name.into(),
            device: Value::Object(serde_json::Map::new()),
            hd_enabled: false,
            local_quality: QualityLevel::High,
            publish_audio: false,
            publish_video: false,
        }
    }
}

/// Notifications delivered to the application, in engine order
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Joined {
        self_peer_id: Option<PeerId>,
    },
    StateChanged(EngineState),
    ConnectionStateChanged(ConnectivityState),
    PeerJoined {
        peer_id: PeerId,
        display_name: String,
    },
    PeerLeft {
        peer_id: PeerId,
        reason: LeaveReason,
    },
    PeerMediaPublished {
        peer_id: PeerId,
        kind: MediaKind,
    },
    PeerMediaUnpublished {
        peer_id: PeerId,
        kind: MediaKind,
    },
    RemoteQualityChanged {
        peer_id: PeerId,
        kind: MediaKind,
        quality: NetworkQuality,
    },
    ActiveSpeakers(Vec<SpeakerLevel>),
    BroadcastMessage {
        scope: MessageScope,
        message: Value,
    },
    NetworkStatistics(NetworkStatistics),
    Error(Error),
    Left,
}

/// Handle to one group call
///
/// Cheap to clone. Every call is queued onto the engine task and answered in
/// order. When the last clone is dropped the engine leaves the call.
#[derive(Clone)]
pub struct MediaSession {
    tx: mpsc::UnboundedSender<Command>,
    _guard: Arc<DropGuard>,
}

impl MediaSession {
    /// Start the engine task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: ClientConfig,
        channel: Arc<dyn ChannelClient>,
        transports: Arc<dyn TransportFacade>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let engine = SignalingEngine::new(config, channel, transports, tx.clone(), events_tx, cancel.clone());
        tokio::spawn(engine.run(rx));

        let session = Self {
            tx,
            _guard: Arc::new(cancel.drop_guard()),
        };
        (session, events_rx)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Connect and join a room; completes once the server accepted the join
    pub async fn join(&self, options: JoinOptions) -> Result<()> {
        self.request(|reply| Command::Join { options, reply }).await?
    }

    /// Leave the call and release every resource. Calling it again is a no-op.
    pub async fn leave(&self) {
        let _ = self.request(|reply| Command::Leave { reply }).await;
    }

    /// Start or stop receiving one feed of a peer
    ///
    /// Subscribing completes once the consumer is bound and resumed.
    pub async fn subscribe_feed(&self, subscribe: bool, peer_id: impl Into<PeerId>, kind: MediaKind) -> Result<()> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::SubscribeFeed {
            subscribe,
            peer_id,
            kind,
            reply,
        })
        .await?
    }

    /// Toggle audio-only mode
    ///
    /// Enabling drops every received video. Disabling resumes video for
    /// `peer_ids` only.
    pub async fn set_audio_only_mode(&self, enabled: bool, peer_ids: Vec<PeerId>) -> Result<()> {
        self.request(|reply| Command::SetAudioOnly {
            enabled,
            peer_ids,
            reply,
        })
        .await?
    }

    pub async fn set_preferred_quality(&self, peer_id: impl Into<PeerId>, level: QualityLevel) -> Result<()> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::SetPreferredQuality {
            peer_id,
            level,
            reply,
        })
        .await?
    }

    pub async fn set_local_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.set_local_media(MediaKind::Audio, enabled).await
    }

    pub async fn set_local_video_enabled(&self, enabled: bool) -> Result<()> {
        self.set_local_media(MediaKind::Video, enabled).await
    }

    async fn set_local_media(&self, kind: MediaKind, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetLocalMedia { kind, enabled, reply })
            .await?
    }

    /// Publish the local screen share
    ///
    /// Frames come from the embedder's capture pipeline through the send
    /// transport; this only negotiates the share producer.
    pub async fn start_screen_share(&self) -> Result<()> {
        self.request(|reply| Command::SetScreenShare { enabled: true, reply })
            .await?
    }

    /// Withdraw the local screen share
    pub async fn stop_screen_share(&self) -> Result<()> {
        self.request(|reply| Command::SetScreenShare { enabled: false, reply })
            .await?
    }

    /// Preferred quality of the local camera
    pub async fn set_local_video_quality(&self, level: QualityLevel) -> Result<()> {
        self.request(|reply| Command::SetLocalQuality { level, reply })
            .await?
    }

    /// Report a change of the device's network class
    pub fn set_network_class(&self, class: NetworkClass) -> Result<()> {
        self.tx
            .send(Command::SetNetworkClass { class })
            .map_err(|_| Error::SessionClosed)
    }

    pub async fn send_broadcast_message(&self, message: Value) -> Result<()> {
        self.request(|reply| Command::SendMessage {
            target: None,
            message,
            reply,
        })
        .await?
    }

    pub async fn send_message_to_peer(&self, peer_id: impl Into<PeerId>, message: Value) -> Result<()> {
        let target = Some(peer_id.into());
        self.request(|reply| Command::SendMessage {
            target,
            message,
            reply,
        })
        .await?
    }

    pub async fn peer(&self, peer_id: impl Into<PeerId>) -> Result<Option<PeerSnapshot>> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::PeerSnapshot { peer_id, reply })
            .await
    }

    /// Known remote peers in join order
    pub async fn peers(&self) -> Result<Vec<PeerSnapshot>> {
        self.request(|reply| Command::Peers { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Session { reply }).await
    }
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
