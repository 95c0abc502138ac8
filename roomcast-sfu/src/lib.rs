//! `RoomCast` SFU client
//!
//! Client-side signaling and media-session layer for group calls routed
//! through an SFU (Selective Forwarding Unit). The SFU forwards every
//! participant's streams; this crate decides which of them the local client
//! receives, at which simulcast layer and priority, and keeps the session alive
//! across network interruptions.
//!
//! ## Architecture
//!
//! - **`MediaSession`**: application handle; every call is queued onto one
//!   engine task
//! - **Signaling engine**: protocol state machine owning the peer registry and
//!   session state, driven by channel events, transport signals and acks
//! - **Subscription**: decides consume / resume / pause for a remote feed
//! - **Quality**: simulcast layer and priority steering
//! - **Reconnect**: watchdog, missed-event replay and ICE restarts
//! - **Directory**: resolves a meeting id and pin to a media server and token
//!
//! The signaling socket and the WebRTC stack are collaborators supplied by the
//! embedder through [`ChannelClient`] and [`TransportFacade`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roomcast_sfu::{ClientConfig, MediaKind, MediaSession, RoomDirectory};
//!
//! let config = ClientConfig::default();
//! let directory = RoomDirectory::new("https://meet.example.com/", &config.directory)?;
//! let room = directory.room_details("1234567890", "pin", "Ada").await?;
//!
//! let (session, mut events) = MediaSession::new(config, channel, transports);
//! session.join(room.join_options("Ada")).await?;
//! session.subscribe_feed(true, "peer-2", MediaKind::Video).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod channel;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod logging;
pub mod network;
pub mod protocol;
pub mod quality;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod types;

pub use channel::{AckResult, ChannelClient, ChannelEvent, ChannelSink, ConnectRequest, ConnectivityState};
pub use config::ClientConfig;
pub use directory::{RoomDetails, RoomDirectory};
pub use engine::{JoinOptions, MediaSession, SessionEvent};
pub use error::{Error, Result};
pub use network::{NetworkClass, NetworkQuality, NetworkStatistics};
pub use registry::PeerSnapshot;
pub use session::{EngineState, SessionSnapshot};
pub use transport::{
    ConsumerHandle, ProducerHandle, ReceiveTransport, SendTransport, TransportFacade, TransportHandle,
    TransportSink,
};
pub use types::{ConsumerId, LeaveReason, MediaKind, PeerId, ProducerId, QualityLevel, RoomId, TransportId};
