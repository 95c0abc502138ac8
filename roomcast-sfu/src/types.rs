//! Common types used throughout the signaling client

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a participant, stable for the lifetime of a call
    PeerId
);
string_id!(
    /// Server-assigned producer identifier
    ProducerId
);
string_id!(
    /// Server-assigned consumer identifier
    ConsumerId
);
string_id!(
    /// Media transport identifier
    TransportId
);
string_id!(
    /// Room the session joins
    RoomId
);

/// Media kind offered by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Audio,
    Video,
    ScreenShareVideo,
    ScreenShareAudio,
}

impl MediaKind {
    /// Resolve the kind from the wire `mediaType` and `share` flag
    #[must_use]
    pub fn from_wire(media_type: &str, share: bool) -> Option<Self> {
        match (media_type.to_lowercase().as_str(), share) {
            ("audio", false) => Some(Self::Audio),
            ("video", false) => Some(Self::Video),
            ("video", true) => Some(Self::ScreenShareVideo),
            ("audio", true) => Some(Self::ScreenShareAudio),
            _ => None,
        }
    }

    /// Transport-level kind (`audio` or `video`)
    #[must_use]
    pub const fn transport_kind(&self) -> &'static str {
        match self {
            Self::Audio | Self::ScreenShareAudio => "audio",
            Self::Video | Self::ScreenShareVideo => "video",
        }
    }

    #[must_use]
    pub const fn is_screen_share(&self) -> bool {
        matches!(self, Self::ScreenShareVideo | Self::ScreenShareAudio)
    }

    /// Kinds whose consumers take part in layer and priority steering
    #[must_use]
    pub const fn is_video(&self) -> bool {
        matches!(self, Self::Video | Self::ScreenShareVideo)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::ScreenShareVideo => "screenShareVideo",
            Self::ScreenShareAudio => "screenShareAudio",
        };
        f.write_str(name)
    }
}

/// Simulcast quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
}

impl QualityLevel {
    /// Spatial layer index requested from the SFU
    #[must_use]
    pub const fn spatial_layer(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// Consumer priority used for SFU bandwidth allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Numeric value sent on the wire
    #[must_use]
    pub const fn wire_value(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

/// Why a remote peer left the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaveReason {
    UserAction,
    Unknown,
}

impl LeaveReason {
    #[must_use]
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            Some(r) if r.eq_ignore_ascii_case("quit") => Self::UserAction,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_wire() {
        assert_eq!(MediaKind::from_wire("audio", false), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_wire("Video", false), Some(MediaKind::Video));
        assert_eq!(
            MediaKind::from_wire("video", true),
            Some(MediaKind::ScreenShareVideo)
        );
        assert_eq!(MediaKind::from_wire("data", false), None);
    }

    #[test]
    fn test_quality_ordering() {
        assert!(QualityLevel::Low < QualityLevel::Medium);
        assert!(QualityLevel::Medium < QualityLevel::High);
        assert_eq!(QualityLevel::High.spatial_layer(), 2);
        assert_eq!(Priority::High.wire_value(), 3);
    }

    #[test]
    fn test_leave_reason() {
        assert_eq!(LeaveReason::from_wire(Some("QUIT")), LeaveReason::UserAction);
        assert_eq!(LeaveReason::from_wire(Some("kicked")), LeaveReason::Unknown);
        assert_eq!(LeaveReason::from_wire(None), LeaveReason::Unknown);
    }
}
