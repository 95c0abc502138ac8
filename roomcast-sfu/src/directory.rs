//! Room details lookup
//!
//! Before connecting, a meeting id and pin are exchanged with the meeting
//! service for the media server URL and a signed join token.

use crate::config::DirectoryConfig;
use crate::engine::JoinOptions;
use crate::error::{Error, Result};
use crate::types::RoomId;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const ROOM_DETAILS_PATH: &str = "api/roomdetails";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomDetailsRequest<'a> {
    #[serde(rename = "extension")]
    meeting_id: &'a str,
    pin: &'a str,
    member_name: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMediaServer {
    public_base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRoomDetails {
    media_server: WireMediaServer,
    jwt_token: String,
}

#[derive(Debug, Deserialize)]
struct RoomDetailsResponse {
    #[serde(default = "default_success")]
    success: bool,
    data: Option<WireRoomDetails>,
}

const fn default_success() -> bool {
    true
}

/// Where and how to join a meeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDetails {
    /// Signaling URL of the media server hosting the room
    pub media_server_url: String,
    pub room_id: RoomId,
    pub token: String,
}

impl RoomDetails {
    /// Join parameters for this room; everything else keeps its default
    #[must_use]
    pub fn join_options(&self, display_name: impl Into<String>) -> JoinOptions {
        JoinOptions::new(
            self.media_server_url.clone(),
            self.room_id.clone(),
            self.token.clone(),
            display_name,
        )
    }
}

/// Client for the meeting service
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    http: Client,
    endpoint: String,
}

impl RoomDirectory {
    /// `base_url` is the meeting service root, e.g. `https://meet.example.com/`
    pub fn new(base_url: &str, config: &DirectoryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::RoomLookupFailed(format!("http client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/{ROOM_DETAILS_PATH}", base_url.trim_end_matches('/')),
        })
    }

    /// Resolve a meeting id and pin to its media server and join token
    pub async fn room_details(&self, meeting_id: &str, pin: &str, member_name: &str) -> Result<RoomDetails> {
        debug!(endpoint = %self.endpoint, meeting_id, "Looking up room details");
        let request = RoomDetailsRequest {
            meeting_id,
            pin,
            member_name,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| lookup_failed(meeting_id, format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| lookup_failed(meeting_id, format!("meeting service error: {e}")))?;

        let body: RoomDetailsResponse = response
            .json()
            .await
            .map_err(|e| lookup_failed(meeting_id, format!("invalid response: {e}")))?;
        let details = match body {
            RoomDetailsResponse {
                success: true,
                data: Some(details),
            } => details,
            _ => return Err(lookup_failed(meeting_id, "meeting service rejected the request")),
        };

        info!(
            meeting_id,
            media_server = %details.media_server.public_base_url,
            "Room details resolved"
        );
        Ok(RoomDetails {
            media_server_url: details.media_server.public_base_url,
            room_id: RoomId::from(meeting_id),
            token: details.jwt_token,
        })
    }
}

fn lookup_failed(meeting_id: &str, reason: impl Into<String>) -> Error {
    let reason = reason.into();
    warn!(meeting_id, reason = %reason, "Room details lookup failed");
    Error::RoomLookupFailed(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_uses_wire_names() {
        let body = serde_json::to_value(RoomDetailsRequest {
            meeting_id: "1234567890",
            pin: "abcde",
            member_name: "Ada",
        })
        .unwrap();
        assert_eq!(body, json!({"extension": "1234567890", "pin": "abcde", "memberName": "Ada"}));
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let config = DirectoryConfig::default();
        let a = RoomDirectory::new("https://meet.test/", &config).unwrap();
        let b = RoomDirectory::new("https://meet.test", &config).unwrap();
        assert_eq!(a.endpoint, "https://meet.test/api/roomdetails");
        assert_eq!(a.endpoint, b.endpoint);
    }

    #[test]
    fn test_details_feed_join_options() {
        let details = RoomDetails {
            media_server_url: "wss://media.test".to_string(),
            room_id: RoomId::from("1234567890"),
            token: "jwt".to_string(),
        };
        let options = details.join_options("Ada");
        assert_eq!(options.url, "wss://media.test");
        assert_eq!(options.room_id, RoomId::from("1234567890"));
        assert_eq!(options.token, "jwt");
        assert_eq!(options.display_name, "Ada");
    }
}
