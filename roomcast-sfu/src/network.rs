//! Network quality classification
//!
//! Two independent signals are derived here:
//!
//! - **Remote quality** per producer, from the SFU's `score` events. A score at
//!   or below the configured cutoff is reported as [`NetworkQuality::Bad`].
//! - **Local link statistics**, from `getTransportStats` acks. Packet loss of the
//!   send (uplink) and receive (downlink) transports is bucketed into a quality
//!   grade:
//!   - 1: loss <= 1%
//!   - 2: loss <= 3%
//!   - 3: loss <= 10%
//!   - 4: loss <= 15%
//!   - 5: loss > 15%
//!   - 0: no data

use crate::types::TransportId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Class of the network the device is currently attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Wifi,
    Cellular,
    None,
}

/// Remote producer quality as reported to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Good,
    Bad,
}

/// Classify a producer score against the cutoff
#[must_use]
pub const fn classify_score(score: u8, cutoff: u8) -> NetworkQuality {
    if score <= cutoff {
        NetworkQuality::Bad
    } else {
        NetworkQuality::Good
    }
}

/// Local link statistics reported to the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatistics {
    /// Worst of the uplink and downlink grades (0 = unknown)
    pub network_quality: u8,
    /// Downlink packet loss in percent
    pub remote_packet_loss: u8,
    /// Uplink packet loss in percent
    pub local_packet_loss: u8,
}

/// Grade and loss percentage of a single transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LinkGrade {
    quality: u8,
    packet_loss: u8,
}

/// Bucket a packet loss rate (0.0 - 1.0) into a quality grade
fn grade_packet_loss(loss_rate: f64) -> LinkGrade {
    if loss_rate.is_nan() || loss_rate < 0.0 {
        return LinkGrade::default();
    }

    let percent = (loss_rate * 100.0).round().min(100.0) as u8;
    let quality = match percent {
        0..=1 => 1,
        2..=3 => 2,
        4..=10 => 3,
        11..=15 => 4,
        _ => 5,
    };

    LinkGrade {
        quality,
        packet_loss: percent,
    }
}

fn grade_entry(entry: &Value) -> LinkGrade {
    let first = entry
        .get("stats")
        .and_then(Value::as_array)
        .and_then(|stats| stats.first());

    let loss = first
        .and_then(|s| {
            s.get("rtpPacketLossSent")
                .and_then(Value::as_f64)
                .or_else(|| s.get("rtpPacketLossReceived").and_then(Value::as_f64))
        })
        .unwrap_or(0.0);

    grade_packet_loss(loss)
}

/// Build link statistics from a `getTransportStats` ack payload
///
/// Returns `None` when either transport is missing from the report.
#[must_use]
pub fn transport_statistics(
    data: &Value,
    send_transport: &TransportId,
    receive_transport: &TransportId,
) -> Option<NetworkStatistics> {
    let entries = data.get("stats")?.as_array()?;

    let mut uplink = None;
    let mut downlink = None;

    for entry in entries {
        let Some(transport_id) = entry.get("transport").and_then(Value::as_str) else {
            continue;
        };

        if uplink.is_none() && transport_id == send_transport.as_str() {
            uplink = Some(grade_entry(entry));
        }
        if downlink.is_none() && transport_id == receive_transport.as_str() {
            downlink = Some(grade_entry(entry));
        }
    }

    let (uplink, downlink) = (uplink?, downlink?);

    let network_quality = if uplink.quality != 0 && downlink.quality != 0 {
        uplink.quality.max(downlink.quality)
    } else if uplink.quality > 0 {
        uplink.quality
    } else {
        downlink.quality
    };

    Some(NetworkStatistics {
        network_quality,
        remote_packet_loss: downlink.packet_loss,
        local_packet_loss: uplink.packet_loss,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_score() {
        assert_eq!(classify_score(7, 7), NetworkQuality::Bad);
        assert_eq!(classify_score(3, 7), NetworkQuality::Bad);
        assert_eq!(classify_score(8, 7), NetworkQuality::Good);
        assert_eq!(classify_score(10, 7), NetworkQuality::Good);
    }

    #[test]
    fn test_grade_packet_loss() {
        assert_eq!(grade_packet_loss(0.005).quality, 1);
        assert_eq!(grade_packet_loss(0.03).quality, 2);
        assert_eq!(grade_packet_loss(0.08).quality, 3);
        assert_eq!(grade_packet_loss(0.12).quality, 4);
        assert_eq!(grade_packet_loss(0.40).quality, 5);
        assert_eq!(grade_packet_loss(f64::NAN).quality, 0);
    }

    #[test]
    fn test_transport_statistics_worst_link_wins() {
        let data = json!({
            "stats": [
                { "transport": "send-1", "stats": [{ "rtpPacketLossSent": 0.02 }] },
                { "transport": "recv-1", "stats": [{ "rtpPacketLossReceived": 0.12 }] },
            ]
        });

        let stats =
            transport_statistics(&data, &TransportId::from("send-1"), &TransportId::from("recv-1"))
                .unwrap();
        assert_eq!(stats.network_quality, 4);
        assert_eq!(stats.local_packet_loss, 2);
        assert_eq!(stats.remote_packet_loss, 12);
    }

    #[test]
    fn test_transport_statistics_missing_transport() {
        let data = json!({
            "stats": [
                { "transport": "send-1", "stats": [{ "rtpPacketLossSent": 0.0 }] },
            ]
        });

        assert!(transport_statistics(
            &data,
            &TransportId::from("send-1"),
            &TransportId::from("recv-1")
        )
        .is_none());
    }

    #[test]
    fn test_transport_statistics_one_link_without_data() {
        let data = json!({
            "stats": [
                { "transport": "send-1", "stats": [] },
                { "transport": "recv-1", "stats": [{ "rtpPacketLossReceived": 0.05 }] },
            ]
        });

        let stats =
            transport_statistics(&data, &TransportId::from("send-1"), &TransportId::from("recv-1"))
                .unwrap();
        // Uplink grades to 1 (no loss reported), downlink to 3
        assert_eq!(stats.network_quality, 3);
    }
}
