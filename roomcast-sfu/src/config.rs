//! Client configuration

use crate::types::QualityLevel;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Signaling client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub logging: LoggingConfig,
    pub signaling: SignalingConfig,
    pub reconnect: ReconnectConfig,
    pub quality: QualityConfig,
    pub stats: StatsConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level of this crate's own events
    pub level: String,
    /// Level of every other target, such as the embedder's WebRTC stack
    pub dependency_level: String,
    pub format: LogFormat,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dependency_level: "warn".to_string(),
            format: LogFormat::Pretty,
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Default ack timeout for emitted requests
    pub ack_timeout_ms: u64,
    /// Ack timeout for `produce` and `connectWebRtcTransport`
    pub transport_ack_timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            transport_ack_timeout_ms: 10_000,
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    #[must_use]
    pub const fn transport_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_ack_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the watchdog asks the channel to reconnect
    pub watchdog_delay_ms: u64,
    /// ICE restart attempts per transport before giving up
    pub max_ice_restart_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            watchdog_delay_ms: 5_000,
            max_ice_restart_attempts: 3,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub const fn watchdog_delay(&self) -> Duration {
        Duration::from_millis(self.watchdog_delay_ms)
    }
}

/// Layer and priority heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// HD sessions request `high` only while fewer video consumers are held
    pub hd_fanout_threshold: usize,
    /// Producer scores at or below this value are reported as bad
    pub score_cutoff: u8,
    /// Temporal layer requested together with the spatial layer
    pub max_temporal_layer: u8,
    /// Initial preferred quality for every remote peer
    pub default_peer_quality: QualityLevel,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            hd_fanout_threshold: 15,
            score_cutoff: 7,
            max_temporal_layer: 2,
            default_peer_quality: QualityLevel::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 3_000,
        }
    }
}

impl StatsConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Timeout of a room details lookup
    pub request_timeout_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

impl DirectoryConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ClientConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // ROOMCAST_SIGNALING__ACK_TIMEOUT_MS, etc.
        builder = builder.add_source(
            Environment::with_prefix("ROOMCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.signaling.ack_timeout_ms == 0 || self.signaling.transport_ack_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "ack timeouts must be greater than zero".to_string(),
            ));
        }
        if self.directory.request_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "directory.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.quality.hd_fanout_threshold == 0 {
            return Err(ConfigError::Message(
                "quality.hd_fanout_threshold must be greater than zero".to_string(),
            ));
        }
        if self.stats.enabled && self.stats.interval_ms == 0 {
            return Err(ConfigError::Message(
                "stats.interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
