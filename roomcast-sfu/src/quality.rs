//! Received video quality and priority steering
//!
//! Rules for each held video consumer:
//!
//! - While any peer is screen sharing, ordinary video drops to the lowest
//!   layer at `low` priority and the share consumer gets `high` priority.
//! - Otherwise, in HD sessions a peer's preferred level is honoured while the
//!   number of held video consumers stays below the fan-out threshold, and is
//!   capped at `medium` beyond it. Non-HD sessions never request `high`.
//!
//! Preferences already sent for a consumer are remembered and not re-sent.

use crate::config::QualityConfig;
use crate::network::NetworkClass;
use crate::types::{ConsumerId, MediaKind, PeerId, Priority, QualityLevel};
use std::collections::HashMap;

/// A held video consumer as seen by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConsumer {
    pub peer_id: PeerId,
    pub consumer_id: ConsumerId,
    pub kind: MediaKind,
    pub preferred: QualityLevel,
}

/// Room-wide inputs of a recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityInputs {
    pub hd_enabled: bool,
    pub screen_share_active: bool,
}

/// A preference to push to the SFU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityCommand {
    SetLayers {
        consumer_id: ConsumerId,
        spatial: u8,
        temporal: u8,
    },
    SetPriority {
        consumer_ids: Vec<ConsumerId>,
        priority: Priority,
    },
}

#[derive(Debug)]
pub struct QualityController {
    config: QualityConfig,
    sent_layers: HashMap<ConsumerId, (u8, u8)>,
    sent_priorities: HashMap<ConsumerId, Priority>,
}

impl QualityController {
    #[must_use]
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            sent_layers: HashMap::new(),
            sent_priorities: HashMap::new(),
        }
    }

    /// Layer level for one consumer
    fn target_level(&self, inputs: QualityInputs, video_count: usize, consumer: &VideoConsumer) -> QualityLevel {
        if consumer.kind == MediaKind::ScreenShareVideo {
            return QualityLevel::High;
        }
        if inputs.screen_share_active {
            return QualityLevel::Low;
        }
        if inputs.hd_enabled && video_count < self.config.hd_fanout_threshold {
            consumer.preferred
        } else {
            consumer.preferred.min(QualityLevel::Medium)
        }
    }

    const fn target_priority(inputs: QualityInputs, consumer: &VideoConsumer) -> Priority {
        match consumer.kind {
            MediaKind::ScreenShareVideo => Priority::High,
            _ if inputs.screen_share_active => Priority::Low,
            _ => Priority::Medium,
        }
    }

    /// Compute the preferences that differ from what was last sent
    ///
    /// Nothing is recorded; call [`Self::mark_sent`] for each command that was
    /// actually emitted.
    #[must_use]
    pub fn plan(&self, inputs: QualityInputs, consumers: &[VideoConsumer]) -> Vec<QualityCommand> {
        let video_count = consumers
            .iter()
            .filter(|c| c.kind == MediaKind::Video)
            .count();

        let mut commands = Vec::new();
        let mut by_priority: Vec<(Priority, Vec<ConsumerId>)> = Vec::new();

        for consumer in consumers {
            let spatial = self.target_level(inputs, video_count, consumer).spatial_layer();
            let layers = (spatial, self.config.max_temporal_layer);
            if self.sent_layers.get(&consumer.consumer_id) != Some(&layers) {
                commands.push(QualityCommand::SetLayers {
                    consumer_id: consumer.consumer_id.clone(),
                    spatial: layers.0,
                    temporal: layers.1,
                });
            }

            let priority = Self::target_priority(inputs, consumer);
            if self.sent_priorities.get(&consumer.consumer_id) != Some(&priority) {
                match by_priority.iter_mut().find(|(p, _)| *p == priority) {
                    Some((_, ids)) => ids.push(consumer.consumer_id.clone()),
                    None => by_priority.push((priority, vec![consumer.consumer_id.clone()])),
                }
            }
        }

        commands.extend(
            by_priority
                .into_iter()
                .map(|(priority, consumer_ids)| QualityCommand::SetPriority {
                    consumer_ids,
                    priority,
                }),
        );
        commands
    }

    pub fn mark_sent(&mut self, command: &QualityCommand) {
        match command {
            QualityCommand::SetLayers {
                consumer_id,
                spatial,
                temporal,
            } => {
                self.sent_layers.insert(consumer_id.clone(), (*spatial, *temporal));
            }
            QualityCommand::SetPriority {
                consumer_ids,
                priority,
            } => {
                for id in consumer_ids {
                    self.sent_priorities.insert(id.clone(), *priority);
                }
            }
        }
    }

    /// Drop the guard entries of a closed consumer
    pub fn forget(&mut self, consumer_id: &ConsumerId) {
        self.sent_layers.remove(consumer_id);
        self.sent_priorities.remove(consumer_id);
    }

    pub fn reset(&mut self) {
        self.sent_layers.clear();
        self.sent_priorities.clear();
    }
}

/// Maximum spatial layer of the local camera
///
/// The network class sets the ceiling (`Wifi` high, `Cellular` medium, no
/// network low); the local preference can only lower it. Non-HD sessions never
/// send above medium.
#[must_use]
pub fn local_spatial_cap(hd_enabled: bool, network: NetworkClass, preferred: QualityLevel) -> QualityLevel {
    let ceiling = match network {
        NetworkClass::Wifi => QualityLevel::High,
        NetworkClass::Cellular => QualityLevel::Medium,
        NetworkClass::None => QualityLevel::Low,
    };
    let cap = ceiling.min(preferred);
    if hd_enabled {
        cap
    } else {
        cap.min(QualityLevel::Medium)
    }
}
