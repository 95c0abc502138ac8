//! Reconnection supervision
//!
//! Tracks the watchdog armed on a channel disconnect, the queue of missed
//! events awaiting replay, and the ICE restart attempts of each transport.
//! The engine owns one supervisor and consults it from its serial queue; the
//! supervisor itself performs no I/O.

use crate::channel::ChannelEvent;
use crate::config::ReconnectConfig;
use crate::transport::TransportRole;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IceRestartState {
    failed: bool,
    in_flight: bool,
    attempts: u32,
}

/// Outcome of asking to restart ICE on a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRestartDecision {
    /// Send a `restartIce` request; `attempt` starts at 1
    Request { attempt: u32 },
    /// A restart is already under way
    InFlight,
    /// The transport is not failed
    NotNeeded,
    /// The retry budget is spent
    Exhausted,
}

#[derive(Debug)]
pub struct ReconnectionSupervisor {
    config: ReconnectConfig,
    watchdog_generation: u64,
    watchdog_armed: bool,
    replay: VecDeque<ChannelEvent>,
    ice: HashMap<TransportRole, IceRestartState>,
}

impl ReconnectionSupervisor {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            watchdog_generation: 0,
            watchdog_armed: false,
            replay: VecDeque::new(),
            ice: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn watchdog_delay(&self) -> Duration {
        self.config.watchdog_delay()
    }

    /// Arm the watchdog after a disconnect
    ///
    /// Returns the generation to hand back in [`Self::watchdog_fired`], or
    /// `None` when a watchdog is already armed for this outage.
    pub fn on_disconnected(&mut self) -> Option<u64> {
        if self.watchdog_armed {
            return None;
        }
        self.watchdog_generation += 1;
        self.watchdog_armed = true;
        Some(self.watchdog_generation)
    }

    /// Disarm any pending watchdog
    pub fn on_connected(&mut self) {
        self.watchdog_armed = false;
        self.watchdog_generation += 1;
    }

    /// Whether a fired watchdog is still relevant
    pub fn watchdog_fired(&mut self, generation: u64) -> bool {
        if self.watchdog_armed && generation == self.watchdog_generation {
            self.watchdog_armed = false;
            true
        } else {
            false
        }
    }

    /// Queue missed events behind any not yet replayed
    pub fn enqueue_replay(&mut self, events: impl IntoIterator<Item = ChannelEvent>) {
        self.replay.extend(events);
    }

    pub fn next_replay(&mut self) -> Option<ChannelEvent> {
        self.replay.pop_front()
    }

    #[must_use]
    pub fn has_replay(&self) -> bool {
        !self.replay.is_empty()
    }

    pub fn transport_failed(&mut self, role: TransportRole) {
        let state = self.ice.entry(role).or_default();
        state.failed = true;
        state.in_flight = false;
    }

    /// The transport reports `connected` again
    pub fn transport_recovered(&mut self, role: TransportRole) {
        self.ice.remove(&role);
    }

    #[must_use]
    pub fn is_failed(&self, role: TransportRole) -> bool {
        self.ice.get(&role).is_some_and(|s| s.failed)
    }

    /// Roles currently failed, send first
    #[must_use]
    pub fn failed_roles(&self) -> Vec<TransportRole> {
        [TransportRole::Send, TransportRole::Receive]
            .into_iter()
            .filter(|role| self.is_failed(*role))
            .collect()
    }

    #[must_use]
    pub fn all_transports_healthy(&self) -> bool {
        self.ice.values().all(|s| !s.failed)
    }

    pub fn begin_ice_restart(&mut self, role: TransportRole) -> IceRestartDecision {
        let max = self.config.max_ice_restart_attempts;
        let Some(state) = self.ice.get_mut(&role).filter(|s| s.failed) else {
            return IceRestartDecision::NotNeeded;
        };
        if state.in_flight {
            return IceRestartDecision::InFlight;
        }
        if state.attempts >= max {
            return IceRestartDecision::Exhausted;
        }
        state.attempts += 1;
        state.in_flight = true;
        IceRestartDecision::Request {
            attempt: state.attempts,
        }
    }

    /// A `restartIce` exchange finished; the transport stays failed until it
    /// reports `connected`
    pub fn ice_restart_finished(&mut self, role: TransportRole) {
        if let Some(state) = self.ice.get_mut(&role) {
            state.in_flight = false;
        }
    }

    pub fn reset(&mut self) {
        self.watchdog_armed = false;
        self.watchdog_generation += 1;
        self.replay.clear();
        self.ice.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn supervisor() -> ReconnectionSupervisor {
        ReconnectionSupervisor::new(ReconnectConfig::default())
    }

    #[test]
    fn test_watchdog_generation() {
        let mut s = supervisor();
        let generation = s.on_disconnected().unwrap();
        assert!(s.on_disconnected().is_none());
        assert!(s.watchdog_fired(generation));
        assert!(!s.watchdog_fired(generation));

        let generation = s.on_disconnected().unwrap();
        s.on_connected();
        assert!(!s.watchdog_fired(generation));
    }

    #[test]
    fn test_replay_keeps_order() {
        let mut s = supervisor();
        s.enqueue_replay(vec![
            ChannelEvent::new("newProducer", json!({})),
            ChannelEvent::new("pausedProducer", json!({})),
        ]);
        s.enqueue_replay(vec![ChannelEvent::new("producerEnd", json!({}))]);

        let names: Vec<_> = std::iter::from_fn(|| s.next_replay()).map(|e| e.name).collect();
        assert_eq!(names, vec!["newProducer", "pausedProducer", "producerEnd"]);
        assert!(!s.has_replay());
    }

    #[test]
    fn test_ice_restart_is_bounded() {
        let mut s = supervisor();
        assert_eq!(
            s.begin_ice_restart(TransportRole::Send),
            IceRestartDecision::NotNeeded
        );

        s.transport_failed(TransportRole::Send);
        assert_eq!(s.failed_roles(), vec![TransportRole::Send]);
        assert_eq!(
            s.begin_ice_restart(TransportRole::Send),
            IceRestartDecision::Request { attempt: 1 }
        );
        assert_eq!(
            s.begin_ice_restart(TransportRole::Send),
            IceRestartDecision::InFlight
        );

        for attempt in 2..=3 {
            s.ice_restart_finished(TransportRole::Send);
            assert_eq!(
                s.begin_ice_restart(TransportRole::Send),
                IceRestartDecision::Request { attempt }
            );
        }
        s.ice_restart_finished(TransportRole::Send);
        assert_eq!(
            s.begin_ice_restart(TransportRole::Send),
            IceRestartDecision::Exhausted
        );

        s.transport_recovered(TransportRole::Send);
        assert!(s.all_transports_healthy());
    }
}
