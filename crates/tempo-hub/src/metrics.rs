//! Telemetry counters
//!
//! Plain counters owned by whoever runs the loop. Nothing here is shared or
//! atomic; the server thread hands its [`LoopMetrics`] back when it stops.

use serde::{Deserialize, Serialize};

/// Counters for the server loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopMetrics {
    /// Scheduler iterations run
    pub iterations: u64,
    /// Fixed simulation steps run
    pub sim_ticks: u64,
    /// Gameplay events raised by the simulation
    pub game_events: u64,
    /// Simulation steps skipped because an iteration hit its step cap
    pub sim_ticks_dropped: u64,
    /// Pose broadcasts sent
    pub broadcasts: u64,
    /// Ping rounds sent
    pub pings: u64,
    /// Messages taken off the internal bus
    pub messages_drained: u64,
    /// Input samples stored
    pub inputs_received: u64,
    /// Input samples refused (not newer, wrong owner, wrong state)
    pub inputs_dropped: u64,
    /// Entity steps skipped for lack of input
    pub starved_ticks: u64,
    /// Datagrams that failed to decode
    pub malformed_packets: u64,
    /// Packets naming an entity that no longer exists
    pub stale_handles: u64,
    /// Connections accepted
    pub connections: u64,
    /// Connections refused
    pub refusals: u64,
}

impl LoopMetrics {
    /// Fraction of entity steps that ran without input
    pub fn starvation_ratio(&self) -> f64 {
        let total = self.starved_ticks + self.inputs_received;
        if total == 0 {
            0.0
        } else {
            self.starved_ticks as f64 / total as f64
        }
    }
}

/// Counters for one client session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetrics {
    pub frames: u64,
    pub samples_sent: u64,
    pub snapshots_applied: u64,
    pub snapshots_stale: u64,
    /// Samples re-applied by reconciliation
    pub replayed: u64,
    pub desyncs: u64,
    pub resyncs: u64,
    /// Remote entities snapped by a large jump
    pub snaps: u64,
    pub malformed_packets: u64,
    pub pings_echoed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starvation_ratio() {
        let mut metrics = LoopMetrics::default();
        assert_eq!(metrics.starvation_ratio(), 0.0);
        metrics.starved_ticks = 1;
        metrics.inputs_received = 3;
        assert_eq!(metrics.starvation_ratio(), 0.25);
    }
}
