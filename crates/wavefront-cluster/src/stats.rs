//! Per-node counters.

use std::time::Duration;

use serde::Serialize;

/// Counters a node keeps about its own activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Reliable messages sent again after their first transmission.
    pub retransmissions: u64,
    /// Degree or cluster changes.
    pub role_changes: u64,
    /// InitiateCluster and FormCluster messages sent.
    pub formation_messages: u64,
    pub activations: u64,
    pub incidents_originated: u64,
    /// Own incidents heard back through the cluster head.
    pub incidents_returned: u64,
    /// Total round trip of returned incidents.
    pub incident_delay: Duration,
}

impl NodeStats {
    /// Mean round trip of returned incidents.
    pub fn mean_incident_delay(&self) -> Option<Duration> {
        let returned = u32::try_from(self.incidents_returned).ok().filter(|n| *n > 0)?;
        Some(self.incident_delay / returned)
    }
}
