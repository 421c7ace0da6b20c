//! Protocol configuration.

use std::f64::consts::{FRAC_PI_2, TAU};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wavefront_density::GridSpec;

use crate::error::{Error, Result};
use crate::time::{duration_ms, option_duration_ms};

/// Upper bound on `max_nodes`.
pub const MAX_NODES_LIMIT: usize = 10_000;

/// Configuration of a clustering node.
///
/// Durations serialize as integer milliseconds. Missing fields take their
/// defaults, so a scenario file only names what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Period of the UPDATE broadcast and the maintenance pass.
    #[serde(with = "duration_ms")]
    pub interval: Duration,

    /// TDMA slot. Backoffs, staggering and retries are multiples of it.
    #[serde(with = "duration_ms")]
    pub minimum_tdma_slot: Duration,

    /// Expected contention. The INIT backoff is `minimum_tdma_slot × max_nodes`.
    pub max_nodes: usize,

    /// Delay before the first transmission.
    #[serde(with = "duration_ms")]
    pub time_window: Duration,

    /// Offers from nodes at or beyond this distance are dropped.
    pub omni_range: f64,

    /// Distribution map cells per side.
    pub grid_size: usize,

    /// Distribution map cell width.
    pub grid_scale: f64,

    /// Full opening angle of the forwarding sector, in radians.
    pub propagation_sector_angle: f64,

    /// Acceptance radius when picking forwarding candidates.
    pub candidate_radius: f64,

    /// Sector radius for node-to-node relaxation.
    pub relay_range: f64,

    /// Duty-cycle mode instead of single-shot activation.
    pub reverse_propagation: bool,

    /// Only nodes flagged as starting nodes accept a starting-node schedule.
    pub disable_starting_node_override: bool,

    /// When clustering begins.
    #[serde(with = "duration_ms")]
    pub clustering_start: Duration,

    /// When clustering ends and the distribution maps are exchanged.
    #[serde(with = "option_duration_ms")]
    pub clustering_stop: Option<Duration>,

    /// Cap on an encoded packet.
    pub max_packet_bytes: usize,

    /// Retransmission period, in TDMA slots.
    pub retry_slots: u32,

    /// Time between the map exchange and the propagation decision.
    #[serde(with = "duration_ms")]
    pub exchange_grace: Duration,

    /// Lead time between deciding on a wavefront and its start.
    #[serde(with = "duration_ms")]
    pub start_lead: Duration,

    /// How long a node runs before completing.
    #[serde(with = "duration_ms")]
    pub run_duration: Duration,

    /// Safety factor on inter-cluster delays.
    pub delay_margin: f64,

    /// Slots between consecutive inter-cluster forwards.
    pub forward_slot_stride: u32,

    /// Reverse mode: delay before the first activation.
    #[serde(with = "duration_ms")]
    pub reverse_activation_delay: Duration,

    /// Reverse mode: extra offset added to the phase.
    #[serde(with = "duration_ms")]
    pub reverse_offset: Duration,

    /// Reverse mode: length of the active window.
    #[serde(with = "duration_ms")]
    pub active_window: Duration,

    /// Reverse mode: length of the inactive window.
    #[serde(with = "duration_ms")]
    pub inactive_window: Duration,

    /// Period of originated incident events. `None` disables them.
    #[serde(with = "option_duration_ms")]
    pub incident_interval: Option<Duration>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            minimum_tdma_slot: Duration::from_millis(1),
            max_nodes: 100,
            time_window: Duration::from_secs(1),
            omni_range: 100.0,
            grid_size: 20,
            grid_scale: 10.0,
            propagation_sector_angle: FRAC_PI_2,
            candidate_radius: 100.0,
            relay_range: 100.0,
            reverse_propagation: false,
            disable_starting_node_override: false,
            clustering_start: Duration::ZERO,
            clustering_stop: None,
            max_packet_bytes: 2296,
            retry_slots: 250,
            exchange_grace: Duration::from_secs(1),
            start_lead: Duration::from_secs(5),
            run_duration: Duration::from_millis(1_500),
            delay_margin: 1.3,
            forward_slot_stride: 50,
            reverse_activation_delay: Duration::from_millis(100),
            reverse_offset: Duration::from_secs(3),
            active_window: Duration::from_secs(1),
            inactive_window: Duration::from_secs(19),
            incident_interval: None,
        }
    }
}

impl ClusterConfig {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_slot(mut self, slot: Duration) -> Self {
        self.minimum_tdma_slot = slot;
        self
    }

    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    #[must_use]
    pub fn with_omni_range(mut self, range: f64) -> Self {
        self.omni_range = range;
        self
    }

    #[must_use]
    pub fn with_grid(mut self, size: usize, scale: f64) -> Self {
        self.grid_size = size;
        self.grid_scale = scale;
        self
    }

    #[must_use]
    pub fn with_sector_angle(mut self, theta: f64) -> Self {
        self.propagation_sector_angle = theta;
        self
    }

    /// Set the start and stop of the clustering phase.
    #[must_use]
    pub fn with_clustering_window(mut self, start: Duration, stop: Option<Duration>) -> Self {
        self.clustering_start = start;
        self.clustering_stop = stop;
        self
    }

    #[must_use]
    pub fn with_reverse_propagation(mut self, enabled: bool) -> Self {
        self.reverse_propagation = enabled;
        self
    }

    #[must_use]
    pub fn with_starting_node_override_disabled(mut self, disabled: bool) -> Self {
        self.disable_starting_node_override = disabled;
        self
    }

    #[must_use]
    pub fn with_incident_interval(mut self, interval: Option<Duration>) -> Self {
        self.incident_interval = interval;
        self
    }

    /// INIT backoff: one slot per expected node.
    pub fn contention_backoff(&self) -> Duration {
        self.minimum_tdma_slot
            .saturating_mul(u32::try_from(self.max_nodes).unwrap_or(u32::MAX))
    }

    /// Neighbor timeout: two update intervals.
    pub fn neighbor_timeout(&self) -> Duration {
        self.interval.saturating_mul(2)
    }

    /// Retransmission period of the reliable sender.
    pub fn retry_interval(&self) -> Duration {
        self.minimum_tdma_slot.saturating_mul(self.retry_slots)
    }

    /// Gap between consecutive inter-cluster forwards.
    pub fn forward_stride(&self) -> Duration {
        self.minimum_tdma_slot.saturating_mul(self.forward_slot_stride)
    }

    /// One active plus one inactive window.
    pub fn duty_cycle_period(&self) -> Duration {
        self.active_window.saturating_add(self.inactive_window)
    }

    /// Distribution map grid.
    pub fn grid(&self) -> GridSpec {
        GridSpec::new(self.grid_size, self.grid_scale)
    }

    /// Reject values the protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_nodes == 0 {
            return Err(Error::config("max_nodes", "must be positive"));
        }
        if self.max_nodes > MAX_NODES_LIMIT {
            return Err(Error::config(
                "max_nodes",
                format!("{} exceeds the limit of {MAX_NODES_LIMIT}", self.max_nodes),
            ));
        }
        if self.interval.is_zero() {
            return Err(Error::config("interval", "must be non-zero"));
        }
        if self.minimum_tdma_slot.is_zero() {
            return Err(Error::config("minimum_tdma_slot", "must be non-zero"));
        }
        if self.grid_size < 2 {
            return Err(Error::config("grid_size", format!("{} is below 2", self.grid_size)));
        }
        if !(self.grid_scale > 0.0 && self.grid_scale.is_finite()) {
            return Err(Error::config("grid_scale", format!("{} is not positive", self.grid_scale)));
        }
        let theta = self.propagation_sector_angle;
        if !(theta > 0.0 && theta <= TAU) {
            return Err(Error::config(
                "propagation_sector_angle",
                format!("{theta} is outside (0, 2π]"),
            ));
        }
        for (field, range) in [
            ("omni_range", self.omni_range),
            ("candidate_radius", self.candidate_radius),
            ("relay_range", self.relay_range),
        ] {
            if !(range > 0.0) {
                return Err(Error::config(field, format!("{range} is not positive")));
            }
        }
        if !(self.delay_margin >= 1.0) {
            return Err(Error::config("delay_margin", format!("{} is below 1", self.delay_margin)));
        }
        if self.max_packet_bytes == 0 {
            return Err(Error::config("max_packet_bytes", "must be positive"));
        }
        if self.reverse_propagation && self.duty_cycle_period().is_zero() {
            return Err(Error::config("active_window", "duty cycle period must be non-zero"));
        }
        Ok(())
    }
}
