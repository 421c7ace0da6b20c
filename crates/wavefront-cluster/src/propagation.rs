//! Wavefront timing and direction.
//!
//! [`plan_propagation`] picks, for every neighboring cluster whose
//! distribution map is known, the nearest dense cell inside the forwarding
//! sector, and derives the outgoing direction toward it.
//! [`PropagationState`] holds the local schedule and enforces the ratchet:
//! start times only move earlier, and never into the past.

use std::time::Duration;

use wavefront_density::DistributionMap;
use wavefront_geometry::{distance, is_in_sector, Vec2};

use crate::record::NodeId;
use crate::time::Timestamp;

/// Local wavefront schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationState {
    /// Velocity of the wavefront as seen by this node.
    pub direction: Option<Vec2>,
    start_time: Timestamp,
    first_start_time: Timestamp,
    first_start_node: Option<NodeId>,
}

impl Default for PropagationState {
    fn default() -> Self {
        Self {
            direction: None,
            start_time: Timestamp::MAX,
            first_start_time: Timestamp::MAX,
            first_start_node: None,
        }
    }
}

impl PropagationState {
    /// When this node activates. [`Timestamp::MAX`] while unscheduled.
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Earliest known start of the wavefront in this cluster.
    pub fn first_start_time(&self) -> Timestamp {
        self.first_start_time
    }

    /// Node the cluster's wavefront starts from.
    pub fn first_start_node(&self) -> Option<NodeId> {
        self.first_start_node
    }

    pub fn is_scheduled(&self) -> bool {
        !self.start_time.is_never()
    }

    /// Lower the local start time to `candidate` if `now < candidate < start`.
    pub fn relax_start(&mut self, candidate: Timestamp, now: Timestamp) -> bool {
        if now < candidate && candidate < self.start_time {
            self.start_time = candidate;
            return true;
        }
        false
    }

    /// Adopt a schedule from the cluster head if `now < candidate <= start`.
    ///
    /// The adopted time also becomes the cluster's first start, owned by
    /// `node`, unless an earlier first start is already known.
    pub fn adopt_start(&mut self, candidate: Timestamp, node: NodeId, now: Timestamp) -> bool {
        if now < candidate && candidate <= self.start_time {
            self.start_time = candidate;
            if candidate <= self.first_start_time {
                self.first_start_time = candidate;
                self.first_start_node = Some(node);
            }
            return true;
        }
        false
    }

    /// Lower the cluster's first start to `candidate`, owned by `node`, if
    /// `now < candidate < first_start`.
    pub fn relax_first_start(&mut self, candidate: Timestamp, node: NodeId, now: Timestamp) -> bool {
        if now < candidate && candidate < self.first_start_time {
            self.first_start_time = candidate;
            self.first_start_node = Some(node);
            return true;
        }
        false
    }

    /// Start locally at the cluster's first start, if that is earlier.
    pub fn start_with_cluster(&mut self) -> bool {
        if self.first_start_time < self.start_time {
            self.start_time = self.first_start_time;
            return true;
        }
        false
    }
}

/// Forwarding target inside one neighboring cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forward {
    pub cluster_id: NodeId,
    /// Position of the chosen dense cell.
    pub destination: Vec2,
    /// Outgoing velocity toward `destination`, at the incoming speed.
    pub direction: Vec2,
}

/// Result of [`plan_propagation`].
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationPlan {
    pub forwards: Vec<Forward>,
    /// Normalized sum of the forward directions at the incoming speed; the
    /// incoming direction when nothing was forwarded.
    pub combined_direction: Vec2,
}

/// A neighboring cluster as the planner sees it.
#[derive(Debug, Clone, Copy)]
pub struct NeighborMap<'a> {
    pub cluster_id: NodeId,
    /// Position of the cluster head the map is centred on.
    pub head: Vec2,
    pub map: &'a DistributionMap,
}

/// Choose forwarding candidates for a wavefront leaving `source` with
/// velocity `incoming`.
///
/// A cell qualifies when its relative density is above 1.0 and it lies in
/// the sector of `radius` and opening `theta` around `incoming`. Per cluster
/// the qualifying cell nearest to `source` wins.
pub fn plan_propagation<'a>(
    source: Vec2,
    incoming: Vec2,
    clusters: impl IntoIterator<Item = NeighborMap<'a>>,
    radius: f64,
    theta: f64,
) -> PropagationPlan {
    let speed = incoming.length();
    let mut forwards = Vec::new();

    for neighbor in clusters {
        let nearest = neighbor
            .map
            .dense_positions(neighbor.head)
            .filter(|cell| is_in_sector(source, *cell, incoming, radius, theta))
            .min_by(|a, b| distance(source, *a).total_cmp(&distance(source, *b)));

        if let Some(destination) = nearest {
            let direction = (destination - source).with_length(speed).unwrap_or(incoming);
            forwards.push(Forward {
                cluster_id: neighbor.cluster_id,
                destination,
                direction,
            });
        }
    }

    let combined_direction = forwards
        .iter()
        .fold(Vec2::ZERO, |acc, f| acc + f.direction)
        .with_length(speed)
        .filter(|_| !forwards.is_empty())
        .unwrap_or(incoming);

    PropagationPlan {
        forwards,
        combined_direction,
    }
}

/// Direction a relaying node adopts when it has none of its own: the
/// incoming speed along the bisector of the incoming direction and the
/// sender-to-self bearing.
pub fn relay_direction(incoming: Vec2, sender: Vec2, receiver: Vec2) -> Vec2 {
    let speed = incoming.length();
    let along = incoming.normalized().unwrap_or(Vec2::ZERO);
    let away = (receiver - sender).normalized().unwrap_or(Vec2::ZERO);
    (along + away).with_length(speed).unwrap_or(incoming)
}

/// Time for the wavefront to cover `distance` at `speed`.
pub fn travel_time(distance: f64, speed: f64) -> Option<Duration> {
    if !(speed > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(distance / speed).ok()
}

/// Wait before the first active window in reverse mode.
///
/// The phase `now - start` is wrapped forward by whole periods until it is
/// non-negative, then shifted by `offset`.
pub fn duty_cycle_offset(now: Timestamp, start: Timestamp, period: Duration, offset: Duration) -> Duration {
    let period_us = i128::try_from(period.as_micros()).unwrap_or(i128::MAX).max(1);
    let mut phase = i128::from(now.as_micros()) - i128::from(start.as_micros());
    if phase < 0 {
        let periods = (-phase + period_us - 1) / period_us;
        phase += periods * period_us;
    }
    let phase = u64::try_from(phase).unwrap_or(u64::MAX);
    Duration::from_micros(phase).saturating_add(offset)
}
