//! What a node needs from the outside world.
//!
//! A [`ClusterNode`](crate::ClusterNode) performs no I/O. Each handler is
//! handed an [`Environment`] that reads the clock, arms timers, moves packets
//! and reports the node's position. The simulator implements it per node; a
//! test can implement it with a few vectors.

use std::time::Duration;

use wavefront_geometry::Vec3;

use crate::message::{MessageKind, Packet};
use crate::record::NodeId;
use crate::time::Timestamp;

/// Opaque handle of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

/// Every timer a node arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Clustering begins.
    Start,
    /// Clustering ends; heads exchange distribution maps.
    Stop,
    /// Status-driven transmission.
    Send,
    /// INIT election check.
    ElectionCheck,
    /// Registry maintenance pass.
    Maintenance,
    /// Grace period after the map exchange is over.
    Decide,
    /// Retransmit the pending reliable message for `(peer, kind)`.
    Retransmit { peer: NodeId, kind: MessageKind },
    /// Head-to-member schedule broadcast.
    IntraBroadcast,
    /// Local wavefront activation.
    Activate,
    /// End of a single-shot run.
    Complete,
    /// Reverse mode: enter the active window.
    DutyActive,
    /// Reverse mode: enter the inactive window.
    DutyInactive,
    /// Originate an incident event.
    Incident,
}

/// Monotonic time with timers.
pub trait Clock {
    fn now(&self) -> Timestamp;

    /// Fire `timer` after `delay`. Timers due at the same instant fire in
    /// scheduling order.
    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerHandle;

    /// Cancel a pending timer. Cancelling a fired or unknown handle is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Packet delivery. Loss is possible; duplication and corruption are not.
pub trait Transport {
    /// Send to every node in radio range.
    fn broadcast(&mut self, packet: Packet);

    /// Send to one node by id.
    fn send_to(&mut self, peer: NodeId, packet: Packet);
}

/// Position source of the local node.
pub trait Mobility {
    fn position(&self) -> Vec3;
}

/// Everything a handler may touch.
pub trait Environment: Clock + Transport + Mobility {}

impl<T: Clock + Transport + Mobility> Environment for T {}
