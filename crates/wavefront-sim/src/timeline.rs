//! Simulation timeline and cluster snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wavefront_cluster::{Degree, MessageKind, NodeId, NodeStatus, Timestamp};
use wavefront_geometry::Vec3;

use crate::channel::DropReason;

/// Events recorded while a scenario runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SimEvent {
    /// A node moved through its state machine.
    StatusChanged {
        node: NodeId,
        from: NodeStatus,
        to: NodeStatus,
        time: Timestamp,
    },

    /// A node changed degree or cluster.
    RoleChanged {
        node: NodeId,
        degree: Degree,
        cluster: Option<NodeId>,
        time: Timestamp,
    },

    /// A packet reached a node.
    Delivered {
        from: NodeId,
        to: NodeId,
        kinds: Vec<MessageKind>,
        time: Timestamp,
    },

    /// A packet was lost on the way to a node.
    Dropped {
        from: NodeId,
        to: NodeId,
        kinds: Vec<MessageKind>,
        reason: DropReason,
        time: Timestamp,
    },

    /// The wavefront activated a node.
    Activated {
        node: NodeId,
        position: Vec3,
        time: Timestamp,
    },

    /// A node left the network.
    Departed { node: NodeId, time: Timestamp },
}

impl SimEvent {
    /// When the event happened.
    pub fn time(&self) -> Timestamp {
        match self {
            SimEvent::StatusChanged { time, .. } => *time,
            SimEvent::RoleChanged { time, .. } => *time,
            SimEvent::Delivered { time, .. } => *time,
            SimEvent::Dropped { time, .. } => *time,
            SimEvent::Activated { time, .. } => *time,
            SimEvent::Departed { time, .. } => *time,
        }
    }
}

/// Ordered record of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    events: Vec<SimEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every activation as `(node, time)`, in order.
    pub fn activations(&self) -> Vec<(NodeId, Timestamp)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Activated { node, time, .. } => Some((*node, *time)),
                _ => None,
            })
            .collect()
    }

    /// Times a packet carrying `kind` left `from` for `to`, whether it
    /// arrived or not.
    pub fn transmissions(&self, from: NodeId, to: NodeId, kind: MessageKind) -> Vec<Timestamp> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Delivered {
                    from: f,
                    to: t,
                    kinds,
                    time,
                }
                | SimEvent::Dropped {
                    from: f,
                    to: t,
                    kinds,
                    time,
                    ..
                } if *f == from && *t == to && kinds.contains(&kind) => Some(*time),
                _ => None,
            })
            .collect()
    }

    /// Times `kind` from `from` actually reached `to`.
    pub fn deliveries(&self, from: NodeId, to: NodeId, kind: MessageKind) -> Vec<Timestamp> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Delivered {
                    from: f,
                    to: t,
                    kinds,
                    time,
                } if *f == from && *t == to && kinds.contains(&kind) => Some(*time),
                _ => None,
            })
            .collect()
    }

    /// States `node` entered, in order.
    pub fn statuses(&self, node: NodeId) -> Vec<(NodeStatus, Timestamp)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SimEvent::StatusChanged { node: n, to, time, .. } if *n == node => Some((*to, *time)),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// One node at the moment of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub status: NodeStatus,
    pub degree: Degree,
    pub cluster: Option<NodeId>,
    pub position: Vec3,
    pub start_time: Timestamp,
    pub activations: u64,
}

/// Cluster structure derived from node summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Heads and their members.
    pub clusters: BTreeMap<NodeId, Vec<NodeId>>,
    pub standalone: Vec<NodeId>,
    /// Members whose head is not a head, or not present.
    pub dangling: Vec<NodeId>,
    /// Nodes where being head and leading their own cluster disagree.
    pub inconsistent: Vec<NodeId>,
}

impl ClusterSummary {
    pub fn from_nodes(nodes: &[NodeSummary]) -> Self {
        let mut summary = Self::default();
        for node in nodes.iter().filter(|n| n.degree == Degree::ClusterHead) {
            summary.clusters.insert(node.id, Vec::new());
        }

        for node in nodes {
            if (node.degree == Degree::ClusterHead) != (node.cluster == Some(node.id)) {
                summary.inconsistent.push(node.id);
            }
            match (node.degree, node.cluster) {
                (Degree::ClusterHead, _) => {}
                (Degree::ClusterMember, Some(head)) => match summary.clusters.get_mut(&head) {
                    Some(members) => members.push(node.id),
                    None => summary.dangling.push(node.id),
                },
                (Degree::ClusterMember, None) => summary.dangling.push(node.id),
                (Degree::Standalone, _) => summary.standalone.push(node.id),
            }
        }
        summary
    }

    pub fn head_count(&self) -> usize {
        self.clusters.len()
    }

    /// Head of the cluster containing `node`.
    pub fn head_of(&self, node: NodeId) -> Option<NodeId> {
        self.clusters
            .iter()
            .find(|(head, members)| **head == node || members.contains(&node))
            .map(|(head, _)| *head)
    }

    /// Every node is a head or the member of a live head.
    pub fn is_settled(&self) -> bool {
        self.standalone.is_empty() && self.dangling.is_empty() && self.inconsistent.is_empty()
    }
}

/// State of every live node at one instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: Timestamp,
    pub nodes: Vec<NodeSummary>,
    pub clusters: ClusterSummary,
}

impl Snapshot {
    pub fn new(time: Timestamp, nodes: Vec<NodeSummary>) -> Self {
        let clusters = ClusterSummary::from_nodes(&nodes);
        Self { time, nodes, clusters }
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSummary> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
