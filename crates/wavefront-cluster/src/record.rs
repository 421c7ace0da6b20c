//! Node identity and cluster role.

use serde::{Deserialize, Serialize};
use wavefront_geometry::{Vec2, Vec3};

use crate::time::Timestamp;

/// Unique node identifier (the vehicle's IMSI in a cellular deployment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a node within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Degree {
    /// Not attached to any cluster.
    #[default]
    Standalone,
    /// Cluster head (CH).
    ClusterHead,
    /// Cluster member (CM).
    ClusterMember,
}

impl std::fmt::Display for Degree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => write!(f, "STANDALONE"),
            Self::ClusterHead => write!(f, "CH"),
            Self::ClusterMember => write!(f, "CM"),
        }
    }
}

/// What a node knows about one node, itself included.
///
/// Role changes go through [`become_head`](Self::become_head),
/// [`join`](Self::join) and [`become_standalone`](Self::become_standalone),
/// which keep `degree == ClusterHead ⇔ cluster_id == Some(id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub position: Vec3,
    degree: Degree,
    cluster_id: Option<NodeId>,
    ch_address: Option<NodeId>,
    /// When this record was last refreshed.
    pub timestamp: Timestamp,
    pub is_starting_node: bool,
    /// Initial wavefront velocity of a starting node.
    pub base_direction: Option<Vec2>,
}

impl NodeRecord {
    /// A standalone record.
    pub fn new(id: NodeId, position: Vec3, timestamp: Timestamp) -> Self {
        Self {
            id,
            position,
            degree: Degree::Standalone,
            cluster_id: None,
            ch_address: None,
            timestamp,
            is_starting_node: false,
            base_direction: None,
        }
    }

    /// Builder: mark as cluster head.
    #[must_use]
    pub fn as_head(mut self) -> Self {
        self.become_head();
        self
    }

    /// Builder: mark as member of `head`'s cluster.
    #[must_use]
    pub fn as_member_of(mut self, head: NodeId) -> Self {
        self.join(head);
        self
    }

    /// Builder: mark as a starting node with the given velocity.
    #[must_use]
    pub fn as_starting_node(mut self, direction: Vec2) -> Self {
        self.is_starting_node = true;
        self.base_direction = Some(direction);
        self
    }

    #[must_use]
    pub const fn degree(&self) -> Degree {
        self.degree
    }

    /// Cluster this node belongs to; `None` while standalone.
    #[must_use]
    pub const fn cluster_id(&self) -> Option<NodeId> {
        self.cluster_id
    }

    /// Address of the node's cluster head.
    #[must_use]
    pub const fn ch_address(&self) -> Option<NodeId> {
        self.ch_address
    }

    #[must_use]
    pub fn is_head(&self) -> bool {
        self.degree == Degree::ClusterHead
    }

    #[must_use]
    pub fn is_member(&self) -> bool {
        self.degree == Degree::ClusterMember
    }

    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.degree == Degree::Standalone
    }

    /// Whether this node belongs to the cluster headed by `head`.
    #[must_use]
    pub fn belongs_to(&self, head: NodeId) -> bool {
        self.cluster_id == Some(head)
    }

    /// Ground-plane position.
    #[must_use]
    pub const fn planar(&self) -> Vec2 {
        self.position.xy()
    }

    /// Become the head of a cluster named after this node. Returns whether anything changed.
    pub fn become_head(&mut self) -> bool {
        self.set_role(Degree::ClusterHead, Some(self.id))
    }

    /// Join `head`'s cluster as a member. Joining oneself makes the node head.
    pub fn join(&mut self, head: NodeId) -> bool {
        if head == self.id {
            return self.become_head();
        }
        self.set_role(Degree::ClusterMember, Some(head))
    }

    /// Leave any cluster.
    pub fn become_standalone(&mut self) -> bool {
        self.set_role(Degree::Standalone, None)
    }

    fn set_role(&mut self, degree: Degree, cluster: Option<NodeId>) -> bool {
        let changed = self.degree != degree || self.cluster_id != cluster;
        self.degree = degree;
        self.cluster_id = cluster;
        self.ch_address = cluster;
        changed
    }

    /// Check the role invariant. Records decoded from the wire may violate it.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.degree {
            Degree::ClusterHead => self.cluster_id == Some(self.id),
            Degree::ClusterMember => self.cluster_id.is_some_and(|c| c != self.id),
            Degree::Standalone => self.cluster_id.is_none(),
        }
    }
}

impl std::fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cluster_id {
            Some(cluster) => write!(f, "node {} [{} of {}] at {}", self.id, self.degree, cluster, self.position),
            None => write!(f, "node {} [{}] at {}", self.id, self.degree, self.position),
        }
    }
}
