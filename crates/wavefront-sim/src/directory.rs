//! Address resolution for simulated nodes.
//!
//! Point-to-point sends are resolved here rather than through any state
//! the protocol can see. The directory also answers where each node is,
//! since positions follow from the mobility model and the clock.

use std::collections::BTreeMap;

use wavefront_cluster::{Error, NodeId, Timestamp};
use wavefront_geometry::Vec3;

use crate::mobility::MobilityModel;

/// Lookup of reachable nodes and their positions.
pub trait Directory {
    /// Add a node. Returns `false` if the id is already taken.
    fn register(&mut self, id: NodeId, mobility: MobilityModel) -> bool;

    /// Remove a node from further delivery.
    fn depart(&mut self, id: NodeId);

    /// Position of a reachable node.
    fn resolve(&self, id: NodeId, now: Timestamp) -> wavefront_cluster::Result<Vec3>;

    /// Every reachable node with its position.
    fn reachable(&self, now: Timestamp) -> Vec<(NodeId, Vec3)>;
}

#[derive(Debug, Clone)]
struct Entry {
    mobility: MobilityModel,
    departed: bool,
}

/// In-memory directory backed by mobility models.
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    entries: BTreeMap<NodeId, Entry>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Directory for NodeDirectory {
    fn register(&mut self, id: NodeId, mobility: MobilityModel) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(
            id,
            Entry {
                mobility,
                departed: false,
            },
        );
        true
    }

    fn depart(&mut self, id: NodeId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.departed = true;
        }
    }

    fn resolve(&self, id: NodeId, now: Timestamp) -> wavefront_cluster::Result<Vec3> {
        self.entries
            .get(&id)
            .filter(|e| !e.departed)
            .map(|e| e.mobility.position_at(now))
            .ok_or(Error::UnknownNode(id))
    }

    fn reachable(&self, now: Timestamp) -> Vec<(NodeId, Vec3)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.departed)
            .map(|(id, e)| (*id, e.mobility.position_at(now)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_nodes() {
        let mut directory = NodeDirectory::new();
        assert!(directory.register(NodeId(1), MobilityModel::fixed(1.0, 2.0)));
        assert!(!directory.register(NodeId(1), MobilityModel::fixed(0.0, 0.0)));

        assert_eq!(directory.resolve(NodeId(1), Timestamp::ZERO).unwrap(), Vec3::planar(1.0, 2.0));
        assert!(matches!(
            directory.resolve(NodeId(2), Timestamp::ZERO),
            Err(Error::UnknownNode(NodeId(2)))
        ));
    }

    #[test]
    fn departed_nodes_are_unreachable() {
        let mut directory = NodeDirectory::new();
        directory.register(NodeId(1), MobilityModel::fixed(0.0, 0.0));
        directory.register(NodeId(2), MobilityModel::fixed(5.0, 0.0));

        directory.depart(NodeId(1));
        assert!(directory.resolve(NodeId(1), Timestamp::ZERO).is_err());
        let ids: Vec<_> = directory.reachable(Timestamp::ZERO).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![NodeId(2)]);
        assert_eq!(directory.len(), 2);
    }
}
