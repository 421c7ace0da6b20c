//! Neighbor and cluster bookkeeping.
//!
//! Three soft-state tables, all keyed by node id:
//!
//! - `neighbors`: every node heard within range
//! - `cluster_members`: neighbors that name the local node as their head
//! - `neighbor_clusters`: one representative record per foreign cluster,
//!   keyed by that cluster's id
//!
//! Entries are stamped with the local receive time and expire after the
//! configured timeout (twice the update interval).

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::trace;

use crate::record::{NodeId, NodeRecord};
use crate::time::Timestamp;

/// How much a neighbor-cluster record can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Heard from the cluster head itself, or carried by its distribution map.
    Authoritative,
    /// Reported by a member or relayed as gossip. May carry a member's position.
    Hearsay,
}

/// What a maintenance pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceOutcome {
    /// Neighbors that timed out.
    pub expired: Vec<NodeId>,
    /// Neighbor clusters that timed out.
    pub expired_clusters: Vec<NodeId>,
    /// The local head timed out; the local node is now standalone.
    pub lost_head: bool,
    /// The local node is a member whose head is no longer heard as a head.
    pub orphaned: bool,
    /// The neighbor table emptied and the local node declared itself head.
    pub became_head: bool,
}

impl MaintenanceOutcome {
    /// Whether the local node's role changed.
    pub fn role_changed(&self) -> bool {
        self.lost_head || self.orphaned || self.became_head
    }
}

/// The three registries of a node.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    neighbors: BTreeMap<NodeId, NodeRecord>,
    cluster_members: BTreeMap<NodeId, NodeRecord>,
    neighbor_clusters: BTreeMap<NodeId, NodeRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a neighbor.
    pub fn upsert(&mut self, record: NodeRecord) {
        self.neighbors.insert(record.id, record);
    }

    /// Insert or refresh a member of the local cluster.
    pub fn upsert_member(&mut self, record: NodeRecord) {
        self.cluster_members.insert(record.id, record);
    }

    pub fn remove_member(&mut self, id: NodeId) -> Option<NodeRecord> {
        self.cluster_members.remove(&id)
    }

    /// Record a foreign cluster under `cluster`.
    ///
    /// Hearsay only inserts unknown clusters or refreshes the timestamp of a
    /// known one; it never moves a known head's position.
    pub fn record_neighbor_cluster(&mut self, cluster: NodeId, record: NodeRecord, provenance: Provenance) {
        match (self.neighbor_clusters.get_mut(&cluster), provenance) {
            (Some(existing), Provenance::Hearsay) => {
                existing.timestamp = existing.timestamp.max(record.timestamp);
            }
            (_, Provenance::Authoritative) | (None, Provenance::Hearsay) => {
                self.neighbor_clusters.insert(cluster, record);
            }
        }
    }

    pub fn remove_neighbor_cluster(&mut self, cluster: NodeId) -> Option<NodeRecord> {
        self.neighbor_clusters.remove(&cluster)
    }

    pub fn neighbor(&self, id: NodeId) -> Option<&NodeRecord> {
        self.neighbors.get(&id)
    }

    pub fn member(&self, id: NodeId) -> Option<&NodeRecord> {
        self.cluster_members.get(&id)
    }

    pub fn neighbor_cluster(&self, cluster: NodeId) -> Option<&NodeRecord> {
        self.neighbor_clusters.get(&cluster)
    }

    pub fn is_neighbor(&self, id: NodeId) -> bool {
        self.neighbors.contains_key(&id)
    }

    /// Neighbors in ascending id order.
    pub fn neighbors(&self) -> impl Iterator<Item = &NodeRecord> {
        self.neighbors.values()
    }

    /// Members in ascending id order.
    pub fn members(&self) -> impl Iterator<Item = &NodeRecord> {
        self.cluster_members.values()
    }

    /// Foreign clusters as `(cluster id, representative)`.
    pub fn neighbor_clusters(&self) -> impl Iterator<Item = (NodeId, &NodeRecord)> {
        self.neighbor_clusters.iter().map(|(id, r)| (*id, r))
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn member_count(&self) -> usize {
        self.cluster_members.len()
    }

    pub fn neighbor_cluster_count(&self) -> usize {
        self.neighbor_clusters.len()
    }

    /// Highest-id cluster head among the neighbors: the merge target.
    pub fn highest_id_candidate_head(&self) -> Option<NodeId> {
        self.neighbors
            .values()
            .filter(|r| r.is_head())
            .map(|r| r.id)
            .max()
    }

    /// Whether `local` outranks every neighbor that is not already a member.
    ///
    /// Members do not compete in elections, so a node can win while hearing
    /// higher ids that are already attached elsewhere.
    pub fn self_has_max_id(&self, local: NodeId) -> bool {
        self.neighbors
            .values()
            .filter(|r| !r.is_member())
            .all(|r| r.id < local)
    }

    /// Drop neighbors not refreshed within `timeout`.
    ///
    /// Applies the two role consequences: losing the head makes `local`
    /// standalone, and an emptied table makes a non-head `local` its own head.
    pub fn prune(&mut self, local: &mut NodeRecord, now: Timestamp, timeout: Duration) -> MaintenanceOutcome {
        let mut outcome = MaintenanceOutcome::default();

        let expired: Vec<NodeId> = self
            .neighbors
            .values()
            .filter(|r| now.saturating_duration_since(r.timestamp) > timeout)
            .map(|r| r.id)
            .collect();

        for id in &expired {
            self.neighbors.remove(id);
            self.cluster_members.remove(id);
            trace!(node = %local.id, neighbor = %id, "Neighbor timed out");

            if local.cluster_id() == Some(*id) && !local.is_head() {
                local.become_standalone();
                outcome.lost_head = true;
            }
        }

        if !expired.is_empty() && self.neighbors.is_empty() && !local.is_head() {
            local.become_head();
            outcome.became_head = true;
        }

        outcome.expired = expired;
        outcome
    }

    /// Periodic maintenance pass.
    ///
    /// 1. Drop members that moved to another cluster.
    /// 2. Refresh foreign clusters from neighboring heads.
    /// 3. [`prune`](Self::prune) timed-out neighbors.
    /// 4. A member whose head is no longer heard as a head becomes standalone.
    /// 5. Expire foreign clusters.
    pub fn maintain(&mut self, local: &mut NodeRecord, now: Timestamp, timeout: Duration) -> MaintenanceOutcome {
        let mut head_visible = false;

        for (id, neighbor) in &self.neighbors {
            if local.cluster_id() == Some(*id) && neighbor.is_head() {
                head_visible = true;
            }

            if self.cluster_members.contains_key(id) && !neighbor.belongs_to(local.id) {
                self.cluster_members.remove(id);
            }

            if neighbor.is_head() && local.cluster_id() != Some(*id) {
                self.neighbor_clusters
                    .entry(*id)
                    .or_insert_with(|| neighbor.clone());
            } else if self.neighbor_clusters.contains_key(id) {
                self.neighbor_clusters.remove(id);
            }
        }

        let mut outcome = self.prune(local, now, timeout);

        if local.is_member() && !head_visible && !outcome.lost_head {
            local.become_standalone();
            outcome.orphaned = true;
        }

        let expired_clusters: Vec<NodeId> = self
            .neighbor_clusters
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.timestamp) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired_clusters {
            self.neighbor_clusters.remove(id);
        }
        outcome.expired_clusters = expired_clusters;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavefront_geometry::Vec3;

    const TIMEOUT: Duration = Duration::from_millis(600);

    fn rec(id: u64, at_ms: u64) -> NodeRecord {
        NodeRecord::new(NodeId(id), Vec3::planar(id as f64, 0.0), Timestamp::from_millis(at_ms))
    }

    #[test]
    fn highest_candidate_head_ignores_non_heads() {
        let mut reg = Registry::new();
        reg.upsert(rec(50, 0));
        reg.upsert(rec(10, 0).as_head());
        reg.upsert(rec(30, 0).as_head());
        reg.upsert(rec(40, 0).as_member_of(NodeId(30)));
        assert_eq!(reg.highest_id_candidate_head(), Some(NodeId(30)));
    }

    #[test]
    fn no_candidate_head_without_heads() {
        let mut reg = Registry::new();
        reg.upsert(rec(1, 0));
        assert_eq!(reg.highest_id_candidate_head(), None);
    }

    #[test]
    fn max_id_skips_members() {
        let mut reg = Registry::new();
        reg.upsert(rec(3, 0));
        reg.upsert(rec(9, 0).as_member_of(NodeId(12)));
        assert!(reg.self_has_max_id(NodeId(5)));

        reg.upsert(rec(7, 0));
        assert!(!reg.self_has_max_id(NodeId(5)));
    }

    #[test]
    fn isolated_node_has_max_id() {
        assert!(Registry::new().self_has_max_id(NodeId(0)));
    }

    #[test]
    fn prune_removes_only_stale_entries() {
        let mut reg = Registry::new();
        let mut local = rec(1, 0).as_head();
        reg.upsert(rec(2, 0));
        reg.upsert(rec(3, 500));

        // 600ms is not *more* than the timeout.
        let out = reg.prune(&mut local, Timestamp::from_millis(600), TIMEOUT);
        assert!(out.expired.is_empty());

        let out = reg.prune(&mut local, Timestamp::from_millis(601), TIMEOUT);
        assert_eq!(out.expired, vec![NodeId(2)]);
        assert!(reg.is_neighbor(NodeId(3)));
        assert!(!out.role_changed());
    }

    #[test]
    fn losing_head_makes_member_standalone() {
        let mut reg = Registry::new();
        let mut local = rec(1, 0).as_member_of(NodeId(9));
        reg.upsert(rec(9, 0).as_head());
        reg.upsert(rec(4, 1_000));

        let out = reg.prune(&mut local, Timestamp::from_millis(1_000), TIMEOUT);
        assert!(out.lost_head);
        assert!(local.is_standalone());
        assert!(!out.became_head);
    }

    #[test]
    fn emptied_table_makes_node_head() {
        let mut reg = Registry::new();
        let mut local = rec(1, 0).as_member_of(NodeId(9));
        reg.upsert(rec(9, 0).as_head());

        let out = reg.prune(&mut local, Timestamp::from_secs(5), TIMEOUT);
        assert!(out.lost_head);
        assert!(out.became_head);
        assert!(local.is_head());
        assert!(local.is_consistent());
    }

    #[test]
    fn maintain_drops_members_that_left() {
        let mut reg = Registry::new();
        let mut local = rec(1, 0).as_head();
        let member = rec(2, 100).as_member_of(NodeId(1));
        reg.upsert(member.clone());
        reg.upsert_member(member);
        reg.upsert(rec(2, 100).as_member_of(NodeId(8)));

        reg.maintain(&mut local, Timestamp::from_millis(200), TIMEOUT);
        assert_eq!(reg.member_count(), 0);
    }

    #[test]
    fn maintain_tracks_foreign_heads() {
        let mut reg = Registry::new();
        let mut local = rec(1, 0).as_member_of(NodeId(5));
        reg.upsert(rec(5, 100).as_head());
        reg.upsert(rec(8, 100).as_head());

        let out = reg.maintain(&mut local, Timestamp::from_millis(200), TIMEOUT);
        assert!(!out.role_changed());
        assert!(reg.neighbor_cluster(NodeId(8)).is_some());
        assert!(reg.neighbor_cluster(NodeId(5)).is_none(), "own head is not foreign");
    }

    #[test]
    fn maintain_orphans_member_without_visible_head() {
        let mut reg = Registry::new();
        let mut local = rec(1, 0).as_member_of(NodeId(5));
        // Head merged into another cluster.
        reg.upsert(rec(5, 100).as_member_of(NodeId(8)));

        let out = reg.maintain(&mut local, Timestamp::from_millis(200), TIMEOUT);
        assert!(out.orphaned);
        assert!(local.is_standalone());
    }

    #[test]
    fn maintain_expires_foreign_clusters() {
        let mut reg = Registry::new();
        let mut local = rec(1, 0).as_head();
        reg.record_neighbor_cluster(NodeId(20), rec(20, 0).as_head(), Provenance::Authoritative);
        reg.upsert(rec(2, 1_000));

        let out = reg.maintain(&mut local, Timestamp::from_millis(1_000), TIMEOUT);
        assert_eq!(out.expired_clusters, vec![NodeId(20)]);
        assert_eq!(reg.neighbor_cluster_count(), 0);
    }

    #[test]
    fn hearsay_never_moves_known_head() {
        let mut reg = Registry::new();
        let head = NodeRecord::new(NodeId(20), Vec3::planar(160.0, 0.0), Timestamp::from_millis(0)).as_head();
        reg.record_neighbor_cluster(NodeId(20), head, Provenance::Authoritative);

        let rumor = NodeRecord::new(NodeId(4), Vec3::planar(110.0, 0.0), Timestamp::from_millis(900));
        reg.record_neighbor_cluster(NodeId(20), rumor.clone(), Provenance::Hearsay);

        let known = reg.neighbor_cluster(NodeId(20)).unwrap();
        assert_eq!(known.position, Vec3::planar(160.0, 0.0));
        assert_eq!(known.timestamp, Timestamp::from_millis(900));

        reg.record_neighbor_cluster(NodeId(30), rumor, Provenance::Hearsay);
        assert_eq!(reg.neighbor_cluster(NodeId(30)).unwrap().id, NodeId(4));
    }
}
