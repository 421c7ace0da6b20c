//! Inbound message handling.

use tracing::{debug, trace, warn};
use wavefront_density::DistributionMap;
use wavefront_geometry::{distance, is_in_sector, propagation_delay, Vec2};

use crate::env::Environment;
use crate::message::{IncidentType, Message, MessageKind, Packet};
use crate::node::{cancel_timer, ClusterNode};
use crate::propagation::{relay_direction, travel_time};
use crate::record::{NodeId, NodeRecord};
use crate::registry::Provenance;
use crate::status::NodeStatus;
use crate::time::Timestamp;

impl ClusterNode {
    /// Handle a packet delivered from `from`.
    pub fn on_packet<E: Environment>(&mut self, env: &mut E, from: NodeId, packet: Packet) {
        self.acquire_mobility(env);
        self.stats.packets_received += 1;
        let before = self.role();

        for message in packet.messages {
            trace!(node = %self.id(), %from, kind = %message.kind(), "Received");
            self.on_message(env, from, message);
        }

        self.note_role_change(before);
    }

    fn on_message<E: Environment>(&mut self, env: &mut E, from: NodeId, message: Message) {
        let now = env.now();
        match message {
            Message::ClusterInfo { record, .. } => self.on_cluster_info(env, stamp(record, now)),
            Message::InitiateCluster { cluster_id, record, .. } => {
                self.on_initiate_cluster(env, cluster_id, stamp(record, now));
            }
            Message::FormCluster { record, .. } => self.on_form_cluster(env, stamp(record, now)),
            Message::NeighborClusterInfo { cluster_id, record, .. } => {
                self.on_neighbor_cluster_info(cluster_id, stamp(record, now));
            }
            Message::DistroMap {
                seq,
                cluster_id,
                record,
                map,
            } => self.on_distro_map(env, seq, cluster_id, stamp(record, now), map),
            Message::InterClusterPropagation {
                seq,
                cluster_id,
                source,
                destination,
                direction,
                start_time,
            } => self.on_inter_cluster(env, seq, cluster_id, source, destination, direction, start_time),
            Message::IntraClusterPropagation {
                cluster_id,
                starting_node,
                start_time,
                direction,
                ..
            } => self.on_intra_cluster(env, cluster_id, starting_node, start_time, direction),
            Message::InterNodePropagation {
                position,
                direction,
                start_time,
                ..
            } => self.on_inter_node(env, position, direction, start_time),
            Message::Ack { cluster_id, kind, .. } => {
                self.reliable.acknowledge(env, cluster_id, kind);
            }
            Message::IncidentEvent {
                origin,
                timestamp,
                cluster_id,
                incident,
            } => self.on_incident_event(env, from, origin, timestamp, cluster_id, incident),
        }
    }

    fn in_range(&self, record: &NodeRecord) -> bool {
        distance(self.record.planar(), record.planar()) < self.config.omni_range
    }

    fn on_cluster_info<E: Environment>(&mut self, env: &mut E, record: NodeRecord) {
        if !self.in_range(&record) {
            return;
        }
        self.registry.upsert(record.clone());

        match self.status {
            NodeStatus::Init => {
                if record.is_head() && self.record.is_standalone() {
                    self.join(env, record.id);
                }
            }
            NodeStatus::Update | NodeStatus::HeadElection => {
                if self.record.is_standalone() {
                    match self.registry.highest_id_candidate_head() {
                        Some(head) => {
                            self.record.join(head);
                        }
                        None => {
                            self.record.become_head();
                            self.set_status(NodeStatus::Update);
                            self.schedule_send(env, self.config.minimum_tdma_slot);
                        }
                    }
                } else if self.record.is_head() && record.belongs_to(self.id()) {
                    self.registry.upsert_member(record.clone());
                } else if self.registry.member_count() == 0 {
                    self.merge();
                }
            }
            _ => {}
        }

        if let Some(cluster) = record.cluster_id() {
            if Some(cluster) != self.record.cluster_id() && cluster != self.id() {
                let provenance = if record.is_head() {
                    Provenance::Authoritative
                } else {
                    Provenance::Hearsay
                };
                self.registry.record_neighbor_cluster(cluster, record, provenance);
            }
        }
    }

    /// Attach to the highest-id head in range if it outranks this node.
    fn merge(&mut self) {
        let Some(head) = self.registry.highest_id_candidate_head() else {
            return;
        };
        if Some(head) != self.record.cluster_id() && self.id() < head {
            debug!(node = %self.id(), from = ?self.record.cluster_id(), to = %head, "Merging into cluster");
            self.record.join(head);
            self.registry.remove_neighbor_cluster(head);
        }
    }

    /// Join `head` from INIT or HEAD_ELECTION.
    fn join<E: Environment>(&mut self, env: &mut E, head: NodeId) {
        cancel_timer(env, &mut self.timers.election);
        self.record.join(head);
        self.registry.remove_neighbor_cluster(head);
        self.set_status(NodeStatus::Update);
        self.schedule_send(env, self.config.time_window);
    }

    fn on_initiate_cluster<E: Environment>(&mut self, env: &mut E, cluster: NodeId, record: NodeRecord) {
        if self.status != NodeStatus::Init || !self.in_range(&record) {
            return;
        }
        if self.registry.is_neighbor(record.id) {
            self.registry.upsert(record);
            self.join(env, cluster);
        }
    }

    fn on_form_cluster<E: Environment>(&mut self, env: &mut E, record: NodeRecord) {
        if !self.in_range(&record) {
            return;
        }
        let head = record.id;
        self.registry.upsert(record);

        if matches!(self.status, NodeStatus::Init | NodeStatus::HeadElection) {
            self.join(env, head);
        }
    }

    fn on_neighbor_cluster_info(&mut self, cluster: NodeId, record: NodeRecord) {
        if !self.record.is_head() || cluster != self.id() || record.id == self.id() {
            return;
        }
        let Some(foreign) = record.cluster_id() else {
            return;
        };
        if foreign != self.id() {
            self.registry.record_neighbor_cluster(foreign, record, Provenance::Hearsay);
        }
    }

    fn on_distro_map<E: Environment>(
        &mut self,
        env: &mut E,
        seq: u64,
        cluster: NodeId,
        record: NodeRecord,
        map: DistributionMap,
    ) {
        if let Err(err) = map.check_shape() {
            warn!(node = %self.id(), %cluster, error = %err, "Dropping malformed distribution map");
            return;
        }

        let sender = record.id;
        self.registry
            .record_neighbor_cluster(cluster, record, Provenance::Authoritative);
        self.neighbor_maps.insert(cluster, map);
        debug!(node = %self.id(), %cluster, "Stored distribution map");

        let ack = Message::Ack {
            seq,
            cluster_id: self.cluster_id().unwrap_or(self.id()),
            kind: MessageKind::DistroMap,
        };
        self.send_to(env, sender, ack);
    }

    #[allow(clippy::too_many_arguments)]
    fn on_inter_cluster<E: Environment>(
        &mut self,
        env: &mut E,
        seq: u64,
        cluster: NodeId,
        source: Vec2,
        destination: Vec2,
        direction: Vec2,
        start_time: Timestamp,
    ) {
        let ack = Message::Ack {
            seq,
            cluster_id: self.cluster_id().unwrap_or(self.id()),
            kind: MessageKind::InterClusterPropagation,
        };
        self.send_to(env, cluster, ack);

        if !self.record.is_head() {
            return;
        }

        let candidate = std::iter::once(&self.record)
            .chain(self.registry.members())
            .min_by(|a, b| {
                distance(a.planar(), destination).total_cmp(&distance(b.planar(), destination))
            })
            .map(|r| (r.id, r.planar()));
        let Some((candidate, position)) = candidate else {
            return;
        };

        let Some(delay) = propagation_delay(source, position, direction)
            .and_then(|d| std::time::Duration::try_from_secs_f64(d.as_secs_f64() * self.config.delay_margin).ok())
        else {
            return;
        };
        let now = env.now();
        let new_time = start_time + delay;

        if self.propagation.relax_first_start(new_time, candidate, now) {
            debug!(
                node = %self.id(),
                from = %cluster,
                start = %new_time,
                candidate = %candidate,
                "Accepted inter-cluster offer"
            );
            self.run_propagation(env, candidate, direction);
        } else {
            trace!(node = %self.id(), from = %cluster, start = %new_time, "Offer is not earlier");
        }
    }

    fn on_intra_cluster<E: Environment>(
        &mut self,
        env: &mut E,
        cluster: NodeId,
        starting_node: NodeId,
        start_time: Timestamp,
        direction: Vec2,
    ) {
        if !self.record.is_member() || self.record.cluster_id() != Some(cluster) {
            return;
        }
        self.propagation.direction = Some(direction);

        if starting_node != self.id()
            || !self.override_allowed()
            || !matches!(self.status, NodeStatus::Update | NodeStatus::PropagationReady)
        {
            return;
        }

        let now = env.now();
        if self.propagation.adopt_start(start_time, self.id(), now) {
            self.schedule_activation(env);
        }
    }

    fn on_inter_node<E: Environment>(&mut self, env: &mut E, sender: Vec2, incoming: Vec2, start_time: Timestamp) {
        let own = self.record.planar();
        if !is_in_sector(
            sender,
            own,
            incoming,
            self.config.relay_range,
            self.config.propagation_sector_angle,
        ) {
            return;
        }

        let direction = match self.propagation.direction {
            Some(d) if !d.is_zero() => d,
            _ => relay_direction(incoming, sender, own),
        };
        let Some(travel) = travel_time(distance(sender, own), direction.length()) else {
            return;
        };

        let now = env.now();
        let new_time = start_time + travel;
        if now >= self.propagation.start_time() {
            return;
        }
        if self.propagation.relax_start(new_time, now) {
            self.propagation.direction = Some(direction);
            trace!(node = %self.id(), start = %new_time, "Relaxed start time");
            self.schedule_activation(env);
        }
    }

    fn on_incident_event<E: Environment>(
        &mut self,
        env: &mut E,
        from: NodeId,
        origin: NodeId,
        timestamp: Timestamp,
        cluster: Option<NodeId>,
        incident: IncidentType,
    ) {
        let now = env.now();

        if origin == self.id() {
            if self.last_incident == Some(timestamp) {
                self.stats.incidents_returned += 1;
                self.stats.incident_delay += now.saturating_duration_since(timestamp);
                self.last_incident = None;
            }
            return;
        }

        if self.record.is_head() && cluster == Some(self.id()) && from == origin {
            let relay = Message::IncidentEvent {
                origin,
                timestamp,
                cluster_id: cluster,
                incident,
            };
            self.broadcast(env, relay);
        }
    }
}

/// Stamp a received record with the local receive time.
fn stamp(mut record: NodeRecord, now: Timestamp) -> NodeRecord {
    record.timestamp = now;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use wavefront_density::GridSpec;
    use wavefront_geometry::Vec3;

    use crate::config::ClusterConfig;
    use crate::env::Timer;
    use crate::node::tests::{head_record, ms, started, MockEnv};

    fn info(record: NodeRecord) -> Message {
        Message::ClusterInfo { seq: 1, record }
    }

    fn standalone(id: u64, x: f64, y: f64) -> NodeRecord {
        NodeRecord::new(NodeId(id), Vec3::planar(x, y), Timestamp::ZERO)
    }

    /// Node `id` at the origin, elected head of its own cluster.
    fn lone_head(id: u64) -> (ClusterNode, MockEnv) {
        let (mut node, mut env) = started(id, ClusterConfig::default(), 0.0, 0.0);
        env.run_until(&mut node, ms(1_250));
        assert!(node.record().is_head());
        env.take_broadcasts();
        (node, env)
    }

    #[test]
    fn init_node_joins_head_in_range() {
        let (mut node, mut env) = started(1, ClusterConfig::default(), 0.0, 0.0);
        env.run_until(&mut node, ms(500));
        env.deliver(&mut node, NodeId(9), info(head_record(9, 10.0, 0.0)));

        assert!(node.record().belongs_to(NodeId(9)));
        assert_eq!(node.status(), NodeStatus::Update);
        assert_eq!(node.stats().role_changes, 1);
    }

    #[test]
    fn offers_at_omni_range_are_dropped() {
        let (mut node, mut env) = started(1, ClusterConfig::default(), 0.0, 0.0);
        env.run_until(&mut node, ms(500));
        env.deliver(&mut node, NodeId(9), info(head_record(9, 100.0, 0.0)));

        assert!(node.record().is_standalone());
        assert_eq!(node.registry().neighbor_count(), 0);
    }

    #[test]
    fn initiate_cluster_requires_known_neighbor() {
        let (mut node, mut env) = started(1, ClusterConfig::default(), 0.0, 0.0);
        env.run_until(&mut node, ms(500));

        let initiate = |seq| Message::InitiateCluster {
            seq,
            cluster_id: NodeId(9),
            record: head_record(9, 10.0, 0.0),
        };
        env.deliver(&mut node, NodeId(9), initiate(1));
        assert!(node.record().is_standalone());

        env.deliver(&mut node, NodeId(9), info(standalone(9, 10.0, 0.0)));
        env.deliver(&mut node, NodeId(9), initiate(2));
        assert!(node.record().belongs_to(NodeId(9)));
        assert!(node.registry().neighbor(NodeId(9)).unwrap().is_head());
    }

    #[test]
    fn election_check_is_cancelled_on_join() {
        let (mut node, mut env) = started(1, ClusterConfig::default(), 0.0, 0.0);
        env.run_until(&mut node, ms(1_050));
        assert_eq!(env.due(Timer::ElectionCheck), Some(ms(1_100)));

        let form = Message::FormCluster {
            seq: 1,
            record: head_record(9, 10.0, 0.0),
        };
        env.deliver(&mut node, NodeId(9), form);
        assert!(node.record().belongs_to(NodeId(9)));
        assert_eq!(env.due(Timer::ElectionCheck), None);
        // The first update as a member waits a full time window.
        assert_eq!(env.due(Timer::Send), Some(ms(2_050)));
    }

    #[test]
    fn formation_ignores_competing_offers() {
        let (mut node, mut env) = started(1, ClusterConfig::default(), 0.0, 0.0);
        env.run_until(&mut node, ms(200));
        node.form_cluster(&mut env);

        let form = Message::FormCluster {
            seq: 1,
            record: head_record(9, 10.0, 0.0),
        };
        env.deliver(&mut node, NodeId(9), form);
        assert!(node.record().is_standalone());
        assert_eq!(node.status(), NodeStatus::Formation);
    }

    #[test]
    fn memberless_head_merges_into_higher_head() {
        let (mut node, mut env) = lone_head(3);
        env.deliver(&mut node, NodeId(2), info(head_record(2, 30.0, 0.0)));
        assert!(node.record().is_head());
        assert!(node.registry().neighbor_cluster(NodeId(2)).is_some());

        env.deliver(&mut node, NodeId(8), info(head_record(8, 30.0, 10.0)));
        assert!(node.record().belongs_to(NodeId(8)));
        assert!(node.registry().neighbor_cluster(NodeId(8)).is_none());
    }

    #[test]
    fn head_registers_members() {
        let (mut node, mut env) = lone_head(3);
        let member = standalone(1, 20.0, 0.0).as_member_of(NodeId(3));
        env.deliver(&mut node, NodeId(1), info(member));
        assert_eq!(node.registry().member_count(), 1);

        // A head with members stays put.
        env.deliver(&mut node, NodeId(8), info(head_record(8, 30.0, 10.0)));
        assert!(node.record().is_head());
    }

    #[test]
    fn member_reports_are_hearsay() {
        let (mut node, mut env) = lone_head(3);
        env.deliver(&mut node, NodeId(1), info(standalone(1, 20.0, 0.0).as_member_of(NodeId(3))));

        let foreign = standalone(7, 60.0, 0.0).as_member_of(NodeId(40));
        env.deliver(&mut node, NodeId(7), info(foreign));
        assert_eq!(
            node.registry().neighbor_cluster(NodeId(40)).unwrap().position,
            Vec3::planar(60.0, 0.0)
        );

        env.deliver(&mut node, NodeId(40), info(head_record(40, 90.0, 0.0)));
        assert_eq!(
            node.registry().neighbor_cluster(NodeId(40)).unwrap().position,
            Vec3::planar(90.0, 0.0)
        );
    }

    #[test]
    fn head_learns_clusters_from_member_gossip() {
        let (mut node, mut env) = lone_head(20);
        let gossip = Message::NeighborClusterInfo {
            seq: 1,
            cluster_id: NodeId(20),
            record: standalone(4, 110.0, 0.0).as_member_of(NodeId(30)),
        };
        env.deliver(&mut node, NodeId(2), gossip);
        assert!(node.registry().neighbor_cluster(NodeId(30)).is_some());

        let foreign_gossip = Message::NeighborClusterInfo {
            seq: 1,
            cluster_id: NodeId(50),
            record: head_record(60, 300.0, 0.0),
        };
        env.deliver(&mut node, NodeId(51), foreign_gossip);
        assert!(node.registry().neighbor_cluster(NodeId(60)).is_none());
    }

    #[test]
    fn distro_map_is_cached_and_acknowledged() {
        let (mut node, mut env) = lone_head(20);
        let map = DistributionMap::fallback(GridSpec::default());
        let message = Message::DistroMap {
            seq: 4,
            cluster_id: NodeId(30),
            record: head_record(30, 160.0, 0.0),
            map: map.clone(),
        };
        env.deliver(&mut node, NodeId(30), message);

        assert_eq!(node.neighbor_map(NodeId(30)), Some(&map));
        assert_eq!(
            node.registry().neighbor_cluster(NodeId(30)).unwrap().position,
            Vec3::planar(160.0, 0.0)
        );
        assert_eq!(
            env.take_unicasts(),
            vec![(
                NodeId(30),
                Message::Ack {
                    seq: 4,
                    cluster_id: NodeId(20),
                    kind: MessageKind::DistroMap,
                }
            )]
        );
    }

    #[test]
    fn inter_cluster_offers_only_move_earlier() {
        let (mut node, mut env) = started(30, ClusterConfig::default(), 160.0, 0.0);
        env.run_until(&mut node, ms(1_250));
        assert!(node.record().is_head());

        let offer = |start| Message::InterClusterPropagation {
            seq: 1,
            cluster_id: NodeId(20),
            source: Vec2::ZERO,
            destination: Vec2::new(100.0, 0.0),
            direction: Vec2::new(10.0, 0.0),
            start_time: start,
        };

        // 160m at 10m/s, with the 1.3 margin: 20.8s.
        env.deliver(&mut node, NodeId(20), offer(Timestamp::from_secs(10)));
        let first = node.propagation().first_start_time();
        assert!((first.as_secs_f64() - 30.8).abs() < 1e-3);
        assert_eq!(node.propagation().first_start_node(), Some(NodeId(30)));
        assert_eq!(node.status(), NodeStatus::PropagationReady);

        env.deliver(&mut node, NodeId(20), offer(Timestamp::from_secs(20)));
        assert_eq!(node.propagation().first_start_time(), first);

        env.deliver(&mut node, NodeId(20), offer(Timestamp::from_secs(5)));
        assert!((node.propagation().first_start_time().as_secs_f64() - 25.8).abs() < 1e-3);
        assert_eq!(env.due(Timer::Activate), Some(node.propagation().start_time()));

        let acks = env
            .take_unicasts()
            .into_iter()
            .filter(|(peer, m)| {
                *peer == NodeId(20)
                    && matches!(m, Message::Ack { kind: MessageKind::InterClusterPropagation, .. })
            })
            .count();
        assert_eq!(acks, 3);
    }

    fn offer_from(cluster: u64, source: Vec2, destination: Vec2, start: Timestamp) -> Message {
        Message::InterClusterPropagation {
            seq: 1,
            cluster_id: NodeId(cluster),
            source,
            destination,
            direction: Vec2::new(10.0, 0.0),
            start_time: start,
        }
    }

    #[test]
    fn running_head_still_takes_earlier_offers() {
        let config = ClusterConfig::default().with_reverse_propagation(true);
        let (mut node, mut env) = started(30, config, 160.0, 0.0);
        env.run_until(&mut node, ms(1_250));
        assert!(node.record().is_head());

        let offer = |start| offer_from(20, Vec2::ZERO, Vec2::new(100.0, 0.0), start);
        env.deliver(&mut node, NodeId(20), offer(Timestamp::from_secs(10)));
        assert!((node.propagation().first_start_time().as_secs_f64() - 30.8).abs() < 1e-3);

        // Reverse mode activates shortly after scheduling.
        env.run_until(&mut node, ms(3_000));
        assert_eq!(node.status(), NodeStatus::PropagationRunning);
        assert_eq!(node.stats().activations, 1);

        env.deliver(&mut node, NodeId(20), offer(Timestamp::from_secs(5)));
        let first = node.propagation().first_start_time();
        assert!((first.as_secs_f64() - 25.8).abs() < 1e-3);
        assert_eq!(node.propagation().start_time(), first);
        assert_eq!(env.due(Timer::Activate), Some(ms(3_100)));

        env.run_until(&mut node, ms(3_200));
        assert_eq!(node.stats().activations, 2);
    }

    #[test]
    fn accepted_offer_forwards_to_mapped_neighbors() {
        let (mut node, mut env) = lone_head(20);

        // A single dense cell right on the neighboring head.
        let spec = GridSpec::default();
        let mut cells = vec![0.0; spec.cell_count()];
        cells[spec.origin_index()] = 5.0;
        let map = DistributionMap::from_cells(spec, cells).unwrap();
        let distro = Message::DistroMap {
            seq: 1,
            cluster_id: NodeId(40),
            record: head_record(40, 60.0, 0.0),
            map,
        };
        env.deliver(&mut node, NodeId(40), distro);
        env.take_unicasts();

        let source = Vec2::new(-100.0, 0.0);
        let forwarded = |env: &mut MockEnv| -> Vec<(Vec2, Timestamp)> {
            env.take_unicasts()
                .into_iter()
                .filter_map(|(peer, m)| match m {
                    Message::InterClusterPropagation {
                        destination,
                        start_time,
                        ..
                    } if peer == NodeId(40) => Some((destination, start_time)),
                    _ => None,
                })
                .collect()
        };

        // 100m at 10m/s with the 1.3 margin: 13s after the offer's start.
        env.deliver(&mut node, NodeId(10), offer_from(10, source, Vec2::ZERO, Timestamp::from_secs(10)));
        assert!(node.reliable().is_pending(NodeId(40), MessageKind::InterClusterPropagation));
        env.run_until(&mut node, ms(1_400));
        let sent = forwarded(&mut env);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Vec2::new(60.0, 0.0));
        assert!((sent[0].1.as_secs_f64() - 23.0).abs() < 1e-3);

        // An earlier wavefront replaces the pending forward.
        env.deliver(&mut node, NodeId(10), offer_from(10, source, Vec2::ZERO, Timestamp::from_secs(5)));
        assert!(node.reliable().is_pending(NodeId(40), MessageKind::InterClusterPropagation));
        env.run_until(&mut node, ms(1_550));
        let sent = forwarded(&mut env);
        assert_eq!(sent.len(), 1);
        assert!((sent[0].1.as_secs_f64() - 18.0).abs() < 1e-3);
    }

    #[test]
    fn offers_in_the_past_are_rejected() {
        let (mut node, mut env) = lone_head(30);
        env.run_until(&mut node, ms(40_000));
        let offer = Message::InterClusterPropagation {
            seq: 1,
            cluster_id: NodeId(20),
            source: Vec2::new(-10.0, 0.0),
            destination: Vec2::ZERO,
            direction: Vec2::new(10.0, 0.0),
            start_time: Timestamp::from_secs(1),
        };
        env.deliver(&mut node, NodeId(20), offer);
        assert!(node.propagation().first_start_time().is_never());
    }

    #[test]
    fn named_member_adopts_head_schedule() {
        let (mut node, mut env) = started(5, ClusterConfig::default(), 0.0, 0.0);
        env.run_until(&mut node, ms(500));
        env.deliver(&mut node, NodeId(9), info(head_record(9, 10.0, 0.0)));

        let schedule = |start, starting_node| Message::IntraClusterPropagation {
            seq: 1,
            cluster_id: NodeId(9),
            starting_node: NodeId(starting_node),
            start_time: start,
            direction: Vec2::new(0.0, 5.0),
        };

        env.deliver(&mut node, NodeId(9), schedule(ms(3_000), 6));
        assert_eq!(node.propagation().direction, Some(Vec2::new(0.0, 5.0)));
        assert!(!node.propagation().is_scheduled());

        env.deliver(&mut node, NodeId(9), schedule(ms(3_000), 5));
        assert_eq!(node.status(), NodeStatus::PropagationReady);
        assert_eq!(env.due(Timer::Activate), Some(ms(3_000)));
        assert_eq!(node.propagation().first_start_time(), ms(3_000));
        assert_eq!(node.propagation().first_start_node(), Some(NodeId(5)));

        env.deliver(&mut node, NodeId(9), schedule(ms(4_000), 5));
        assert_eq!(env.due(Timer::Activate), Some(ms(3_000)));

        env.deliver(&mut node, NodeId(9), schedule(ms(2_000), 5));
        assert_eq!(env.due(Timer::Activate), Some(ms(2_000)));
        assert_eq!(node.propagation().first_start_time(), node.propagation().start_time());
    }

    #[test]
    fn disabled_override_needs_starting_flag() {
        let config = ClusterConfig::default().with_starting_node_override_disabled(true);
        let (mut node, mut env) = started(5, config, 0.0, 0.0);
        env.run_until(&mut node, ms(500));
        env.deliver(&mut node, NodeId(9), info(head_record(9, 10.0, 0.0)));

        let schedule = Message::IntraClusterPropagation {
            seq: 1,
            cluster_id: NodeId(9),
            starting_node: NodeId(5),
            start_time: ms(3_000),
            direction: Vec2::new(0.0, 5.0),
        };
        env.deliver(&mut node, NodeId(9), schedule);
        assert!(!node.propagation().is_scheduled());
    }

    #[test]
    fn schedules_from_other_clusters_are_ignored() {
        let (mut node, mut env) = started(5, ClusterConfig::default(), 0.0, 0.0);
        env.run_until(&mut node, ms(500));
        env.deliver(&mut node, NodeId(9), info(head_record(9, 10.0, 0.0)));

        let schedule = Message::IntraClusterPropagation {
            seq: 1,
            cluster_id: NodeId(12),
            starting_node: NodeId(5),
            start_time: ms(3_000),
            direction: Vec2::new(0.0, 5.0),
        };
        env.deliver(&mut node, NodeId(12), schedule);
        assert_eq!(node.propagation().direction, None);
    }

    fn wave(from: Vec2, start: Timestamp) -> Message {
        Message::InterNodePropagation {
            seq: 1,
            cluster_id: None,
            position: from,
            direction: Vec2::new(10.0, 0.0),
            start_time: start,
        }
    }

    #[test]
    fn node_ahead_relaxes_start() {
        let (mut node, mut env) = started(2, ClusterConfig::default(), 50.0, 0.0);
        env.run_until(&mut node, ms(500));
        env.deliver(&mut node, NodeId(1), wave(Vec2::ZERO, ms(2_000)));

        // 50m at 10m/s after the sender's start.
        assert_eq!(node.propagation().start_time(), ms(7_000));
        assert_eq!(node.propagation().direction, Some(Vec2::new(10.0, 0.0)));
        assert_eq!(env.due(Timer::Activate), Some(ms(7_000)));

        // A later wave does not delay it.
        env.deliver(&mut node, NodeId(1), wave(Vec2::ZERO, ms(3_000)));
        assert_eq!(node.propagation().start_time(), ms(7_000));
    }

    #[test]
    fn node_behind_ignores_wave() {
        let (mut node, mut env) = started(2, ClusterConfig::default(), -50.0, 0.0);
        env.run_until(&mut node, ms(500));
        env.deliver(&mut node, NodeId(1), wave(Vec2::ZERO, ms(2_000)));
        assert!(!node.propagation().is_scheduled());
    }

    #[test]
    fn member_incident_round_trip() {
        let config = ClusterConfig::default().with_incident_interval(Some(Duration::from_secs(4)));
        let (mut node, mut env) = started(2, config, 0.0, 0.0);
        for step in 1..=8 {
            env.run_until(&mut node, ms(500 * step));
            env.deliver(&mut node, NodeId(9), info(head_record(9, 10.0, 0.0)));
        }
        assert!(node.record().belongs_to(NodeId(9)));

        let incident = env
            .take_unicasts()
            .into_iter()
            .find(|(peer, m)| *peer == NodeId(9) && m.kind() == MessageKind::IncidentEvent);
        let Some((_, Message::IncidentEvent { timestamp, .. })) = incident else {
            panic!("member did not report the incident to its head");
        };
        assert_eq!(timestamp, ms(4_000));
        assert_eq!(node.stats().incidents_originated, 1);

        env.run_until(&mut node, ms(4_010));
        let relayed = Message::IncidentEvent {
            origin: NodeId(2),
            timestamp,
            cluster_id: Some(NodeId(9)),
            incident: IncidentType::Emergency,
        };
        env.deliver(&mut node, NodeId(9), relayed);
        assert_eq!(node.stats().incidents_returned, 1);
        assert_eq!(node.stats().incident_delay, Duration::from_millis(10));
    }

    #[test]
    fn head_relays_member_incidents_once() {
        let (mut node, mut env) = lone_head(9);
        let incident = |from| Message::IncidentEvent {
            origin: NodeId(from),
            timestamp: ms(4_000),
            cluster_id: Some(NodeId(9)),
            incident: IncidentType::Emergency,
        };

        env.deliver(&mut node, NodeId(2), incident(2));
        env.deliver(&mut node, NodeId(7), incident(2));
        let relays = env
            .take_broadcasts()
            .into_iter()
            .filter(|m| m.kind() == MessageKind::IncidentEvent)
            .count();
        assert_eq!(relays, 1);
    }
}
