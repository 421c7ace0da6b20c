//! The per-node protocol engine.
//!
//! A [`ClusterNode`] is driven entirely from outside: the harness calls
//! [`start`](ClusterNode::start) once, then [`on_timer`](ClusterNode::on_timer)
//! for every timer the node armed and [`on_packet`](ClusterNode::on_packet)
//! for every delivered packet. Message handling lives in `handlers.rs`.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, trace};
use wavefront_density::DistributionMap;
use wavefront_geometry::{Vec2, Vec3};

use crate::config::ClusterConfig;
use crate::env::{Clock, Environment, Timer, TimerHandle, Transport};
use crate::error::Result;
use crate::message::{IncidentType, Message, MessageKind, Packet};
use crate::propagation::{duty_cycle_offset, plan_propagation, NeighborMap, PropagationState};
use crate::record::{Degree, NodeId, NodeRecord};
use crate::registry::{MaintenanceOutcome, Registry};
use crate::retry::ReliableSender;
use crate::stats::NodeStats;
use crate::status::NodeStatus;
use crate::time::Timestamp;

/// Handles of the single-instance timers.
#[derive(Debug, Clone, Default)]
pub(crate) struct Timers {
    pub send: Option<TimerHandle>,
    pub election: Option<TimerHandle>,
    pub maintenance: Option<TimerHandle>,
    pub intra: Option<TimerHandle>,
    pub activation: Option<TimerHandle>,
    pub duty: Option<TimerHandle>,
}

/// Cancel the timer in `slot`, if any.
pub(crate) fn cancel_timer<C: Clock>(env: &mut C, slot: &mut Option<TimerHandle>) {
    if let Some(handle) = slot.take() {
        env.cancel(handle);
    }
}

/// One clustering node.
#[derive(Debug)]
pub struct ClusterNode {
    pub(crate) config: ClusterConfig,
    pub(crate) record: NodeRecord,
    pub(crate) status: NodeStatus,
    pub(crate) registry: Registry,
    /// Distribution maps of neighboring clusters, by cluster id.
    pub(crate) neighbor_maps: BTreeMap<NodeId, DistributionMap>,
    pub(crate) own_map: Option<DistributionMap>,
    pub(crate) propagation: PropagationState,
    pub(crate) reliable: ReliableSender,
    pub(crate) stats: NodeStats,
    pub(crate) timers: Timers,
    pub(crate) clustering_active: bool,
    pub(crate) last_incident: Option<Timestamp>,
    seq: u64,
}

impl ClusterNode {
    /// Create a node. Fails only on an invalid configuration.
    pub fn new(id: NodeId, config: ClusterConfig, is_starting_node: bool, base_direction: Option<Vec2>) -> Result<Self> {
        config.validate()?;

        let mut record = NodeRecord::new(id, Vec3::ZERO, Timestamp::ZERO);
        record.is_starting_node = is_starting_node;
        record.base_direction = base_direction;

        Ok(Self {
            reliable: ReliableSender::new(config.retry_interval()),
            config,
            record,
            status: NodeStatus::Init,
            registry: Registry::new(),
            neighbor_maps: BTreeMap::new(),
            own_map: None,
            propagation: PropagationState::default(),
            stats: NodeStats::default(),
            timers: Timers::default(),
            clustering_active: false,
            last_incident: None,
            seq: 0,
        })
    }

    pub fn id(&self) -> NodeId {
        self.record.id
    }

    /// The node's own record.
    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn degree(&self) -> Degree {
        self.record.degree()
    }

    pub fn cluster_id(&self) -> Option<NodeId> {
        self.record.cluster_id()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn propagation(&self) -> &PropagationState {
        &self.propagation
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn reliable(&self) -> &ReliableSender {
        &self.reliable
    }

    /// Map of the local cluster, built when clustering stops.
    pub fn distribution_map(&self) -> Option<&DistributionMap> {
        self.own_map.as_ref()
    }

    /// Cached map of a neighboring cluster.
    pub fn neighbor_map(&self, cluster: NodeId) -> Option<&DistributionMap> {
        self.neighbor_maps.get(&cluster)
    }

    pub fn is_clustering(&self) -> bool {
        self.clustering_active
    }

    /// Arm the lifecycle timers. Call once, at time zero of the run.
    pub fn start<E: Environment>(&mut self, env: &mut E) {
        self.acquire_mobility(env);
        let now = env.now();

        let start = Timestamp::from_duration(self.config.clustering_start);
        env.schedule(start.saturating_duration_since(now), Timer::Start);

        if let Some(stop) = self.config.clustering_stop {
            let stop = Timestamp::from_duration(stop);
            env.schedule(stop.saturating_duration_since(now), Timer::Stop);
        }

        if let Some(interval) = self.config.incident_interval {
            env.schedule(interval, Timer::Incident);
        }
    }

    /// Enter FORMATION: the node becomes head on its next transmission.
    pub fn form_cluster<E: Environment>(&mut self, env: &mut E) {
        cancel_timer(env, &mut self.timers.election);
        self.set_status(NodeStatus::Formation);
        self.schedule_send(env, Duration::ZERO);
    }

    /// Dispatch a fired timer.
    pub fn on_timer<E: Environment>(&mut self, env: &mut E, timer: Timer) {
        self.acquire_mobility(env);
        let before = self.role();

        match timer {
            Timer::Start => self.on_start(env),
            Timer::Stop => self.on_stop(env),
            Timer::Send => {
                self.timers.send = None;
                self.on_send(env);
            }
            Timer::ElectionCheck => {
                self.timers.election = None;
                self.on_election_check(env);
            }
            Timer::Maintenance => {
                self.timers.maintenance = None;
                self.on_maintenance(env);
            }
            Timer::Decide => self.decide_propagation(env),
            Timer::Retransmit { peer, kind } => {
                if let Some(attempt) = self.reliable.on_timer(env, peer, kind) {
                    self.stats.packets_sent += 1;
                    if attempt > 1 {
                        self.stats.retransmissions += 1;
                    }
                }
            }
            Timer::IntraBroadcast => {
                self.timers.intra = None;
                self.on_intra_broadcast(env);
            }
            Timer::Activate => {
                self.timers.activation = None;
                self.on_activate(env);
            }
            Timer::Complete => self.set_status(NodeStatus::PropagationComplete),
            Timer::DutyActive => {
                self.set_status(NodeStatus::Active);
                self.timers.duty = Some(env.schedule(self.config.active_window, Timer::DutyInactive));
            }
            Timer::DutyInactive => {
                self.set_status(NodeStatus::PropagationComplete);
                self.timers.duty = Some(env.schedule(self.config.inactive_window, Timer::DutyActive));
            }
            Timer::Incident => self.on_incident(env),
        }

        self.note_role_change(before);
    }

    fn on_start<E: Environment>(&mut self, env: &mut E) {
        self.clustering_active = true;
        self.set_status(NodeStatus::Init);
        self.schedule_send(env, self.config.time_window);

        cancel_timer(env, &mut self.timers.maintenance);
        self.timers.maintenance = Some(env.schedule(self.config.contention_backoff(), Timer::Maintenance));
        debug!(node = %self.id(), "Clustering started");
    }

    fn on_send<E: Environment>(&mut self, env: &mut E) {
        let backoff = self.config.contention_backoff();

        match self.status {
            NodeStatus::Init => {
                let message = Message::ClusterInfo {
                    seq: self.next_seq(),
                    record: self.record.clone(),
                };
                self.broadcast(env, message);

                cancel_timer(env, &mut self.timers.election);
                self.timers.election = Some(env.schedule(backoff, Timer::ElectionCheck));
            }
            NodeStatus::HeadElection => {
                self.record.become_head();
                let message = Message::InitiateCluster {
                    seq: self.next_seq(),
                    cluster_id: self.id(),
                    record: self.record.clone(),
                };
                self.broadcast(env, message);
                self.stats.formation_messages += 1;
                self.set_status(NodeStatus::Update);
                self.schedule_send(env, backoff);
            }
            NodeStatus::Formation => {
                self.record.become_head();
                let message = Message::FormCluster {
                    seq: self.next_seq(),
                    record: self.record.clone(),
                };
                self.broadcast(env, message);
                self.stats.formation_messages += 1;
                self.set_status(NodeStatus::Update);
                self.schedule_send(env, self.config.interval);
            }
            NodeStatus::Update if self.clustering_active => {
                self.broadcast_update(env);
                self.schedule_send(env, self.config.interval);
            }
            _ => {}
        }
    }

    /// Own record plus every known neighboring cluster, split into packets.
    fn broadcast_update<E: Environment>(&mut self, env: &mut E) {
        let mut messages = vec![Message::ClusterInfo {
            seq: self.next_seq(),
            record: self.record.clone(),
        }];

        if let Some(own_cluster) = self.record.cluster_id() {
            let gossip: Vec<NodeRecord> = self.registry.neighbor_clusters().map(|(_, r)| r.clone()).collect();
            for record in gossip {
                messages.push(Message::NeighborClusterInfo {
                    seq: self.next_seq(),
                    cluster_id: own_cluster,
                    record,
                });
            }
        }

        match Packet::batch(messages, self.config.max_packet_bytes) {
            Ok(packets) => {
                for packet in packets {
                    self.stats.packets_sent += 1;
                    env.broadcast(packet);
                }
            }
            Err(err) => debug!(node = %self.id(), error = %err, "Failed to size update batch"),
        }
    }

    fn on_election_check<E: Environment>(&mut self, env: &mut E) {
        if self.status != NodeStatus::Init {
            return;
        }

        let backoff = self.config.contention_backoff();
        if !self.record.is_standalone() {
            self.set_status(NodeStatus::Update);
            self.schedule_send(env, self.config.minimum_tdma_slot);
        } else if self.registry.self_has_max_id(self.id()) {
            self.set_status(NodeStatus::HeadElection);
            self.schedule_send(env, backoff);
        } else {
            self.schedule_send(env, backoff);
        }
    }

    fn on_maintenance<E: Environment>(&mut self, env: &mut E) {
        if !self.clustering_active {
            return;
        }

        let now = env.now();
        let outcome = self
            .registry
            .maintain(&mut self.record, now, self.config.neighbor_timeout());
        self.apply_maintenance(env, &outcome);

        self.timers.maintenance = Some(env.schedule(self.config.interval, Timer::Maintenance));
    }

    fn apply_maintenance<E: Environment>(&mut self, env: &mut E, outcome: &MaintenanceOutcome) {
        if !outcome.expired.is_empty() {
            trace!(node = %self.id(), expired = outcome.expired.len(), "Pruned neighbors");
        }

        if outcome.became_head {
            debug!(node = %self.id(), "No neighbors left, declaring self head");
            self.set_status(NodeStatus::Update);
            self.schedule_send(env, self.config.minimum_tdma_slot);
        } else if outcome.lost_head {
            debug!(node = %self.id(), "Lost cluster head, restarting election");
            self.set_status(NodeStatus::Init);
            self.schedule_send(env, self.config.contention_backoff());
        } else if outcome.orphaned {
            debug!(node = %self.id(), "Cluster head no longer leads, detaching");
        }
    }

    /// End of clustering: heads exchange maps, a lone starting node schedules itself.
    fn on_stop<E: Environment>(&mut self, env: &mut E) {
        self.clustering_active = false;
        cancel_timer(env, &mut self.timers.maintenance);
        cancel_timer(env, &mut self.timers.send);
        cancel_timer(env, &mut self.timers.election);

        match self.record.degree() {
            Degree::ClusterHead => self.exchange_distribution_maps(env),
            Degree::ClusterMember => {
                debug!(node = %self.id(), cluster = ?self.cluster_id(), "Clustering stopped, awaiting schedule");
            }
            Degree::Standalone if self.record.is_starting_node => {
                let now = env.now();
                let start = now + self.config.start_lead;
                self.propagation.relax_first_start(start, self.id(), now);
                self.propagation.start_with_cluster();
                self.propagation.direction = self.record.base_direction;
                self.schedule_activation(env);
            }
            Degree::Standalone => {}
        }
    }

    fn exchange_distribution_maps<E: Environment>(&mut self, env: &mut E) {
        self.set_status(NodeStatus::ExchangeDistroMap);

        let head = self.record.planar();
        let mut offsets = vec![Vec2::ZERO];
        offsets.extend(self.registry.members().map(|m| m.planar() - head));
        let map = DistributionMap::build_or_fallback(self.config.grid(), &offsets);

        let peers: Vec<NodeId> = self.registry.neighbor_clusters().map(|(id, _)| id).collect();
        let mut stagger = Duration::ZERO;
        for peer in peers {
            let slots = u32::try_from(peer.0.saturating_add(self.id().0)).unwrap_or(u32::MAX);
            stagger = stagger.saturating_add(self.config.minimum_tdma_slot.saturating_mul(slots));

            let message = Message::DistroMap {
                seq: self.next_seq(),
                cluster_id: self.id(),
                record: self.record.clone(),
                map: map.clone(),
            };
            self.reliable.arm(env, peer, message, stagger);
        }

        debug!(
            node = %self.id(),
            members = self.registry.member_count(),
            peers = self.registry.neighbor_cluster_count(),
            "Exchanging distribution maps"
        );
        self.own_map = Some(map);
        env.schedule(self.config.exchange_grace, Timer::Decide);
    }

    /// After the exchange grace: pick the starting node and plan the wavefront.
    fn decide_propagation<E: Environment>(&mut self, env: &mut E) {
        self.set_status(NodeStatus::DecidePropagationParam);
        self.reliable.satisfy_all(env);

        let registry = &self.registry;
        self.neighbor_maps
            .retain(|cluster, _| registry.neighbor_cluster(*cluster).is_some());

        // The head's own flag wins, then the highest-id starting member.
        let starting = self
            .record
            .is_starting_node
            .then_some(&self.record)
            .or_else(|| self.registry.members().filter(|m| m.is_starting_node).last())
            .map(|r| (r.id, r.base_direction));

        let Some((node, direction)) = starting else {
            trace!(node = %self.id(), "No starting node in cluster");
            return;
        };
        let Some(direction) = direction else {
            debug!(node = %self.id(), start = %node, "Starting node has no base direction");
            return;
        };

        let now = env.now();
        if !self.propagation.relax_first_start(now + self.config.start_lead, node, now) {
            debug!(node = %self.id(), "An earlier wavefront is already scheduled");
            return;
        }
        self.run_propagation(env, node, direction);
    }

    /// Plan and send the wavefront leaving `origin` with velocity `incoming`.
    pub(crate) fn run_propagation<E: Environment>(&mut self, env: &mut E, origin: NodeId, incoming: Vec2) {
        let source = if origin == self.id() {
            self.record.planar()
        } else if let Some(member) = self.registry.member(origin) {
            member.planar()
        } else {
            debug!(node = %self.id(), origin = %origin, "Unknown propagation origin");
            return;
        };

        self.reliable.cancel_kind(env, MessageKind::InterClusterPropagation);

        let mut clusters = Vec::with_capacity(self.neighbor_maps.len());
        for (cluster, map) in &self.neighbor_maps {
            match self.registry.neighbor_cluster(*cluster) {
                Some(head) => clusters.push(NeighborMap {
                    cluster_id: *cluster,
                    head: head.planar(),
                    map,
                }),
                None => debug!(node = %self.id(), cluster = %cluster, "Skipping cluster with unknown head"),
            }
        }

        let plan = plan_propagation(
            source,
            incoming,
            clusters,
            self.config.candidate_radius,
            self.config.propagation_sector_angle,
        );

        let first_start = self.propagation.first_start_time();
        let mut delay = self.config.contention_backoff();
        for forward in &plan.forwards {
            let message = Message::InterClusterPropagation {
                seq: self.next_seq(),
                cluster_id: self.id(),
                source,
                destination: forward.destination,
                direction: forward.direction,
                start_time: first_start,
            };
            self.reliable.arm(env, forward.cluster_id, message, delay);
            delay = delay.saturating_add(self.config.forward_stride());
        }

        debug!(
            node = %self.id(),
            origin = %origin,
            start = %first_start,
            forwards = plan.forwards.len(),
            direction = %plan.combined_direction,
            "Planned wavefront"
        );
        self.propagation.direction = Some(plan.combined_direction);

        if self.registry.member_count() > 0 {
            cancel_timer(env, &mut self.timers.intra);
            self.timers.intra = Some(env.schedule(self.config.contention_backoff(), Timer::IntraBroadcast));
        }

        if origin == self.id() && self.override_allowed() && self.propagation.start_with_cluster() {
            self.schedule_activation(env);
        }
    }

    fn on_intra_broadcast<E: Environment>(&mut self, env: &mut E) {
        let now = env.now();
        let first_start = self.propagation.first_start_time();
        let Some(starting_node) = self.propagation.first_start_node() else {
            return;
        };
        if now >= first_start {
            return;
        }

        let message = Message::IntraClusterPropagation {
            seq: self.next_seq(),
            cluster_id: self.id(),
            starting_node,
            start_time: first_start,
            direction: self.propagation.direction.unwrap_or(Vec2::ZERO),
        };
        self.broadcast(env, message);
        self.timers.intra = Some(env.schedule(self.config.interval, Timer::IntraBroadcast));
    }

    /// Whether this node may take a schedule as the starting node.
    pub(crate) fn override_allowed(&self) -> bool {
        !self.config.disable_starting_node_override || self.record.is_starting_node
    }

    /// Arm the activation for the current start time.
    pub(crate) fn schedule_activation<E: Environment>(&mut self, env: &mut E) {
        self.set_status(NodeStatus::PropagationReady);

        let now = env.now();
        let start = self.propagation.start_time();
        if start.is_never() || now > start {
            return;
        }

        cancel_timer(env, &mut self.timers.activation);
        let delay = if self.config.reverse_propagation {
            self.config.reverse_activation_delay
        } else {
            start.saturating_duration_since(now)
        };
        self.timers.activation = Some(env.schedule(delay, Timer::Activate));
        debug!(node = %self.id(), start = %start, "Activation scheduled");
    }

    fn on_activate<E: Environment>(&mut self, env: &mut E) {
        self.set_status(NodeStatus::PropagationRunning);
        self.stats.activations += 1;

        let message = Message::InterNodePropagation {
            seq: self.next_seq(),
            cluster_id: self.cluster_id(),
            position: self.record.planar(),
            direction: self.propagation.direction.unwrap_or(Vec2::ZERO),
            start_time: self.propagation.start_time(),
        };
        self.broadcast(env, message);

        if self.config.reverse_propagation {
            let wait = duty_cycle_offset(
                env.now(),
                self.propagation.start_time(),
                self.config.duty_cycle_period(),
                self.config.reverse_offset,
            );
            cancel_timer(env, &mut self.timers.duty);
            self.timers.duty = Some(env.schedule(wait, Timer::DutyActive));
        } else {
            env.schedule(self.config.run_duration, Timer::Complete);
        }
    }

    fn on_incident<E: Environment>(&mut self, env: &mut E) {
        let Some(interval) = self.config.incident_interval else {
            return;
        };

        let now = env.now();
        let message = Message::IncidentEvent {
            origin: self.id(),
            timestamp: now,
            cluster_id: self.cluster_id(),
            incident: IncidentType::Emergency,
        };
        self.last_incident = Some(now);
        self.stats.incidents_originated += 1;

        match (self.record.degree(), self.record.ch_address()) {
            (Degree::ClusterMember, Some(head)) => self.send_to(env, head, message),
            _ => self.broadcast(env, message),
        }
        env.schedule(interval, Timer::Incident);
    }

    /// Refresh the own record from the position source.
    pub(crate) fn acquire_mobility<E: Environment>(&mut self, env: &E) {
        self.record.position = env.position();
        self.record.timestamp = env.now();
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub(crate) fn set_status(&mut self, status: NodeStatus) {
        if self.status != status {
            debug!(node = %self.id(), from = %self.status, to = %status, "Status changed");
            self.status = status;
        }
    }

    /// Arm the send timer unless one is already pending.
    pub(crate) fn schedule_send<C: Clock>(&mut self, env: &mut C, delay: Duration) {
        if self.timers.send.is_none() {
            self.timers.send = Some(env.schedule(delay, Timer::Send));
        }
    }

    pub(crate) fn broadcast<T: Transport>(&mut self, env: &mut T, message: Message) {
        trace!(node = %self.id(), kind = %message.kind(), "Broadcast");
        self.stats.packets_sent += 1;
        env.broadcast(Packet::single(message));
    }

    pub(crate) fn send_to<T: Transport>(&mut self, env: &mut T, peer: NodeId, message: Message) {
        trace!(node = %self.id(), %peer, kind = %message.kind(), "Send");
        self.stats.packets_sent += 1;
        env.send_to(peer, Packet::single(message));
    }

    pub(crate) fn role(&self) -> (Degree, Option<NodeId>) {
        (self.record.degree(), self.record.cluster_id())
    }

    pub(crate) fn note_role_change(&mut self, before: (Degree, Option<NodeId>)) {
        let after = self.role();
        if before != after {
            self.stats.role_changes += 1;
            debug!(
                node = %self.id(),
                degree = %after.0,
                cluster = ?after.1,
                status = %self.status,
                "Role changed"
            );
        }
    }
}
