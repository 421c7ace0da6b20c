//! Discrete-event simulator driving [`ClusterNode`]s.
//!
//! Each node sees the simulator through a short-lived [`NodeEnv`]: timers
//! go straight into the shared event queue, while packets are collected and
//! routed through the channel once the handler returns. Packets cross the
//! channel encoded, so every delivery exercises the wire codec.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};
use wavefront_cluster::{
    Clock, ClusterConfig, ClusterNode, Degree, MessageKind, Mobility, NodeId, NodeStatus, Packet, Timer, TimerHandle,
    Timestamp, Transport,
};
use wavefront_geometry::{Vec2, Vec3};

use crate::channel::{ChannelConfig, DropReason, DropRule, UnreliableChannel, Verdict};
use crate::directory::{Directory, NodeDirectory};
use crate::error::{Result, SimError};
use crate::event::{Event, EventQueue};
use crate::mobility::MobilityModel;
use crate::timeline::{NodeSummary, SimEvent, Snapshot, Timeline};

/// Counters over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimMetrics {
    pub events_processed: u64,
    /// Packets handed to the channel, counted once per receiver.
    pub transmissions: u64,
    pub deliveries: u64,
    pub dropped: u64,
    pub encode_errors: u64,
    pub decode_errors: u64,
}

/// Result of [`Simulator::run_until`].
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    pub queue_exhausted: bool,
}

enum Outgoing {
    Broadcast(Packet),
    Unicast(NodeId, Packet),
}

/// The environment one node sees while a handler runs.
struct NodeEnv<'a> {
    node: NodeId,
    now: Timestamp,
    position: Vec3,
    queue: &'a mut EventQueue,
    outbox: Vec<Outgoing>,
}

impl Clock for NodeEnv<'_> {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerHandle {
        self.queue.schedule_timer(self.node, self.now, delay, timer)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.queue.cancel(handle);
    }
}

impl Transport for NodeEnv<'_> {
    fn broadcast(&mut self, packet: Packet) {
        self.outbox.push(Outgoing::Broadcast(packet));
    }

    fn send_to(&mut self, peer: NodeId, packet: Packet) {
        self.outbox.push(Outgoing::Unicast(peer, packet));
    }
}

impl Mobility for NodeEnv<'_> {
    fn position(&self) -> Vec3 {
        self.position
    }
}

/// What the timeline tracks about a node across one handler call.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Observed {
    status: NodeStatus,
    degree: Degree,
    cluster: Option<NodeId>,
    activations: u64,
}

impl Observed {
    fn of(node: &ClusterNode) -> Self {
        Self {
            status: node.status(),
            degree: node.degree(),
            cluster: node.cluster_id(),
            activations: node.stats().activations,
        }
    }
}

/// Deterministic simulator for a population of nodes.
pub struct Simulator {
    now: Timestamp,
    nodes: BTreeMap<NodeId, ClusterNode>,
    directory: Box<dyn Directory>,
    queue: EventQueue,
    channel: UnreliableChannel,
    timeline: Timeline,
    metrics: SimMetrics,
}

impl Simulator {
    pub fn new(channel: ChannelConfig) -> Result<Self> {
        Self::with_directory(channel, Box::new(NodeDirectory::new()))
    }

    pub fn with_directory(channel: ChannelConfig, directory: Box<dyn Directory>) -> Result<Self> {
        Ok(Self {
            now: Timestamp::ZERO,
            nodes: BTreeMap::new(),
            directory,
            queue: EventQueue::new(),
            channel: UnreliableChannel::new(channel)?,
            timeline: Timeline::new(),
            metrics: SimMetrics::default(),
        })
    }

    /// Create a node, register it and arm its lifecycle timers.
    pub fn add_node(
        &mut self,
        id: NodeId,
        config: ClusterConfig,
        starting: bool,
        base_direction: Option<Vec2>,
        mobility: MobilityModel,
    ) -> Result<()> {
        let node = ClusterNode::new(id, config, starting, base_direction)?;
        if !self.directory.register(id, mobility) {
            return Err(SimError::DuplicateNode(id));
        }
        self.nodes.insert(id, node);
        debug!(node = %id, starting, "Added node");
        self.with_node(id, |node, env| node.start(env));
        Ok(())
    }

    pub fn add_drop_rule(&mut self, rule: DropRule) {
        self.channel.add_rule(rule);
    }

    /// Remove `node` from the network at `at`.
    pub fn schedule_departure(&mut self, node: NodeId, at: Timestamp) {
        self.queue.push(at, Event::Departure { node });
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn node(&self, id: NodeId) -> Option<&ClusterNode> {
        self.nodes.get(&id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Whether `id` is still reachable.
    pub fn is_active(&self, id: NodeId) -> bool {
        self.directory.resolve(id, self.now).is_ok()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn channel(&self) -> &UnreliableChannel {
        &self.channel
    }

    /// Run every event due by `end_time`.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(scheduled) = self.queue.pop_due(end_time) {
            self.advance_time(scheduled.time);
            self.process_event(scheduled.event);
            self.metrics.events_processed += 1;
        }
        self.advance_time(end_time);

        SimulationResult {
            end_time: self.now,
            metrics: self.metrics.clone(),
            queue_exhausted: self.queue.is_empty(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.now + duration)
    }

    /// State of every live node.
    pub fn snapshot(&self) -> Snapshot {
        let nodes = self
            .nodes
            .iter()
            .filter_map(|(id, node)| {
                let position = self.directory.resolve(*id, self.now).ok()?;
                Some(NodeSummary {
                    id: *id,
                    status: node.status(),
                    degree: node.degree(),
                    cluster: node.cluster_id(),
                    position,
                    start_time: node.propagation().start_time(),
                    activations: node.stats().activations,
                })
            })
            .collect();
        Snapshot::new(self.now, nodes)
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.now {
            self.now = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::TimerFire { node, timer, .. } => {
                trace!(%node, ?timer, "Timer");
                self.with_node(node, |n, env| n.on_timer(env, timer));
            }
            Event::Delivery { to, from, data } => self.deliver(to, from, &data),
            Event::Departure { node } => {
                self.directory.depart(node);
                info!(%node, time = %self.now, "Node departed");
                self.timeline.push(SimEvent::Departed { node, time: self.now });
            }
        }
    }

    fn deliver(&mut self, to: NodeId, from: NodeId, data: &[u8]) {
        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(%from, %to, error = %e, "Dropping undecodable packet");
                self.metrics.decode_errors += 1;
                return;
            }
        };
        let kinds = kinds_of(&packet);

        if !self.is_active(to) {
            self.record_drop(from, to, kinds, DropReason::Departed);
            return;
        }

        self.metrics.deliveries += 1;
        self.timeline.push(SimEvent::Delivered {
            from,
            to,
            kinds,
            time: self.now,
        });
        self.with_node(to, |node, env| node.on_packet(env, from, packet));
    }

    /// Run a handler on a live node, then record what changed and route
    /// whatever it sent.
    fn with_node<F>(&mut self, id: NodeId, handler: F)
    where
        F: FnOnce(&mut ClusterNode, &mut NodeEnv<'_>),
    {
        let now = self.now;
        let Ok(position) = self.directory.resolve(id, now) else {
            return;
        };
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };

        let before = Observed::of(node);
        let mut env = NodeEnv {
            node: id,
            now,
            position,
            queue: &mut self.queue,
            outbox: Vec::new(),
        };
        handler(node, &mut env);
        let outbox = env.outbox;
        let after = Observed::of(node);

        self.record_changes(id, position, before, after);
        for outgoing in outbox {
            self.route(id, position, outgoing);
        }
    }

    fn record_changes(&mut self, node: NodeId, position: Vec3, before: Observed, after: Observed) {
        let time = self.now;
        if before.status != after.status {
            self.timeline.push(SimEvent::StatusChanged {
                node,
                from: before.status,
                to: after.status,
                time,
            });
        }
        if (before.degree, before.cluster) != (after.degree, after.cluster) {
            self.timeline.push(SimEvent::RoleChanged {
                node,
                degree: after.degree,
                cluster: after.cluster,
                time,
            });
        }
        if after.activations > before.activations {
            info!(%node, %time, "Activated");
            self.timeline.push(SimEvent::Activated { node, position, time });
        }
    }

    fn route(&mut self, from: NodeId, origin: Vec3, outgoing: Outgoing) {
        let (targets, packet) = match outgoing {
            Outgoing::Broadcast(packet) => {
                let targets: Vec<_> = self
                    .directory
                    .reachable(self.now)
                    .into_iter()
                    .filter(|(id, _)| *id != from)
                    .map(|(id, position)| (id, Some(origin.distance(position))))
                    .collect();
                (targets, packet)
            }
            Outgoing::Unicast(peer, packet) => match self.directory.resolve(peer, self.now) {
                Ok(_) => (vec![(peer, None)], packet),
                Err(e) => {
                    debug!(%from, error = %e, "Unicast to unreachable node");
                    self.record_drop(from, peer, kinds_of(&packet), DropReason::UnknownNode);
                    return;
                }
            },
        };

        let data = match packet.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!(%from, error = %e, "Failed to encode packet");
                self.metrics.encode_errors += 1;
                return;
            }
        };
        let kinds = kinds_of(&packet);

        for (to, distance) in targets {
            match self.channel.transmit(from, to, &kinds, distance) {
                // Out-of-range receivers never hear the packet at all.
                Verdict::Drop(DropReason::OutOfRange) => {}
                Verdict::Drop(reason) => {
                    self.metrics.transmissions += 1;
                    self.record_drop(from, to, kinds.clone(), reason);
                }
                Verdict::Deliver { latency } => {
                    self.metrics.transmissions += 1;
                    self.queue.push(
                        self.now + latency,
                        Event::Delivery {
                            to,
                            from,
                            data: data.clone(),
                        },
                    );
                }
            }
        }
    }

    fn record_drop(&mut self, from: NodeId, to: NodeId, kinds: Vec<MessageKind>, reason: DropReason) {
        debug!(%from, %to, ?reason, ?kinds, "Dropped");
        self.metrics.dropped += 1;
        self.timeline.push(SimEvent::Dropped {
            from,
            to,
            kinds,
            reason,
            time: self.now,
        });
    }
}

fn kinds_of(packet: &Packet) -> Vec<MessageKind> {
    packet.messages.iter().map(|m| m.kind()).collect()
}
