//! Scenario descriptions.
//!
//! A scenario lists the nodes, the protocol configuration they share and
//! the channel they talk over. Scenarios are plain JSON so they can be kept
//! next to the binary and edited by hand.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wavefront_cluster::time::{duration_ms, option_duration_ms};
use wavefront_cluster::{ClusterConfig, NodeId, Timestamp};
use wavefront_geometry::Vec2;

use crate::channel::{ChannelConfig, DropRule};
use crate::error::Result;
use crate::mobility::MobilityModel;
use crate::simulator::Simulator;

/// One simulated node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub position: Vec2,
    /// Units per second. Absent for parked nodes.
    #[serde(default)]
    pub velocity: Option<Vec2>,
    #[serde(default)]
    pub starting: bool,
    /// Wavefront velocity of a starting node.
    #[serde(default)]
    pub base_direction: Option<Vec2>,
    /// When the node leaves the network.
    #[serde(default, with = "option_duration_ms")]
    pub departs_at: Option<Duration>,
}

impl NodeSpec {
    pub fn at(id: u64, x: f64, y: f64) -> Self {
        Self {
            id: NodeId(id),
            position: Vec2::new(x, y),
            velocity: None,
            starting: false,
            base_direction: None,
            departs_at: None,
        }
    }

    pub fn starting(mut self, direction: Vec2) -> Self {
        self.starting = true;
        self.base_direction = Some(direction);
        self
    }

    pub fn moving(mut self, velocity: Vec2) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn departing_at(mut self, at: Duration) -> Self {
        self.departs_at = Some(at);
        self
    }

    pub fn mobility(&self) -> MobilityModel {
        match self.velocity {
            Some(velocity) => MobilityModel::Linear {
                origin: self.position,
                velocity,
            },
            None => MobilityModel::Static {
                position: self.position,
            },
        }
    }
}

/// A complete run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub name: String,
    /// Simulated run length.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(default)]
    pub protocol: ClusterConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub drop_rules: Vec<DropRule>,
}

impl ScenarioConfig {
    pub fn new(name: impl Into<String>, duration: Duration, protocol: ClusterConfig) -> Self {
        Self {
            name: name.into(),
            duration,
            protocol,
            channel: ChannelConfig::default(),
            nodes: Vec::new(),
            drop_rules: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_drop_rule(mut self, rule: DropRule) -> Self {
        self.drop_rules.push(rule);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn end_time(&self) -> Timestamp {
        Timestamp::from_duration(self.duration)
    }

    /// Two clusters side by side with a starting member heading east.
    ///
    /// Clustering runs for eight seconds; the wavefront starts in the west
    /// cluster at 14s and crosses into the east cluster.
    pub fn demo() -> Self {
        let protocol = ClusterConfig::default().with_clustering_window(Duration::ZERO, Some(Duration::from_secs(8)));
        Self::new("two-clusters", Duration::from_secs(30), protocol)
            .with_node(NodeSpec::at(20, 0.0, 0.0))
            .with_node(NodeSpec::at(2, 40.0, 0.0).starting(Vec2::new(10.0, 0.0)))
            .with_node(NodeSpec::at(3, 20.0, 30.0))
            .with_node(NodeSpec::at(30, 160.0, 0.0))
            .with_node(NodeSpec::at(4, 110.0, 0.0))
            .with_node(NodeSpec::at(5, 150.0, 40.0))
    }

    /// Build a simulator with every node started at time zero.
    pub fn build(&self) -> Result<Simulator> {
        let mut sim = Simulator::new(self.channel.clone())?;
        for rule in &self.drop_rules {
            sim.add_drop_rule(rule.clone());
        }
        for node in &self.nodes {
            sim.add_node(
                node.id,
                self.protocol.clone(),
                node.starting,
                node.base_direction,
                node.mobility(),
            )?;
            if let Some(at) = node.departs_at {
                sim.schedule_departure(node.id, Timestamp::from_duration(at));
            }
        }
        Ok(sim)
    }
}
