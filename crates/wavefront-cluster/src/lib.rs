//! Wavefront Cluster - Self-Organizing Clustering with Wavefront Propagation
//!
//! This crate is the protocol engine run by every mobile node. It elects
//! cluster heads, keeps clusters together while nodes move, exchanges a
//! density summary of each cluster's members, and schedules a wavefront that
//! activates nodes across clusters at consistent times and in consistent
//! directions.
//!
//! # Overview
//!
//! ## Clustering
//!
//! Nodes start in `INIT`, broadcasting their identity. After a contention
//! backoff the highest id in range elects itself head and announces the
//! cluster; others join the highest-id head they hear. Neighbor state is
//! soft: entries expire after two update intervals, and a member that loses
//! its head returns to `INIT`.
//!
//! ## Propagation
//!
//! When clustering stops each head builds a [`DistributionMap`] of its
//! members and sends it reliably to every neighboring head. The head whose
//! cluster holds a starting node plans the wavefront: for every neighboring
//! map it picks the nearest dense cell inside the forwarding sector and sends
//! an offer. Offers relax each cluster's start time toward the earliest
//! arrival, much like a distributed shortest-path computation.
//!
//! ## Sans-IO
//!
//! [`ClusterNode`] performs no I/O. Every handler receives an
//! [`Environment`] providing the clock, timers, transport and position.
//!
//! # Example
//!
//! ```rust,ignore
//! use wavefront_cluster::{ClusterConfig, ClusterNode, NodeId};
//!
//! let config = ClusterConfig::default()
//!     .with_clustering_window(Duration::ZERO, Some(Duration::from_secs(8)));
//! let mut node = ClusterNode::new(NodeId(7), config, false, None)?;
//!
//! node.start(&mut env);
//! // Feed back every timer and packet:
//! node.on_timer(&mut env, timer);
//! node.on_packet(&mut env, from, packet);
//! ```

pub mod config;
pub mod env;
pub mod error;
mod handlers;
pub mod message;
mod node;
pub mod propagation;
pub mod record;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod status;
pub mod time;

pub use config::{ClusterConfig, MAX_NODES_LIMIT};
pub use env::{Clock, Environment, Mobility, Timer, TimerHandle, Transport};
pub use error::{Error, Result};
pub use message::{IncidentType, Message, MessageKind, Packet};
pub use node::ClusterNode;
pub use propagation::{plan_propagation, PropagationPlan, PropagationState};
pub use record::{Degree, NodeId, NodeRecord};
pub use registry::{MaintenanceOutcome, Provenance, Registry};
pub use retry::ReliableSender;
pub use stats::NodeStats;
pub use status::NodeStatus;
pub use time::Timestamp;

// Re-export the map type carried on the wire
pub use wavefront_density::DistributionMap;
