//! Wavefront Sim - Discrete-Event Harness for Wavefront Clustering
//!
//! Runs many [`ClusterNode`](wavefront_cluster::ClusterNode)s against a
//! shared virtual clock. Packets travel encoded over an
//! [`UnreliableChannel`] with seeded loss, so runs are reproducible;
//! point-to-point sends are resolved through a [`Directory`].
//!
//! Scenarios are described in JSON ([`ScenarioConfig`]) and leave behind a
//! [`Timeline`] of status changes, deliveries, drops and activations.
//!
//! ```rust,ignore
//! use wavefront_sim::ScenarioConfig;
//!
//! let scenario = ScenarioConfig::demo();
//! let mut sim = scenario.build()?;
//! sim.run_until(scenario.end_time());
//! println!("{} clusters", sim.snapshot().clusters.head_count());
//! ```

pub mod channel;
pub mod directory;
pub mod error;
pub mod event;
pub mod mobility;
pub mod scenario;
pub mod simulator;
pub mod timeline;

pub use channel::{ChannelConfig, DropReason, DropRule, UnreliableChannel, Verdict};
pub use directory::{Directory, NodeDirectory};
pub use error::{Result, SimError};
pub use event::{Event, EventQueue, ScheduledEvent, SequenceNumber};
pub use mobility::MobilityModel;
pub use scenario::{NodeSpec, ScenarioConfig};
pub use simulator::{SimMetrics, SimulationResult, Simulator};
pub use timeline::{ClusterSummary, NodeSummary, SimEvent, Snapshot, Timeline};
