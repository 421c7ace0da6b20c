//! Shared fixtures for the multi-node scenarios under `tests/`.

use std::time::Duration;

use wavefront_cluster::{ClusterConfig, NodeId, Timestamp};
use wavefront_geometry::Vec2;
use wavefront_sim::{NodeSpec, Result, ScenarioConfig, Simulator};

/// When the two-cluster fixtures stop clustering.
pub const STOP: Duration = Duration::from_secs(8);

/// Defaults with clustering ending at [`STOP`].
pub fn stopping_config() -> ClusterConfig {
    ClusterConfig::default().with_clustering_window(Duration::ZERO, Some(STOP))
}

/// Two clusters, CH 20 in the west with members 2 and 3, CH 30 in the east
/// with members 4 and 5. Member 2 is the starting node, heading east.
pub fn two_clusters(protocol: ClusterConfig, duration: Duration) -> ScenarioConfig {
    ScenarioConfig::new("two-clusters", duration, protocol)
        .with_node(NodeSpec::at(20, 0.0, 0.0))
        .with_node(NodeSpec::at(2, 40.0, 0.0).starting(Vec2::new(10.0, 0.0)))
        .with_node(NodeSpec::at(3, 20.0, 30.0))
        .with_node(NodeSpec::at(30, 160.0, 0.0))
        .with_node(NodeSpec::at(4, 110.0, 0.0))
        .with_node(NodeSpec::at(5, 150.0, 40.0))
}

/// Build `scenario` and run it to its end.
pub fn run(scenario: &ScenarioConfig) -> Result<Simulator> {
    let mut sim = scenario.build()?;
    sim.run_until(scenario.end_time());
    Ok(sim)
}

pub fn secs(s: f64) -> Timestamp {
    Timestamp::from_duration(Duration::from_secs_f64(s))
}

pub fn ids(raw: &[u64]) -> Vec<NodeId> {
    raw.iter().copied().map(NodeId).collect()
}
