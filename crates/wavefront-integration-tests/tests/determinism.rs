//! Seeded runs replay exactly.

use serde_json::Value;
use wavefront_integration_tests::run;
use wavefront_sim::ScenarioConfig;

const LOSSY_HIGHWAY: &str = include_str!("../../wavefront-sim/scenarios/lossy-highway.json");

#[test]
fn bundled_scenario_parses() {
    let scenario = ScenarioConfig::from_json(LOSSY_HIGHWAY).unwrap();
    assert_eq!(scenario.name, "lossy-highway");
    assert_eq!(scenario.nodes.len(), 9);
    assert!(scenario.protocol.clustering_stop.is_some());
}

#[test]
fn same_seed_same_timeline() {
    let scenario = ScenarioConfig::from_json(LOSSY_HIGHWAY).unwrap();
    let first = run(&scenario).unwrap();
    let second = run(&scenario).unwrap();

    assert_eq!(first.metrics(), second.metrics());
    assert_eq!(first.timeline().events(), second.timeline().events());
    assert!(first.metrics().dropped > 0);
}

#[test]
fn different_seed_different_losses() {
    let scenario = ScenarioConfig::from_json(LOSSY_HIGHWAY).unwrap();
    let mut reseeded = scenario.clone();
    reseeded.channel.seed += 1;

    let a = run(&scenario).unwrap();
    let b = run(&reseeded).unwrap();
    assert_ne!(a.timeline().events(), b.timeline().events());
}

#[test]
fn timeline_and_metrics_export_as_json() {
    let scenario = ScenarioConfig::from_json(LOSSY_HIGHWAY).unwrap();
    let sim = run(&scenario).unwrap();

    let timeline: Value = serde_json::from_str(&sim.timeline().to_json().unwrap()).unwrap();
    let events = timeline["events"].as_array().unwrap();
    assert_eq!(events.len(), sim.timeline().len());
    assert!(events.iter().all(|e| e["type"].is_string()));

    // Every counted drop is on the timeline.
    let drops = events.iter().filter(|e| e["type"] == "Dropped").count() as u64;
    assert_eq!(drops, sim.metrics().dropped);

    let metrics = serde_json::to_value(sim.metrics()).unwrap();
    assert_eq!(metrics["dropped"], sim.metrics().dropped);
    assert_eq!(metrics["deliveries"], sim.metrics().deliveries);
}

#[test]
fn demo_settles_into_two_clusters() {
    let demo = ScenarioConfig::demo();
    let sim = run(&demo).unwrap();
    let clusters = sim.snapshot().clusters;

    assert_eq!(clusters.head_count(), 2);
    assert!(clusters.is_settled());
    assert!(!sim.timeline().activations().is_empty());
}
