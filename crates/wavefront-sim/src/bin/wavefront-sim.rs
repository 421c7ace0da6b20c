//! Wavefront scenario runner
//!
//! Usage: `wavefront-sim [scenario.json] [--timeline out.json]`
//!
//! Without a scenario the built-in two-cluster demo runs. With `--timeline`
//! the full event timeline is written out as JSON.

use std::env;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wavefront_sim::ScenarioConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wavefront_sim=info,wavefront_cluster=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line args
    let mut scenario_path = None;
    let mut timeline_path = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--timeline" => timeline_path = Some(args.next().ok_or("--timeline needs a path")?),
            _ => scenario_path = Some(arg),
        }
    }

    let scenario = match &scenario_path {
        Some(path) => ScenarioConfig::load(path)?,
        None => ScenarioConfig::demo(),
    };

    println!("Wavefront Simulator");
    println!("===================");
    println!();
    println!(
        "Running '{}' with {} nodes for {:?}...",
        scenario.name,
        scenario.nodes.len(),
        scenario.duration
    );

    let mut sim = scenario.build()?;
    let result = sim.run_until(scenario.end_time());
    let snapshot = sim.snapshot();

    println!();
    println!("Simulation complete at {}:", result.end_time);
    println!("  Events: {}", result.metrics.events_processed);
    println!(
        "  Transmissions: {} ({} delivered, {} dropped)",
        result.metrics.transmissions, result.metrics.deliveries, result.metrics.dropped
    );
    println!();
    println!("Clusters:");
    for (head, members) in &snapshot.clusters.clusters {
        let members: Vec<String> = members.iter().map(ToString::to_string).collect();
        println!("  CH {} <- [{}]", head, members.join(", "));
    }
    if !snapshot.clusters.standalone.is_empty() {
        println!("  Standalone: {:?}", snapshot.clusters.standalone);
    }
    println!();
    println!("Nodes:");
    for node in &snapshot.nodes {
        println!(
            "  {:>4} {:<26} {:<10} start {:<12} activations {}",
            node.id,
            node.status.to_string(),
            node.degree.to_string(),
            node.start_time.to_string(),
            node.activations
        );
    }

    if let Some(path) = timeline_path {
        std::fs::write(&path, sim.timeline().to_json()?)?;
        println!();
        println!("Timeline ({} events) written to {}", sim.timeline().len(), path);
    }

    Ok(())
}
