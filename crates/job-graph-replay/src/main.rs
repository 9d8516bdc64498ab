//! Replays a scripted job graph session through the tracker.
//!
//! Usage: `job-graph-replay <scenario.json> [config-dir]`
//!
//! The scenario holds a scripted engine state (nodes, work items and queued
//! events per context) plus the asset to link. The tracker ticks until the
//! event queues are drained and the resulting node state is printed.

use std::path::PathBuf;

use job_graph_tracker::{
    GraphTracker, Materializer, MockEngine, MockEngineState, OutputId, PendingLoad,
    TrackerConfig, TrackerError, WorkItemTally,
};
use serde::Deserialize;
use thiserror::Error;

/// Upper bound on ticks so a scenario that keeps producing events terminates
const MAX_TICKS: usize = 1000;

#[derive(Debug, Error)]
enum ReplayError {
    #[error("usage: job-graph-replay <scenario.json> [config-dir]")]
    Usage,

    #[error("failed to read scenario {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scenario {
    /// Free text describing what the scenario exercises and its expected outcome
    #[serde(default)]
    description: String,
    engine: MockEngineState,
    asset_handle: i32,
    asset_name: String,
    /// Overrides the configuration loaded from the config directory
    #[serde(default)]
    config: Option<TrackerConfig>,
    /// Request a cook of the first network after linking
    #[serde(default)]
    cook_output: bool,
}

/// Treats every artifact locator as an output and logs what it does
struct LoggingMaterializer;

impl Materializer for LoggingMaterializer {
    fn load(&mut self, request: &PendingLoad) -> Option<Vec<OutputId>> {
        log::info!(
            "Loading '{}' from {} for {}",
            request.name,
            request.locator,
            request.node_path
        );
        Some(vec![request.locator.clone()])
    }

    fn release(&mut self, outputs: &[OutputId]) {
        for output in outputs {
            log::info!("Releasing {}", output);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), ReplayError> {
    let mut args = std::env::args().skip(1);
    let scenario_path = PathBuf::from(args.next().ok_or(ReplayError::Usage)?);
    let config_dir = args.next().map(PathBuf::from);

    let contents = std::fs::read_to_string(&scenario_path).map_err(|source| ReplayError::Read {
        path: scenario_path.clone(),
        source,
    })?;
    let scenario: Scenario = serde_json::from_str(&contents)?;
    if !scenario.description.is_empty() {
        log::info!("{}", scenario.description);
    }

    let config = match (scenario.config, config_dir) {
        (Some(config), _) => config,
        (None, Some(dir)) => TrackerConfig::load(dir)?,
        (None, None) => TrackerConfig::default(),
    };

    let engine = MockEngine::from_state(scenario.engine);
    let mut tracker =
        GraphTracker::new(engine, config).with_materializer(Box::new(LoggingMaterializer));

    let link_id = tracker.register_link(scenario.asset_handle, &scenario.asset_name);
    tracker.initialize_link(&link_id)?;

    if scenario.cook_output && !tracker.cook_output(&link_id, 0)? {
        log::warn!("Cook request for '{}' was refused", scenario.asset_name);
    }

    let mut ticks = 0;
    while ticks < MAX_TICKS {
        ticks += 1;
        if tracker.update() == 0 {
            break;
        }
    }
    log::info!("Replay finished after {} ticks", ticks);

    let Some(link) = tracker.link(&link_id) else {
        return Err(TrackerError::LinkNotFound(link_id).into());
    };

    println!("{} [{:?}]", link.asset_name, link.state);
    for (network_index, network) in link.networks.iter().enumerate() {
        println!("  {} ({})", network.name, network.tally().progress_text());
        for (node_index, node) in network.nodes.iter().enumerate() {
            let counts = node.counts();
            let label = match tracker.parent_node(&link_id, network_index, node_index)? {
                Some(parent) => format!("{} > {}", parent.name, node.name),
                None => node.path.clone(),
            };
            println!(
                "    {:<24} {:<14} {:>7}  total={} cooked={} errored={} results={}",
                label,
                node.status_text(),
                node.progress_text(),
                counts.total,
                counts.cooked,
                counts.errored,
                node.work_results.len()
            );
        }
    }

    Ok(())
}
