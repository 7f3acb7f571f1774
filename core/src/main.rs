//! wsim: runs a beacon/sink scenario on the simulation kernel.

use std::process::ExitCode;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wsim_core::components::{Beacon, BeaconConfig, MobilityConfig, Sink};
use wsim_core::{Position, Result, Scheduler, SimConfig, SimError, StopReason, NANOS_PER_MS};

#[derive(Parser, Debug)]
#[command(name = "wsim")]
#[command(about = "Discrete-event wireless simulation", long_about = None)]
struct Args {
    /// JSON file with the kernel configuration
    #[arg(short, long)]
    config: Option<String>,

    /// Number of beacon nodes around the sink
    #[arg(short, long, default_value = "4")]
    nodes: u32,

    /// Seed for the kernel and the scenario layout
    #[arg(short, long)]
    seed: Option<u64>,

    /// Simulation end in milliseconds
    #[arg(short, long)]
    end: Option<u64>,

    /// Radius of the placement disc in meters
    #[arg(long, default_value = "50")]
    radius: f64,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<SimConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| SimError::config(format!("{path}: {e}")))?;
            SimConfig::from_json(&json)?
        }
        None => SimConfig::default().with_milestones(100 * NANOS_PER_MS),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(end) = args.end {
        config.simulation_end = Some(end.saturating_mul(NANOS_PER_MS));
    }
    if config.simulation_end.is_none() {
        config.simulation_end = Some(1_000 * NANOS_PER_MS);
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let mut layout = StdRng::seed_from_u64(config.seed.wrapping_mul(0x9e3779b97f4a7c15));
    let mut sim = Scheduler::new(config)?;

    sim.add_mobile_node(
        0,
        0,
        Box::new(Sink::default()),
        MobilityConfig::Static {
            position: Position::default(),
        }
        .build(),
    )?;

    for node in 1..=args.nodes {
        let angle = layout.gen_range(0.0..std::f64::consts::TAU);
        let distance = layout.gen_range(1.0..args.radius.max(1.0 + f64::EPSILON));
        let position = Position::new(distance * angle.cos(), distance * angle.sin(), 0.0);
        let beacon = Beacon::new(BeaconConfig {
            jitter: 200_000,
            ..BeaconConfig::default()
        });
        let birth = layout.gen_range(0..NANOS_PER_MS);
        sim.add_mobile_node(node, birth, Box::new(beacon), MobilityConfig::Static { position }.build())?;
    }

    let report = sim.run();
    let ctx = sim.context();
    let stats = ctx.stats();
    let models: serde_json::Map<String, serde_json::Value> = sim
        .nodes()
        .filter_map(|node| sim.model(node).map(|m| (node.to_string(), json!({ "kind": m.kind(), "stats": m.snapshot() }))))
        .collect();

    let summary = json!({
        "clock": report.clock,
        "reason": format!("{:?}", report.reason),
        "dispatched": report.dispatched,
        "counts": stats.counts(),
        "receptions": stats.receptions(),
        "per_p50": stats.per_percentile(50.0),
        "per_p99": stats.per_percentile(99.0),
        "queue_depth_p99": stats.queue_depth_percentile(99.0),
        "models": models,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match report.reason {
        StopReason::Aborted(err) => Err(err),
        _ => Ok(()),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }

    info!(nodes = args.nodes, seed = ?args.seed, "wsim starting");
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "simulation failed");
            ExitCode::FAILURE
        }
    }
}
