//! `radartrack` CLI: scenario runs against the synchronous tracker or the
//! full threaded pipeline.

use anyhow::Result;
use clap::{Parser, Subcommand};
use radar_core::metrics::TrackingMetrics;
use radar_core::output::LogAdapter;
use radar_core::types::{DetectionBatch, Timestamp, TrackState};
use radar_core::{RadarSystem, SystemConfig, Tracker};
use radar_sim::{encode_frame, Scenario, ScenarioKind, Simulation};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "radartrack", about = "Multi-target radar tracking pipeline")]
struct Cli {
    /// YAML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario through the synchronous tracker and report metrics.
    Run {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Override the scenario duration (seconds)
        #[arg(long)]
        duration: Option<f64>,
        /// Write the metrics summary to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Drive the threaded five-stage pipeline with encoded frames.
    Pipeline {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long)]
        duration: Option<f64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SystemConfig::load(path)?,
        None => SystemConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    match cli.command {
        Commands::Run { scenario, seed, duration, output } => {
            run_scenario(&config, scenario, seed, duration, output.as_deref())?;
        }
        Commands::Pipeline { scenario, seed, duration } => {
            run_pipeline(&config, scenario, seed, duration)?;
        }
    }

    Ok(())
}

fn run_scenario(
    config: &SystemConfig,
    kind: ScenarioKind,
    seed: u64,
    duration: Option<f64>,
    output: Option<&std::path::Path>,
) -> Result<()> {
    let mut scenario = Scenario::build(kind);
    if let Some(duration) = duration {
        scenario.duration = duration;
    }
    println!(
        "Running scenario '{}' (seed={}, duration={:.0}s)...",
        scenario.name, seed, scenario.duration
    );

    let mut sim = Simulation::new(scenario, seed);
    let mut tracker = Tracker::new(config)?;
    let mut metrics = TrackingMetrics::new();

    let started = Instant::now();
    let mut seq = 0u64;
    let mut cues = 0usize;
    while let Some(scan) = sim.next_scan() {
        let batch = DetectionBatch {
            seq,
            timestamp: Timestamp::from_secs_f64(scan.t),
            detections: scan.detections,
        };
        seq += 1;
        let out = tracker.process(&batch);
        cues += out.beam_requests.len();
        // Let tracks settle before scoring
        if scan.t > 2.0 {
            metrics.accumulate(&out.snapshot.tracks, &scan.truth, 1000.0);
        }
    }
    let elapsed = started.elapsed();

    let tracks = tracker.registry().active_tracks();
    let confirmed = tracks.iter().filter(|t| t.state == TrackState::Confirmed).count();
    println!(
        "Done: {seq} scans in {:.2}s — {} tracks alive ({confirmed} confirmed), {cues} cues",
        elapsed.as_secs_f64(),
        tracks.len(),
    );

    let summary = metrics.summary();
    println!(
        "RMSE {:.1} m | precision {:.3} | recall {:.3} | id-switches {} | consistency {:.3}",
        summary.rmse_position_m,
        summary.precision,
        summary.recall,
        summary.id_switches,
        summary.identity_consistency,
    );

    let report = tracker.stats().report();
    if let Some(path) = output {
        let json = serde_json::json!({
            "scenario": sim.scenario().name,
            "seed": seed,
            "elapsed_s": elapsed.as_secs_f64(),
            "metrics": summary,
            "stats": report,
        });
        std::fs::write(path, serde_json::to_string_pretty(&json)?)?;
        println!("Metrics saved to {}", path.display());
    }

    Ok(())
}

fn run_pipeline(
    config: &SystemConfig,
    kind: ScenarioKind,
    seed: u64,
    duration: Option<f64>,
) -> Result<()> {
    let mut scenario = Scenario::build(kind);
    if let Some(duration) = duration {
        scenario.duration = duration;
    }
    println!("Streaming '{}' through the threaded pipeline...", scenario.name);

    let mut sim = Simulation::new(scenario, seed);
    let mut system = RadarSystem::new(config.clone())?;
    system.start(vec![Box::new(LogAdapter::new("hmi", config.output.hmi_rate_hz))])?;

    let mut frames = 0u64;
    while let Some(scan) = sim.next_scan() {
        system.on_frame(&encode_frame(&scan.detections))?;
        frames += 1;
    }

    // Wait for the pipeline to drain before reading the counters
    let deadline = Instant::now() + Duration::from_secs(30);
    while Instant::now() < deadline {
        let report = system.stats().report();
        if report.frames_decoded + report.decode_errors >= frames {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    // Give MANAGE a moment to flush the tail batches
    std::thread::sleep(Duration::from_millis(100));
    system.stop();

    let report = system.stats().report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!(
        "health = {:?}, active tracks = {}",
        system.stats().health(),
        system.registry().active_count()
    );
    Ok(())
}
