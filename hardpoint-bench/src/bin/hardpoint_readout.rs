//! Hardpoint test stand readout.
//!
//! Runs one acquisition procedure against the stand and writes its CSV (and
//! fit report, for load tests) into the configured output directory. The
//! device transports are provided by the simulated stand.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hardpoint_bench::{Bench, MonotonicClock, ProfileKind, RunSummary, StandConfig};
use hardware::sim::{SimulatedHardpoint, SimulatedStandConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Hardpoint test stand readout")]
struct Args {
    /// Stand configuration file (JSON); built-in defaults if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Override the poll interval (milliseconds, 0 for as fast as possible)
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Seed of the simulated stand noise
    #[arg(long, default_value = "7")]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load-cell test, recorded until the PLC load program finishes
    LoadCell,

    /// Stiffness test with pose columns, recorded until the PLC finishes
    Stiffness,

    /// Five-phase position repeatability
    PosRep,

    /// Log the pose estimate without writing a file
    PoseMonitor {
        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: f64,
    },

    /// Raw interferometer displacement
    Raw {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: f64,
    },

    /// Write the effective configuration to a file and exit
    WriteConfig {
        #[arg(default_value = "stand.json")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StandConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => StandConfig::default(),
    };
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(ms) = args.poll_ms {
        config.poll_interval_ms = ms;
    }

    if let Command::WriteConfig { path } = &args.command {
        config
            .save(path)
            .with_context(|| format!("Failed to write configuration {}", path.display()))?;
        return Ok(());
    }

    info!("Using simulated stand (seed {})", args.seed);
    let stand = SimulatedHardpoint::new(SimulatedStandConfig {
        seed: args.seed,
        load_ramp_counts: 20.0,
        ..Default::default()
    });
    let bench = Bench::new(&stand, &config, MonotonicClock::new());

    let summary = match args.command {
        Command::LoadCell => bench
            .run_load_test(ProfileKind::LoadCell)
            .context("Load-cell test failed")?,
        Command::Stiffness => bench
            .run_load_test(ProfileKind::Stiffness)
            .context("Stiffness test failed")?,
        Command::PosRep => bench
            .run_position_repeatability()
            .context("Position repeatability test failed")?,
        Command::PoseMonitor { duration } => bench
            .run_pose_monitor(seconds(duration)?)
            .context("Pose monitor failed")?,
        Command::Raw { duration } => bench
            .run_raw_displacement(seconds(duration)?)
            .context("Raw displacement readout failed")?,
        Command::WriteConfig { .. } => return Ok(()),
    };

    report(&summary);
    Ok(())
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Invalid duration {value} s"))
}

fn report(summary: &RunSummary) {
    info!("{} run complete: {} records", summary.kind, summary.records);
    if let Some(path) = &summary.csv_path {
        info!("Data: {}", path.display());
    }
    for path in &summary.report_pages {
        info!("Fit report page: {}", path.display());
    }
    if !summary.setpoints.is_empty() {
        info!("Phase setpoints: {:?}", summary.setpoints);
    }
}
