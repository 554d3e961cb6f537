//! Regenerate the fit report of a recorded load or stiffness test.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hardpoint_bench::fit_plots::FitReportConfig;
use hardpoint_bench::procedures::regenerate_fit_report;
use hardpoint_bench::{ProfileKind, StandConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fit plots from a recorded stand CSV")]
struct Args {
    /// Recorded CSV file
    csv: PathBuf,

    /// Test variant that produced the file
    #[arg(short, long, value_enum, default_value = "stiffness")]
    profile: ProfileKind,

    /// Stand configuration the file was recorded with (JSON); built-in
    /// defaults if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report path (.svg or .png), one page per pair written as
    /// `<stem>-<n>.<ext>`; defaults to the CSV path with .svg
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report width in pixels
    #[arg(long, default_value = "1400")]
    width: u32,

    /// Height of each panel in pixels
    #[arg(long, default_value = "700")]
    panel_height: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let stand = match &args.config {
        Some(path) => StandConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => StandConfig::default(),
    };
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.csv.with_extension("svg"));
    let config = FitReportConfig {
        width: args.width,
        panel_height: args.panel_height,
    };

    let pages = regenerate_fit_report(&args.csv, args.profile, &stand, &output, &config)
        .with_context(|| format!("Failed to graph {}", args.csv.display()))?;
    for page in &pages {
        info!("Wrote {}", page.path.display());
    }
    Ok(())
}
