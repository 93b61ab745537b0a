#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command line entry point for HEC-RAS 2D results post-processing.
//!
//! * `qaqc` screens every 2D flow area of a plan results file for velocity
//!   anomalies and deep perimeter faces and writes a `GeoJSON` report.
//! * `plan` prints the chunk plan a heatmap run would use for a raster.
//! * `heatmap` aggregates per-run water surface grids into one
//!   probability-weighted inundation raster.
//!
//! Logging goes through [`ras_post_cli_utils::init_logger`]; set
//! `RUST_LOG=info` (or `debug`) to see pipeline progress.

mod heatmap;
mod qaqc;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ras_post", about = "HEC-RAS 2D results post-processing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen a plan results file for velocity anomalies and deep edges
    Qaqc(QaqcArgs),
    /// Print the chunk plan for a raster
    Plan(PlanArgs),
    /// Aggregate weighted water surface grids into a heatmap raster
    Heatmap(HeatmapArgs),
}

#[derive(Args)]
struct QaqcArgs {
    /// Plan results file (`.p##.hdf`)
    #[arg(long)]
    plan: PathBuf,

    /// Screening thresholds (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Report path; defaults to the plan path with `.qaqc.geojson`
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct PlanArgs {
    /// Template raster
    #[arg(long)]
    raster: PathBuf,

    /// Heatmap settings (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Memory available to the run, in GB
    #[arg(long, env = "RAS_POST_MEMORY_GB")]
    memory_gb: Option<f64>,
}

#[derive(Args)]
struct HeatmapArgs {
    /// Run weights (TOML `[weights]` table or JSON object)
    #[arg(long)]
    weights: PathBuf,

    /// Output raster
    #[arg(long)]
    out: PathBuf,

    /// Directory for intermediate chunk artifacts
    #[arg(long)]
    work_dir: PathBuf,

    /// Heatmap settings (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Memory available to the run, in GB
    #[arg(long, env = "RAS_POST_MEMORY_GB")]
    memory_gb: Option<f64>,

    /// Also write a copy cropped to the pixels with data
    #[arg(long)]
    crop: bool,

    /// Water surface grids, one per run; the first is the template
    #[arg(required = true)]
    grids: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = ras_post_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Qaqc(args) => {
            tokio::task::spawn_blocking(move || qaqc::run(&args))
                .await?
                .map_err(|e| -> Box<dyn std::error::Error> { e })?;
        }
        Commands::Plan(args) => heatmap::plan(&args)?,
        Commands::Heatmap(args) => heatmap::run(&args, &multi).await?,
    }

    Ok(())
}
