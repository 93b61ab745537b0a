//! `plan` and `heatmap` subcommands.

use std::path::Path;

use ras_post_cli_utils::{IndicatifProgress, MultiProgress};
use ras_post_raster::pipeline::{HeatmapJob, run_heatmap};
use ras_post_raster::planner::{available_memory_bytes, logical_cores};
use ras_post_raster::weights::{load_config, load_weights};
use ras_post_raster::{ChunkPlanner, GeoTiffRaster, RasterSource, band_windows};
use ras_post_raster_models::HeatmapConfig;

use crate::{HeatmapArgs, PlanArgs};

fn settings(
    path: Option<&Path>,
    memory_gb: Option<f64>,
) -> Result<HeatmapConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => HeatmapConfig::default(),
    };
    if memory_gb.is_some() {
        config.available_memory_gb = memory_gb;
    }
    Ok(config)
}

pub fn plan(args: &PlanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings(args.config.as_deref(), args.memory_gb)?;
    let raster = GeoTiffRaster::open(&args.raster)?;
    let profile = raster.profile();

    let plan = ChunkPlanner::new(config.clone()).plan(
        profile.width,
        profile.height,
        available_memory_bytes(&config),
        logical_cores(),
    )?;
    for window in band_windows(profile.height, plan.bands) {
        log::debug!(
            "band {}: rows {}..{}",
            window.index,
            window.row_start,
            window.row_end()
        );
    }

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

pub async fn run(
    args: &HeatmapArgs,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = settings(args.config.as_deref(), args.memory_gb)?;
    config.crop_to_data |= args.crop;
    let weights = load_weights(&args.weights)?;
    let job = HeatmapJob::new(weights, &args.work_dir, &args.out, config)
        .with_weights_source(&args.weights);

    let progress = IndicatifProgress::chunks_bar(multi, "Heatmap");
    let summary = run_heatmap(&job, &args.grids, progress).await?;

    log::info!(
        "Aggregated {} run(s) into {} ({}x{}, {} bands)",
        summary.runs,
        summary.output.display(),
        summary.width,
        summary.height,
        summary.plan.bands
    );
    if let Some(cropped) = &summary.cropped {
        log::info!("Cropped copy at {}", cropped.display());
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
