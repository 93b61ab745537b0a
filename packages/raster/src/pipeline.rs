//! End-to-end heatmap aggregation: plan, mask, aggregate, write.
//!
//! Masking and aggregation run on the tokio blocking pool with about
//! `plan.workers` masks in flight. A band is aggregated once its own masks
//! are written. Aggregated bands finish in any order; a [`ReorderBuffer`]
//! hands them to a single writer task in band order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;

use futures::stream::{self, StreamExt as _};
use ras_post_raster_models::{BandWindow, HeatmapConfig, HeatmapSummary, WeightsConfig};

use crate::aggregate::{read_aggregate_band, write_aggregate_band};
use crate::crop::crop_to_data;
use crate::mask::{run_id_from_path, write_mask_band};
use crate::planner::{available_memory_bytes, logical_cores};
use crate::writer::SOFTWARE;
use crate::{
    ChunkPlanner, ChunkedRasterWriter, GeoTiffRaster, ProgressCallback, RasterError, RasterSource,
    ReorderBuffer, band_windows,
};

/// Subdirectory of the work directory holding mask artifacts.
pub const MASK_DIR: &str = "masks";

/// Subdirectory of the work directory holding aggregated bands.
pub const AGGREGATE_DIR: &str = "weighted";

/// Everything one aggregation needs besides its inputs.
#[derive(Debug, Clone)]
pub struct HeatmapJob {
    /// Weight per run id.
    pub weights: WeightsConfig,
    /// Directory for intermediate artifacts.
    pub work_dir: PathBuf,
    /// Output raster path.
    pub output: PathBuf,
    /// Memory model and output settings.
    pub config: HeatmapConfig,
    /// Memory available to the run, in bytes.
    pub available_memory_bytes: u64,
    /// Logical cores available.
    pub logical_cores: usize,
    /// Where the weights were loaded from, recorded in the output.
    pub weights_source: Option<PathBuf>,
}

impl HeatmapJob {
    /// Creates a job, detecting memory and cores from the environment.
    #[must_use]
    pub fn new(
        weights: WeightsConfig,
        work_dir: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        config: HeatmapConfig,
    ) -> Self {
        Self {
            weights,
            work_dir: work_dir.into(),
            output: output.into(),
            available_memory_bytes: available_memory_bytes(&config),
            logical_cores: logical_cores(),
            weights_source: None,
            config,
        }
    }

    /// Records where the weights came from.
    #[must_use]
    pub fn with_weights_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.weights_source = Some(path.into());
        self
    }
}

/// Opens `grids` as `GeoTIFF`s and aggregates them.
///
/// Each grid's run id is its file name up to the first `.`.
///
/// # Errors
///
/// Returns [`RasterError::DuplicateRun`] if two grids share a run id, or
/// any error from [`run_heatmap_sources`].
pub async fn run_heatmap(
    job: &HeatmapJob,
    grids: &[PathBuf],
    progress: Arc<dyn ProgressCallback>,
) -> Result<HeatmapSummary, RasterError> {
    let grids = grids.to_vec();
    let sources = tokio::task::spawn_blocking(move || {
        let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut sources: Vec<(String, Arc<dyn RasterSource>)> = Vec::with_capacity(grids.len());
        for path in grids {
            let run_id = run_id_from_path(&path)?;
            if let Some(first) = seen.get(&run_id) {
                return Err(RasterError::DuplicateRun {
                    run_id,
                    first: first.clone(),
                    second: path,
                });
            }
            let raster: Arc<dyn RasterSource> = Arc::new(GeoTiffRaster::open(&path)?);
            seen.insert(run_id.clone(), path);
            sources.push((run_id, raster));
        }
        Ok(sources)
    })
    .await??;

    run_heatmap_sources(job, sources, progress).await
}

/// Aggregates already-opened rasters keyed by run id.
///
/// The first raster is the template: every other raster must share its
/// grid, and the output copies its georeferencing.
///
/// Each band waits only for its own masks: as soon as every run's mask of
/// a band is written, that band is aggregated, while other bands are still
/// being masked.
///
/// # Errors
///
/// Returns [`RasterError::NoRasters`] for an empty input,
/// [`RasterError::DuplicateRun`] if two rasters share a run id,
/// [`RasterError::GridMismatch`] if the grids differ, a planning error
/// before any work starts, or the first masking, aggregation, writing, or
/// cropping error.
pub async fn run_heatmap_sources(
    job: &HeatmapJob,
    sources: Vec<(String, Arc<dyn RasterSource>)>,
    progress: Arc<dyn ProgressCallback>,
) -> Result<HeatmapSummary, RasterError> {
    let Some((_, template)) = sources.first() else {
        return Err(RasterError::NoRasters);
    };
    let profile = template.profile().clone();
    let mut seen: BTreeMap<&str, &Arc<dyn RasterSource>> = BTreeMap::new();
    for (run_id, source) in &sources {
        if let Some(first) = seen.insert(run_id, source) {
            return Err(RasterError::DuplicateRun {
                run_id: run_id.clone(),
                first: first.path().to_path_buf(),
                second: source.path().to_path_buf(),
            });
        }
        let other = source.profile();
        if !profile.same_grid(other) {
            return Err(RasterError::GridMismatch {
                path: source.path().to_path_buf(),
                expected: (profile.width, profile.height),
                found: (other.width, other.height),
            });
        }
    }
    let run_ids: Arc<BTreeSet<String>> =
        Arc::new(sources.iter().map(|(run_id, _)| run_id.clone()).collect());

    let plan = ChunkPlanner::new(job.config.clone()).plan(
        profile.width,
        profile.height,
        job.available_memory_bytes,
        job.logical_cores,
    )?;
    let windows = band_windows(profile.height, plan.bands);

    let mask_dir = job.work_dir.join(MASK_DIR);
    let aggregate_dir = job.work_dir.join(AGGREGATE_DIR);
    for dir in [&mask_dir, &aggregate_dir] {
        std::fs::create_dir_all(dir).map_err(RasterError::io(dir))?;
    }

    let runs = sources.len();
    // Masks of one band run side by side; enough bands run at once to keep
    // `plan.workers` masks in flight.
    let masks_per_band = plan.workers.min(runs).max(1);
    let bands_in_flight = (plan.workers / masks_per_band).max(1);

    log::info!(
        "Aggregating {runs} run(s) of {}x{} in {} band(s) with {} worker(s), {bands_in_flight} band(s) at a time",
        profile.width,
        profile.height,
        windows.len(),
        plan.workers
    );

    progress.set_total((runs * windows.len() + windows.len()) as u64);
    progress.set_position(0);
    progress.set_message(format!("Masking and aggregating {} band(s)", windows.len()));

    // ── Writer ──
    let (sender, receiver) = mpsc::channel::<(usize, PathBuf)>();
    let output = job.output.clone();
    let nodata = job.config.output_nodata;
    let mut writer_profile = profile.clone();
    writer_profile.metadata = output_metadata(job, &run_ids, windows.len());
    let writer = tokio::task::spawn_blocking(move || {
        let mut writer = ChunkedRasterWriter::create(&output, &writer_profile, nodata)?;
        for (index, path) in receiver {
            writer.write_band(index, read_aggregate_band(&path)?)?;
        }
        writer.finish()
    });

    // ── Bands ──
    let sources = Arc::new(sources);
    let weights = Arc::new(job.weights.clone());
    let mut bands = std::pin::pin!(
        stream::iter(windows.iter().copied().map(|window| {
            let sources = Arc::clone(&sources);
            let run_ids = Arc::clone(&run_ids);
            let weights = Arc::clone(&weights);
            let mask_dir = mask_dir.clone();
            let aggregate_dir = aggregate_dir.clone();
            let progress = Arc::clone(&progress);
            async move {
                mask_window(&sources, window, &mask_dir, masks_per_band, &progress).await?;

                let band = window.index;
                let path = tokio::task::spawn_blocking(move || {
                    write_aggregate_band(&mask_dir, band, &run_ids, &weights, &aggregate_dir)
                })
                .await??;
                progress.inc(1);
                log::debug!("Band {band} aggregated");
                Ok::<_, RasterError>((band, path))
            }
        }))
        .buffer_unordered(bands_in_flight)
    );

    let mut reorder = ReorderBuffer::new();
    let mut failure = None;
    'bands: while let Some(result) = bands.next().await {
        let (band, path) = match result {
            Ok(done) => done,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        for ready in reorder.push(band, path) {
            if sender.send(ready).is_err() {
                break 'bands;
            }
        }
    }
    drop(sender);

    let written = writer.await?;
    let output = match (failure, written) {
        (None, Ok(output)) => output,
        (Some(e), _) | (None, Err(e)) => {
            progress.finish_and_clear();
            return Err(e);
        }
    };

    // ── Crop ──
    let cropped = if job.config.crop_to_data {
        progress.set_message("Cropping to data extent".to_string());
        let full = output.clone();
        let target = cropped_path(&output);
        let crop_windows = windows.clone();
        let cropped = tokio::task::spawn_blocking(move || {
            let raster = GeoTiffRaster::open(&full)?;
            crop_to_data(&raster, &target, &crop_windows)
        })
        .await?;
        match cropped {
            Ok(cropped) => cropped.map(|(path, _)| path),
            Err(e) => {
                progress.finish_and_clear();
                return Err(e);
            }
        }
    } else {
        None
    };

    progress.finish(format!("Wrote {}", output.display()));

    Ok(HeatmapSummary {
        output,
        plan,
        runs,
        width: profile.width,
        height: profile.height,
        cropped,
    })
}

/// Masks `window` of every run, at most `concurrency` at a time.
async fn mask_window(
    sources: &[(String, Arc<dyn RasterSource>)],
    window: BandWindow,
    mask_dir: &Path,
    concurrency: usize,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<(), RasterError> {
    let masked: Vec<Result<PathBuf, RasterError>> =
        stream::iter(sources.iter().map(|(run_id, source)| {
            let run_id = run_id.clone();
            let source = Arc::clone(source);
            let dir = mask_dir.to_path_buf();
            let progress = Arc::clone(progress);
            async move {
                let path = tokio::task::spawn_blocking(move || {
                    write_mask_band(&*source, &run_id, window, &dir)
                })
                .await??;
                progress.inc(1);
                Ok::<_, RasterError>(path)
            }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;
    masked.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

/// Dataset metadata recorded in the output raster.
fn output_metadata(
    job: &HeatmapJob,
    run_ids: &BTreeSet<String>,
    bands: usize,
) -> BTreeMap<String, String> {
    let weight_total: f64 = run_ids.iter().filter_map(|id| job.weights.get(id)).sum();
    let mut metadata = BTreeMap::from([
        ("runs".to_string(), run_ids.len().to_string()),
        ("weight_total".to_string(), weight_total.to_string()),
        ("bands".to_string(), bands.to_string()),
        ("created".to_string(), chrono::Utc::now().to_rfc3339()),
        ("software".to_string(), SOFTWARE.to_string()),
    ]);
    if let Some(source) = &job.weights_source {
        metadata.insert("weights_source".to_string(), source.display().to_string());
    }
    metadata
}

/// Where the cropped copy of `output` goes: `name.cropped.tif` beside it.
#[must_use]
pub fn cropped_path(output: &Path) -> PathBuf {
    output.with_extension("cropped.tif")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use ras_post_raster_models::RasterProfile;

    use super::*;
    use crate::{MemoryRaster, null_progress};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ras_post_raster_pipeline_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn job(dir: &Path, weights: &[(&str, f64)]) -> HeatmapJob {
        HeatmapJob {
            weights: WeightsConfig {
                weights: weights.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
            },
            work_dir: dir.join("work"),
            output: dir.join("heatmap.tif"),
            config: HeatmapConfig::default(),
            available_memory_bytes: 16_000_000_000,
            logical_cores: 2,
            weights_source: None,
        }
    }

    fn source(name: &str, nodata: f64, data: Vec<f32>) -> Arc<dyn RasterSource> {
        let profile = RasterProfile {
            width: 4,
            height: 25,
            nodata: Some(nodata),
            ..RasterProfile::default()
        };
        Arc::new(MemoryRaster::new(name, profile, data).unwrap())
    }

    /// Run A is wet in the left half, run B in the first column.
    fn runs() -> Vec<(String, Arc<dyn RasterSource>)> {
        let a = (0..100)
            .map(|i| if i % 4 < 2 { 1.5 } else { -9999.0 })
            .collect();
        let b = (0..100)
            .map(|i| if i % 4 == 0 { 0.2 } else { f32::NAN })
            .collect();
        vec![
            ("A".to_string(), source("A.tif", -9999.0, a)),
            ("B".to_string(), source("B.tif", f64::NAN, b)),
        ]
    }

    #[tokio::test]
    async fn weighted_heatmap_matches_run_coverage() {
        let dir = temp_dir("coverage");
        let job = job(&dir, &[("A", 0.6), ("B", 0.4)]);

        let summary = run_heatmap_sources(&job, runs(), null_progress())
            .await
            .unwrap();
        assert_eq!(summary.output, dir.join("heatmap.tif"));
        assert_eq!(summary.plan.bands, 10);
        assert_eq!(summary.runs, 2);

        let out = GeoTiffRaster::open(&summary.output).unwrap();
        assert_eq!((out.profile().width, out.profile().height), (4, 25));
        for row in [0, 12, 24] {
            let values = out.read_rows(row, 1).unwrap();
            assert!((values[0] - 1.0).abs() < 1e-6);
            assert!((values[1] - 0.6).abs() < 1e-6);
            assert!(values[2].abs() < f32::EPSILON);
            assert!(values[3].abs() < f32::EPSILON);
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_weight_leaves_no_output() {
        let dir = temp_dir("missing_weight");
        let job = job(&dir, &[("A", 1.0)]);

        let err = run_heatmap_sources(&job, runs(), null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, RasterError::MissingWeight { ref run_id, .. } if run_id == "B"));
        assert!(!job.output.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn grids_must_match_the_template() {
        let dir = temp_dir("mismatch");
        let job = job(&dir, &[("A", 1.0), ("C", 1.0)]);
        let small = RasterProfile {
            width: 2,
            height: 2,
            ..RasterProfile::default()
        };
        let mut sources = runs();
        let other: Arc<dyn RasterSource> =
            Arc::new(MemoryRaster::new("C.tif", small, vec![0.0; 4]).unwrap());
        sources[1] = ("C".to_string(), other);

        assert!(matches!(
            run_heatmap_sources(&job, sources, null_progress()).await,
            Err(RasterError::GridMismatch { .. })
        ));
        assert!(matches!(
            run_heatmap_sources(&job, Vec::new(), null_progress()).await,
            Err(RasterError::NoRasters)
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn geotiff_grids_are_keyed_by_file_name() {
        let dir = temp_dir("geotiff");
        let profile = RasterProfile {
            width: 3,
            height: 12,
            ..RasterProfile::default()
        };
        for (name, value) in [("E01.Terrain.tif", 2.0_f32), ("E02.tif", -9999.0)] {
            let mut writer =
                ChunkedRasterWriter::create(dir.join(name), &profile, -9999.0).unwrap();
            writer
                .write_band(0, crate::ChunkArray::new(12, 3, vec![value; 36]).unwrap())
                .unwrap();
            writer.finish().unwrap();
        }

        let job = job(&dir, &[("E01", 0.3), ("E02", 0.7)]);
        let grids = vec![dir.join("E01.Terrain.tif"), dir.join("E02.tif")];
        let summary = run_heatmap(&job, &grids, null_progress()).await.unwrap();
        assert_eq!(summary.runs, 2);

        let out = GeoTiffRaster::open(&summary.output).unwrap();
        let values = out.read_rows(0, 12).unwrap();
        assert!(values.iter().all(|v| (v - 0.3).abs() < 1e-6));

        let duplicate = vec![dir.join("E01.Terrain.tif"), dir.join("E01.Terrain.tif")];
        assert!(matches!(
            run_heatmap(&job, &duplicate, null_progress()).await,
            Err(RasterError::DuplicateRun { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
    /// Source whose reads of `gate_row` wait until band 0 is aggregated.
    struct GatedRaster {
        inner: MemoryRaster,
        gate_row: u32,
        aggregated: PathBuf,
    }

    impl RasterSource for GatedRaster {
        fn path(&self) -> &Path {
            self.inner.path()
        }

        fn profile(&self) -> &RasterProfile {
            self.inner.profile()
        }

        fn read_rows(&self, row_start: u32, rows: u32) -> Result<Vec<f32>, RasterError> {
            if row_start == self.gate_row {
                let mut waited = 0;
                while !self.aggregated.exists() {
                    if waited >= 500 {
                        return Err(RasterError::Unsupported {
                            path: self.aggregated.clone(),
                            detail: "band 0 was never aggregated".to_string(),
                        });
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    waited += 1;
                }
            }
            self.inner.read_rows(row_start, rows)
        }
    }

    #[tokio::test]
    async fn band_aggregates_before_later_masks_finish() {
        let dir = temp_dir("per_band");
        let mut job = job(&dir, &[("A", 1.0)]);
        job.logical_cores = 1;

        let profile = RasterProfile {
            width: 2,
            height: 2,
            nodata: Some(-9999.0),
            ..RasterProfile::default()
        };
        let gated: Arc<dyn RasterSource> = Arc::new(GatedRaster {
            inner: MemoryRaster::new("A.tif", profile, vec![1.0, -9999.0, -9999.0, 1.0]).unwrap(),
            gate_row: 1,
            aggregated: job
                .work_dir
                .join(AGGREGATE_DIR)
                .join(ras_post_raster_models::aggregate_file_name(0)),
        });

        let summary = run_heatmap_sources(&job, vec![("A".to_string(), gated)], null_progress())
            .await
            .unwrap();
        assert_eq!(summary.plan.bands, 2);
        assert_eq!(summary.plan.workers, 2);

        let out = GeoTiffRaster::open(&summary.output).unwrap();
        assert_eq!(out.read_rows(0, 2).unwrap(), vec![1.0, 0.0, 0.0, 1.0]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_job_ignores_masks_of_the_first() {
        let dir = temp_dir("two_jobs");
        let first = job(&dir, &[("A", 0.5), ("B", 0.5)]);
        let wet = |name: &str| source(name, -9999.0, vec![1.0; 100]);
        run_heatmap_sources(
            &first,
            vec![("A".to_string(), wet("A.tif")), ("B".to_string(), wet("B.tif"))],
            null_progress(),
        )
        .await
        .unwrap();

        let mut second = job(&dir, &[("A", 0.5), ("B", 0.5)]);
        second.output = dir.join("second.tif");
        let dry = source("A.tif", -9999.0, vec![-9999.0; 100]);
        let summary = run_heatmap_sources(&second, vec![("A".to_string(), dry)], null_progress())
            .await
            .unwrap();
        assert_eq!(summary.runs, 1);

        let out = GeoTiffRaster::open(&summary.output).unwrap();
        assert_eq!(out.profile().metadata.get("runs").map(String::as_str), Some("1"));
        assert!(out.read_rows(0, 25).unwrap().iter().all(|v| v.abs() < f32::EPSILON));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn output_records_the_job_and_crops_to_data() {
        let dir = temp_dir("metadata_crop");
        let mut job =
            job(&dir, &[("A", 0.6), ("B", 0.4)]).with_weights_source(dir.join("weights.toml"));
        job.config.crop_to_data = true;

        let summary = run_heatmap_sources(&job, runs(), null_progress())
            .await
            .unwrap();

        let out = GeoTiffRaster::open(&summary.output).unwrap();
        let metadata = &out.profile().metadata;
        assert_eq!(metadata["runs"], "2");
        assert_eq!(metadata["bands"], "10");
        assert_eq!(metadata["weight_total"], "1");
        assert_eq!(
            metadata["weights_source"],
            dir.join("weights.toml").display().to_string()
        );
        assert!(chrono::DateTime::parse_from_rfc3339(&metadata["created"]).is_ok());

        // Only columns 0 and 1 are ever wet.
        let cropped_path = summary.cropped.unwrap();
        assert_eq!(cropped_path, dir.join("heatmap.cropped.tif"));
        let cropped = GeoTiffRaster::open(&cropped_path).unwrap();
        assert_eq!((cropped.profile().width, cropped.profile().height), (2, 25));
        assert_eq!(cropped.profile().metadata["runs"], "2");
        let values = cropped.read_rows(24, 1).unwrap();
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[1] - 0.6).abs() < 1e-6);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
