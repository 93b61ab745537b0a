#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for chunked raster aggregation.
//!
//! A raster is split into row bands ([`BandWindow`]) according to a
//! [`ChunkPlan`]. Each `(run, band)` mask is stored as an artifact named by
//! its [`ChunkKey`]; each aggregated band as `weighted_{band}.zst`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ── Planning ─────────────────────────────────────────────────────────

/// Band count and worker concurrency for one raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    /// Number of row bands.
    pub bands: usize,
    /// Maximum number of bands processed at once.
    pub workers: usize,
    /// Smallest band count that keeps a band under the memory ceiling.
    pub exact_bands: usize,
    /// Raw raster footprint in GB.
    pub raster_gb: f64,
    /// Estimated working memory of one band in GB.
    pub band_gb: f64,
}

/// A contiguous run of raster rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BandWindow {
    /// Band index, from 0.
    pub index: usize,
    /// First row of the band.
    pub row_start: u32,
    /// Number of rows in the band.
    pub rows: u32,
}

impl BandWindow {
    /// One past the last row of the band.
    #[must_use]
    pub const fn row_end(&self) -> u32 {
        self.row_start + self.rows
    }
}

// ── Artifacts ────────────────────────────────────────────────────────

/// Prefix of mask artifact file names.
pub const MASK_PREFIX: &str = "bool_";

/// Infix separating the run id from the band index in mask file names.
pub const CHUNK_INFIX: &str = "_chunk";

/// Extension of every chunk artifact.
pub const ARTIFACT_EXTENSION: &str = "zst";

/// Dataset name inside an aggregated band artifact.
pub const AGGREGATE_DATASET: &str = "chunk";

/// Identifies the mask of one band of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    /// Source run identifier.
    pub run_id: String,
    /// Band index.
    pub band: usize,
}

impl ChunkKey {
    /// Creates a key.
    #[must_use]
    pub fn new(run_id: impl Into<String>, band: usize) -> Self {
        Self {
            run_id: run_id.into(),
            band,
        }
    }

    /// Artifact file name, `bool_{run_id}_chunk{band}.zst`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{MASK_PREFIX}{}{CHUNK_INFIX}{}.{ARTIFACT_EXTENSION}",
            self.run_id, self.band
        )
    }

    /// Dataset name inside the artifact, `chunk{band}`.
    #[must_use]
    pub fn dataset_name(&self) -> String {
        format!("chunk{}", self.band)
    }

    /// Parses a mask artifact file name back into its key.
    ///
    /// Run ids may themselves contain underscores; only the last
    /// `_chunk{n}` is treated as the band suffix.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name
            .strip_prefix(MASK_PREFIX)?
            .strip_suffix(ARTIFACT_EXTENSION)?
            .strip_suffix('.')?;
        let (run_id, band) = stem.rsplit_once(CHUNK_INFIX)?;
        if run_id.is_empty() || band.is_empty() || !band.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self::new(run_id, band.parse().ok()?))
    }
}

/// File name of the aggregated artifact for `band`.
#[must_use]
pub fn aggregate_file_name(band: usize) -> String {
    format!("weighted_{band}.{ARTIFACT_EXTENSION}")
}

// ── Raster profile ───────────────────────────────────────────────────

/// `GeoTIFF` georeferencing tags, carried verbatim from a template raster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    /// `ModelPixelScaleTag` values.
    pub pixel_scale: Option<Vec<f64>>,
    /// `ModelTiepointTag` values.
    pub tiepoints: Option<Vec<f64>>,
    /// `ModelTransformationTag` values.
    pub transformation: Option<Vec<f64>>,
    /// `GeoKeyDirectoryTag` values.
    pub geo_key_directory: Option<Vec<u16>>,
    /// `GeoDoubleParamsTag` values.
    pub geo_double_params: Option<Vec<f64>>,
    /// `GeoAsciiParamsTag` value.
    pub geo_ascii_params: Option<String>,
}

impl GeoReference {
    /// Georeferencing of the window whose top-left pixel is `(col, row)`.
    ///
    /// A single tie point with a pixel scale keeps its raster coordinates
    /// and moves its model coordinates. Ground control point sets keep their
    /// model coordinates and move their raster coordinates. An affine
    /// transformation moves its translation.
    #[must_use]
    pub fn offset(&self, col: u32, row: u32) -> Self {
        let (col, row) = (f64::from(col), f64::from(row));
        let scale = self.pixel_scale.as_deref().filter(|s| s.len() >= 2);
        let tiepoints = self.tiepoints.as_ref().map(|points| {
            let mut points = points.clone();
            match scale {
                Some(scale) if points.len() == 6 => {
                    points[3] += col * scale[0];
                    points[4] -= row * scale[1];
                }
                _ => {
                    for point in points.chunks_exact_mut(6) {
                        point[0] -= col;
                        point[1] -= row;
                    }
                }
            }
            points
        });
        let transformation = self.transformation.as_ref().map(|m| {
            let mut m = m.clone();
            if m.len() >= 12 {
                for r in 0..3 {
                    m[r * 4 + 3] += m[r * 4] * col + m[r * 4 + 1] * row;
                }
            }
            m
        });
        Self {
            tiepoints,
            transformation,
            ..self.clone()
        }
    }
}

/// Dimensions, no-data value, and georeferencing of a single-band raster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterProfile {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
    /// No-data value, if the raster declares one.
    pub nodata: Option<f64>,
    /// Georeferencing tags.
    pub georef: GeoReference,
    /// GDAL metadata items.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RasterProfile {
    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if both rasters have the same pixel grid.
    #[must_use]
    pub const fn same_grid(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Memory model and output settings for heatmap aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapConfig {
    /// Largest working memory one band may need, in GB.
    #[serde(default = "default_band_memory_ceiling_gb")]
    pub band_memory_ceiling_gb: f64,

    /// Working memory of a band as a multiple of its raw pixel footprint.
    #[serde(default = "default_working_set_multiplier")]
    pub working_set_multiplier: f64,

    /// Bytes per source pixel.
    #[serde(default = "default_bytes_per_pixel")]
    pub bytes_per_pixel: u32,

    /// Band counts the exact requirement is rounded up to, ascending.
    #[serde(default = "default_band_tiers")]
    pub band_tiers: Vec<usize>,

    /// Upper bound on workers per logical core.
    #[serde(default = "default_workers_per_core")]
    pub workers_per_core: f64,

    /// No-data value written to the output raster.
    #[serde(default)]
    pub output_nodata: f32,

    /// Memory available to the run, in GB. Detected from the environment
    /// when omitted.
    #[serde(default)]
    pub available_memory_gb: Option<f64>,

    /// Also write a copy cropped to the extent of pixels with data.
    #[serde(default)]
    pub crop_to_data: bool,
}

const fn default_band_memory_ceiling_gb() -> f64 {
    2.0
}

const fn default_working_set_multiplier() -> f64 {
    3.0
}

const fn default_bytes_per_pixel() -> u32 {
    4
}

fn default_band_tiers() -> Vec<usize> {
    vec![10, 20, 30]
}

const fn default_workers_per_core() -> f64 {
    2.5
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            band_memory_ceiling_gb: default_band_memory_ceiling_gb(),
            working_set_multiplier: default_working_set_multiplier(),
            bytes_per_pixel: default_bytes_per_pixel(),
            band_tiers: default_band_tiers(),
            workers_per_core: default_workers_per_core(),
            output_nodata: 0.0,
            available_memory_gb: None,
            crop_to_data: false,
        }
    }
}

/// Run id → scalar weight. Weights need not sum to one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsConfig {
    /// Weight per run.
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl WeightsConfig {
    /// Weight of one run.
    #[must_use]
    pub fn get(&self, run_id: &str) -> Option<f64> {
        self.weights.get(run_id).copied()
    }
}

/// What a finished aggregation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapSummary {
    /// Output raster path.
    pub output: PathBuf,
    /// Plan the run used.
    pub plan: ChunkPlan,
    /// Runs aggregated.
    pub runs: usize,
    /// Output columns.
    pub width: u32,
    /// Output rows.
    pub height: u32,
    /// Copy cropped to the data extent, when requested and any pixel has
    /// data.
    #[serde(default)]
    pub cropped: Option<PathBuf>,
}
