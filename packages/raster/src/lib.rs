#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Out-of-core weighted aggregation of large single-band rasters.
//!
//! A set of water surface grids, one per simulation run, is combined into
//! one probability-weighted inundation raster without ever holding a full
//! grid in memory:
//!
//! 1. [`planner`] sizes row bands and worker concurrency from the raster
//!    dimensions and the memory available.
//! 2. [`mask`] reads one band of one run at a time and stores a wet/dry
//!    mask artifact.
//! 3. [`aggregate`] sums every run's mask for one band, scaled by the run's
//!    weight, into an aggregated band artifact.
//! 4. [`writer`] streams the aggregated bands, in band order, into a
//!    compressed `GeoTIFF` georeferenced like the first input grid.
//!
//! [`pipeline`] drives the stages concurrently on the tokio blocking pool,
//! records the job in the output's [`metadata`], and can [`crop`] the
//! result to the extent of its data.

pub mod aggregate;
pub mod artifact;
pub mod crop;
pub mod mask;
pub mod metadata;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod source;
pub mod weights;
pub mod writer;

use std::path::PathBuf;

pub use artifact::ChunkArray;
pub use crop::{DataExtent, crop_to_data, data_extent};
pub use planner::{ChunkPlanner, band_windows};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use source::{GeoTiffRaster, MemoryRaster, RasterSource};
pub use writer::{ChunkedRasterWriter, ReorderBuffer};

/// Errors raised while planning, chunking, aggregating, or writing.
///
/// Every variant names the raster, run, or band that failed.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// A file could not be read or written.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The TIFF codec failed.
    #[error("TIFF error at {}: {source}", path.display())]
    Tiff {
        /// Raster being read or written.
        path: PathBuf,
        /// Codec error.
        source: tiff::TiffError,
    },

    /// A raster uses a layout this reader does not handle.
    #[error("Unsupported raster {}: {detail}", path.display())]
    Unsupported {
        /// Raster path.
        path: PathBuf,
        /// What is unsupported.
        detail: String,
    },

    /// A chunk artifact could not be serialized.
    #[error("Failed to encode chunk artifact {}: {source}", path.display())]
    Encode {
        /// Artifact path.
        path: PathBuf,
        /// Serializer error.
        source: rmp_serde::encode::Error,
    },

    /// A chunk artifact could not be deserialized.
    #[error("Failed to decode chunk artifact {}: {source}", path.display())]
    Decode {
        /// Artifact path.
        path: PathBuf,
        /// Deserializer error.
        source: rmp_serde::decode::Error,
    },

    /// A chunk artifact holds a different dataset than requested.
    #[error("Artifact {} holds dataset {found}, expected {expected}", path.display())]
    Dataset {
        /// Artifact path.
        path: PathBuf,
        /// Requested dataset name.
        expected: String,
        /// Dataset name found.
        found: String,
    },

    /// No feasible chunk plan exists for this raster.
    #[error("Raster of {width}x{height} cannot be chunked: {reason}")]
    Infeasible {
        /// Columns.
        width: u32,
        /// Rows.
        height: u32,
        /// Why planning failed.
        reason: String,
    },

    /// A run id could not be derived from a file name.
    #[error("Cannot parse a run id from {}", path.display())]
    UnparseableRunId {
        /// Offending path.
        path: PathBuf,
    },

    /// Two input rasters map to the same run id.
    #[error("Run id {run_id} is shared by {} and {}", first.display(), second.display())]
    DuplicateRun {
        /// Shared run id.
        run_id: String,
        /// First raster with the id.
        first: PathBuf,
        /// Second raster with the id.
        second: PathBuf,
    },

    /// A run contributed chunks but has no weight.
    #[error("Band {band}: run {run_id} has no weight")]
    MissingWeight {
        /// Run without a weight.
        run_id: String,
        /// Band being aggregated.
        band: usize,
    },

    /// No mask artifacts exist for a band.
    #[error("Band {band}: no mask chunks found in {}", dir.display())]
    NoChunks {
        /// Band being aggregated.
        band: usize,
        /// Directory searched.
        dir: PathBuf,
    },

    /// A run in the job has no mask for a band.
    #[error("Band {band}: run {run_id} has no mask chunk")]
    MissingChunk {
        /// Band being aggregated.
        band: usize,
        /// Run without a mask.
        run_id: String,
    },

    /// Two runs produced differently shaped chunks for one band.
    #[error("Band {band}: run {run_id} chunk is {found:?}, expected {expected:?}")]
    ChunkShape {
        /// Band being aggregated.
        band: usize,
        /// Run whose chunk disagrees.
        run_id: String,
        /// `(rows, cols)` of the first chunk.
        expected: (usize, usize),
        /// `(rows, cols)` of this chunk.
        found: (usize, usize),
    },

    /// Input grids do not share one pixel grid.
    #[error("Raster {} is {found:?}, expected {expected:?}", path.display())]
    GridMismatch {
        /// Offending raster.
        path: PathBuf,
        /// `(width, height)` of the template.
        expected: (u32, u32),
        /// `(width, height)` of this raster.
        found: (u32, u32),
    },

    /// A requested row window lies outside the raster.
    #[error("Rows {row_start}..{row_end} are outside a raster of {height} rows")]
    Window {
        /// First requested row.
        row_start: u32,
        /// One past the last requested row.
        row_end: u32,
        /// Raster height.
        height: u32,
    },

    /// A band was handed to the writer out of order.
    #[error("Band {found} written out of order, expected band {expected}")]
    OutOfOrder {
        /// Next band the writer accepts.
        expected: usize,
        /// Band received.
        found: usize,
    },

    /// A band would write past the last raster row, or has the wrong width.
    #[error("Band {band} of {rows}x{cols} does not fit at row {row} of a {width}x{height} raster")]
    RowOverflow {
        /// Band index.
        band: usize,
        /// Rows in the band.
        rows: usize,
        /// Columns in the band.
        cols: usize,
        /// Row offset the band would start at.
        row: u32,
        /// Raster width.
        width: u32,
        /// Raster height.
        height: u32,
    },

    /// The writer was finished before every row was written.
    #[error("Output {} incomplete: {written} of {height} rows written", path.display())]
    Incomplete {
        /// Output path.
        path: PathBuf,
        /// Rows written.
        written: u32,
        /// Rows expected.
        height: u32,
    },

    /// The encoding thread stopped without reporting an error.
    #[error("Encoder for {} stopped unexpectedly", path.display())]
    EncoderGone {
        /// Output path.
        path: PathBuf,
    },

    /// A weights or settings file could not be parsed.
    #[error("Invalid settings file {}: {message}", path.display())]
    Settings {
        /// File being parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// No input rasters were given.
    #[error("No input rasters")]
    NoRasters,

    /// A blocking task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl RasterError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn tiff(path: impl Into<PathBuf>) -> impl FnOnce(tiff::TiffError) -> Self {
        let path = path.into();
        move |source| Self::Tiff { path, source }
    }
}
