//! Chunk artifacts: one named 2-D array per file, `MessagePack` inside zstd.
//!
//! Artifacts are written to a temporary name and renamed into place, so a
//! file that exists under its final name is always complete.

use std::fs::File;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::RasterError;

const ZSTD_LEVEL: i32 = 3;

/// A dense row-major 2-D array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkArray<T> {
    /// Row count.
    pub rows: usize,
    /// Column count.
    pub cols: usize,
    /// `rows * cols` values, row-major.
    pub data: Vec<T>,
}

impl<T> ChunkArray<T> {
    /// Wraps `data` as a `rows` x `cols` array.
    ///
    /// Returns `None` if the length does not match the shape.
    #[must_use]
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Option<Self> {
        (rows.checked_mul(cols)? == data.len()).then_some(Self { rows, cols, data })
    }

    /// `(rows, cols)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

#[derive(Serialize)]
struct ArtifactRef<'a, T> {
    dataset: &'a str,
    array: &'a ChunkArray<T>,
}

#[derive(Deserialize)]
struct Artifact<T> {
    dataset: String,
    array: ChunkArray<T>,
}

/// Writes `array` under the name `dataset` to `path`.
///
/// Returns the compressed size in bytes.
///
/// # Errors
///
/// Returns [`RasterError::Io`] if the file cannot be written and
/// [`RasterError::Encode`] if serialization fails.
pub fn write_artifact<T: Serialize>(
    path: &Path,
    dataset: &str,
    array: &ChunkArray<T>,
) -> Result<u64, RasterError> {
    let tmp = path.with_extension("zst.tmp");

    let file = File::create(&tmp).map_err(RasterError::io(&tmp))?;
    let mut encoder = zstd::Encoder::new(file, ZSTD_LEVEL).map_err(RasterError::io(&tmp))?;
    rmp_serde::encode::write_named(&mut encoder, &ArtifactRef { dataset, array }).map_err(
        |source| RasterError::Encode {
            path: path.to_path_buf(),
            source,
        },
    )?;
    encoder.finish().map_err(RasterError::io(&tmp))?;

    std::fs::rename(&tmp, path).map_err(RasterError::io(path))?;

    let size = std::fs::metadata(path).map_or(0, |m| m.len());
    log::trace!("Wrote {dataset} to {} ({size} bytes)", path.display());
    Ok(size)
}

/// Reads the array named `dataset` from `path`.
///
/// # Errors
///
/// Returns [`RasterError::Io`] if the file cannot be opened,
/// [`RasterError::Decode`] if it is not a valid artifact, and
/// [`RasterError::Dataset`] if it holds a different dataset.
pub fn read_artifact<T: DeserializeOwned>(
    path: &Path,
    dataset: &str,
) -> Result<ChunkArray<T>, RasterError> {
    let file = File::open(path).map_err(RasterError::io(path))?;
    let decoder = zstd::Decoder::new(file).map_err(RasterError::io(path))?;
    let artifact: Artifact<T> =
        rmp_serde::from_read(decoder).map_err(|source| RasterError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

    if artifact.dataset != dataset {
        return Err(RasterError::Dataset {
            path: path.to_path_buf(),
            expected: dataset.to_string(),
            found: artifact.dataset,
        });
    }
    if artifact.array.rows.checked_mul(artifact.array.cols) != Some(artifact.array.data.len()) {
        return Err(RasterError::Dataset {
            path: path.to_path_buf(),
            expected: format!(
                "{dataset} of {}x{}",
                artifact.array.rows, artifact.array.cols
            ),
            found: format!("{dataset} with {} values", artifact.array.data.len()),
        });
    }

    Ok(artifact.array)
}
