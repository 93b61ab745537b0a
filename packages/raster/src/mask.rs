//! Wet/dry masks: one `u8` per pixel, 1 where the run has data.

use std::path::{Path, PathBuf};

use ras_post_raster_models::{BandWindow, ChunkKey};

use crate::artifact::{ChunkArray, write_artifact};
use crate::{RasterError, RasterSource};

/// Derives a run id from a raster path: the file name up to its first `.`.
///
/// # Errors
///
/// Returns [`RasterError::UnparseableRunId`] if the path has no file name,
/// it is not UTF-8, or it starts with `.`.
pub fn run_id_from_path(path: &Path) -> Result<String, RasterError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RasterError::UnparseableRunId {
            path: path.to_path_buf(),
        })
}

/// 1 for every value that is not no-data, 0 otherwise.
///
/// The no-data value is narrowed to `f32` once and compared in the pixel
/// type, so a declared value such as `-9999.9` matches the pixels that
/// store it. `f64` rasters are narrowed the same way when read, so equal
/// `f64` values still match. A NaN no-data value matches NaN pixels.
/// Without a no-data value every pixel is wet.
#[must_use]
#[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
pub fn mask_values(values: &[f32], nodata: Option<f64>) -> Vec<u8> {
    match nodata {
        None => vec![1; values.len()],
        Some(nd) if nd.is_nan() => values.iter().map(|v| u8::from(!v.is_nan())).collect(),
        Some(nd) => {
            let nd = nd as f32;
            values.iter().map(|&v| u8::from(v != nd)).collect()
        }
    }
}

/// Reads one band of `source` and masks it.
///
/// # Errors
///
/// Propagates read errors from `source`.
pub fn mask_band(
    source: &dyn RasterSource,
    window: BandWindow,
) -> Result<ChunkArray<u8>, RasterError> {
    let profile = source.profile();
    let values = source.read_rows(window.row_start, window.rows)?;
    let mask = mask_values(&values, profile.nodata);
    Ok(ChunkArray {
        rows: window.rows as usize,
        cols: profile.width as usize,
        data: mask,
    })
}

/// Masks one band of one run and stores it in `work_dir`.
///
/// Returns the artifact path.
///
/// # Errors
///
/// Propagates read and artifact write errors.
pub fn write_mask_band(
    source: &dyn RasterSource,
    run_id: &str,
    window: BandWindow,
    work_dir: &Path,
) -> Result<PathBuf, RasterError> {
    let key = ChunkKey::new(run_id, window.index);
    let mask = mask_band(source, window)?;
    let path = work_dir.join(key.file_name());
    write_artifact(&path, &key.dataset_name(), &mask)?;
    log::debug!(
        "Masked rows {}..{} of {run_id}",
        window.row_start,
        window.row_end()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use ras_post_raster_models::RasterProfile;

    use super::*;
    use crate::MemoryRaster;
    use crate::artifact::read_artifact;

    #[test]
    fn run_id_is_name_before_first_dot() {
        assert_eq!(
            run_id_from_path(Path::new("/data/E01_R0001.Terrain.tif")).unwrap(),
            "E01_R0001"
        );
        assert_eq!(run_id_from_path(Path::new("WSE_A.tif")).unwrap(), "WSE_A");
        assert_eq!(run_id_from_path(Path::new("plain")).unwrap(), "plain");
        assert!(matches!(
            run_id_from_path(Path::new("/data/.hidden.tif")),
            Err(RasterError::UnparseableRunId { .. })
        ));
        assert!(run_id_from_path(Path::new("/")).is_err());
    }

    #[test]
    fn numeric_nodata_masks_exact_matches() {
        let mask = mask_values(&[-9999.0, 0.0, 3.5, f32::NAN], Some(-9999.0));
        assert_eq!(mask, vec![0, 1, 1, 1]);
    }

    #[test]
    fn nodata_is_compared_in_pixel_precision() {
        let values = [-9999.9_f32, 1.0, 1e30, -3.402_82e38, -9999.0];
        assert_eq!(mask_values(&values, Some(-9999.9)), vec![0, 1, 1, 1, 1]);
        assert_eq!(mask_values(&values, Some(1e30)), vec![1, 1, 0, 1, 1]);
        assert_eq!(mask_values(&values, Some(-3.402_82e38)), vec![1, 1, 1, 0, 1]);
    }

    #[test]
    fn tagged_nodata_masks_its_own_pixels() {
        let profile = RasterProfile {
            width: 3,
            height: 1,
            nodata: "-9999.9".parse().ok(),
            ..RasterProfile::default()
        };
        let raster = MemoryRaster::new("A.tif", profile, vec![-9999.9, 0.5, -9999.9]).unwrap();
        let window = BandWindow {
            index: 0,
            row_start: 0,
            rows: 1,
        };
        assert_eq!(mask_band(&raster, window).unwrap().data, vec![0, 1, 0]);
    }

    #[test]
    fn nan_nodata_masks_nan() {
        let mask = mask_values(&[f32::NAN, 0.0, -9999.0], Some(f64::NAN));
        assert_eq!(mask, vec![0, 1, 1]);
    }

    #[test]
    fn no_nodata_means_all_wet() {
        assert_eq!(mask_values(&[0.0, f32::NAN], None), vec![1, 1]);
    }

    #[test]
    fn band_artifact_is_named_by_run_and_band() {
        let dir = std::env::temp_dir().join("ras_post_raster_mask_test");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let profile = RasterProfile {
            width: 2,
            height: 3,
            nodata: Some(0.0),
            ..RasterProfile::default()
        };
        let raster =
            MemoryRaster::new("A.tif", profile, vec![1.0, 0.0, 0.0, 2.0, 3.0, 0.0]).unwrap();
        let window = BandWindow {
            index: 1,
            row_start: 1,
            rows: 2,
        };

        let path = write_mask_band(&raster, "A", window, &dir).unwrap();
        assert_eq!(path, dir.join("bool_A_chunk1.zst"));

        let mask = read_artifact::<u8>(&path, "chunk1").unwrap();
        assert_eq!(mask.shape(), (2, 2));
        assert_eq!(mask.data, vec![0, 1, 1, 0]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
