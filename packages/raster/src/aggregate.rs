//! Weighted sum of every run's mask for one band.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ras_post_raster_models::{AGGREGATE_DATASET, ChunkKey, WeightsConfig, aggregate_file_name};

use crate::RasterError;
use crate::artifact::{ChunkArray, read_artifact, write_artifact};

/// Mask artifacts for `band` in `mask_dir`, sorted by run id.
///
/// # Errors
///
/// Returns [`RasterError::Io`] if the directory cannot be listed.
pub fn band_chunks(mask_dir: &Path, band: usize) -> Result<Vec<(ChunkKey, PathBuf)>, RasterError> {
    let mut chunks = Vec::new();
    for entry in std::fs::read_dir(mask_dir).map_err(RasterError::io(mask_dir))? {
        let entry = entry.map_err(RasterError::io(mask_dir))?;
        let Some(key) = entry.file_name().to_str().and_then(ChunkKey::parse) else {
            continue;
        };
        if key.band == band {
            chunks.push((key, entry.path()));
        }
    }
    chunks.sort();
    Ok(chunks)
}

/// Sums `mask × weight` over the masks of `runs` for `band`.
///
/// Masks in `mask_dir` from runs outside `runs` are left alone, so one work
/// directory can serve several jobs. Accumulates in `f64`; a pixel's value
/// is the total weight of the runs that are wet there.
///
/// # Errors
///
/// Returns [`RasterError::NoChunks`] if no run has a mask for the band,
/// [`RasterError::MissingChunk`] if one of `runs` has none,
/// [`RasterError::MissingWeight`] if a run has no weight,
/// [`RasterError::ChunkShape`] if runs disagree on the band shape, or an
/// artifact read error.
pub fn aggregate_band(
    mask_dir: &Path,
    band: usize,
    runs: &BTreeSet<String>,
    weights: &WeightsConfig,
) -> Result<ChunkArray<f32>, RasterError> {
    let chunks: Vec<_> = band_chunks(mask_dir, band)?
        .into_iter()
        .filter(|(key, _)| runs.contains(&key.run_id))
        .collect();
    if chunks.is_empty() {
        return Err(RasterError::NoChunks {
            band,
            dir: mask_dir.to_path_buf(),
        });
    }
    if let Some(run_id) = runs
        .iter()
        .find(|run| !chunks.iter().any(|(key, _)| &key.run_id == *run))
    {
        return Err(RasterError::MissingChunk {
            band,
            run_id: run_id.clone(),
        });
    }

    let mut shape = None;
    let mut sums: Vec<f64> = Vec::new();

    for (key, path) in &chunks {
        let weight = weights
            .get(&key.run_id)
            .ok_or_else(|| RasterError::MissingWeight {
                run_id: key.run_id.clone(),
                band,
            })?;
        let mask = read_artifact::<u8>(path, &key.dataset_name())?;

        match shape {
            None => {
                shape = Some(mask.shape());
                sums = vec![0.0; mask.data.len()];
            }
            Some(expected) if expected != mask.shape() => {
                return Err(RasterError::ChunkShape {
                    band,
                    run_id: key.run_id.clone(),
                    expected,
                    found: mask.shape(),
                });
            }
            Some(_) => {}
        }

        for (sum, &wet) in sums.iter_mut().zip(&mask.data) {
            *sum += f64::from(wet) * weight;
        }
    }

    let (rows, cols) = shape.unwrap_or_default();
    log::debug!("Aggregated band {band} from {} run(s)", chunks.len());

    #[allow(clippy::cast_possible_truncation)]
    let data = sums.into_iter().map(|s| s as f32).collect();
    Ok(ChunkArray { rows, cols, data })
}

/// Aggregates `band` and stores it as `weighted_{band}.zst` in `out_dir`.
///
/// Returns the artifact path.
///
/// # Errors
///
/// See [`aggregate_band`]; also propagates artifact write errors.
pub fn write_aggregate_band(
    mask_dir: &Path,
    band: usize,
    runs: &BTreeSet<String>,
    weights: &WeightsConfig,
    out_dir: &Path,
) -> Result<PathBuf, RasterError> {
    let array = aggregate_band(mask_dir, band, runs, weights)?;
    let path = out_dir.join(aggregate_file_name(band));
    write_artifact(&path, AGGREGATE_DATASET, &array)?;
    Ok(path)
}

/// Reads an aggregated band written by [`write_aggregate_band`].
///
/// # Errors
///
/// Propagates artifact read errors.
pub fn read_aggregate_band(path: &Path) -> Result<ChunkArray<f32>, RasterError> {
    read_artifact(path, AGGREGATE_DATASET)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn setup(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ras_post_raster_aggregate_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_mask(dir: &Path, run: &str, band: usize, rows: usize, data: Vec<u8>) {
        let key = ChunkKey::new(run, band);
        let cols = data.len() / rows;
        write_artifact(
            &dir.join(key.file_name()),
            &key.dataset_name(),
            &ChunkArray::new(rows, cols, data).unwrap(),
        )
        .unwrap();
    }

    fn runs(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    fn weights(pairs: &[(&str, f64)]) -> WeightsConfig {
        WeightsConfig {
            weights: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn weights_sum_where_runs_are_wet() {
        let dir = setup("weighted_sum");
        write_mask(&dir, "A", 0, 1, vec![1, 1, 0]);
        write_mask(&dir, "B", 0, 1, vec![1, 0, 0]);
        write_mask(&dir, "A", 1, 1, vec![0, 0, 0]);

        let out = aggregate_band(&dir, 0, &runs(&["A", "B"]), &weights(&[("A", 0.6), ("B", 0.4)]))
            .unwrap();
        assert_eq!(out.shape(), (1, 3));
        assert!((out.data[0] - 1.0).abs() < 1e-6);
        assert!((out.data[1] - 0.6).abs() < 1e-6);
        assert!(out.data[2].abs() < f32::EPSILON);

        let path = write_aggregate_band(
            &dir,
            0,
            &runs(&["A", "B"]),
            &weights(&[("A", 0.6), ("B", 0.4)]),
            &dir,
        )
        .unwrap();
        assert_eq!(path, dir.join("weighted_0.zst"));
        assert_eq!(read_aggregate_band(&path).unwrap(), out);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_weight_is_fatal() {
        let dir = setup("missing_weight");
        write_mask(&dir, "A", 0, 1, vec![1]);
        write_mask(&dir, "C", 0, 1, vec![1]);

        let err = aggregate_band(&dir, 0, &runs(&["A", "C"]), &weights(&[("A", 1.0)])).unwrap_err();
        assert!(matches!(err, RasterError::MissingWeight { ref run_id, band: 0 } if run_id == "C"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_band_is_an_error() {
        let dir = setup("empty_band");
        write_mask(&dir, "A", 0, 1, vec![1]);

        assert!(matches!(
            aggregate_band(&dir, 4, &runs(&["A"]), &weights(&[("A", 1.0)])),
            Err(RasterError::NoChunks { band: 4, .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shape_disagreement_is_malformed() {
        let dir = setup("shape");
        write_mask(&dir, "A", 0, 1, vec![1, 1]);
        write_mask(&dir, "B", 0, 2, vec![1, 1]);

        assert!(matches!(
            aggregate_band(&dir, 0, &runs(&["A", "B"]), &weights(&[("A", 1.0), ("B", 1.0)])),
            Err(RasterError::ChunkShape { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn masks_of_other_runs_are_not_summed() {
        let dir = setup("other_runs");
        write_mask(&dir, "A", 0, 1, vec![0, 0]);
        write_mask(&dir, "B", 0, 1, vec![1, 1]);

        let out = aggregate_band(&dir, 0, &runs(&["A"]), &weights(&[("A", 0.5), ("B", 0.5)]))
            .unwrap();
        assert_eq!(out.data, vec![0.0, 0.0]);

        assert!(matches!(
            aggregate_band(&dir, 0, &runs(&["A", "D"]), &weights(&[("A", 0.5), ("D", 0.5)])),
            Err(RasterError::MissingChunk { ref run_id, band: 0 }) if run_id == "D"
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = setup("unrelated");
        write_mask(&dir, "A", 2, 1, vec![1, 0]);
        std::fs::write(dir.join("notes.txt"), "x").unwrap();
        std::fs::write(dir.join("weighted_2.zst"), "x").unwrap();

        let chunks = band_chunks(&dir, 2).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, ChunkKey::new("A", 2));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
