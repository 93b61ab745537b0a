//! Cropping a raster to the rectangle that holds its data.
//!
//! Both passes read one band window at a time, so a crop needs no more
//! memory than the aggregation that produced the raster.

use std::path::{Path, PathBuf};

use ras_post_raster_models::{BandWindow, RasterProfile};
use serde::{Deserialize, Serialize};

use crate::mask::mask_values;
use crate::{ChunkArray, ChunkedRasterWriter, RasterError, RasterSource};

/// Pixel rectangle `cols × rows`, end-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataExtent {
    /// First column with data.
    pub col_start: u32,
    /// One past the last column with data.
    pub col_end: u32,
    /// First row with data.
    pub row_start: u32,
    /// One past the last row with data.
    pub row_end: u32,
}

impl DataExtent {
    /// Columns in the extent.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.col_end - self.col_start
    }

    /// Rows in the extent.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.row_end - self.row_start
    }

    fn include(extent: Option<Self>, col_start: u32, col_end: u32, row: u32) -> Self {
        match extent {
            None => Self {
                col_start,
                col_end,
                row_start: row,
                row_end: row + 1,
            },
            Some(e) => Self {
                col_start: e.col_start.min(col_start),
                col_end: e.col_end.max(col_end),
                row_start: e.row_start,
                row_end: row + 1,
            },
        }
    }
}

/// Smallest rectangle holding every pixel that is not no-data, scanning
/// `windows` top to bottom.
///
/// Returns `None` when no pixel has data.
///
/// # Errors
///
/// Propagates read errors from `source`.
pub fn data_extent(
    source: &dyn RasterSource,
    windows: &[BandWindow],
) -> Result<Option<DataExtent>, RasterError> {
    let profile = source.profile();
    let width = profile.width as usize;
    let mut extent = None;

    for window in windows {
        let mask = mask_values(
            &source.read_rows(window.row_start, window.rows)?,
            profile.nodata,
        );
        for (offset, row) in (window.row_start..window.row_end()).enumerate() {
            let pixels = &mask[offset * width..(offset + 1) * width];
            let (Some(first), Some(last)) = (
                pixels.iter().position(|&wet| wet == 1),
                pixels.iter().rposition(|&wet| wet == 1),
            ) else {
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            let (first, last) = (first as u32, last as u32);
            extent = Some(DataExtent::include(extent, first, last + 1, row));
        }
    }

    Ok(extent)
}

/// Writes the part of `source` inside its [`data_extent`] to `output`,
/// georeferenced so every pixel keeps its map position.
///
/// Returns `None`, writing nothing, when no pixel has data.
///
/// # Errors
///
/// Propagates read and write errors.
pub fn crop_to_data(
    source: &dyn RasterSource,
    output: &Path,
    windows: &[BandWindow],
) -> Result<Option<(PathBuf, DataExtent)>, RasterError> {
    let Some(extent) = data_extent(source, windows)? else {
        log::warn!(
            "{} has no data; skipping crop",
            source.path().display()
        );
        return Ok(None);
    };

    let template = source.profile();
    let profile = RasterProfile {
        width: extent.width(),
        height: extent.height(),
        nodata: template.nodata,
        georef: template.georef.offset(extent.col_start, extent.row_start),
        metadata: template.metadata.clone(),
    };
    #[allow(clippy::cast_possible_truncation)]
    let nodata = template.nodata.map_or(0.0, |nd| nd as f32);

    let mut writer = ChunkedRasterWriter::create(output, &profile, nodata)?;
    let (col_start, col_end) = (extent.col_start as usize, extent.col_end as usize);
    let width = template.width as usize;
    let mut band = 0;

    for window in windows {
        let row_start = window.row_start.max(extent.row_start);
        let row_end = window.row_end().min(extent.row_end);
        if row_start >= row_end {
            continue;
        }
        let values = source.read_rows(row_start, row_end - row_start)?;
        let data: Vec<f32> = values
            .chunks_exact(width)
            .flat_map(|row| row[col_start..col_end].iter().copied())
            .collect();
        let rows = (row_end - row_start) as usize;
        writer.write_band(
            band,
            ChunkArray {
                rows,
                cols: col_end - col_start,
                data,
            },
        )?;
        band += 1;
    }

    let path = writer.finish()?;
    log::info!(
        "Cropped {} to {}x{} at ({}, {})",
        source.path().display(),
        extent.width(),
        extent.height(),
        extent.col_start,
        extent.row_start
    );
    Ok(Some((path, extent)))
}

#[cfg(test)]
mod tests {
    use ras_post_raster_models::GeoReference;

    use super::*;
    use crate::{GeoTiffRaster, MemoryRaster, band_windows};

    fn raster(width: u32, height: u32, wet: &[(u32, u32)]) -> MemoryRaster {
        let mut data = vec![0.0_f32; (width * height) as usize];
        for &(col, row) in wet {
            data[(row * width + col) as usize] = 0.5;
        }
        let profile = RasterProfile {
            width,
            height,
            nodata: Some(0.0),
            georef: GeoReference {
                pixel_scale: Some(vec![2.0, 2.0, 0.0]),
                tiepoints: Some(vec![0.0, 0.0, 0.0, 100.0, 200.0, 0.0]),
                ..GeoReference::default()
            },
            ..RasterProfile::default()
        };
        MemoryRaster::new("heatmap.tif", profile, data).unwrap()
    }

    #[test]
    fn extent_spans_every_wet_pixel() {
        let source = raster(6, 7, &[(2, 1), (4, 3), (1, 5)]);
        let extent = data_extent(&source, &band_windows(7, 3)).unwrap().unwrap();
        assert_eq!(
            extent,
            DataExtent {
                col_start: 1,
                col_end: 5,
                row_start: 1,
                row_end: 6,
            }
        );
        assert_eq!((extent.width(), extent.height()), (4, 5));
    }

    #[test]
    fn dry_raster_has_no_extent() {
        let source = raster(3, 3, &[]);
        assert_eq!(data_extent(&source, &band_windows(3, 2)).unwrap(), None);

        let dir = std::env::temp_dir().join("ras_post_raster_crop_dry");
        assert!(
            crop_to_data(&source, &dir.join("never.tif"), &band_windows(3, 2))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn crop_keeps_pixels_in_place() {
        let dir = std::env::temp_dir().join("ras_post_raster_crop");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let source = raster(6, 7, &[(2, 1), (4, 3), (1, 5)]);
        let (path, extent) = crop_to_data(&source, &dir.join("cropped.tif"), &band_windows(7, 3))
            .unwrap()
            .unwrap();

        let cropped = GeoTiffRaster::open(&path).unwrap();
        let profile = cropped.profile();
        assert_eq!((profile.width, profile.height), (extent.width(), extent.height()));
        assert_eq!(
            profile.georef.tiepoints,
            Some(vec![0.0, 0.0, 0.0, 102.0, 198.0, 0.0])
        );

        let values = cropped.read_rows(0, profile.height).unwrap();
        let wet: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .map(|(i, _)| i)
            .collect();
        // (2,1) -> (1,0); (4,3) -> (3,2); (1,5) -> (0,4) in a 4-wide grid.
        assert_eq!(wet, vec![1, 11, 16]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
