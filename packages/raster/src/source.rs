//! Row-window access to single-band rasters.
//!
//! [`GeoTiffRaster`] reads only the strips or tiles that intersect the
//! requested rows, so memory use is bounded by the window, not the raster.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ras_post_raster_models::{GeoReference, RasterProfile};
use tiff::ColorType;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

use crate::RasterError;
use crate::metadata::{GDAL_METADATA, parse_xml};

/// A single-band raster readable one row window at a time.
pub trait RasterSource: Send + Sync {
    /// Where the raster lives, for messages and run ids.
    fn path(&self) -> &Path;

    /// Dimensions, no-data value, and georeferencing.
    fn profile(&self) -> &RasterProfile;

    /// Reads rows `row_start..row_start + rows` as row-major `f32`.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Window`] if the window lies outside the
    /// raster, or the underlying read error.
    fn read_rows(&self, row_start: u32, rows: u32) -> Result<Vec<f32>, RasterError>;
}

fn check_window(profile: &RasterProfile, row_start: u32, rows: u32) -> Result<(), RasterError> {
    let row_end = row_start.saturating_add(rows);
    if rows == 0 || row_end > profile.height {
        return Err(RasterError::Window {
            row_start,
            row_end,
            height: profile.height,
        });
    }
    Ok(())
}

// ── GeoTIFF ──────────────────────────────────────────────────────────

/// A single-band `GeoTIFF` on disk.
#[derive(Debug, Clone)]
pub struct GeoTiffRaster {
    path: PathBuf,
    profile: RasterProfile,
}

impl GeoTiffRaster {
    /// Opens a raster and reads its profile.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Io`] or [`RasterError::Tiff`] if the file
    /// cannot be decoded, and [`RasterError::Unsupported`] if it has more
    /// than one band.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RasterError> {
        let path = path.into();
        let mut decoder = open_decoder(&path)?;
        let tiff_err = |source| RasterError::Tiff {
            path: path.clone(),
            source,
        };

        let colortype = decoder.colortype().map_err(tiff_err)?;
        if !matches!(colortype, ColorType::Gray(_)) {
            return Err(RasterError::Unsupported {
                path,
                detail: format!("expected one band, found {colortype:?}"),
            });
        }

        let (width, height) = decoder.dimensions().map_err(tiff_err)?;
        let f64_tag = |decoder: &mut Decoder<BufReader<File>>,
                       tag: Tag|
         -> Result<Option<Vec<f64>>, RasterError> {
            decoder
                .find_tag(tag)
                .and_then(|v| v.map(Value::into_f64_vec).transpose())
                .map_err(tiff_err)
        };

        let georef = GeoReference {
            pixel_scale: f64_tag(&mut decoder, Tag::ModelPixelScaleTag)?,
            tiepoints: f64_tag(&mut decoder, Tag::ModelTiepointTag)?,
            transformation: f64_tag(&mut decoder, Tag::ModelTransformationTag)?,
            geo_key_directory: decoder
                .find_tag(Tag::GeoKeyDirectoryTag)
                .and_then(|v| v.map(Value::into_u16_vec).transpose())
                .map_err(tiff_err)?,
            geo_double_params: f64_tag(&mut decoder, Tag::GeoDoubleParamsTag)?,
            geo_ascii_params: decoder
                .find_tag(Tag::GeoAsciiParamsTag)
                .and_then(|v| v.map(Value::into_string).transpose())
                .map_err(tiff_err)?,
        };

        let nodata = decoder
            .find_tag(Tag::GdalNodata)
            .and_then(|v| v.map(Value::into_string).transpose())
            .map_err(tiff_err)?
            .and_then(|s| parse_nodata(&s));

        let metadata = decoder
            .find_tag(GDAL_METADATA)
            .and_then(|v| v.map(Value::into_string).transpose())
            .map_err(tiff_err)?
            .map(|xml| parse_xml(&xml))
            .unwrap_or_default();

        log::debug!(
            "Opened {} ({width}x{height}, nodata {nodata:?})",
            path.display()
        );

        Ok(Self {
            path,
            profile: RasterProfile {
                width,
                height,
                nodata,
                georef,
                metadata,
            },
        })
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, RasterError> {
    let file = File::open(path).map_err(RasterError::io(path))?;
    Decoder::new(BufReader::new(file))
        .map(|d| d.with_limits(Limits::unlimited()))
        .map_err(RasterError::tiff(path))
}

fn parse_nodata(text: &str) -> Option<f64> {
    text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .parse()
        .ok()
}

impl RasterSource for GeoTiffRaster {
    fn path(&self) -> &Path {
        &self.path
    }

    fn profile(&self) -> &RasterProfile {
        &self.profile
    }

    fn read_rows(&self, row_start: u32, rows: u32) -> Result<Vec<f32>, RasterError> {
        check_window(&self.profile, row_start, rows)?;

        let mut decoder = open_decoder(&self.path)?;
        let width = self.profile.width as usize;
        let row_end = row_start + rows;
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        if chunk_width == 0 || chunk_height == 0 {
            return Err(RasterError::Unsupported {
                path: self.path.clone(),
                detail: "zero-sized strips or tiles".to_string(),
            });
        }
        let chunks_across = self.profile.width.div_ceil(chunk_width);

        let mut out = vec![0.0_f32; rows as usize * width];
        for chunk_row in row_start / chunk_height..=(row_end - 1) / chunk_height {
            let y0 = chunk_row * chunk_height;
            for chunk_col in 0..chunks_across {
                let index = chunk_row * chunks_across + chunk_col;
                let (data_width, data_height) = decoder.chunk_data_dimensions(index);
                let chunk = decoder
                    .read_chunk(index)
                    .map_err(RasterError::tiff(&self.path))?;
                let values = to_f32(chunk, &self.path)?;

                let x0 = (chunk_col * chunk_width) as usize;
                let data_width = data_width as usize;
                for y in y0.max(row_start)..(y0 + data_height).min(row_end) {
                    let src = (y - y0) as usize * data_width;
                    let dst = (y - row_start) as usize * width + x0;
                    out[dst..dst + data_width].copy_from_slice(&values[src..src + data_width]);
                }
            }
        }

        Ok(out)
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn to_f32(result: DecodingResult, path: &Path) -> Result<Vec<f32>, RasterError> {
    Ok(match result {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => {
            return Err(RasterError::Unsupported {
                path: path.to_path_buf(),
                detail: "64-bit integer samples".to_string(),
            });
        }
    })
}

// ── In memory ────────────────────────────────────────────────────────

/// A raster held fully in memory.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    path: PathBuf,
    profile: RasterProfile,
    data: Vec<f32>,
}

impl MemoryRaster {
    /// Wraps row-major `data` under `profile`.
    ///
    /// `path` only names the raster; nothing is read from it.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::GridMismatch`] if `data` does not hold
    /// exactly `width * height` values.
    pub fn new(
        path: impl Into<PathBuf>,
        profile: RasterProfile,
        data: Vec<f32>,
    ) -> Result<Self, RasterError> {
        let path = path.into();
        if u64::try_from(data.len()).ok() != Some(profile.pixel_count()) {
            let width = profile.width.max(1);
            return Err(RasterError::GridMismatch {
                path,
                expected: (profile.width, profile.height),
                found: (
                    width,
                    u32::try_from(data.len() / width as usize).unwrap_or(u32::MAX),
                ),
            });
        }
        Ok(Self {
            path,
            profile,
            data,
        })
    }
}

impl RasterSource for MemoryRaster {
    fn path(&self) -> &Path {
        &self.path
    }

    fn profile(&self) -> &RasterProfile {
        &self.profile
    }

    fn read_rows(&self, row_start: u32, rows: u32) -> Result<Vec<f32>, RasterError> {
        check_window(&self.profile, row_start, rows)?;
        let width = self.profile.width as usize;
        let start = row_start as usize * width;
        Ok(self.data[start..start + rows as usize * width].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(width: u32, height: u32) -> RasterProfile {
        RasterProfile {
            width,
            height,
            nodata: Some(-9999.0),
            ..RasterProfile::default()
        }
    }

    #[test]
    fn memory_raster_reads_windows() {
        #[allow(clippy::cast_precision_loss)]
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let raster = MemoryRaster::new("mem.tif", profile(3, 4), data).unwrap();

        assert_eq!(raster.read_rows(1, 2).unwrap(), vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(raster.read_rows(3, 1).unwrap(), vec![9.0, 10.0, 11.0]);
    }

    #[test]
    fn windows_outside_the_raster_are_rejected() {
        let raster = MemoryRaster::new("mem.tif", profile(2, 2), vec![0.0; 4]).unwrap();
        assert!(matches!(
            raster.read_rows(1, 2),
            Err(RasterError::Window { row_end: 3, .. })
        ));
        assert!(matches!(raster.read_rows(0, 0), Err(RasterError::Window { .. })));
    }

    #[test]
    fn memory_raster_checks_length() {
        assert!(matches!(
            MemoryRaster::new("mem.tif", profile(3, 3), vec![0.0; 8]),
            Err(RasterError::GridMismatch { .. })
        ));
    }

    #[test]
    fn nodata_strings_parse() {
        assert_eq!(parse_nodata("-9999\0"), Some(-9999.0));
        assert!(parse_nodata("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_nodata(" 0 "), Some(0.0));
        assert_eq!(parse_nodata("none"), None);
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("ras_post_raster_source_missing.tif");
        assert!(matches!(
            GeoTiffRaster::open(&path),
            Err(RasterError::Io { .. })
        ));
    }
}
