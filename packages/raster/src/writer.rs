//! Streams aggregated bands into one compressed single-band `GeoTIFF`.
//!
//! The TIFF encoder lives on a dedicated thread that receives rows over a
//! bounded channel, so the caller never holds more than a band plus one
//! strip in memory. The output is written under a temporary name and only
//! renamed into place once every row has been encoded.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use ras_post_raster_models::{GeoReference, RasterProfile};
use tiff::encoder::compression::Lzw;
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind, colortype};
use tiff::tags::Tag;

use crate::RasterError;
use crate::artifact::ChunkArray;
use crate::metadata::{GDAL_METADATA, to_xml};

/// Rows per TIFF strip in the output.
pub const STRIP_ROWS: u32 = 64;

const CHANNEL_DEPTH: usize = 2;

pub(crate) const SOFTWARE: &str = concat!("ras_post ", env!("CARGO_PKG_VERSION"));

enum Message {
    Rows(Vec<f32>),
    Finish,
}

/// Writes bands of `f32` rows, top to bottom, into a `GeoTIFF`.
pub struct ChunkedRasterWriter {
    path: PathBuf,
    width: u32,
    height: u32,
    next_band: usize,
    rows_written: u32,
    sender: Option<SyncSender<Message>>,
    handle: Option<JoinHandle<Result<bool, RasterError>>>,
}

impl ChunkedRasterWriter {
    /// Creates the output raster with `profile`'s grid and georeferencing.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Io`] if the file cannot be created and
    /// [`RasterError::Tiff`] if the header cannot be written.
    pub fn create(
        path: impl Into<PathBuf>,
        profile: &RasterProfile,
        nodata: f32,
    ) -> Result<Self, RasterError> {
        let path = path.into();
        let tmp = path.with_extension("tif.tmp");

        let file = File::create(&tmp).map_err(RasterError::io(&tmp))?;
        let encoder = TiffEncoder::new(BufWriter::new(file)).map_err(RasterError::tiff(&tmp))?;

        let (width, height) = (profile.width, profile.height);
        let (sender, receiver) = sync_channel(CHANNEL_DEPTH);
        let profile = profile.clone();
        let final_path = path.clone();
        let handle = std::thread::Builder::new()
            .name("ras-post-tiff-writer".to_string())
            .spawn(move || {
                let result = encode(encoder, &profile, nodata, &receiver).map_err(|source| {
                    RasterError::Tiff {
                        path: tmp.clone(),
                        source,
                    }
                });
                match result {
                    Ok(true) => {
                        std::fs::rename(&tmp, &final_path)
                            .map_err(RasterError::io(&final_path))?;
                        Ok(true)
                    }
                    other => {
                        let _ = std::fs::remove_file(&tmp);
                        other
                    }
                }
            })
            .map_err(RasterError::io(&path))?;

        log::info!("Writing {width}x{height} raster to {}", path.display());

        Ok(Self {
            path,
            width,
            height,
            next_band: 0,
            rows_written: 0,
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the next band [`Self::write_band`] accepts.
    #[must_use]
    pub const fn next_band(&self) -> usize {
        self.next_band
    }

    /// Appends band `index` below the rows already written.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::OutOfOrder`] unless `index` is the next band,
    /// [`RasterError::RowOverflow`] if the band has the wrong width or runs
    /// past the last row, or the encoder's error if it has failed.
    pub fn write_band(&mut self, index: usize, band: ChunkArray<f32>) -> Result<(), RasterError> {
        if index != self.next_band {
            return Err(RasterError::OutOfOrder {
                expected: self.next_band,
                found: index,
            });
        }
        let rows = u32::try_from(band.rows).ok();
        let fits = rows.is_some_and(|r| {
            band.cols == self.width as usize
                && self.rows_written.checked_add(r).is_some_and(|end| end <= self.height)
        });
        let Some(rows) = rows.filter(|_| fits) else {
            return Err(RasterError::RowOverflow {
                band: index,
                rows: band.rows,
                cols: band.cols,
                row: self.rows_written,
                width: self.width,
                height: self.height,
            });
        };

        self.send(Message::Rows(band.data))?;
        self.next_band += 1;
        self.rows_written += rows;
        log::debug!(
            "Wrote band {index} ({}/{} rows)",
            self.rows_written,
            self.height
        );
        Ok(())
    }

    /// Completes the raster and moves it into place.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Incomplete`] if rows are missing, in which
    /// case no output file is left behind, or the encoder's error.
    pub fn finish(mut self) -> Result<PathBuf, RasterError> {
        if self.rows_written != self.height {
            self.sender = None;
            let _ = self.join();
            return Err(RasterError::Incomplete {
                path: self.path.clone(),
                written: self.rows_written,
                height: self.height,
            });
        }

        self.send(Message::Finish)?;
        self.sender = None;
        if !self.join()? {
            return Err(RasterError::EncoderGone {
                path: self.path.clone(),
            });
        }
        log::info!("Finished {}", self.path.display());
        Ok(self.path.clone())
    }

    fn send(&mut self, message: Message) -> Result<(), RasterError> {
        let sent = self
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(message).is_ok());
        if sent {
            return Ok(());
        }
        self.sender = None;
        match self.join() {
            Err(e) => Err(e),
            Ok(_) => Err(RasterError::EncoderGone {
                path: self.path.clone(),
            }),
        }
    }

    fn join(&mut self) -> Result<bool, RasterError> {
        let Some(handle) = self.handle.take() else {
            return Err(RasterError::EncoderGone {
                path: self.path.clone(),
            });
        };
        handle.join().map_err(|_| RasterError::EncoderGone {
            path: self.path.clone(),
        })?
    }
}

fn encode(
    mut encoder: TiffEncoder<BufWriter<File>>,
    profile: &RasterProfile,
    nodata: f32,
    receiver: &Receiver<Message>,
) -> Result<bool, tiff::TiffError> {
    let mut image = encoder.new_image_with_compression::<colortype::Gray32Float, _>(
        profile.width,
        profile.height,
        Lzw::default(),
    )?;
    image.rows_per_strip(STRIP_ROWS)?;
    write_georeference(image.encoder(), &profile.georef)?;
    image
        .encoder()
        .write_tag(Tag::GdalNodata, nodata.to_string().as_str())?;
    image.encoder().write_tag(Tag::Software, SOFTWARE)?;
    if !profile.metadata.is_empty() {
        image
            .encoder()
            .write_tag(GDAL_METADATA, to_xml(&profile.metadata).as_str())?;
    }

    let mut pending: Vec<f32> = Vec::new();
    for message in receiver {
        match message {
            Message::Rows(mut rows) => {
                let mut data = if pending.is_empty() {
                    rows
                } else {
                    pending.append(&mut rows);
                    std::mem::take(&mut pending)
                };

                let mut start = 0;
                loop {
                    let need = usize::try_from(image.next_strip_sample_count()).unwrap_or(0);
                    if need == 0 || data.len() - start < need {
                        break;
                    }
                    image.write_strip(&data[start..start + need])?;
                    start += need;
                }
                data.drain(..start);
                pending = data;
            }
            Message::Finish => {
                image.finish()?;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn write_georeference<K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, BufWriter<File>, K>,
    georef: &GeoReference,
) -> Result<(), tiff::TiffError> {
    if let Some(v) = &georef.pixel_scale {
        dir.write_tag(Tag::ModelPixelScaleTag, v.as_slice())?;
    }
    if let Some(v) = &georef.tiepoints {
        dir.write_tag(Tag::ModelTiepointTag, v.as_slice())?;
    }
    if let Some(v) = &georef.transformation {
        dir.write_tag(Tag::ModelTransformationTag, v.as_slice())?;
    }
    if let Some(v) = &georef.geo_key_directory {
        dir.write_tag(Tag::GeoKeyDirectoryTag, v.as_slice())?;
    }
    if let Some(v) = &georef.geo_double_params {
        dir.write_tag(Tag::GeoDoubleParamsTag, v.as_slice())?;
    }
    if let Some(v) = &georef.geo_ascii_params {
        dir.write_tag(Tag::GeoAsciiParamsTag, v.as_str())?;
    }
    Ok(())
}

// ── Reordering ───────────────────────────────────────────────────────

/// Holds items that complete out of order and releases them by index.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    /// Creates a buffer expecting index 0 first.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Adds `item` at `index` and returns every item now releasable, in
    /// index order.
    ///
    /// Indexes already released are dropped with a warning.
    pub fn push(&mut self, index: usize, item: T) -> Vec<(usize, T)> {
        if index < self.next {
            log::warn!("Dropping item {index}; already released up to {}", self.next);
            return Vec::new();
        }
        self.pending.insert(index, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push((self.next, item));
            self.next += 1;
        }
        ready
    }

    /// Next index to be released.
    #[must_use]
    pub const fn next_index(&self) -> usize {
        self.next
    }

    /// Items waiting for an earlier index.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }
}
