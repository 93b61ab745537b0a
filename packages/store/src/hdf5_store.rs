//! HDF5-backed [`ArrayStore`] for HEC-RAS plan results files.
//!
//! Requires the system HDF5 library, so it is only compiled with the
//! `hdf5` feature. Arrays are read through `read_raw` and reshaped locally,
//! which keeps this module independent of the `ndarray` version `hdf5`
//! itself was built against.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hdf5::types::{FixedAscii, TypeDescriptor, VarLenAscii, VarLenUnicode};
use ndarray::Array2;

use crate::{ArrayStore, AttrValue, FlowAreaAttributes, StoreError, array_from_shape, layout};

/// The subset of the flow area compound table that the mesh engine needs.
///
/// HDF5 matches compound members by name, so reading into this narrower
/// type skips every other column.
#[derive(hdf5::H5Type, Clone, Copy)]
#[repr(C)]
struct FlowAreaRow {
    #[hdf5(rename = "Name")]
    name: FixedAscii<64>,
    #[hdf5(rename = "Spacing dx")]
    spacing_dx: f32,
    #[hdf5(rename = "Spacing dy")]
    spacing_dy: f32,
}

/// An opened HDF5 plan results file.
pub struct Hdf5Store {
    file: hdf5::File,
    path: PathBuf,
}

impl Hdf5Store {
    /// Opens a plan results file read-only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the file cannot be opened as HDF5.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        log::info!("Opening plan results file {}", path.display());
        let file = hdf5::File::open(&path).map_err(|e| StoreError::Backend {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { file, path })
    }

    /// Location of the opened file on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dataset(&self, path: &str) -> Result<hdf5::Dataset, StoreError> {
        if !self.exists(path) {
            return Err(StoreError::MissingPath {
                path: path.to_string(),
            });
        }
        self.file.dataset(path).map_err(|e| backend(path, &e))
    }

    fn read_2d<T: hdf5::H5Type>(
        &self,
        path: &str,
        expected: &'static str,
    ) -> Result<Array2<T>, StoreError> {
        let ds = self.dataset(path)?;
        let shape = ds.shape();
        let data = ds.read_raw::<T>().map_err(|_| StoreError::DataType {
            path: path.to_string(),
            expected,
        })?;
        array_from_shape(path, &shape, data)
    }
}

impl ArrayStore for Hdf5Store {
    fn read_f64_2d(&self, path: &str) -> Result<Array2<f64>, StoreError> {
        self.read_2d::<f64>(path, "numeric")
    }

    fn read_i64_2d(&self, path: &str) -> Result<Array2<i64>, StoreError> {
        self.read_2d::<i64>(path, "integer")
    }

    fn list(&self, path: &str) -> Result<Vec<String>, StoreError> {
        if !self.exists(path) {
            return Err(StoreError::MissingPath {
                path: path.to_string(),
            });
        }
        let group = self.file.group(path).map_err(|e| backend(path, &e))?;
        group.member_names().map_err(|e| backend(path, &e))
    }

    fn attributes(&self, path: &str) -> Result<BTreeMap<String, AttrValue>, StoreError> {
        if !self.exists(path) {
            return Err(StoreError::MissingPath {
                path: path.to_string(),
            });
        }

        match self.file.group(path) {
            Ok(group) => collect_attributes(path, &group),
            Err(_) => {
                let ds = self.file.dataset(path).map_err(|e| backend(path, &e))?;
                collect_attributes(path, &ds)
            }
        }
    }

    fn exists(&self, path: &str) -> bool {
        // `link_exists` only checks the last component, so walk the path.
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if !self.file.link_exists(&current) {
                return false;
            }
        }
        true
    }

    fn flow_area_table(&self) -> Result<Vec<FlowAreaAttributes>, StoreError> {
        let ds = self.dataset(layout::GEOMETRY_ATTRIBUTES)?;
        let rows = ds
            .read_raw::<FlowAreaRow>()
            .map_err(|e| backend(layout::GEOMETRY_ATTRIBUTES, &e))?;

        Ok(rows
            .into_iter()
            .map(|row| FlowAreaAttributes {
                name: row.name.as_str().trim().to_string(),
                spacing_dx: f64::from(row.spacing_dx),
                spacing_dy: f64::from(row.spacing_dy),
            })
            .collect())
    }
}

fn backend(path: &str, e: &hdf5::Error) -> StoreError {
    StoreError::Backend {
        path: path.to_string(),
        message: e.to_string(),
    }
}

fn collect_attributes(
    path: &str,
    location: &hdf5::Location,
) -> Result<BTreeMap<String, AttrValue>, StoreError> {
    let mut values = BTreeMap::new();
    for name in location.attr_names().map_err(|e| backend(path, &e))? {
        if let Some(value) = location.attr(&name).ok().and_then(|a| read_attr(&a)) {
            values.insert(name, value);
        } else {
            log::debug!("Skipping unsupported attribute {path}@{name}");
        }
    }
    Ok(values)
}

fn read_attr(attr: &hdf5::Attribute) -> Option<AttrValue> {
    let descriptor = attr.dtype().ok()?.to_descriptor().ok()?;
    let len: usize = attr.shape().iter().product();

    match descriptor {
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => {
            let values = attr.read_raw::<i64>().ok()?;
            if len == 1 {
                values.first().copied().map(AttrValue::Int)
            } else {
                #[allow(clippy::cast_precision_loss)]
                Some(AttrValue::FloatArray(
                    values.into_iter().map(|v| v as f64).collect(),
                ))
            }
        }
        TypeDescriptor::Float(_) => {
            let values = attr.read_raw::<f64>().ok()?;
            if len == 1 {
                values.first().copied().map(AttrValue::Float)
            } else {
                Some(AttrValue::FloatArray(values))
            }
        }
        TypeDescriptor::FixedAscii(_) | TypeDescriptor::FixedUnicode(_) => {
            let values = attr.read_raw::<FixedAscii<1024>>().ok()?;
            let text: Vec<String> = values
                .iter()
                .map(|s| s.as_str().trim().to_string())
                .collect();
            Some(AttrValue::Text(text.join(", ")))
        }
        TypeDescriptor::VarLenAscii => attr
            .read_scalar::<VarLenAscii>()
            .ok()
            .map(|s| AttrValue::Text(s.as_str().to_string())),
        TypeDescriptor::VarLenUnicode => attr
            .read_scalar::<VarLenUnicode>()
            .ok()
            .map(|s| AttrValue::Text(s.as_str().to_string())),
        _ => None,
    }
}
