#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Read access to hierarchical, path-addressed array containers.
//!
//! A HEC-RAS plan results file is an HDF5 container whose datasets are
//! addressed by slash-separated paths (`/Geometry/2D Flow Areas/...`).
//! Everything downstream of this crate only needs typed 2D array reads,
//! group listings, and attribute maps, so those are expressed as the
//! [`ArrayStore`] trait and the concrete container is injected by the
//! caller.
//!
//! Two implementations ship here:
//!
//! | Store | Feature | Use |
//! |---|---|---|
//! | [`MemoryStore`] | always | tests, callers that already hold the arrays |
//! | `Hdf5Store` | `hdf5` | HEC-RAS `.p##.hdf` plan files (needs libhdf5) |

pub mod layout;
pub mod memory;
pub mod plan;

#[cfg(feature = "hdf5")]
pub mod hdf5_store;

use std::collections::BTreeMap;

use ndarray::Array2;

pub use memory::MemoryStore;
pub use plan::PlanFile;

#[cfg(feature = "hdf5")]
pub use hdf5_store::Hdf5Store;

/// Errors raised while reading from an array container.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A required dataset or group does not exist.
    #[error("Missing path in array store: {path}")]
    MissingPath {
        /// Path that was requested.
        path: String,
    },

    /// A dataset exists but does not have the expected dimensionality.
    #[error("Unexpected shape at {path}: expected {expected}, found {found:?}")]
    Shape {
        /// Dataset path.
        path: String,
        /// Human-readable description of the expected shape.
        expected: String,
        /// Actual shape.
        found: Vec<usize>,
    },

    /// A dataset exists but holds a different element type.
    #[error("Unexpected element type at {path}: expected {expected}")]
    DataType {
        /// Dataset path.
        path: String,
        /// Expected element type.
        expected: &'static str,
    },

    /// The underlying container library failed.
    #[error("Array store backend error at {path}: {message}")]
    Backend {
        /// Path being accessed when the failure happened.
        path: String,
        /// Backend error message.
        message: String,
    },
}

impl StoreError {
    /// Returns `true` when the error means the path simply is not there.
    ///
    /// Callers reading optional groups (forcing hydrographs, for example)
    /// use this to tell "absent" apart from "broken".
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::MissingPath { .. })
    }
}

/// A scalar or small-vector attribute attached to a group or dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Integer attribute.
    Int(i64),
    /// Floating point attribute.
    Float(f64),
    /// Text attribute (fixed or variable length strings are both decoded).
    Text(String),
    /// Numeric array attribute.
    FloatArray(Vec<f64>),
}

impl AttrValue {
    /// Numeric view of the attribute, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            Self::FloatArray(values) => values.first().copied(),
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::FloatArray(values) => write!(f, "{values:?}"),
        }
    }
}

/// One row of the 2D flow area attribute table.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowAreaAttributes {
    /// Flow area (domain) name.
    pub name: String,
    /// Nominal mesh spacing along x.
    pub spacing_dx: f64,
    /// Nominal mesh spacing along y.
    pub spacing_dy: f64,
}

impl FlowAreaAttributes {
    /// Representative cell size: the mean of the two spacing attributes.
    #[must_use]
    pub fn mean_cell_size(&self) -> f64 {
        f64::midpoint(self.spacing_dx, self.spacing_dy)
    }
}

/// Read-only access to a path-addressed array container.
///
/// Implementations must be `Send + Sync` so a single opened store can be
/// shared by reference across domains.
pub trait ArrayStore: Send + Sync {
    /// Reads a two-dimensional floating point dataset.
    ///
    /// One-dimensional datasets are returned as a single column.
    ///
    /// # Errors
    ///
    /// * [`StoreError::MissingPath`] if the dataset does not exist
    /// * [`StoreError::Shape`] if it has more than two dimensions
    /// * [`StoreError::DataType`] if it is not numeric
    fn read_f64_2d(&self, path: &str) -> Result<Array2<f64>, StoreError>;

    /// Reads a two-dimensional integer dataset (index tables).
    ///
    /// # Errors
    ///
    /// Same conditions as [`ArrayStore::read_f64_2d`].
    fn read_i64_2d(&self, path: &str) -> Result<Array2<i64>, StoreError>;

    /// Lists the immediate member names of a group.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingPath`] if the group does not exist.
    fn list(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Reads every attribute attached to a group or dataset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingPath`] if the object does not exist.
    fn attributes(&self, path: &str) -> Result<BTreeMap<String, AttrValue>, StoreError>;

    /// Returns `true` if a group or dataset exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Reads the 2D flow area attribute table (one row per domain).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingPath`] if the table does not exist.
    fn flow_area_table(&self) -> Result<Vec<FlowAreaAttributes>, StoreError>;
}

/// Builds an [`Array2`] from a flat buffer and a dataset shape.
///
/// Shared by the backends: scalars become `1×1`, vectors a single column.
///
/// # Errors
///
/// Returns [`StoreError::Shape`] for three or more dimensions or when the
/// buffer length disagrees with the shape.
pub fn array_from_shape<T>(path: &str, shape: &[usize], data: Vec<T>) -> Result<Array2<T>, StoreError> {
    let dims = match shape {
        [] => (1, 1),
        [rows] => (*rows, 1),
        [rows, cols] => (*rows, *cols),
        _ => {
            return Err(StoreError::Shape {
                path: path.to_string(),
                expected: "at most 2 dimensions".to_string(),
                found: shape.to_vec(),
            });
        }
    };

    Array2::from_shape_vec(dims, data).map_err(|_| StoreError::Shape {
        path: path.to_string(),
        expected: format!("{} elements", dims.0 * dims.1),
        found: shape.to_vec(),
    })
}
