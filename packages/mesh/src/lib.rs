#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Mesh reconstruction and instability screening for 2D flow areas.
//!
//! The flow is strictly one-way and sequential per domain:
//!
//! 1. [`topology`] rebuilds cells, faces, and the perimeter polygon from the
//!    flat geometry tables of a plan results file.
//! 2. [`timeseries`] loads the depth and face velocity series (transposed so
//!    rows are mesh elements) and the boundary forcing hydrographs.
//! 3. [`anomaly`] assembles an immutable [`DomainResults`] and answers the
//!    descriptive, threshold, and perimeter ponding queries over it.

pub mod anomaly;
pub mod timeseries;
pub mod topology;

use ras_post_mesh_models::{AttributeKind, ForcingKind};
use ras_post_store::StoreError;

pub use anomaly::{Describe, DomainResults, FaceTrace};
pub use topology::{MeshTopologyBuilder, load_domain};

/// Errors raised while rebuilding a domain or reading its results.
///
/// All variants are malformed-input conditions: the current domain cannot
/// be analyzed and the error names which domain and table failed.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The array store could not provide a required table.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The plan has no flow area with this name.
    #[error("Unknown 2D flow area: {domain}")]
    UnknownDomain {
        /// Requested domain name.
        domain: String,
    },

    /// A required builder input was never supplied.
    #[error("Domain {domain}: missing {input}")]
    MissingInput {
        /// Domain being built.
        domain: String,
        /// Name of the missing input.
        input: &'static str,
    },

    /// A geometry table does not have two columns.
    #[error("Domain {domain}: {table} must have 2 columns, found shape {found:?}")]
    Shape {
        /// Domain being built.
        domain: String,
        /// Table name.
        table: &'static str,
        /// Actual `(rows, columns)`.
        found: (usize, usize),
    },

    /// A face references a face point that does not exist.
    #[error("Domain {domain}: face {face} references face point {index}, but only {len} exist")]
    FacePointOutOfRange {
        /// Domain being built.
        domain: String,
        /// Offending face index.
        face: usize,
        /// Referenced face point index.
        index: i64,
        /// Number of face points.
        len: usize,
    },

    /// A face references a cell that does not exist.
    #[error("Domain {domain}: face {face} references cell {index}, but only {len} exist")]
    CellOutOfRange {
        /// Domain being built.
        domain: String,
        /// Offending face index.
        face: usize,
        /// Referenced cell index.
        index: i64,
        /// Number of cells.
        len: usize,
    },

    /// The two index tables disagree on the number of faces.
    #[error("Domain {domain}: {face_points} face point pairs but {cells} cell pairs")]
    FaceCountMismatch {
        /// Domain being built.
        domain: String,
        /// Rows in the face point index table.
        face_points: usize,
        /// Rows in the face cell index table.
        cells: usize,
    },

    /// The perimeter has too few points to form a polygon.
    #[error("Domain {domain}: perimeter needs at least 3 points, found {points}")]
    Perimeter {
        /// Domain being built.
        domain: String,
        /// Number of perimeter points.
        points: usize,
    },

    /// A result series does not have one row per mesh element.
    #[error("Domain {domain}: {kind} series has {found} rows, expected {expected}")]
    SeriesShape {
        /// Domain whose results were read.
        domain: String,
        /// Attribute read.
        kind: AttributeKind,
        /// Element count of the domain.
        expected: usize,
        /// Rows in the series.
        found: usize,
    },

    /// A forcing hydrograph is not a `[time, value]` table.
    #[error("{} boundary {name}: expected 2 columns, found {columns}", kind.group_name())]
    ForcingShape {
        /// Forcing family.
        kind: ForcingKind,
        /// Boundary name.
        name: String,
        /// Number of columns found.
        columns: usize,
    },
}
