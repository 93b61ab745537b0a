#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Mesh, time series, and anomaly table types for 2D flow area QA/QC.
//!
//! This crate contains only data types, configuration structs, and simple
//! conversions. Loading and analysis live in `ras_post_mesh`.

use std::collections::BTreeMap;

use geo::{Line, Point, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

// ── Mesh ─────────────────────────────────────────────────────────────

/// A mesh cell, identified by its index in the cell center array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    /// Index into the cell center coordinate array.
    pub id: usize,
    /// Cell center.
    pub center: Point<f64>,
}

/// A face: the segment between two face points, shared by two cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Face {
    /// Index into the face tables.
    pub id: usize,
    /// Face-point indices `(from, to)`.
    pub points: (usize, usize),
    /// Indices of the two bounding cells.
    pub cells: (usize, usize),
    /// Segment joining the two face points.
    pub segment: Line<f64>,
    /// Midpoint of [`Face::segment`].
    pub centroid: Point<f64>,
}

/// One 2D flow area with its materialized topology.
///
/// Built once per analysis run and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Domain {
    /// Flow area name.
    pub name: String,
    /// Mean of the per-axis spacing attributes.
    pub cell_size: f64,
    /// Cells in index order.
    pub cells: Vec<Cell>,
    /// Faces in index order.
    pub faces: Vec<Face>,
    /// Domain boundary.
    pub perimeter: Polygon<f64>,
}

impl Domain {
    /// Number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of faces.
    #[must_use]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Row count a time series of `kind` must have in this domain.
    #[must_use]
    pub fn element_count(&self, kind: AttributeKind) -> usize {
        match kind.location() {
            ElementLocation::CellCenter => self.cell_count(),
            ElementLocation::FaceCentroid => self.face_count(),
        }
    }

    /// Representative point of element `id` for a series of `kind`.
    #[must_use]
    pub fn element_point(&self, kind: AttributeKind, id: usize) -> Option<Point<f64>> {
        match kind.location() {
            ElementLocation::CellCenter => self.cells.get(id).map(|c| c.center),
            ElementLocation::FaceCentroid => self.faces.get(id).map(|f| f.centroid),
        }
    }
}

// ── Attributes ───────────────────────────────────────────────────────

/// Where the rows of a time series live on the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementLocation {
    /// One row per cell, located at the cell center.
    CellCenter,
    /// One row per face, located at the face centroid.
    FaceCentroid,
}

/// The result attributes screened for instabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Water depth at cell centers.
    Depth,
    /// Absolute face velocity.
    Velocity,
}

impl AttributeKind {
    /// Every attribute kind.
    pub const ALL: &[Self] = &[Self::Depth, Self::Velocity];

    /// Where the rows of this attribute live.
    #[must_use]
    pub const fn location(self) -> ElementLocation {
        match self {
            Self::Depth => ElementLocation::CellCenter,
            Self::Velocity => ElementLocation::FaceCentroid,
        }
    }

    /// Stable lowercase tag used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Depth => "depth",
            Self::Velocity => "velocity",
        }
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Forcing ──────────────────────────────────────────────────────────

/// Boundary condition hydrograph families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcingKind {
    /// Stage hydrographs.
    Stage,
    /// Flow hydrographs.
    Flow,
    /// Precipitation hydrographs.
    Precipitation,
}

impl ForcingKind {
    /// Every forcing kind.
    pub const ALL: &[Self] = &[Self::Stage, Self::Flow, Self::Precipitation];

    /// Group name under the boundary conditions group.
    #[must_use]
    pub const fn group_name(self) -> &'static str {
        match self {
            Self::Stage => "Stage Hydrographs",
            Self::Flow => "Flow Hydrographs",
            Self::Precipitation => "Precipitation Hydrographs",
        }
    }

    /// Stable lowercase tag used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Flow => "flow",
            Self::Precipitation => "precipitation",
        }
    }
}

/// The hydrographs of one forcing kind, or the explicit absence of them.
///
/// Runs without a given boundary type (no precipitation, for example)
/// carry [`ForcingSeries::NotPresent`] rather than an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ForcingSeries {
    /// Boundary name → `[time, value]` rows.
    Present(BTreeMap<String, Array2<f64>>),
    /// The run has no boundary of this kind.
    #[default]
    NotPresent,
}

impl ForcingSeries {
    /// Returns `true` if at least one hydrograph is present.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Boundary names, empty when not present.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Present(series) => series.keys().map(String::as_str).collect(),
            Self::NotPresent => Vec::new(),
        }
    }

    /// Largest value of the named hydrograph.
    #[must_use]
    pub fn peak(&self, name: &str) -> Option<f64> {
        let Self::Present(series) = self else {
            return None;
        };
        let data = series.get(name)?;
        data.column(1).iter().copied().reduce(f64::max)
    }
}

/// The three forcing families of one run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundaryForcing {
    /// Stage hydrographs.
    pub stage: ForcingSeries,
    /// Flow hydrographs.
    pub flow: ForcingSeries,
    /// Precipitation hydrographs.
    pub precipitation: ForcingSeries,
}

impl BoundaryForcing {
    /// Series for one forcing kind.
    #[must_use]
    pub const fn get(&self, kind: ForcingKind) -> &ForcingSeries {
        match kind {
            ForcingKind::Stage => &self.stage,
            ForcingKind::Flow => &self.flow,
            ForcingKind::Precipitation => &self.precipitation,
        }
    }
}

// ── Anomalies ────────────────────────────────────────────────────────

/// The statistic carried by an [`AnomalyTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// Time maximum.
    Max,
    /// Time minimum.
    Min,
    /// Number of time steps above a threshold.
    Count,
}

impl Statistic {
    /// Stable lowercase tag used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Count => "count",
        }
    }
}

/// One element of an anomaly table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyRecord {
    /// Cell or face index.
    pub id: usize,
    /// Cell center or face centroid.
    pub location: Point<f64>,
    /// Statistic value (a maximum, minimum, or exceedance count).
    pub value: f64,
}

/// Element ids joined to their location and one statistic.
///
/// An empty table is a normal outcome (nothing exceeded the threshold),
/// never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyTable {
    /// Attribute the statistic was computed over.
    pub kind: AttributeKind,
    /// Statistic carried in [`AnomalyRecord::value`].
    pub statistic: Statistic,
    /// Records in ascending id order.
    pub records: Vec<AnomalyRecord>,
}

impl AnomalyTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn empty(kind: AttributeKind, statistic: Statistic) -> Self {
        Self {
            kind,
            statistic,
            records: Vec::new(),
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Element ids in table order.
    #[must_use]
    pub fn ids(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Looks up the record for one element id.
    #[must_use]
    pub fn get(&self, id: usize) -> Option<&AnomalyRecord> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Keeps only the records whose id is in `ids` (a join by id).
    #[must_use]
    pub fn select_ids(&self, ids: &[usize]) -> Self {
        let mut records: Vec<AnomalyRecord> =
            ids.iter().filter_map(|&id| self.get(id).copied()).collect();
        records.sort_by_key(|r| r.id);
        records.dedup_by_key(|r| r.id);
        Self {
            kind: self.kind,
            statistic: self.statistic,
            records,
        }
    }

    /// Appends every record of `other`, keeping ids sorted and unique.
    pub fn extend_from(&mut self, other: &Self) {
        self.records.extend(other.records.iter().copied());
        self.records.sort_by_key(|r| r.id);
        self.records.dedup_by_key(|r| r.id);
    }
}

/// Maximum and exceedance-count tables for one attribute and threshold.
///
/// Every id in `counts` also appears in `maxima`: an element that exceeded
/// the threshold at some time step has a time maximum above it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalySet {
    /// Attribute screened.
    pub kind: AttributeKind,
    /// Threshold applied.
    pub threshold: f64,
    /// Elements whose time maximum exceeds the threshold.
    pub maxima: AnomalyTable,
    /// Elements with a non-zero number of exceedances.
    pub counts: AnomalyTable,
}

impl AnomalySet {
    /// Returns `true` if nothing exceeded the threshold.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maxima.is_empty() && self.counts.is_empty()
    }
}

/// A perimeter face with a suspiciously deep time-averaged depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtremeEdge {
    /// Face index.
    pub face_id: usize,
    /// Face centroid.
    pub centroid: Point<f64>,
    /// Largest absolute averaged depth over time.
    pub abs_max: f64,
}

// ── Configuration ────────────────────────────────────────────────────

/// Thresholds and clustering parameters for result screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaqcConfig {
    /// Face velocity above which a reading is suspect.
    #[serde(default = "default_velocity_threshold")]
    pub velocity_threshold: f64,

    /// Averaged perimeter depth above which a face indicates ponding.
    #[serde(default = "default_edge_depth_threshold")]
    pub edge_depth_threshold: f64,

    /// Buffer radius around each flagged point, in mean cell sizes.
    #[serde(default = "default_buffer_multiplier")]
    pub buffer_multiplier: f64,

    /// Padding added around a cluster when selecting nearby faces.
    #[serde(default = "default_face_padding")]
    pub face_padding: f64,

    /// Clusters with more than this many counted elements are "large".
    #[serde(default = "default_min_cluster_count")]
    pub min_cluster_count: usize,

    /// Faces with the highest maxima reported per large cluster.
    #[serde(default = "default_top_faces")]
    pub top_faces: usize,
}

const fn default_velocity_threshold() -> f64 {
    30.0
}

const fn default_edge_depth_threshold() -> f64 {
    1.0
}

const fn default_buffer_multiplier() -> f64 {
    3.0
}

const fn default_face_padding() -> f64 {
    100.0
}

const fn default_min_cluster_count() -> usize {
    5
}

const fn default_top_faces() -> usize {
    5
}

impl Default for QaqcConfig {
    fn default() -> Self {
        Self {
            velocity_threshold: default_velocity_threshold(),
            edge_depth_threshold: default_edge_depth_threshold(),
            buffer_multiplier: default_buffer_multiplier(),
            face_padding: default_face_padding(),
            min_cluster_count: default_min_cluster_count(),
            top_faces: default_top_faces(),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn record(id: usize, value: f64) -> AnomalyRecord {
        AnomalyRecord {
            id,
            location: Point::new(0.0, 0.0),
            value,
        }
    }

    #[test]
    fn select_ids_joins_by_id() {
        let table = AnomalyTable {
            kind: AttributeKind::Velocity,
            statistic: Statistic::Count,
            records: vec![record(1, 3.0), record(4, 1.0), record(9, 7.0)],
        };
        let subset = table.select_ids(&[9, 2, 1]);
        assert_eq!(subset.ids(), vec![1, 9]);
        assert_eq!(subset.statistic, Statistic::Count);
    }

    #[test]
    fn forcing_peak_reads_value_column() {
        let mut series = BTreeMap::new();
        series.insert(
            "Upstream".to_string(),
            array![[0.0, 10.0], [1.0, 250.0], [2.0, 40.0]],
        );
        let forcing = ForcingSeries::Present(series);
        assert_eq!(forcing.peak("Upstream"), Some(250.0));
        assert_eq!(forcing.peak("Downstream"), None);
        assert_eq!(ForcingSeries::NotPresent.peak("Upstream"), None);
    }

    #[test]
    fn attribute_kinds_map_to_locations() {
        assert_eq!(AttributeKind::Depth.location(), ElementLocation::CellCenter);
        assert_eq!(
            AttributeKind::Velocity.location(),
            ElementLocation::FaceCentroid
        );
    }

    #[test]
    fn report_tags_match_serialized_names() {
        #[derive(Serialize)]
        struct Tagged<T> {
            kind: T,
        }

        for &kind in AttributeKind::ALL {
            let text = toml::to_string(&Tagged { kind }).unwrap();
            assert_eq!(text.trim(), format!("kind = \"{}\"", kind.as_str()));
        }
        for &kind in ForcingKind::ALL {
            let text = toml::to_string(&Tagged { kind }).unwrap();
            assert_eq!(text.trim(), format!("kind = \"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: QaqcConfig = toml::from_str("velocity_threshold = 12.5").unwrap();
        assert!((config.velocity_threshold - 12.5).abs() < f64::EPSILON);
        assert_eq!(config.min_cluster_count, 5);
        assert!((config.face_padding - 100.0).abs() < f64::EPSILON);
    }
}
