//! Descriptive statistics and threshold screening over one domain's results.

use geo::{Intersects, Line};
use ndarray::{Array2, ArrayView1, Axis};
use ras_post_mesh_models::{
    AnomalyRecord, AnomalySet, AnomalyTable, AttributeKind, BoundaryForcing, Domain, ExtremeEdge,
    Statistic,
};
use ras_post_store::ArrayStore;
use rstar::{AABB, RTree, RTreeObject};

use crate::{MeshError, timeseries, topology};

/// Elements with a non-zero time maximum and a non-zero time minimum.
///
/// Elements whose extreme is exactly zero were never wetted (or never
/// flowed) and are left out of the corresponding table.
#[derive(Debug, Clone, PartialEq)]
pub struct Describe {
    /// `(id, location, max)` for every element whose time maximum is not 0.
    pub max_nonzero: AnomalyTable,
    /// `(id, location, min)` for every element whose time minimum is not 0.
    pub min_nonzero: AnomalyTable,
}

/// The averaged depth and velocity history of one flagged face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceTrace {
    /// Face index.
    pub face_id: usize,
    /// Time maximum that ranked this face.
    pub max: f64,
    /// Averaged face depth per time step.
    pub avg_depth: Vec<f64>,
    /// Absolute face velocity per time step.
    pub velocity: Vec<f64>,
}

/// A domain together with its result series, assembled once and then only
/// queried.
#[derive(Debug, Clone)]
pub struct DomainResults {
    domain: Domain,
    depth: Array2<f64>,
    velocity: Array2<f64>,
    avg_face_depth: Array2<f64>,
    forcing: BoundaryForcing,
}

impl DomainResults {
    /// Assembles results from series already laid out as `[element][time]`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::SeriesShape`] if `depth` does not have one row per
    /// cell or `velocity` one row per face.
    pub fn new(
        domain: Domain,
        depth: Array2<f64>,
        velocity: Array2<f64>,
        forcing: BoundaryForcing,
    ) -> Result<Self, MeshError> {
        for (kind, series) in [
            (AttributeKind::Depth, &depth),
            (AttributeKind::Velocity, &velocity),
        ] {
            let expected = domain.element_count(kind);
            if series.nrows() != expected {
                return Err(MeshError::SeriesShape {
                    domain: domain.name.clone(),
                    kind,
                    expected,
                    found: series.nrows(),
                });
            }
        }

        let avg_face_depth = average_face_depth(&domain, &depth);

        Ok(Self {
            domain,
            depth,
            velocity,
            avg_face_depth,
            forcing,
        })
    }

    /// Rebuilds the domain `name` and loads its series and the run's
    /// boundary forcing.
    ///
    /// # Errors
    ///
    /// Any [`MeshError`] raised by [`topology::load_domain`],
    /// [`timeseries::extract`], or [`timeseries::extract_boundary_forcing`].
    pub fn load(store: &dyn ArrayStore, name: &str) -> Result<Self, MeshError> {
        let domain = topology::load_domain(store, name)?;
        let depth = timeseries::extract_depth(store, &domain)?;
        let velocity = timeseries::extract_velocity(store, &domain)?;
        let forcing = timeseries::extract_boundary_forcing(store)?;

        log::info!(
            "Loaded results for {}: {} cells, {} faces, {} time steps",
            domain.name,
            domain.cell_count(),
            domain.face_count(),
            depth.ncols()
        );

        Self::new(domain, depth, velocity, forcing)
    }

    /// The mesh.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Cell depth, `[cell][time]`.
    #[must_use]
    pub const fn depth(&self) -> &Array2<f64> {
        &self.depth
    }

    /// Absolute face velocity, `[face][time]`.
    #[must_use]
    pub const fn velocity(&self) -> &Array2<f64> {
        &self.velocity
    }

    /// Mean of the two bounding cells' depth, `[face][time]`.
    #[must_use]
    pub const fn avg_face_depth(&self) -> &Array2<f64> {
        &self.avg_face_depth
    }

    /// Boundary hydrographs of the run.
    #[must_use]
    pub const fn forcing(&self) -> &BoundaryForcing {
        &self.forcing
    }

    /// The series screened for `kind`.
    #[must_use]
    pub const fn series(&self, kind: AttributeKind) -> &Array2<f64> {
        match kind {
            AttributeKind::Depth => &self.depth,
            AttributeKind::Velocity => &self.velocity,
        }
    }

    /// Per-element time maximum and minimum, with never-wetted elements
    /// removed from each table.
    #[must_use]
    pub fn describe(&self, kind: AttributeKind) -> Describe {
        let series = self.series(kind);
        let max_nonzero = self.table(kind, Statistic::Max, series, |row| {
            row_max(row).filter(|&m| m != 0.0)
        });
        let min_nonzero = self.table(kind, Statistic::Min, series, |row| {
            row_min(row).filter(|&m| m != 0.0)
        });
        Describe {
            max_nonzero,
            min_nonzero,
        }
    }

    /// Elements whose time maximum is strictly greater than `threshold`.
    ///
    /// No exceedance yields an empty table, not an error.
    #[must_use]
    pub fn find_anomalous(&self, kind: AttributeKind, threshold: f64) -> AnomalyTable {
        let table = self.table(kind, Statistic::Max, self.series(kind), |row| {
            row_max(row).filter(|&m| m > threshold)
        });
        if table.is_empty() {
            log::info!(
                "No anomalous {kind} above {threshold} in {}",
                self.domain.name
            );
        }
        table
    }

    /// Elements with at least one time step strictly above `threshold`,
    /// carrying the number of such time steps.
    #[must_use]
    pub fn count_anomalous(&self, kind: AttributeKind, threshold: f64) -> AnomalyTable {
        self.table(kind, Statistic::Count, self.series(kind), |row| {
            let count = row.iter().filter(|&&v| v > threshold).count();
            #[allow(clippy::cast_precision_loss)]
            let value = count as f64;
            (count > 0).then_some(value)
        })
    }

    /// Both threshold tables for one attribute.
    #[must_use]
    pub fn anomaly_set(&self, kind: AttributeKind, threshold: f64) -> AnomalySet {
        let maxima = self.find_anomalous(kind, threshold);
        let counts = self.count_anomalous(kind, threshold);
        debug_assert!(
            counts.records.iter().all(|r| maxima.get(r.id).is_some()),
            "every counted element must also exceed the threshold at its maximum"
        );
        AnomalySet {
            kind,
            threshold,
            maxima,
            counts,
        }
    }

    /// Faces crossing the perimeter whose largest absolute averaged depth
    /// is strictly greater than `threshold`.
    ///
    /// Flags water ponding against the domain boundary independently of the
    /// velocity screening.
    #[must_use]
    pub fn extreme_edges(&self, threshold: f64) -> Vec<ExtremeEdge> {
        let ring = self.domain.perimeter.exterior();
        let tree = RTree::bulk_load(ring.lines().map(RingSegment::new).collect());

        let edges: Vec<ExtremeEdge> = self
            .domain
            .faces
            .iter()
            .filter(|face| {
                let envelope = line_envelope(&face.segment);
                tree.locate_in_envelope_intersecting(&envelope)
                    .any(|seg| face.segment.intersects(&seg.line))
            })
            .filter_map(|face| {
                let abs_max = self
                    .avg_face_depth
                    .row(face.id)
                    .iter()
                    .map(|v| v.abs())
                    .reduce(f64::max)?;
                (abs_max > threshold).then_some(ExtremeEdge {
                    face_id: face.id,
                    centroid: face.centroid,
                    abs_max,
                })
            })
            .collect();

        log::info!(
            "{} perimeter face(s) in {} exceed an averaged depth of {threshold}",
            edges.len(),
            self.domain.name
        );

        edges
    }

    /// The `n` faces of `table` with the largest values, with their averaged
    /// depth and velocity histories.
    ///
    /// Only face-located tables (velocity) have face histories; any other
    /// table yields no traces.
    #[must_use]
    pub fn top_by_max(&self, table: &AnomalyTable, n: usize) -> Vec<FaceTrace> {
        if table.kind != AttributeKind::Velocity {
            log::warn!("Face traces requested for a {} table", table.kind);
            return Vec::new();
        }

        let mut ranked: Vec<&AnomalyRecord> = table.records.iter().collect();
        ranked.sort_by(|a, b| b.value.total_cmp(&a.value).then(a.id.cmp(&b.id)));

        ranked
            .into_iter()
            .take(n)
            .filter(|r| r.id < self.domain.face_count())
            .map(|r| FaceTrace {
                face_id: r.id,
                max: r.value,
                avg_depth: self.avg_face_depth.row(r.id).to_vec(),
                velocity: self.velocity.row(r.id).to_vec(),
            })
            .collect()
    }

    fn table(
        &self,
        kind: AttributeKind,
        statistic: Statistic,
        series: &Array2<f64>,
        statistic_of: impl Fn(ArrayView1<'_, f64>) -> Option<f64>,
    ) -> AnomalyTable {
        let records = series
            .axis_iter(Axis(0))
            .enumerate()
            .filter_map(|(id, row)| {
                let value = statistic_of(row)?;
                let location = self.domain.element_point(kind, id)?;
                Some(AnomalyRecord {
                    id,
                    location,
                    value,
                })
            })
            .collect();

        AnomalyTable {
            kind,
            statistic,
            records,
        }
    }
}

fn row_max(row: ArrayView1<'_, f64>) -> Option<f64> {
    row.iter().copied().reduce(f64::max)
}

fn row_min(row: ArrayView1<'_, f64>) -> Option<f64> {
    row.iter().copied().reduce(f64::min)
}

/// Mean of the two bounding cells' depth at every time step, `[face][time]`.
fn average_face_depth(domain: &Domain, depth: &Array2<f64>) -> Array2<f64> {
    let mut avg = Array2::zeros((domain.face_count(), depth.ncols()));
    for (face, mut out) in domain.faces.iter().zip(avg.axis_iter_mut(Axis(0))) {
        let (c1, c2) = face.cells;
        for ((o, a), b) in out.iter_mut().zip(depth.row(c1)).zip(depth.row(c2)) {
            *o = f64::midpoint(*a, *b);
        }
    }
    avg
}

struct RingSegment {
    line: Line<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RingSegment {
    fn new(line: Line<f64>) -> Self {
        Self {
            envelope: line_envelope(&line),
            line,
        }
    }
}

impl RTreeObject for RingSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn line_envelope(line: &Line<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([line.start.x, line.start.y], [line.end.x, line.end.y])
}
