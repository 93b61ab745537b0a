//! Buffer-and-union grouping, per-cluster subsets, and size partitioning.

use std::cmp::Ordering;

use geo::{BoundingRect, Buffer, Contains, Coord, MultiPolygon, Point, Polygon, Rect, unary_union};
use ras_post_mesh_models::{AnomalyRecord, AnomalyTable};

use crate::FaceIndex;

/// Groups collocated points into disjoint cluster polygons.
///
/// Every point is buffered by `multiplier × cell_size` and all buffers are
/// unioned, so any two points closer than twice the radius end up in the
/// same polygon. Input order does not affect the result: points are sorted
/// before buffering and the polygons are returned sorted by their bounding
/// box.
#[must_use]
pub fn group_points(points: &[Point<f64>], cell_size: f64, multiplier: f64) -> Vec<Polygon<f64>> {
    let radius = cell_size * multiplier;
    if points.is_empty() {
        return Vec::new();
    }
    if radius <= 0.0 {
        log::warn!("Non-positive buffer radius {radius}; no clusters formed");
        return Vec::new();
    }

    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| cmp_coord(a.0, b.0));
    sorted.dedup();

    let buffers: Vec<MultiPolygon<f64>> = sorted.iter().map(|p| p.buffer(radius)).collect();
    let mut clusters = unary_union(&buffers).0;
    clusters.sort_by(cmp_polygon);

    log::debug!(
        "Grouped {} points into {} cluster(s) with radius {radius}",
        points.len(),
        clusters.len()
    );

    clusters
}

/// The anomalies and faces belonging to one cluster polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSubset {
    /// Position of the polygon in the [`group_points`] output.
    pub index: usize,
    /// Cluster polygon.
    pub polygon: Polygon<f64>,
    /// Maxima whose location lies strictly inside the polygon.
    pub maxima: AnomalyTable,
    /// Count records for the same ids as `maxima`.
    pub counts: AnomalyTable,
    /// Faces inside the polygon's bounding box expanded by the padding.
    pub face_ids: Vec<usize>,
}

/// Subsets the maxima, counts, and faces by each cluster polygon.
#[must_use]
pub fn subset(
    clusters: &[Polygon<f64>],
    maxima: &AnomalyTable,
    counts: &AnomalyTable,
    faces: &FaceIndex,
    padding: f64,
) -> Vec<ClusterSubset> {
    clusters
        .iter()
        .enumerate()
        .map(|(index, polygon)| {
            let records: Vec<AnomalyRecord> = maxima
                .records
                .iter()
                .filter(|r| polygon.contains(&r.location))
                .copied()
                .collect();
            let ids: Vec<usize> = records.iter().map(|r| r.id).collect();

            let face_ids = polygon
                .bounding_rect()
                .map(|rect| faces.within(&pad(rect, padding)))
                .unwrap_or_default();

            ClusterSubset {
                index,
                polygon: polygon.clone(),
                maxima: AnomalyTable {
                    kind: maxima.kind,
                    statistic: maxima.statistic,
                    records,
                },
                counts: counts.select_ids(&ids),
                face_ids,
            }
        })
        .collect()
}

/// Small clusters pooled into one combined result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidualGroup {
    /// Indices of the pooled clusters.
    pub cluster_indexes: Vec<usize>,
    /// Concatenated maxima of the pooled clusters.
    pub maxima: Vec<AnomalyRecord>,
    /// Concatenated counts of the pooled clusters.
    pub counts: Vec<AnomalyRecord>,
}

impl ResidualGroup {
    /// Returns `true` if nothing was pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cluster_indexes.is_empty()
    }
}

/// Clusters split by size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clustering {
    /// Clusters with more than the minimum number of counted elements.
    pub large: Vec<ClusterSubset>,
    /// Every other cluster, pooled.
    pub small: ResidualGroup,
}

impl Clustering {
    /// Returns `true` if no cluster was formed at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.large.is_empty() && self.small.is_empty()
    }
}

/// Splits subsets into large clusters (count subset longer than
/// `min_count`) and one residual group of the rest.
#[must_use]
pub fn partition(subsets: Vec<ClusterSubset>, min_count: usize) -> Clustering {
    let mut clustering = Clustering::default();
    for subset in subsets {
        if subset.counts.len() > min_count {
            clustering.large.push(subset);
        } else {
            clustering.small.cluster_indexes.push(subset.index);
            clustering.small.maxima.extend(subset.maxima.records);
            clustering.small.counts.extend(subset.counts.records);
        }
    }

    log::info!(
        "{} large cluster(s), {} small cluster(s) pooled",
        clustering.large.len(),
        clustering.small.cluster_indexes.len()
    );

    clustering
}

fn pad(rect: Rect<f64>, padding: f64) -> Rect<f64> {
    Rect::new(
        Coord {
            x: rect.min().x - padding,
            y: rect.min().y - padding,
        },
        Coord {
            x: rect.max().x + padding,
            y: rect.max().y + padding,
        },
    )
}

fn cmp_coord(a: Coord<f64>, b: Coord<f64>) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

fn cmp_polygon(a: &Polygon<f64>, b: &Polygon<f64>) -> Ordering {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => cmp_coord(ra.min(), rb.min()).then(cmp_coord(ra.max(), rb.max())),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use geo::{Area, Line};
    use proptest::prelude::*;
    use ras_post_mesh_models::{AttributeKind, Face, Statistic};

    use super::*;

    fn record(id: usize, x: f64, y: f64, value: f64) -> AnomalyRecord {
        AnomalyRecord {
            id,
            location: Point::new(x, y),
            value,
        }
    }

    fn table(statistic: Statistic, records: Vec<AnomalyRecord>) -> AnomalyTable {
        AnomalyTable {
            kind: AttributeKind::Velocity,
            statistic,
            records,
        }
    }

    fn face(id: usize, x: f64, y: f64) -> Face {
        let segment = Line::new(Coord { x, y }, Coord { x: x + 1.0, y });
        Face {
            id,
            points: (0, 0),
            cells: (0, 0),
            segment,
            centroid: Point::new(x + 0.5, y),
        }
    }

    #[test]
    fn overlapping_buffers_merge() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(100.0, 0.0),
        ];
        let clusters = group_points(&points, 1.0, 3.0);
        assert_eq!(clusters.len(), 2);

        assert!(clusters[0].contains(&Point::new(2.0, 0.0)));
        assert!(clusters[1].contains(&Point::new(100.0, 0.0)));
        assert!(!clusters[0].contains(&Point::new(50.0, 0.0)));
    }

    #[test]
    fn no_points_no_clusters() {
        assert!(group_points(&[], 10.0, 3.0).is_empty());
        assert!(group_points(&[Point::new(0.0, 0.0)], 0.0, 3.0).is_empty());
    }

    #[test]
    fn subset_selects_members_counts_and_padded_faces() {
        let maxima = table(
            Statistic::Max,
            vec![
                record(1, 0.0, 0.0, 40.0),
                record(2, 1.0, 0.0, 35.0),
                record(7, 100.0, 0.0, 33.0),
            ],
        );
        let counts = table(
            Statistic::Count,
            vec![record(1, 0.0, 0.0, 3.0), record(7, 100.0, 0.0, 1.0)],
        );
        let faces = FaceIndex::new(&[face(0, 5.0, 0.0), face(1, 40.0, 0.0), face(2, 100.0, 5.0)]);

        let clusters = group_points(
            &maxima.records.iter().map(|r| r.location).collect::<Vec<_>>(),
            1.0,
            3.0,
        );
        let subsets = subset(&clusters, &maxima, &counts, &faces, 10.0);

        assert_eq!(subsets.len(), 2);
        assert_eq!(subsets[0].maxima.ids(), vec![1, 2]);
        assert_eq!(subsets[0].counts.ids(), vec![1]);
        assert_eq!(subsets[0].face_ids, vec![0]);
        assert_eq!(subsets[1].maxima.ids(), vec![7]);
        assert_eq!(subsets[1].face_ids, vec![2]);
    }

    #[test]
    fn partition_pools_small_clusters() {
        let big: Vec<AnomalyRecord> = (0..6)
            .map(|i| record(i, f64::from(u8::try_from(i).unwrap()), 0.0, 1.0))
            .collect();
        let large = ClusterSubset {
            index: 0,
            polygon: Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)].into(), vec![]),
            maxima: table(Statistic::Max, big.clone()),
            counts: table(Statistic::Count, big),
            face_ids: vec![],
        };
        let small = |index: usize, id: usize| ClusterSubset {
            index,
            polygon: Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)].into(), vec![]),
            maxima: table(Statistic::Max, vec![record(id, 0.0, 0.0, 31.0)]),
            counts: table(Statistic::Count, vec![record(id, 0.0, 0.0, 2.0)]),
            face_ids: vec![],
        };

        let clustering = partition(vec![small(1, 10), large, small(2, 20)], 5);
        assert_eq!(clustering.large.len(), 1);
        assert_eq!(clustering.large[0].index, 0);
        assert_eq!(clustering.small.cluster_indexes, vec![1, 2]);
        assert_eq!(
            clustering.small.counts.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![10, 20]
        );
    }

    #[test]
    fn exactly_min_count_is_small() {
        let five: Vec<AnomalyRecord> = (0..5).map(|i| record(i, 0.0, 0.0, 1.0)).collect();
        let subset = ClusterSubset {
            index: 0,
            polygon: Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)].into(), vec![]),
            maxima: table(Statistic::Max, five.clone()),
            counts: table(Statistic::Count, five),
            face_ids: vec![],
        };
        let clustering = partition(vec![subset], 5);
        assert!(clustering.large.is_empty());
        assert!(!clustering.is_empty());
    }

    proptest! {
        #[test]
        fn clustering_ignores_input_order(
            points in prop::collection::vec((-500.0..500.0f64, -500.0..500.0f64), 1..25)
                .prop_flat_map(|pts| (Just(pts.clone()), Just(pts).prop_shuffle())),
        ) {
            let (original, shuffled) = points;
            let to_points = |v: &[(f64, f64)]| v.iter().map(|&(x, y)| Point::new(x, y)).collect::<Vec<_>>();

            let a = group_points(&to_points(&original), 10.0, 3.0);
            let b = group_points(&to_points(&shuffled), 10.0, 3.0);

            prop_assert_eq!(a.len(), b.len());
            for (pa, pb) in a.iter().zip(&b) {
                prop_assert!((pa.unsigned_area() - pb.unsigned_area()).abs() < 1e-6);
                prop_assert_eq!(pa.bounding_rect(), pb.bounding_rect());
            }
        }
    }
}
