//! R-tree over face segments.

use geo::Rect;
use ras_post_mesh_models::Face;
use rstar::{AABB, RTree, RTreeObject};

/// A face segment stored in the R-tree with its id.
struct FaceEntry {
    id: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for FaceEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index of a domain's faces.
///
/// Built once per domain and queried once per cluster.
pub struct FaceIndex {
    tree: RTree<FaceEntry>,
}

impl FaceIndex {
    /// Bulk-loads every face segment.
    #[must_use]
    pub fn new(faces: &[Face]) -> Self {
        let entries = faces
            .iter()
            .map(|face| FaceEntry {
                id: face.id,
                envelope: AABB::from_corners(
                    [face.segment.start.x, face.segment.start.y],
                    [face.segment.end.x, face.segment.end.y],
                ),
            })
            .collect();

        let tree = RTree::bulk_load(entries);
        log::debug!("Indexed {} faces", tree.size());
        Self { tree }
    }

    /// Number of indexed faces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Returns `true` if no faces are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Ids of the faces lying entirely inside `rect`, ascending.
    #[must_use]
    pub fn within(&self, rect: &Rect<f64>) -> Vec<usize> {
        let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut ids: Vec<usize> = self
            .tree
            .locate_in_envelope(&query)
            .map(|entry| entry.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use geo::{Coord, Line, Point};

    use super::*;

    fn face(id: usize, from: (f64, f64), to: (f64, f64)) -> Face {
        let segment = Line::new(Coord { x: from.0, y: from.1 }, Coord { x: to.0, y: to.1 });
        Face {
            id,
            points: (0, 0),
            cells: (0, 0),
            segment,
            centroid: Point::new((from.0 + to.0) / 2.0, (from.1 + to.1) / 2.0),
        }
    }

    #[test]
    fn within_requires_the_whole_segment() {
        let index = FaceIndex::new(&[
            face(0, (1.0, 1.0), (2.0, 2.0)),
            face(1, (9.0, 9.0), (11.0, 9.0)),
            face(2, (50.0, 50.0), (51.0, 50.0)),
        ]);
        assert_eq!(index.len(), 3);

        let rect = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 10.0 });
        assert_eq!(index.within(&rect), vec![0]);

        let wider = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 60.0, y: 60.0 });
        assert_eq!(index.within(&wider), vec![0, 1, 2]);
    }
}
