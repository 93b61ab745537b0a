//! Rebuilds a [`Domain`] from flat coordinate and index tables.

use geo::{Centroid, Coord, Line, LineString, Point, Polygon};
use ndarray::Array2;
use ras_post_mesh_models::{Cell, Domain, Face};
use ras_post_store::{ArrayStore, layout};

use crate::MeshError;

/// Collects the geometry tables of one domain and validates them in
/// [`MeshTopologyBuilder::build`].
///
/// Every input is supplied through an explicit method so the builder can be
/// filled from an [`ArrayStore`], from tests, or from any other source.
#[derive(Debug, Clone, Default)]
pub struct MeshTopologyBuilder {
    name: String,
    face_points: Option<Array2<f64>>,
    face_point_indexes: Option<Array2<i64>>,
    face_cell_indexes: Option<Array2<i64>>,
    cell_centers: Option<Array2<f64>>,
    perimeter: Option<Array2<f64>>,
    spacing: Option<(f64, f64)>,
}

impl MeshTopologyBuilder {
    /// Starts a builder for the named domain.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// `[P][2]` face point coordinates.
    #[must_use]
    pub fn face_points(mut self, coords: Array2<f64>) -> Self {
        self.face_points = Some(coords);
        self
    }

    /// `[F][2]` face point index pairs.
    #[must_use]
    pub fn face_point_indexes(mut self, indexes: Array2<i64>) -> Self {
        self.face_point_indexes = Some(indexes);
        self
    }

    /// `[F][2]` bounding cell index pairs.
    #[must_use]
    pub fn face_cell_indexes(mut self, indexes: Array2<i64>) -> Self {
        self.face_cell_indexes = Some(indexes);
        self
    }

    /// `[C][2]` cell center coordinates.
    #[must_use]
    pub fn cell_centers(mut self, coords: Array2<f64>) -> Self {
        self.cell_centers = Some(coords);
        self
    }

    /// Ordered perimeter points.
    #[must_use]
    pub fn perimeter(mut self, points: Array2<f64>) -> Self {
        self.perimeter = Some(points);
        self
    }

    /// Nominal mesh spacing along each axis.
    #[must_use]
    pub const fn spacing(mut self, dx: f64, dy: f64) -> Self {
        self.spacing = Some((dx, dy));
        self
    }

    /// Validates the inputs and materializes the domain.
    ///
    /// # Errors
    ///
    /// * [`MeshError::MissingInput`] if any input was not supplied
    /// * [`MeshError::Shape`] if a table does not have two columns
    /// * [`MeshError::FaceCountMismatch`] if the two face tables disagree
    /// * [`MeshError::FacePointOutOfRange`] / [`MeshError::CellOutOfRange`]
    ///   for negative or too-large indices
    /// * [`MeshError::Perimeter`] if the perimeter has fewer than 3 points
    pub fn build(self) -> Result<Domain, MeshError> {
        let name = self.name;
        let face_points = require(&name, "face point coordinates", self.face_points)?;
        let face_point_indexes = require(&name, "face point indexes", self.face_point_indexes)?;
        let face_cell_indexes = require(&name, "face cell indexes", self.face_cell_indexes)?;
        let cell_centers = require(&name, "cell center coordinates", self.cell_centers)?;
        let perimeter = require(&name, "perimeter", self.perimeter)?;
        let (dx, dy) = require(&name, "spacing", self.spacing)?;

        check_pairs(&name, "FacePoints Coordinate", &face_points)?;
        check_pairs(&name, "Faces FacePoint Indexes", &face_point_indexes)?;
        check_pairs(&name, "Faces Cell Indexes", &face_cell_indexes)?;
        check_pairs(&name, "Cells Center Coordinate", &cell_centers)?;
        check_pairs(&name, "Perimeter", &perimeter)?;

        if face_point_indexes.nrows() != face_cell_indexes.nrows() {
            return Err(MeshError::FaceCountMismatch {
                domain: name,
                face_points: face_point_indexes.nrows(),
                cells: face_cell_indexes.nrows(),
            });
        }
        if perimeter.nrows() < 3 {
            return Err(MeshError::Perimeter {
                domain: name,
                points: perimeter.nrows(),
            });
        }

        let coords: Vec<Coord<f64>> = face_points
            .rows()
            .into_iter()
            .map(|r| Coord { x: r[0], y: r[1] })
            .collect();

        let cells: Vec<Cell> = cell_centers
            .rows()
            .into_iter()
            .enumerate()
            .map(|(id, r)| Cell {
                id,
                center: Point::new(r[0], r[1]),
            })
            .collect();

        let mut faces = Vec::with_capacity(face_point_indexes.nrows());
        for (id, (pair, cell_pair)) in face_point_indexes
            .rows()
            .into_iter()
            .zip(face_cell_indexes.rows())
            .enumerate()
        {
            let from = face_point_index(&name, id, pair[0], coords.len())?;
            let to = face_point_index(&name, id, pair[1], coords.len())?;
            let c1 = cell_index(&name, id, cell_pair[0], cells.len())?;
            let c2 = cell_index(&name, id, cell_pair[1], cells.len())?;

            let segment = Line::new(coords[from], coords[to]);
            faces.push(Face {
                id,
                points: (from, to),
                cells: (c1, c2),
                segment,
                centroid: segment.centroid(),
            });
        }

        let ring: LineString<f64> = perimeter
            .rows()
            .into_iter()
            .map(|r| Coord { x: r[0], y: r[1] })
            .collect();

        log::debug!(
            "Built domain {name}: {} cells, {} faces, {} perimeter points",
            cells.len(),
            faces.len(),
            perimeter.nrows()
        );

        Ok(Domain {
            name,
            cell_size: f64::midpoint(dx, dy),
            cells,
            faces,
            perimeter: Polygon::new(ring, vec![]),
        })
    }
}

/// Reads the geometry tables of `name` from a plan results store and builds
/// its [`Domain`].
///
/// # Errors
///
/// * [`MeshError::UnknownDomain`] if the flow area table has no such domain
/// * [`MeshError::Store`] if a geometry table is missing or unreadable
/// * any validation error from [`MeshTopologyBuilder::build`]
pub fn load_domain(store: &dyn ArrayStore, name: &str) -> Result<Domain, MeshError> {
    let attrs = store
        .flow_area_table()?
        .into_iter()
        .find(|a| a.name == name)
        .ok_or_else(|| MeshError::UnknownDomain {
            domain: name.to_string(),
        })?;

    let table = |t: &str| layout::geometry_path(name, t);

    let domain = MeshTopologyBuilder::new(name)
        .face_points(store.read_f64_2d(&table(layout::geometry::FACE_POINTS_COORDINATE))?)
        .face_point_indexes(store.read_i64_2d(&table(layout::geometry::FACES_FACE_POINT_INDEXES))?)
        .face_cell_indexes(store.read_i64_2d(&table(layout::geometry::FACES_CELL_INDEXES))?)
        .cell_centers(store.read_f64_2d(&table(layout::geometry::CELLS_CENTER_COORDINATE))?)
        .perimeter(store.read_f64_2d(&table(layout::geometry::PERIMETER))?)
        .spacing(attrs.spacing_dx, attrs.spacing_dy)
        .build()?;

    log::info!(
        "Domain ID: {}, Average Cell Size = {}",
        domain.name,
        domain.cell_size
    );

    Ok(domain)
}

fn require<T>(domain: &str, input: &'static str, value: Option<T>) -> Result<T, MeshError> {
    value.ok_or_else(|| MeshError::MissingInput {
        domain: domain.to_string(),
        input,
    })
}

fn check_pairs<T>(domain: &str, table: &'static str, data: &Array2<T>) -> Result<(), MeshError> {
    if data.ncols() == 2 {
        Ok(())
    } else {
        Err(MeshError::Shape {
            domain: domain.to_string(),
            table,
            found: data.dim(),
        })
    }
}

fn face_point_index(domain: &str, face: usize, index: i64, len: usize) -> Result<usize, MeshError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| MeshError::FacePointOutOfRange {
            domain: domain.to_string(),
            face,
            index,
            len,
        })
}

fn cell_index(domain: &str, face: usize, index: i64, len: usize) -> Result<usize, MeshError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| MeshError::CellOutOfRange {
            domain: domain.to_string(),
            face,
            index,
            len,
        })
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use proptest::prelude::*;
    use ras_post_store::{FlowAreaAttributes, MemoryStore};

    use super::*;

    fn unit_square() -> MeshTopologyBuilder {
        MeshTopologyBuilder::new("Square")
            .face_points(array![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
            .face_point_indexes(array![[0, 1]])
            .face_cell_indexes(array![[0, 1]])
            .cell_centers(array![[0.5, -0.5], [0.5, 0.5]])
            .perimeter(array![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
            .spacing(1.0, 1.0)
    }

    #[test]
    fn unit_square_face_geometry() {
        let domain = unit_square().build().unwrap();
        assert_eq!(domain.face_count(), 1);
        assert_eq!(domain.cell_count(), 2);

        let face = domain.faces[0];
        assert_eq!(face.points, (0, 1));
        assert_eq!(face.cells, (0, 1));
        assert_eq!(face.centroid, Point::new(0.5, 0.0));
        assert!((domain.cell_size - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cell_size_is_mean_of_spacing() {
        let domain = unit_square().spacing(20.0, 30.0).build().unwrap();
        assert!((domain.cell_size - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_face_point_is_fatal() {
        let err = unit_square()
            .face_point_indexes(array![[0, 4]])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            MeshError::FacePointOutOfRange {
                face: 0,
                index: 4,
                len: 4,
                ..
            }
        ));
    }

    #[test]
    fn negative_face_point_is_fatal() {
        let err = unit_square()
            .face_point_indexes(array![[-1, 2]])
            .build()
            .unwrap_err();
        assert!(matches!(err, MeshError::FacePointOutOfRange { index: -1, .. }));
    }

    #[test]
    fn out_of_range_cell_is_fatal() {
        let err = unit_square()
            .face_cell_indexes(array![[0, 2]])
            .build()
            .unwrap_err();
        assert!(matches!(err, MeshError::CellOutOfRange { index: 2, .. }));
    }

    #[test]
    fn missing_input_is_named() {
        let err = MeshTopologyBuilder::new("Empty").build().unwrap_err();
        assert!(matches!(
            err,
            MeshError::MissingInput {
                input: "face point coordinates",
                ..
            }
        ));
    }

    #[test]
    fn wrong_width_table_is_rejected() {
        let err = unit_square()
            .cell_centers(array![[0.5, -0.5, 0.0]])
            .build()
            .unwrap_err();
        assert!(matches!(err, MeshError::Shape { found: (1, 3), .. }));
    }

    #[test]
    fn degenerate_perimeter_is_rejected() {
        let err = unit_square()
            .perimeter(array![[0.0, 0.0], [1.0, 0.0]])
            .build()
            .unwrap_err();
        assert!(matches!(err, MeshError::Perimeter { points: 2, .. }));
    }

    #[test]
    fn loads_domain_from_store() {
        let name = "Perimeter 1";
        let path = |t: &str| layout::geometry_path(name, t);
        let store = MemoryStore::new()
            .with_flow_area(FlowAreaAttributes {
                name: name.to_string(),
                spacing_dx: 50.0,
                spacing_dy: 100.0,
            })
            .with_f64(
                path(layout::geometry::FACE_POINTS_COORDINATE),
                array![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            )
            .with_i64(path(layout::geometry::FACES_FACE_POINT_INDEXES), array![[0, 1], [1, 2]])
            .with_i64(path(layout::geometry::FACES_CELL_INDEXES), array![[0, 1], [0, 1]])
            .with_f64(
                path(layout::geometry::CELLS_CENTER_COORDINATE),
                array![[0.5, 0.5], [2.0, 0.5]],
            )
            .with_f64(
                path(layout::geometry::PERIMETER),
                array![[0.0, 0.0], [3.0, 0.0], [3.0, 3.0], [0.0, 3.0]],
            );

        let domain = load_domain(&store, name).unwrap();
        assert_eq!(domain.face_count(), 2);
        assert!((domain.cell_size - 75.0).abs() < f64::EPSILON);

        let err = load_domain(&store, "Perimeter 2").unwrap_err();
        assert!(matches!(err, MeshError::UnknownDomain { .. }));
    }

    proptest! {
        #[test]
        fn one_face_per_pair_with_midpoint_centroid(
            coords in prop::collection::vec((-1.0e6..1.0e6f64, -1.0e6..1.0e6f64), 2..40),
            picks in prop::collection::vec((any::<prop::sample::Index>(), any::<prop::sample::Index>()), 1..60),
        ) {
            let p = coords.len();
            let flat: Vec<f64> = coords.iter().flat_map(|&(x, y)| [x, y]).collect();
            let pairs: Vec<i64> = picks
                .iter()
                .flat_map(|(a, b)| [a.index(p) as i64, b.index(p) as i64])
                .collect();
            let f = picks.len();

            let domain = MeshTopologyBuilder::new("Random")
                .face_points(Array2::from_shape_vec((p, 2), flat).unwrap())
                .face_point_indexes(Array2::from_shape_vec((f, 2), pairs).unwrap())
                .face_cell_indexes(Array2::zeros((f, 2)))
                .cell_centers(array![[0.0, 0.0]])
                .perimeter(array![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]])
                .spacing(10.0, 10.0)
                .build()
                .unwrap();

            prop_assert_eq!(domain.face_count(), f);
            for face in &domain.faces {
                let (a, b) = (coords[face.points.0], coords[face.points.1]);
                prop_assert!((face.centroid.x() - (a.0 + b.0) / 2.0).abs() <= 1e-6);
                prop_assert!((face.centroid.y() - (a.1 + b.1) / 2.0).abs() <= 1e-6);
            }
        }
    }
}
