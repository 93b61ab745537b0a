//! Fixed dataset paths inside a HEC-RAS plan results file.

/// Group holding per-domain geometry tables.
pub const GEOMETRY_2D_FLOW_AREAS: &str = "/Geometry/2D Flow Areas";

/// Compound table with one row of attributes per domain.
pub const GEOMETRY_ATTRIBUTES: &str = "/Geometry/2D Flow Areas/Attributes";

/// Group whose children carry plan metadata attributes.
pub const PLAN_DATA: &str = "/Plan Data";

/// Group holding boundary condition hydrograph groups.
pub const EVENT_BOUNDARY_CONDITIONS: &str = "/Event Conditions/Unsteady/Boundary Conditions";

/// Group whose attributes summarise the unsteady run.
pub const UNSTEADY_SUMMARY: &str = "/Results/Unsteady/Summary";

/// Group holding per-domain time series results.
pub const TIMESERIES_2D_FLOW_AREAS: &str =
    "/Results/Unsteady/Output/Output Blocks/Base Output/Unsteady Time Series/2D Flow Areas";

/// Geometry table names under a domain group.
pub mod geometry {
    /// Ordered boundary points of the domain.
    pub const PERIMETER: &str = "Perimeter";
    /// `[F][2]` face-point index pairs, one per face.
    pub const FACES_FACE_POINT_INDEXES: &str = "Faces FacePoint Indexes";
    /// `[P][2]` face-point coordinates.
    pub const FACE_POINTS_COORDINATE: &str = "FacePoints Coordinate";
    /// `[F][2]` bounding cell index pairs, one per face.
    pub const FACES_CELL_INDEXES: &str = "Faces Cell Indexes";
    /// `[C][2]` cell center coordinates.
    pub const CELLS_CENTER_COORDINATE: &str = "Cells Center Coordinate";
}

/// Time series table names under a domain results group.
pub mod results {
    /// Water depth at each cell, `[time][cell]`.
    pub const DEPTH: &str = "Depth";
    /// Signed normal velocity at each face, `[time][face]`.
    pub const FACE_VELOCITY: &str = "Face Velocity";
}

/// Plan metadata groups under [`PLAN_DATA`].
pub mod plan {
    /// Plan information attributes (name, times, program version).
    pub const INFORMATION: &str = "Plan Information";
    /// Plan computation parameters.
    pub const PARAMETERS: &str = "Plan Parameters";
}

/// Path of a geometry table for one domain.
#[must_use]
pub fn geometry_path(domain: &str, table: &str) -> String {
    format!("{GEOMETRY_2D_FLOW_AREAS}/{domain}/{table}")
}

/// Path of a time series table for one domain.
#[must_use]
pub fn timeseries_path(domain: &str, table: &str) -> String {
    format!("{TIMESERIES_2D_FLOW_AREAS}/{domain}/{table}")
}

/// Path of a boundary condition group (e.g. `"Flow Hydrographs"`).
#[must_use]
pub fn forcing_group(group: &str) -> String {
    format!("{EVENT_BOUNDARY_CONDITIONS}/{group}")
}

/// Path of a plan metadata group (e.g. [`plan::INFORMATION`]).
#[must_use]
pub fn plan_data_path(group: &str) -> String {
    format!("{PLAN_DATA}/{group}")
}
