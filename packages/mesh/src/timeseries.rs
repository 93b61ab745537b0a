//! Result and boundary forcing time series.
//!
//! Plan files store result series as `[time][element]`. Everything returned
//! here is transposed to `[element][time]` so a row is the history of one
//! cell or face.

use std::collections::BTreeMap;

use ndarray::Array2;
use ras_post_mesh_models::{AttributeKind, BoundaryForcing, Domain, ForcingKind, ForcingSeries};
use ras_post_store::{ArrayStore, layout};

use crate::MeshError;

const fn dataset_name(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::Depth => layout::results::DEPTH,
        AttributeKind::Velocity => layout::results::FACE_VELOCITY,
    }
}

/// Loads the series of `kind` for `domain` as `[element][time]`.
///
/// Velocity is returned as its absolute value; flow direction does not
/// matter for instability screening.
///
/// # Errors
///
/// * [`MeshError::Store`] if the series is missing or unreadable
/// * [`MeshError::SeriesShape`] if the row count does not match the
///   domain's cell (depth) or face (velocity) count
pub fn extract(
    store: &dyn ArrayStore,
    domain: &Domain,
    kind: AttributeKind,
) -> Result<Array2<f64>, MeshError> {
    let path = layout::timeseries_path(&domain.name, dataset_name(kind));
    let stored = store.read_f64_2d(&path)?;
    let mut series = stored.reversed_axes().as_standard_layout().into_owned();

    if kind == AttributeKind::Velocity {
        series.mapv_inplace(f64::abs);
    }

    let expected = domain.element_count(kind);
    if series.nrows() != expected {
        return Err(MeshError::SeriesShape {
            domain: domain.name.clone(),
            kind,
            expected,
            found: series.nrows(),
        });
    }

    log::debug!(
        "Loaded {kind} for {}: {} elements x {} time steps",
        domain.name,
        series.nrows(),
        series.ncols()
    );

    Ok(series)
}

/// Loads the cell depth series of `domain`.
///
/// # Errors
///
/// See [`extract`].
pub fn extract_depth(store: &dyn ArrayStore, domain: &Domain) -> Result<Array2<f64>, MeshError> {
    extract(store, domain, AttributeKind::Depth)
}

/// Loads the absolute face velocity series of `domain`.
///
/// # Errors
///
/// See [`extract`].
pub fn extract_velocity(
    store: &dyn ArrayStore,
    domain: &Domain,
) -> Result<Array2<f64>, MeshError> {
    extract(store, domain, AttributeKind::Velocity)
}

/// Loads every hydrograph of one forcing family.
///
/// A run without this boundary type is not an error: the group is simply
/// absent and [`ForcingSeries::NotPresent`] is returned.
///
/// # Errors
///
/// * [`MeshError::Store`] if a listed hydrograph cannot be read
/// * [`MeshError::ForcingShape`] if a hydrograph is not `[time, value]`
pub fn extract_forcing(
    store: &dyn ArrayStore,
    kind: ForcingKind,
) -> Result<ForcingSeries, MeshError> {
    let group = layout::forcing_group(kind.group_name());

    let names = match store.list(&group) {
        Ok(names) => names,
        Err(e) if e.is_missing() => {
            log::warn!("No {} in this run", kind.group_name());
            return Ok(ForcingSeries::NotPresent);
        }
        Err(e) => return Err(e.into()),
    };

    let mut series = BTreeMap::new();
    for name in names {
        let data = store.read_f64_2d(&format!("{group}/{name}"))?;
        if data.ncols() != 2 {
            return Err(MeshError::ForcingShape {
                kind,
                name,
                columns: data.ncols(),
            });
        }
        series.insert(name, data);
    }

    log::debug!("Loaded {} {}", series.len(), kind.group_name());

    Ok(ForcingSeries::Present(series))
}

/// Loads the stage, flow, and precipitation hydrographs of a run.
///
/// # Errors
///
/// See [`extract_forcing`].
pub fn extract_boundary_forcing(store: &dyn ArrayStore) -> Result<BoundaryForcing, MeshError> {
    Ok(BoundaryForcing {
        stage: extract_forcing(store, ForcingKind::Stage)?,
        flow: extract_forcing(store, ForcingKind::Flow)?,
        precipitation: extract_forcing(store, ForcingKind::Precipitation)?,
    })
}
