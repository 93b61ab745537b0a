//! Screening every domain of a plan file.

use std::collections::BTreeMap;

use geo::{Coord, LineString, Polygon};
use ras_post_mesh::DomainResults;
use ras_post_mesh_models::{ExtremeEdge, QaqcConfig};
use ras_post_store::{ArrayStore, PlanFile, StoreError};

use crate::report::DomainReport;
use crate::{ClusterError, VelocityScreening, screen_velocity};

/// Plan-wide attributes and the outline of every domain.
///
/// Attribute groups the plan does not carry are left empty.
#[derive(Debug, Clone, Default)]
pub struct PlanSummary {
    /// `Plan Information` attributes (plan name, simulation window, ...).
    pub information: BTreeMap<String, String>,
    /// `Plan Parameters` attributes (solver settings).
    pub parameters: BTreeMap<String, String>,
    /// Unsteady run summary (compute time, volume accounting error, ...).
    pub run_summary: BTreeMap<String, String>,
    /// Domain name and perimeter, in table order.
    pub perimeters: Vec<(String, Polygon<f64>)>,
}

impl PlanSummary {
    /// Reads the plan-level groups of `plan`.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Store`] if a group exists but cannot be read,
    /// or a domain has no perimeter.
    pub fn read(plan: &PlanFile<'_>) -> Result<Self, ClusterError> {
        let perimeters = plan
            .perimeters()?
            .into_iter()
            .map(|(name, points)| {
                let ring: LineString<f64> = points
                    .rows()
                    .into_iter()
                    .map(|r| Coord { x: r[0], y: r[1] })
                    .collect();
                (name, Polygon::new(ring, vec![]))
            })
            .collect();

        Ok(Self {
            information: optional_group("plan information", plan.plan_information())?,
            parameters: optional_group("plan parameters", plan.plan_parameters())?,
            run_summary: optional_group("run summary", plan.summary())?,
            perimeters,
        })
    }
}

fn optional_group(
    group: &str,
    attributes: Result<BTreeMap<String, String>, StoreError>,
) -> Result<BTreeMap<String, String>, ClusterError> {
    match attributes {
        Ok(attributes) => Ok(attributes),
        Err(e) if e.is_missing() => {
            log::debug!("Plan has no {group}");
            Ok(BTreeMap::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Results and findings for one domain.
#[derive(Debug)]
pub struct DomainScreening {
    /// Loaded mesh and series.
    pub results: DomainResults,
    /// Velocity clusters.
    pub screening: VelocityScreening,
    /// Perimeter faces whose averaged depth exceeds the edge threshold.
    pub extreme_edges: Vec<ExtremeEdge>,
}

impl DomainScreening {
    /// Borrows this screening for [`crate::report::feature_collection`].
    #[must_use]
    pub fn report(&self) -> DomainReport<'_> {
        DomainReport {
            results: &self.results,
            screening: &self.screening,
            extreme_edges: &self.extreme_edges,
        }
    }
}

/// A screened plan: its summary and one screening per domain.
#[derive(Debug)]
pub struct PlanScreening {
    /// Plan-wide attributes.
    pub summary: PlanSummary,
    /// Domains in table order.
    pub domains: Vec<DomainScreening>,
}

impl PlanScreening {
    /// Borrowed domain reports, in table order.
    #[must_use]
    pub fn reports(&self) -> Vec<DomainReport<'_>> {
        self.domains.iter().map(DomainScreening::report).collect()
    }
}

/// Reads the plan summary, then loads and screens every 2D flow area in
/// `store`, in table order.
///
/// # Errors
///
/// Returns [`ClusterError::Store`] if the plan has no flow area table or
/// its summary cannot be read, and [`ClusterError::Mesh`] if any domain
/// fails to load.
pub fn screen_plan(
    store: &dyn ArrayStore,
    config: &QaqcConfig,
) -> Result<PlanScreening, ClusterError> {
    let plan = PlanFile::open(store)?;
    let summary = PlanSummary::read(&plan)?;
    let mut domains = Vec::new();

    for name in plan.domains() {
        let results = DomainResults::load(store, name)?;
        let screening = screen_velocity(&results, config);
        let extreme_edges = results.extreme_edges(config.edge_depth_threshold);
        if !extreme_edges.is_empty() {
            log::warn!(
                "{} perimeter face(s) in {name} average more than {} deep",
                extreme_edges.len(),
                config.edge_depth_threshold
            );
        }
        domains.push(DomainScreening {
            results,
            screening,
            extreme_edges,
        });
    }

    Ok(PlanScreening { summary, domains })
}
