//! End-to-end velocity screening for one domain.

use geo::Polygon;
use ras_post_mesh::{DomainResults, FaceTrace};
use ras_post_mesh_models::{AnomalySet, AttributeKind, QaqcConfig};

use crate::{ClusterSubset, FaceIndex, ResidualGroup, group_points, partition, subset};

/// A large cluster with the face histories picked for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct LargeCluster {
    /// The cluster and its members.
    pub subset: ClusterSubset,
    /// Faces with the highest maxima in the cluster, descending.
    pub top_faces: Vec<FaceTrace>,
}

/// Clusters formed from a domain's velocity anomalies.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteredVelocity {
    /// Threshold tables the clusters were built from.
    pub anomalies: AnomalySet,
    /// Every cluster polygon, in canonical order.
    pub clusters: Vec<Polygon<f64>>,
    /// Clusters reported individually.
    pub large: Vec<LargeCluster>,
    /// Every other cluster, pooled.
    pub small: ResidualGroup,
}

/// Outcome of [`screen_velocity`].
#[derive(Debug, Clone, PartialEq)]
pub enum VelocityScreening {
    /// Fewer than two faces exceeded the threshold; nothing to cluster.
    NoErrors {
        /// The (at most single-row) threshold tables.
        anomalies: AnomalySet,
    },
    /// Anomalies were found and clustered.
    Clustered(ClusteredVelocity),
}

impl VelocityScreening {
    /// Threshold tables regardless of outcome.
    #[must_use]
    pub const fn anomalies(&self) -> &AnomalySet {
        match self {
            Self::NoErrors { anomalies } => anomalies,
            Self::Clustered(c) => &c.anomalies,
        }
    }

    /// Returns `true` if no velocity errors were found.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::NoErrors { .. })
    }
}

/// Flags faces above the configured velocity threshold, groups them into
/// clusters, and picks the top faces of every large cluster.
#[must_use]
pub fn screen_velocity(results: &DomainResults, config: &QaqcConfig) -> VelocityScreening {
    let domain = results.domain();
    let anomalies = results.anomaly_set(AttributeKind::Velocity, config.velocity_threshold);

    if anomalies.maxima.len() <= 1 || anomalies.counts.len() <= 1 {
        log::info!("No Velocity Errors Found in {}", domain.name);
        return VelocityScreening::NoErrors { anomalies };
    }

    log::info!(
        "{} face(s) in {} exceed {}",
        anomalies.maxima.len(),
        domain.name,
        config.velocity_threshold
    );

    let points: Vec<_> = anomalies.maxima.records.iter().map(|r| r.location).collect();
    let clusters = group_points(&points, domain.cell_size, config.buffer_multiplier);

    let index = FaceIndex::new(&domain.faces);
    let subsets = subset(
        &clusters,
        &anomalies.maxima,
        &anomalies.counts,
        &index,
        config.face_padding,
    );
    let clustering = partition(subsets, config.min_cluster_count);

    let large = clustering
        .large
        .into_iter()
        .map(|subset| LargeCluster {
            top_faces: results.top_by_max(&subset.maxima, config.top_faces),
            subset,
        })
        .collect();

    VelocityScreening::Clustered(ClusteredVelocity {
        anomalies,
        clusters,
        large,
        small: clustering.small,
    })
}
