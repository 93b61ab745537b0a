#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial clustering of anomalous mesh elements.
//!
//! Flagged face centroids are buffered by a multiple of the domain's mean
//! cell size and unioned into disjoint cluster polygons. Each cluster then
//! collects the anomalies strictly inside it and the faces inside its
//! padded bounding box, looked up through an R-tree over face segments.
//! Clusters with enough counted elements are reported individually, the
//! rest are pooled into one residual group.

pub mod cluster;
pub mod index;
pub mod plan;
pub mod report;
pub mod screen;

use std::path::{Path, PathBuf};

use ras_post_mesh_models::QaqcConfig;

pub use cluster::{ClusterSubset, Clustering, ResidualGroup, group_points, partition, subset};
pub use index::FaceIndex;
pub use plan::{DomainScreening, PlanScreening, PlanSummary, screen_plan};
pub use screen::{ClusteredVelocity, LargeCluster, VelocityScreening, screen_velocity};

/// Errors raised while loading screening configuration or writing reports.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Reading or writing a file failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`QaqcConfig`].
    #[error("Invalid QA/QC config {}: {source}", path.display())]
    Config {
        /// Config file path.
        path: PathBuf,
        /// Parse error.
        source: toml::de::Error,
    },

    /// The plan file could not be read.
    #[error(transparent)]
    Store(#[from] ras_post_store::StoreError),

    /// A domain's mesh or results are malformed.
    #[error(transparent)]
    Mesh(#[from] ras_post_mesh::MeshError),

    /// The report could not be serialized.
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads a [`QaqcConfig`] from a TOML file, filling omitted keys with
/// their defaults.
///
/// # Errors
///
/// Returns [`ClusterError::Io`] if the file cannot be read and
/// [`ClusterError::Config`] if it does not parse.
pub fn load_config(path: &Path) -> Result<QaqcConfig, ClusterError> {
    let text = std::fs::read_to_string(path).map_err(|source| ClusterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: QaqcConfig = toml::from_str(&text).map_err(|source| ClusterError::Config {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Loaded QA/QC config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_fills_defaults() {
        let dir = std::env::temp_dir().join("ras_post_spatial_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("qaqc.toml");
        std::fs::write(&path, "velocity_threshold = 20.0\ntop_faces = 3\n").unwrap();

        let config = load_config(&path).unwrap();
        assert!((config.velocity_threshold - 20.0).abs() < f64::EPSILON);
        assert_eq!(config.top_faces, 3);
        assert_eq!(config.min_cluster_count, 5);

        std::fs::write(&path, "velocity_threshold = \"fast\"\n").unwrap();
        assert!(matches!(
            load_config(&path).unwrap_err(),
            ClusterError::Config { .. }
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_config_is_an_io_error() {
        let err = load_config(Path::new("/nonexistent/ras_post/qaqc.toml")).unwrap_err();
        assert!(matches!(err, ClusterError::Io { .. }));
        assert!(
            err.to_string()
                .starts_with("I/O error at /nonexistent/ras_post/qaqc.toml: ")
        );
    }
}
