//! `GeoJSON` output of the QA/QC screening, one feature collection per plan.
//!
//! Every feature carries a `kind` property so a plotting layer can style
//! the plan outline, domain perimeters, clusters, anomaly points and
//! extreme edges separately. Numeric statistics are rounded to two
//! decimals.

use std::path::Path;

use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use ras_post_mesh::DomainResults;
use ras_post_mesh_models::{AnomalyRecord, AttributeKind, ExtremeEdge, ForcingKind};
use serde_json::json;

use crate::plan::PlanSummary;
use crate::{ClusterError, VelocityScreening};

/// Everything reported for one domain.
pub struct DomainReport<'a> {
    /// Loaded results.
    pub results: &'a DomainResults,
    /// Velocity screening outcome.
    pub screening: &'a VelocityScreening,
    /// Perimeter faces with deep averaged depth.
    pub extreme_edges: &'a [ExtremeEdge],
}

/// Builds the feature collection for a plan: one `plan` feature outlining
/// every domain, then the features of each domain.
#[must_use]
pub fn feature_collection(plan: &PlanSummary, domains: &[DomainReport<'_>]) -> FeatureCollection {
    let mut features = vec![plan_feature(plan)];
    for report in domains {
        features.push(perimeter_feature(report));
        features.extend(cluster_features(report));

        let name = &report.results.domain().name;
        let anomalies = report.screening.anomalies();
        features.extend(
            anomalies
                .maxima
                .records
                .iter()
                .map(|r| point_feature(name, "velocity_max", r)),
        );
        features.extend(
            anomalies
                .counts
                .records
                .iter()
                .map(|r| point_feature(name, "velocity_count", r)),
        );
        features.extend(report.extreme_edges.iter().map(|edge| {
            feature(
                Value::from(&edge.centroid),
                json!({
                    "kind": "extreme_edge",
                    "domain": name,
                    "face_id": edge.face_id,
                    "abs_max": round2(edge.abs_max),
                }),
            )
        }));
    }

    log::info!(
        "Report contains {} feature(s) across {} domain(s)",
        features.len(),
        domains.len()
    );

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Writes a feature collection as pretty-printed JSON.
///
/// Writes to a temporary file and renames it into place so a crash never
/// leaves a truncated report behind.
///
/// # Errors
///
/// Returns [`ClusterError::Json`] if serialization fails and
/// [`ClusterError::Io`] if the file cannot be written.
pub fn write_report(path: &Path, collection: &FeatureCollection) -> Result<(), ClusterError> {
    let text = serde_json::to_string_pretty(collection)?;
    let tmp = path.with_extension("geojson.tmp");
    let io = |source| ClusterError::Io {
        path: path.to_path_buf(),
        source,
    };

    std::fs::write(&tmp, text).map_err(io)?;
    std::fs::rename(&tmp, path).map_err(io)?;

    log::info!("Wrote QA/QC report to {}", path.display());
    Ok(())
}

fn plan_feature(plan: &PlanSummary) -> Feature {
    let outline: MultiPolygon<f64> = plan.perimeters.iter().map(|(_, p)| p.clone()).collect();
    let domains: Vec<&str> = plan.perimeters.iter().map(|(name, _)| name.as_str()).collect();

    feature(
        Value::from(&outline),
        json!({
            "kind": "plan",
            "domains": domains,
            "plan_information": plan.information,
            "plan_parameters": plan.parameters,
            "run_summary": plan.run_summary,
        }),
    )
}

fn perimeter_feature(report: &DomainReport<'_>) -> Feature {
    let results = report.results;
    let domain = results.domain();
    let anomalies = report.screening.anomalies();

    let (cluster_count, large_count) = match report.screening {
        VelocityScreening::NoErrors { .. } => (0, 0),
        VelocityScreening::Clustered(c) => (c.clusters.len(), c.large.len()),
    };

    let statistics: serde_json::Map<String, serde_json::Value> = AttributeKind::ALL
        .iter()
        .map(|&kind| (kind.as_str().to_string(), attribute_statistics(results, kind)))
        .collect();

    let peaks: serde_json::Map<String, serde_json::Value> = ForcingKind::ALL
        .iter()
        .filter_map(|&kind| {
            let series = results.forcing().get(kind);
            if !series.is_present() {
                return None;
            }
            let boundaries: serde_json::Map<String, serde_json::Value> = series
                .names()
                .into_iter()
                .filter_map(|name| Some((name.to_string(), json!(round2(series.peak(name)?)))))
                .collect();
            Some((kind.as_str().to_string(), serde_json::Value::Object(boundaries)))
        })
        .collect();

    feature(
        Value::from(&domain.perimeter),
        json!({
            "kind": "perimeter",
            "domain": domain.name,
            "cell_size": round2(domain.cell_size),
            "cells": domain.cell_count(),
            "faces": domain.face_count(),
            "time_steps": results.velocity().ncols(),
            "velocity_threshold": anomalies.threshold,
            "anomalous_faces": anomalies.maxima.len(),
            "counted_faces": anomalies.counts.len(),
            "clusters": cluster_count,
            "large_clusters": large_count,
            "extreme_edges": report.extreme_edges.len(),
            "statistics": statistics,
            "peaks": peaks,
        }),
    )
}

/// Wetted element count and the extremes over wetted elements.
fn attribute_statistics(results: &DomainResults, kind: AttributeKind) -> serde_json::Value {
    let described = results.describe(kind);
    let max = described
        .max_nonzero
        .records
        .iter()
        .map(|r| r.value)
        .reduce(f64::max);
    let min = described
        .min_nonzero
        .records
        .iter()
        .map(|r| r.value)
        .reduce(f64::min);
    json!({
        "active": described.max_nonzero.len(),
        "max": max.map(round2),
        "min": min.map(round2),
    })
}

fn cluster_features(report: &DomainReport<'_>) -> Vec<Feature> {
    let VelocityScreening::Clustered(clustered) = report.screening else {
        return Vec::new();
    };
    let name = &report.results.domain().name;

    clustered
        .clusters
        .iter()
        .enumerate()
        .map(|(index, polygon)| {
            let large = clustered.large.iter().find(|c| c.subset.index == index);
            let members = large.map_or_else(
                || {
                    clustered
                        .small
                        .maxima
                        .iter()
                        .filter(|r| geo::Contains::contains(polygon, &r.location))
                        .count()
                },
                |c| c.subset.maxima.len(),
            );
            let top_faces: Vec<usize> = large
                .map(|c| c.top_faces.iter().map(|t| t.face_id).collect())
                .unwrap_or_default();

            feature(
                Value::from(polygon),
                json!({
                    "kind": "cluster",
                    "domain": name,
                    "index": index,
                    "size": if large.is_some() { "large" } else { "small" },
                    "members": members,
                    "top_faces": top_faces,
                }),
            )
        })
        .collect()
}

fn point_feature(domain: &str, kind: &str, record: &AnomalyRecord) -> Feature {
    feature(
        Value::from(&record.location),
        json!({
            "kind": kind,
            "domain": domain,
            "id": record.id,
            "value": round2(record.value),
        }),
    )
}

fn feature(value: Value, properties: serde_json::Value) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: as_object(properties),
        foreign_members: None,
    }
}

fn as_object(value: serde_json::Value) -> Option<JsonObject> {
    match value {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
