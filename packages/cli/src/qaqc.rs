//! `qaqc` subcommand.

use std::path::Path;

use ras_post_mesh_models::QaqcConfig;
use ras_post_spatial::report::{feature_collection, write_report};
use ras_post_spatial::{DomainScreening, PlanSummary, VelocityScreening, load_config, screen_plan};
use ras_post_store::ArrayStore;

use crate::QaqcArgs;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub fn run(args: &QaqcArgs) -> Result<(), BoxError> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => QaqcConfig::default(),
    };

    let store = open_store(&args.plan)?;
    let plan = screen_plan(&*store, &config)?;
    log_plan(&plan.summary);
    for screening in &plan.domains {
        log_summary(screening);
    }

    let collection = feature_collection(&plan.summary, &plan.reports());
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| args.plan.with_extension("qaqc.geojson"));
    write_report(&out, &collection)?;

    println!("{}", out.display());
    Ok(())
}

fn log_plan(summary: &PlanSummary) {
    if let Some(name) = summary.information.get("Plan Name") {
        log::info!("Plan {name}");
    }
    for (key, value) in &summary.run_summary {
        log::info!("  {key}: {value}");
    }
}

fn log_summary(screening: &DomainScreening) {
    let name = &screening.results.domain().name;
    match &screening.screening {
        VelocityScreening::NoErrors { .. } => {
            log::info!("{name}: no velocity errors");
        }
        VelocityScreening::Clustered(clustered) => {
            log::info!(
                "{name}: {} anomalous face(s) in {} cluster(s), {} large",
                clustered.anomalies.maxima.len(),
                clustered.clusters.len(),
                clustered.large.len()
            );
            for large in &clustered.large {
                let faces: Vec<_> = large.top_faces.iter().map(|t| t.face_id).collect();
                log::info!("  cluster {}: top faces {faces:?}", large.subset.index);
            }
        }
    }
    log::info!(
        "{name}: {} extreme perimeter face(s)",
        screening.extreme_edges.len()
    );
}

#[cfg(feature = "hdf5")]
fn open_store(path: &Path) -> Result<Box<dyn ArrayStore>, BoxError> {
    Ok(Box::new(ras_post_store::Hdf5Store::open(path)?))
}

#[cfg(not(feature = "hdf5"))]
fn open_store(path: &Path) -> Result<Box<dyn ArrayStore>, BoxError> {
    Err(format!(
        "cannot read {}: ras_post was built without HDF5 support (rebuild with `--features hdf5`)",
        path.display()
    )
    .into())
}
