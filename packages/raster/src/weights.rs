//! Loading run weights and heatmap settings.
//!
//! Weight files in TOML use a `[weights]` table. JSON files may be a flat
//! `{"run": weight}` object or `{"weights": {...}}`.

use std::collections::BTreeMap;
use std::path::Path;

use ras_post_raster_models::{HeatmapConfig, WeightsConfig};

use crate::RasterError;

/// Reads [`HeatmapConfig`] from a TOML file; omitted keys keep defaults.
///
/// # Errors
///
/// Returns [`RasterError::Io`] if the file cannot be read and
/// [`RasterError::Settings`] if it does not parse.
pub fn load_config(path: &Path) -> Result<HeatmapConfig, RasterError> {
    let text = std::fs::read_to_string(path).map_err(RasterError::io(path))?;
    let config = toml::from_str(&text).map_err(|e| RasterError::Settings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    log::info!("Loaded heatmap config from {}", path.display());
    Ok(config)
}

/// Reads a weights file, choosing the format by extension.
///
/// # Errors
///
/// Returns [`RasterError::Io`] if the file cannot be read and
/// [`RasterError::Settings`] if it cannot be parsed or a weight is not
/// finite.
pub fn load_weights(path: &Path) -> Result<WeightsConfig, RasterError> {
    let text = std::fs::read_to_string(path).map_err(RasterError::io(path))?;
    let invalid = |message: String| RasterError::Settings {
        path: path.to_path_buf(),
        message,
    };

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let config = if is_json {
        serde_json::from_str::<BTreeMap<String, f64>>(&text)
            .map(|weights| WeightsConfig { weights })
            .or_else(|_| serde_json::from_str::<WeightsConfig>(&text))
            .map_err(|e| invalid(e.to_string()))?
    } else {
        toml::from_str::<WeightsConfig>(&text).map_err(|e| invalid(e.to_string()))?
    };

    if let Some((run, weight)) = config.weights.iter().find(|(_, w)| !w.is_finite()) {
        return Err(invalid(format!("weight of {run} is {weight}")));
    }
    if config.weights.is_empty() {
        log::warn!("{} defines no weights", path.display());
    }

    log::info!(
        "Loaded {} weight(s) from {}",
        config.weights.len(),
        path.display()
    );
    Ok(config)
}
