//! Chunk planning: how many row bands a raster is split into and how many
//! bands may be processed at once.

use ras_post_raster_models::{BandWindow, ChunkPlan, HeatmapConfig};

use crate::RasterError;

/// Environment variable overriding detected available memory, in GB.
pub const MEMORY_ENV: &str = "RAS_POST_MEMORY_GB";

/// Memory assumed when neither config nor environment provides one, in GB.
pub const DEFAULT_MEMORY_GB: f64 = 16.0;

const BYTES_PER_GB: f64 = 1e9;

/// Sizes bands so that each one stays under a memory ceiling.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    config: HeatmapConfig,
}

impl ChunkPlanner {
    /// Creates a planner from the heatmap settings.
    #[must_use]
    pub const fn new(config: HeatmapConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &HeatmapConfig {
        &self.config
    }

    /// Plans band count and concurrency for a `width` x `height` raster.
    ///
    /// The smallest band count that keeps one band's working set under the
    /// ceiling is rounded up to the next configured tier. Counts beyond the
    /// last tier are used as-is. Bands never exceed the row count, so a
    /// raster with fewer rows than its tier gets exactly one row per band.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Infeasible`] if the raster is empty, the
    /// ceiling is not positive, a single row already exceeds the ceiling,
    /// or the available memory cannot hold one band.
    pub fn plan(
        &self,
        width: u32,
        height: u32,
        available_memory_bytes: u64,
        logical_cores: usize,
    ) -> Result<ChunkPlan, RasterError> {
        let infeasible = |reason: String| RasterError::Infeasible {
            width,
            height,
            reason,
        };

        if width == 0 || height == 0 {
            return Err(infeasible("raster has no pixels".to_string()));
        }
        let ceiling = self.config.band_memory_ceiling_gb;
        if !(ceiling.is_finite() && ceiling > 0.0) {
            return Err(infeasible(format!(
                "band memory ceiling must be positive, got {ceiling}"
            )));
        }

        #[allow(clippy::cast_precision_loss)]
        let raster_gb = (u64::from(width) * u64::from(height)) as f64
            * f64::from(self.config.bytes_per_pixel)
            / BYTES_PER_GB;
        let working_gb = raster_gb * self.config.working_set_multiplier;
        let exact_bands = exact_band_count(working_gb, ceiling);

        if exact_bands > height as usize {
            return Err(infeasible(format!(
                "{exact_bands} bands needed to stay under {ceiling} GB but only {height} rows exist"
            )));
        }

        // A raster shorter than its tier gets one row per band. `exact_bands`
        // fits in `height`, so the clamped count still keeps bands under the
        // ceiling.
        let tiered = self.snap_to_tier(exact_bands);
        let bands = tiered.min(height as usize);

        #[allow(clippy::cast_precision_loss)]
        let band_gb = working_gb / bands as f64;

        #[allow(clippy::cast_precision_loss)]
        let available_gb = available_memory_bytes as f64 / BYTES_PER_GB;
        if available_gb < band_gb {
            return Err(infeasible(format!(
                "{available_gb:.2} GB available cannot hold one band of {band_gb:.2} GB"
            )));
        }

        #[allow(clippy::cast_precision_loss)]
        let core_limit = self.config.workers_per_core * logical_cores as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let workers = (available_gb / band_gb).min(core_limit).floor().max(1.0) as usize;

        log::debug!(
            "Planned {bands} band(s) of {band_gb:.3} GB ({exact_bands} required) with {workers} worker(s) for a {width}x{height} raster"
        );

        Ok(ChunkPlan {
            bands,
            workers,
            exact_bands,
            raster_gb,
            band_gb,
        })
    }

    fn snap_to_tier(&self, exact: usize) -> usize {
        let tiers = &self.config.band_tiers;
        if let Some(&tier) = tiers.iter().find(|&&t| exact < t) {
            return tier;
        }
        match tiers.last() {
            Some(&last) if exact <= last => last,
            Some(&last) => {
                log::warn!(
                    "Raster needs {exact} bands, more than the largest tier of {last}; using {exact}"
                );
                exact
            }
            None => exact,
        }
    }
}

/// Smallest `n >= 1` with `working_gb / n <= ceiling`.
fn exact_band_count(working_gb: f64, ceiling: f64) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut n = (working_gb / ceiling).ceil().max(1.0) as usize;
    #[allow(clippy::cast_precision_loss)]
    {
        while working_gb / n as f64 > ceiling {
            n += 1;
        }
        while n > 1 && working_gb / (n - 1) as f64 <= ceiling {
            n -= 1;
        }
    }
    n
}

/// Splits `height` rows into `bands` contiguous windows.
///
/// Every band gets `height / bands` rows; the last one also absorbs the
/// remainder. `bands` is clamped to `1..=height`.
#[must_use]
pub fn band_windows(height: u32, bands: usize) -> Vec<BandWindow> {
    if height == 0 {
        return Vec::new();
    }
    let bands = u32::try_from(bands).unwrap_or(u32::MAX).clamp(1, height);
    let step = height / bands;

    (0..bands)
        .map(|i| {
            let row_start = i * step;
            let rows = if i + 1 == bands {
                height - row_start
            } else {
                step
            };
            BandWindow {
                index: i as usize,
                row_start,
                rows,
            }
        })
        .collect()
}

/// Memory available to a run, in bytes.
///
/// Taken from the config, then the `RAS_POST_MEMORY_GB` environment
/// variable, then [`DEFAULT_MEMORY_GB`].
#[must_use]
pub fn available_memory_bytes(config: &HeatmapConfig) -> u64 {
    let gb = config
        .available_memory_gb
        .or_else(|| {
            std::env::var(MEMORY_ENV)
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
        })
        .filter(|gb| gb.is_finite() && *gb > 0.0)
        .unwrap_or(DEFAULT_MEMORY_GB);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bytes = (gb * BYTES_PER_GB) as u64;
    bytes
}

/// Logical cores on this machine.
#[must_use]
pub fn logical_cores() -> usize {
    num_cpus::get()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const GB: u64 = 1_000_000_000;

    fn planner() -> ChunkPlanner {
        ChunkPlanner::new(HeatmapConfig::default())
    }

    #[test]
    fn small_raster_uses_first_tier() {
        let plan = planner().plan(1000, 1000, 16 * GB, 4).unwrap();
        assert_eq!(plan.exact_bands, 1);
        assert_eq!(plan.bands, 10);
        assert!((plan.raster_gb - 0.004).abs() < 1e-12);
        // 16 GB / 0.0012 GB per band is far above 2.5 * 4 cores.
        assert_eq!(plan.workers, 10);
    }

    #[test]
    fn tiers_round_up_strictly() {
        // 50_000 x 50_000 x 4 B = 10 GB raw, 30 GB working, 15 bands exact.
        let plan = planner().plan(50_000, 50_000, 64 * GB, 8).unwrap();
        assert_eq!(plan.exact_bands, 15);
        assert_eq!(plan.bands, 20);
        assert!((plan.band_gb - 1.5).abs() < 1e-9);
        assert_eq!(plan.workers, 20);

        // 20 bands exact lands on the 30 tier, not the 20 tier.
        let config = HeatmapConfig {
            band_memory_ceiling_gb: 1.5,
            ..HeatmapConfig::default()
        };
        let plan = ChunkPlanner::new(config).plan(50_000, 50_000, 64 * GB, 8).unwrap();
        assert_eq!(plan.exact_bands, 20);
        assert_eq!(plan.bands, 30);
    }

    #[test]
    fn beyond_last_tier_uses_exact_count() {
        let config = HeatmapConfig {
            band_memory_ceiling_gb: 0.5,
            ..HeatmapConfig::default()
        };
        let plan = ChunkPlanner::new(config).plan(50_000, 50_000, 64 * GB, 8).unwrap();
        assert_eq!(plan.exact_bands, 60);
        assert_eq!(plan.bands, 60);
    }

    #[test]
    fn bands_never_exceed_rows() {
        let plan = planner().plan(100, 4, 16 * GB, 4).unwrap();
        assert_eq!(plan.bands, 4);
    }

    #[test]
    fn workers_limited_by_memory() {
        // 1.5 GB per band, 4 GB available.
        let plan = planner().plan(50_000, 50_000, 4 * GB, 64).unwrap();
        assert_eq!(plan.workers, 2);
    }

    #[test]
    fn workers_at_least_one() {
        let config = HeatmapConfig {
            workers_per_core: 0.1,
            ..HeatmapConfig::default()
        };
        let plan = ChunkPlanner::new(config).plan(10, 10, 16 * GB, 1).unwrap();
        assert_eq!(plan.workers, 1);
    }

    #[test]
    fn infeasible_plans_are_errors() {
        assert!(matches!(
            planner().plan(0, 10, 16 * GB, 4),
            Err(RasterError::Infeasible { .. })
        ));
        // One row of 10^9 pixels needs 6 bands.
        assert!(matches!(
            planner().plan(1_000_000_000, 1, 16 * GB, 4),
            Err(RasterError::Infeasible { .. })
        ));
        // 1.5 GB bands with 1 GB available.
        assert!(matches!(
            planner().plan(50_000, 50_000, GB, 4),
            Err(RasterError::Infeasible { .. })
        ));
    }

    #[test]
    fn windows_cover_every_row_once() {
        let windows = band_windows(103, 10);
        assert_eq!(windows.len(), 10);
        assert_eq!(windows[0].row_start, 0);
        assert_eq!(windows[0].rows, 10);
        assert_eq!(windows[9].row_start, 90);
        assert_eq!(windows[9].rows, 13);
        assert_eq!(windows[9].row_end(), 103);
    }

    #[test]
    fn windows_clamp_band_count() {
        assert_eq!(band_windows(3, 10).len(), 3);
        assert_eq!(band_windows(3, 0).len(), 1);
        assert!(band_windows(0, 10).is_empty());
    }

    #[test]
    fn configured_memory_wins() {
        let config = HeatmapConfig {
            available_memory_gb: Some(2.5),
            ..HeatmapConfig::default()
        };
        assert_eq!(available_memory_bytes(&config), 2_500_000_000);
    }

    proptest! {
        #[test]
        fn windows_partition_rows(height in 1_u32..5000, bands in 1_usize..64) {
            let windows = band_windows(height, bands);
            let mut next = 0;
            for (i, w) in windows.iter().enumerate() {
                prop_assert_eq!(w.index, i);
                prop_assert_eq!(w.row_start, next);
                prop_assert!(w.rows > 0);
                next = w.row_end();
            }
            prop_assert_eq!(next, height);
        }

        #[test]
        fn short_rasters_clamp_bands_to_rows(width in 1_u32..1000, height in 1_u32..30) {
            let plan = planner().plan(width, height, 16 * GB, 4).unwrap();
            prop_assert_eq!(plan.exact_bands, 1);
            prop_assert_eq!(plan.bands, 10.min(height as usize));
            prop_assert!(plan.bands <= height as usize);

            let windows = band_windows(height, plan.bands);
            prop_assert_eq!(windows.len(), plan.bands);
            prop_assert!(windows.iter().all(|w| w.rows >= 1));
            if height <= 10 {
                prop_assert!(windows.iter().all(|w| w.rows == 1));
            }
        }

        #[test]
        fn bands_grow_with_pixel_count(
            w1 in 1_u32..200_000,
            h1 in 30_u32..200_000,
            w2 in 1_u32..200_000,
            h2 in 30_u32..200_000,
        ) {
            let p = planner();
            let (small, large) = if u64::from(w1) * u64::from(h1) <= u64::from(w2) * u64::from(h2) {
                ((w1, h1), (w2, h2))
            } else {
                ((w2, h2), (w1, h1))
            };
            if let (Ok(a), Ok(b)) = (
                p.plan(small.0, small.1, 1024 * GB, 8),
                p.plan(large.0, large.1, 1024 * GB, 8),
            ) {
                prop_assert!(a.exact_bands <= b.exact_bands);
                prop_assert!(a.bands <= b.bands);
            }
        }
    }
}
