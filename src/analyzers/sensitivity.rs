use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyzers::descriptive::{r2_score, rmse};
use crate::error::Result;
use crate::models::{value_columns, GroundObservation, Metric, PixelsByRegion};
use crate::processors::matcher::{MatchSettings, Matcher};
use crate::utils::constants::STRATUM_MIN_SAMPLES;

/// Matching outcome for one (radius, window) combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityCell {
    pub spatial_radius_km: f64,
    pub temporal_window_hours: f64,
    pub n_pairs: usize,
    pub r_squared: Metric<f64>,
    pub rmse: Metric<f64>,
    pub is_headline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityAnalysis {
    pub radii_km: Vec<f64>,
    pub windows_hours: Vec<f64>,
    pub cells: Vec<SensitivityCell>,
}

impl SensitivityAnalysis {
    pub fn cell(&self, radius_km: f64, window_hours: f64) -> Option<&SensitivityCell> {
        self.cells
            .iter()
            .find(|c| c.spatial_radius_km == radius_km && c.temporal_window_hours == window_hours)
    }

    pub fn headline(&self) -> Option<&SensitivityCell> {
        self.cells.iter().find(|c| c.is_headline)
    }
}

/// Re-run the matcher over every radius and window in the grid.
///
/// Cells are ordered radius-major. Raw R² and RMSE need more than ten pairs.
pub fn sensitivity_grid(
    matcher: &Matcher,
    observations: &[GroundObservation],
    pixels_by_region: &PixelsByRegion,
    radii_km: &[f64],
    windows_hours: &[f64],
) -> Result<SensitivityAnalysis> {
    let headline = matcher.settings().clone();
    let mut cells = Vec::with_capacity(radii_km.len() * windows_hours.len());

    for &radius in radii_km {
        for &window in windows_hours {
            let settings = MatchSettings {
                spatial_radius_km: radius,
                temporal_window_hours: window,
                ..headline.clone()
            };
            let (pairs, _) = matcher.with_settings(settings).match_all(observations, pixels_by_region)?;
            let (ground, satellite) = value_columns(&pairs);
            let n = pairs.len();

            cells.push(SensitivityCell {
                spatial_radius_km: radius,
                temporal_window_hours: window,
                n_pairs: n,
                r_squared: Metric::require(n, STRATUM_MIN_SAMPLES, || {
                    Metric::from_f64(r2_score(&ground, &satellite), "R²")
                }),
                rmse: Metric::require(n, STRATUM_MIN_SAMPLES, || {
                    Metric::from_f64(rmse(&ground, &satellite), "RMSE")
                }),
                is_headline: radius == headline.spatial_radius_km
                    && window == headline.temporal_window_hours,
            });
        }
    }

    info!(
        "Sensitivity analysis: {} cells over {} radii and {} windows",
        cells.len(),
        radii_km.len(),
        windows_hours.len()
    );

    Ok(SensitivityAnalysis {
        radii_km: radii_km.to_vec(),
        windows_hours: windows_hours.to_vec(),
        cells,
    })
}
