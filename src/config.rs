use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use validator::Validate;

use crate::analyzers::agreement::AgreementOptions;
use crate::analyzers::cross_validation::LocoOptions;
use crate::error::Result;
use crate::models::{GroupBy, Pollutant, QualityFilter};
use crate::processors::data_cleaner::GroundQc;
use crate::processors::matcher::{MatchSettings, Matcher};
use crate::utils::constants::*;

/// Prefix of environment overrides, e.g. `TEMPO_VALIDATION__SPATIAL_RADIUS_KM=30`
pub const ENV_PREFIX: &str = "TEMPO_VALIDATION";

/// Settings for one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ValidationConfig {
    #[validate(range(exclusive_min = 0.0))]
    pub spatial_radius_km: f64,

    #[validate(range(min = 0.0))]
    pub temporal_window_hours: f64,

    #[validate(range(min = 0.0))]
    pub time_weight: f64,

    pub bootstrap_iterations: usize,
    pub permutation_iterations: usize,

    #[validate(range(min = 1))]
    pub max_resampling_iterations: usize,

    pub random_seed: u64,

    /// Fixed Deming variance ratio; estimated per group when absent
    pub variance_ratio: Option<f64>,

    pub group_by: GroupBy,

    /// Restrict matching to one pollutant
    pub parameter: Option<Pollutant>,

    #[validate(nested)]
    pub quality: QualityFilter,

    #[validate(nested)]
    pub ground_qc: GroundQc,

    /// Region key to the cities it covers
    #[validate(length(min = 1))]
    pub regions: BTreeMap<String, Vec<String>>,

    #[validate(range(min = 2))]
    pub min_group_pairs: usize,

    #[validate(range(min = 1))]
    pub loco_min_train: usize,

    #[validate(range(min = 1))]
    pub loco_min_test: usize,

    #[validate(range(min = 2))]
    pub bootstrap_min_samples: usize,

    pub sensitivity_enabled: bool,
    pub sensitivity_radii_km: Vec<f64>,
    pub sensitivity_windows_hours: Vec<f64>,

    #[validate(range(min = 1))]
    pub max_workers: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            spatial_radius_km: DEFAULT_SPATIAL_RADIUS_KM,
            temporal_window_hours: DEFAULT_TEMPORAL_WINDOW_HOURS,
            time_weight: DEFAULT_TIME_WEIGHT,
            bootstrap_iterations: DEFAULT_BOOTSTRAP_ITERATIONS,
            permutation_iterations: DEFAULT_PERMUTATION_ITERATIONS,
            max_resampling_iterations: DEFAULT_MAX_RESAMPLING_ITERATIONS,
            random_seed: DEFAULT_RANDOM_SEED,
            variance_ratio: None,
            group_by: GroupBy::City,
            parameter: None,
            quality: QualityFilter::relaxed(),
            ground_qc: GroundQc::default(),
            regions: default_regions(),
            min_group_pairs: DEFAULT_MIN_GROUP_PAIRS,
            loco_min_train: DEFAULT_LOCO_MIN_TRAIN,
            loco_min_test: DEFAULT_LOCO_MIN_TEST,
            bootstrap_min_samples: DEFAULT_BOOTSTRAP_MIN_SAMPLES,
            sensitivity_enabled: true,
            sensitivity_radii_km: DEFAULT_SENSITIVITY_RADII_KM.to_vec(),
            sensitivity_windows_hours: DEFAULT_SENSITIVITY_WINDOWS_HOURS.to_vec(),
            max_workers: num_cpus::get(),
        }
    }
}

/// The built-in city to region table
pub fn default_regions() -> BTreeMap<String, Vec<String>> {
    DEFAULT_REGION_CITIES
        .iter()
        .map(|(region, cities)| {
            (
                region.to_string(),
                cities.iter().map(|c| c.to_string()).collect(),
            )
        })
        .collect()
}

impl ValidationConfig {
    /// Defaults with the strict pixel quality thresholds
    pub fn production() -> Self {
        Self {
            quality: QualityFilter::strict(),
            ..Self::default()
        }
    }

    /// Layer an optional file and `TEMPO_VALIDATION__*` environment variables over the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ValidationConfig = settings.try_deserialize()?;
        config.checked()
    }

    /// Validate field ranges and cross-field constraints
    pub fn checked(self) -> Result<Self> {
        self.validate()?;
        if self.sensitivity_radii_km.iter().any(|r| r.is_nan() || *r <= 0.0)
            || self.sensitivity_windows_hours.iter().any(|w| w.is_nan() || *w < 0.0)
        {
            return Err(crate::error::ProcessingError::Config(
                "sensitivity radii must be positive and windows non-negative".to_string(),
            ));
        }
        if let Some(lambda) = self.variance_ratio {
            if !lambda.is_finite() || lambda <= 0.0 {
                return Err(crate::error::ProcessingError::Config(format!(
                    "variance_ratio must be positive and finite, got {}",
                    lambda
                )));
            }
        }
        Ok(self)
    }

    fn capped(&self, requested: usize, what: &str) -> usize {
        if requested > self.max_resampling_iterations {
            warn!(
                "{} iterations clamped from {} to {}",
                what, requested, self.max_resampling_iterations
            );
            self.max_resampling_iterations
        } else {
            requested
        }
    }

    pub fn effective_bootstrap_iterations(&self) -> usize {
        self.capped(self.bootstrap_iterations, "bootstrap")
    }

    pub fn effective_permutation_iterations(&self) -> usize {
        self.capped(self.permutation_iterations, "permutation")
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            spatial_radius_km: self.spatial_radius_km,
            temporal_window_hours: self.temporal_window_hours,
            time_weight: self.time_weight,
            quality: self.quality.clone(),
            parameter: self.parameter,
        }
    }

    pub fn matcher(&self) -> Matcher {
        Matcher::new(self.match_settings(), &self.regions).with_max_workers(self.max_workers)
    }

    pub fn agreement_options(&self) -> AgreementOptions {
        AgreementOptions {
            min_samples: self.min_group_pairs,
            bootstrap_iterations: self.effective_bootstrap_iterations(),
            bootstrap_min_samples: self.bootstrap_min_samples,
            permutation_iterations: self.effective_permutation_iterations(),
        }
    }

    pub fn loco_options(&self) -> LocoOptions {
        LocoOptions {
            min_train: self.loco_min_train,
            min_test: self.loco_min_test,
            variance_ratio: self.variance_ratio,
        }
    }
}
