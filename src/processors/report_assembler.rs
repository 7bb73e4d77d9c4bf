use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analyzers::cross_validation::{LocoFold, LocoSummary};
use crate::analyzers::dataset_summary::{DatasetSummary, PairSummary};
use crate::analyzers::sensitivity::SensitivityAnalysis;
use crate::analyzers::stratification::StratifiedAnalysis;
use crate::config::ValidationConfig;
use crate::models::{AgreementReport, CalibrationModel, FitMethod, GroupBy, Pollutant, QualityFilter};
use crate::processors::data_cleaner::GroundQc;
use crate::processors::matcher::MatchStatistics;
use crate::readers::InputChecksum;

/// Group key of the all-pairs entry
pub const OVERALL_GROUP: &str = "ALL";

/// Groups at or above this size are labelled robust in the summary table
pub const ROBUST_SAMPLE_SIZE: usize = 20;

/// Settings and inputs that produced a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
    pub spatial_radius_km: f64,
    pub temporal_window_hours: f64,
    pub time_weight: f64,
    pub bootstrap_iterations: usize,
    pub permutation_iterations: usize,
    pub random_seed: u64,
    pub group_by: GroupBy,
    pub parameter: Option<Pollutant>,
    pub variance_ratio: Option<f64>,
    pub quality: QualityFilter,
    pub ground_qc: GroundQc,
    pub inputs: Vec<InputChecksum>,
}

impl RunManifest {
    pub fn new(config: &ValidationConfig, inputs: Vec<InputChecksum>) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            spatial_radius_km: config.spatial_radius_km,
            temporal_window_hours: config.temporal_window_hours,
            time_weight: config.time_weight,
            bootstrap_iterations: config.effective_bootstrap_iterations(),
            permutation_iterations: config.effective_permutation_iterations(),
            random_seed: config.random_seed,
            group_by: config.group_by,
            parameter: config.parameter,
            variance_ratio: config.variance_ratio,
            quality: config.quality.clone(),
            ground_qc: config.ground_qc.clone(),
            inputs,
        }
    }
}

/// Calibration, agreement and held-out performance of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub calibration: CalibrationModel,
    pub agreement: AgreementReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<LocoFold>,
}

/// Everything one validation run produces apart from the pairs themselves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub manifest: RunManifest,
    pub ground: DatasetSummary,
    pub satellite: DatasetSummary,
    pub satellite_by_region: BTreeMap<String, DatasetSummary>,
    pub matching: MatchStatistics,
    pub pairs: PairSummary,
    pub overall: GroupMetrics,
    pub groups: BTreeMap<String, GroupMetrics>,
    pub cross_validation: LocoSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<SensitivityAnalysis>,
    pub stratification: StratifiedAnalysis,
}

/// One row of the per-group agreement table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementSummaryRow {
    pub group: String,
    pub n_samples: usize,
    pub sample_status: String,
    pub fit_method: FitMethod,
    pub lambda: f64,
    pub slope: f64,
    pub intercept: f64,
    pub correction_slope: f64,
    pub correction_intercept: f64,
    pub raw_rmse: Option<f64>,
    pub calibrated_rmse: Option<f64>,
    pub quantile_mapped_rmse: Option<f64>,
    pub raw_bias: Option<f64>,
    pub calibrated_bias: Option<f64>,
    pub quantile_mapped_bias: Option<f64>,
    pub pearson_r: Option<f64>,
    pub r_squared_ci_lower: Option<f64>,
    pub r_squared_ci_upper: Option<f64>,
}

impl AgreementSummaryRow {
    fn from_metrics(group: &str, metrics: &GroupMetrics) -> Self {
        let agreement = &metrics.agreement;
        let calibration = &metrics.calibration;
        let n = agreement.n_samples;
        let interval = agreement.r_squared_interval();

        Self {
            group: group.to_string(),
            n_samples: n,
            sample_status: if n >= ROBUST_SAMPLE_SIZE {
                "Robust".to_string()
            } else {
                "Low Sample".to_string()
            },
            fit_method: calibration.fit_method,
            lambda: calibration.variance_ratio_lambda,
            slope: calibration.slope,
            intercept: calibration.intercept,
            correction_slope: calibration.correction_slope,
            correction_intercept: calibration.correction_intercept,
            raw_rmse: agreement.raw.value().map(|m| m.rmse),
            calibrated_rmse: agreement.calibrated.value().map(|m| m.rmse),
            quantile_mapped_rmse: agreement.quantile_mapped.value().map(|m| m.rmse),
            raw_bias: agreement.raw.value().map(|m| m.bias),
            calibrated_bias: agreement.calibrated.value().map(|m| m.bias),
            quantile_mapped_bias: agreement.quantile_mapped.value().map(|m| m.bias),
            pearson_r: agreement.pearson_r.value().copied(),
            r_squared_ci_lower: interval.map(|(lower, _)| lower),
            r_squared_ci_upper: interval.map(|(_, upper)| upper),
        }
    }
}

impl ValidationReport {
    /// Rows for groups with at least `min_samples` pairs, in group order
    pub fn agreement_summary_rows(&self, min_samples: usize) -> Vec<AgreementSummaryRow> {
        self.groups
            .iter()
            .filter(|(_, metrics)| metrics.agreement.n_samples >= min_samples)
            .map(|(group, metrics)| AgreementSummaryRow::from_metrics(group, metrics))
            .collect()
    }

    pub fn overall_row(&self) -> AgreementSummaryRow {
        AgreementSummaryRow::from_metrics(OVERALL_GROUP, &self.overall)
    }

    pub fn group(&self, key: &str) -> Option<&GroupMetrics> {
        self.groups.get(key)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!(
                "Pairs: {} ({} stations, radius {} km, window {} h)",
                self.pairs.n_pairs,
                self.pairs.n_stations,
                self.manifest.spatial_radius_km,
                self.manifest.temporal_window_hours
            ),
            format!("Groups ({}): {}", self.manifest.group_by, self.groups.len()),
        ];

        let overall = &self.overall.agreement;
        if let (Some(raw), Some(calibrated)) = (overall.raw.value(), overall.calibrated.value()) {
            lines.push(format!(
                "Overall RMSE: {:.3} raw, {:.3} calibrated ({})",
                raw.rmse, calibrated.rmse, self.overall.calibration.fit_method
            ));
        } else {
            lines.push(format!("Overall metrics: {}", overall.raw.status()));
        }
        if let Some(bias) = overall.mean_bias() {
            lines.push(format!("Mean bias (ground - satellite): {:.3}", bias));
        }
        if let Some(p) = overall.permutation_p_value() {
            lines.push(format!("Permutation p-value: {:.4}", p));
        }
        if let Some(improvement) = self.cross_validation.mean_improvement_pct {
            lines.push(format!(
                "LOCO: {} evaluated, {} skipped, mean improvement {:.1}% ({} improved)",
                self.cross_validation.n_evaluated,
                self.cross_validation.n_skipped,
                improvement,
                self.cross_validation.n_improved
            ));
        } else {
            lines.push(format!(
                "LOCO: {} evaluated, {} skipped",
                self.cross_validation.n_evaluated, self.cross_validation.n_skipped
            ));
        }
        lines.join("\n")
    }
}

/// Combines the per-stage results into a `ValidationReport`
pub struct ReportAssembler {
    manifest: RunManifest,
}

impl ReportAssembler {
    pub fn new(manifest: RunManifest) -> Self {
        Self { manifest }
    }

    /// Attach each group's LOCO fold to its calibration and agreement
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        self,
        ground: DatasetSummary,
        satellite: (DatasetSummary, BTreeMap<String, DatasetSummary>),
        matching: MatchStatistics,
        pairs: PairSummary,
        overall: (CalibrationModel, AgreementReport),
        groups: Vec<(CalibrationModel, AgreementReport)>,
        cross_validation: LocoSummary,
        sensitivity: Option<SensitivityAnalysis>,
        stratification: StratifiedAnalysis,
    ) -> ValidationReport {
        let mut folds: BTreeMap<String, LocoFold> = cross_validation
            .folds
            .iter()
            .map(|fold| (fold.group_key.clone(), fold.clone()))
            .collect();

        let groups = groups
            .into_iter()
            .map(|(calibration, agreement)| {
                let key = calibration.group_key.clone();
                let metrics = GroupMetrics {
                    cross_validation: folds.remove(&key),
                    calibration,
                    agreement,
                };
                (key, metrics)
            })
            .collect();

        let (satellite, satellite_by_region) = satellite;
        ValidationReport {
            manifest: self.manifest,
            ground,
            satellite,
            satellite_by_region,
            matching,
            pairs,
            overall: GroupMetrics {
                calibration: overall.0,
                agreement: overall.1,
                cross_validation: None,
            },
            groups,
            cross_validation,
            sensitivity,
            stratification,
        }
    }
}
