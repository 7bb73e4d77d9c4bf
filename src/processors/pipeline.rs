use rand::SeedableRng;
use std::collections::BTreeMap;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::analyzers::agreement::assess_group;
use crate::analyzers::cross_validation::leave_one_group_out;
use crate::analyzers::dataset_summary::{summarize_ground, summarize_pairs, summarize_satellite};
use crate::analyzers::deming::calibrate;
use crate::analyzers::sensitivity::sensitivity_grid;
use crate::analyzers::stratification::stratify;
use crate::config::ValidationConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{
    group_pairs, value_columns, AgreementReport, CalibrationModel, GroupBy, MatchedPair,
};
use crate::processors::report_assembler::{
    ReportAssembler, RunManifest, ValidationReport, OVERALL_GROUP,
};
use crate::readers::{GroundDataset, SatelliteDataset};
use crate::utils::progress::ProgressReporter;

/// Matched pairs and the assembled report of one run
#[derive(Debug, Clone)]
pub struct ValidationOutput {
    pub matched_pairs: Vec<MatchedPair>,
    pub report: ValidationReport,
}

/// Match the two datasets and compute every agreement statistic.
///
/// Identical inputs and configuration give identical pairs and metrics.
pub fn run_validation(
    ground: &GroundDataset,
    satellite: &SatelliteDataset,
    config: &ValidationConfig,
) -> Result<ValidationOutput> {
    run_validation_with_progress(ground, satellite, config, None)
}

pub fn run_validation_with_progress(
    ground: &GroundDataset,
    satellite: &SatelliteDataset,
    config: &ValidationConfig,
    progress: Option<&ProgressReporter>,
) -> Result<ValidationOutput> {
    let config = config.clone().checked()?;
    if ground.is_empty() {
        return Err(ProcessingError::NoUsableRows(
            "ground dataset has no usable observations".to_string(),
        ));
    }
    if satellite.total_pixels() == 0 {
        return Err(ProcessingError::NoUsableRows(
            "satellite dataset has no usable pixels".to_string(),
        ));
    }

    if let Some(p) = progress {
        p.set_message("Matching ground observations to satellite pixels...");
    }
    let matcher = config.matcher();
    let (matched_pairs, matching) =
        matcher.match_all(&ground.observations, &satellite.pixels_by_region)?;
    if matched_pairs.is_empty() {
        warn!("No matched pairs; every statistic will be reported as insufficient");
    }

    if let Some(p) = progress {
        p.set_message(&format!("Calibrating and assessing {} pairs...", matched_pairs.len()));
    }
    let (overall, groups) = assess_all(&matched_pairs, &config);

    if let Some(p) = progress {
        p.set_message("Cross-validating calibration...");
    }
    let cross_validation = leave_one_group_out(&matched_pairs, config.group_by, &config.loco_options());

    let sensitivity = if config.sensitivity_enabled {
        if let Some(p) = progress {
            p.set_message("Running sensitivity grid...");
        }
        Some(sensitivity_grid(
            &matcher,
            &ground.observations,
            &satellite.pixels_by_region,
            &config.sensitivity_radii_km,
            &config.sensitivity_windows_hours,
        )?)
    } else {
        None
    };

    let calibrated = calibrated_values(&matched_pairs, config.group_by, &overall.0, &groups);
    let stratification = stratify(&matched_pairs, &calibrated);

    let inputs = ground
        .source
        .iter()
        .cloned()
        .chain(satellite.sources.iter().cloned())
        .collect();
    let report = ReportAssembler::new(RunManifest::new(&config, inputs)).assemble(
        summarize_ground(ground),
        summarize_satellite(satellite),
        matching,
        summarize_pairs(&matched_pairs),
        overall,
        groups,
        cross_validation,
        sensitivity,
        stratification,
    );

    info!(
        "Validation complete: {} pairs in {} groups",
        matched_pairs.len(),
        report.groups.len()
    );
    Ok(ValidationOutput {
        matched_pairs,
        report,
    })
}

type Assessment = (CalibrationModel, AgreementReport);

/// Overall then per-group, all drawing from one generator in a fixed order
fn assess_all(pairs: &[MatchedPair], config: &ValidationConfig) -> (Assessment, Vec<Assessment>) {
    let mut rng = ChaCha8Rng::seed_from_u64(config.random_seed);
    let options = config.agreement_options();

    let (ground, satellite) = value_columns(pairs);
    let model = calibrate(OVERALL_GROUP, &ground, &satellite, config.variance_ratio);
    let report = assess_group(OVERALL_GROUP, &ground, &satellite, &model, &options, &mut rng);
    let overall = (model, report);

    let groups = group_pairs(pairs, config.group_by)
        .into_iter()
        .map(|(key, group)| {
            let (ground, satellite) = value_columns(group.iter().copied());
            let model = calibrate(&key, &ground, &satellite, config.variance_ratio);
            let report = assess_group(&key, &ground, &satellite, &model, &options, &mut rng);
            (model, report)
        })
        .collect();

    (overall, groups)
}

/// Each pair's satellite value through its group's correction line
fn calibrated_values(
    pairs: &[MatchedPair],
    group_by: GroupBy,
    overall: &CalibrationModel,
    groups: &[Assessment],
) -> Vec<f64> {
    let models: BTreeMap<&str, &CalibrationModel> = groups
        .iter()
        .map(|(model, _)| (model.group_key.as_str(), model))
        .collect();
    pairs
        .iter()
        .map(|pair| {
            models
                .get(pair.group_key(group_by))
                .copied()
                .unwrap_or(overall)
                .apply(pair.satellite_value)
        })
        .collect()
}
