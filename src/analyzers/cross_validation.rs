use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analyzers::deming::calibrate;
use crate::analyzers::descriptive::{mae, mean, mean_bias, r2_score, rmse};
use crate::models::{group_pairs, value_columns, FitMethod, GroupBy, MatchedPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStatus {
    Evaluated,
    Skipped,
}

/// One held-out group.
///
/// Metric fields are empty for skipped folds. `bias` is calibrated minus ground.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocoFold {
    pub group_key: String,
    pub status: FoldStatus,
    pub n_train: usize,
    pub n_test: usize,
    pub skip_reason: Option<String>,
    pub rmse_raw: Option<f64>,
    pub rmse_calibrated: Option<f64>,
    pub improvement_pct: Option<f64>,
    pub r_squared: Option<f64>,
    pub mae: Option<f64>,
    pub bias: Option<f64>,
    pub r_squared_train: Option<f64>,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    pub fit_method: Option<FitMethod>,
}

impl LocoFold {
    fn skipped(group_key: &str, n_train: usize, n_test: usize, reason: String) -> Self {
        Self {
            group_key: group_key.to_string(),
            status: FoldStatus::Skipped,
            n_train,
            n_test,
            skip_reason: Some(reason),
            rmse_raw: None,
            rmse_calibrated: None,
            improvement_pct: None,
            r_squared: None,
            mae: None,
            bias: None,
            r_squared_train: None,
            slope: None,
            intercept: None,
            fit_method: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == FoldStatus::Skipped
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocoSummary {
    pub group_by: GroupBy,
    pub folds: Vec<LocoFold>,
    pub n_evaluated: usize,
    pub n_skipped: usize,
    pub mean_improvement_pct: Option<f64>,
    pub n_improved: usize,
}

/// Thresholds for a fold to be evaluated
#[derive(Debug, Clone, Copy)]
pub struct LocoOptions {
    pub min_train: usize,
    pub min_test: usize,
    pub variance_ratio: Option<f64>,
}

/// Leave-one-group-out cross-validation of the calibration.
///
/// Each group is held out in turn, the calibration is fitted on every other
/// group and applied to the held-out satellite values.
pub fn leave_one_group_out(
    pairs: &[MatchedPair],
    group_by: GroupBy,
    options: &LocoOptions,
) -> LocoSummary {
    let groups = group_pairs(pairs, group_by);
    let mut folds = Vec::with_capacity(groups.len());

    for (key, test_pairs) in &groups {
        let n_test = test_pairs.len();
        let n_train = pairs.len() - n_test;

        if n_train < options.min_train || n_test < options.min_test {
            debug!("LOCO: skipping {} (train {}, test {})", key, n_train, n_test);
            folds.push(LocoFold::skipped(
                key,
                n_train,
                n_test,
                format!(
                    "requires at least {} training and {} test pairs",
                    options.min_train, options.min_test
                ),
            ));
            continue;
        }

        let (train_ground, train_satellite) =
            value_columns(pairs.iter().filter(|p| p.group_key(group_by) != key.as_str()));
        let (test_ground, test_satellite) = value_columns(test_pairs.iter().copied());

        let model = calibrate(key, &train_ground, &train_satellite, options.variance_ratio);
        let calibrated = model.apply_all(&test_satellite);
        let train_calibrated = model.apply_all(&train_satellite);

        let rmse_raw = rmse(&test_ground, &test_satellite);
        let rmse_calibrated = rmse(&test_ground, &calibrated);
        let improvement_pct = if rmse_raw > 0.0 {
            Some((rmse_raw - rmse_calibrated) / rmse_raw * 100.0)
        } else {
            None
        };

        debug!(
            "LOCO: {} RMSE {:.2} -> {:.2} ({:+.1}%)",
            key,
            rmse_raw,
            rmse_calibrated,
            improvement_pct.unwrap_or(0.0)
        );

        folds.push(LocoFold {
            group_key: key.clone(),
            status: FoldStatus::Evaluated,
            n_train,
            n_test,
            skip_reason: None,
            rmse_raw: Some(rmse_raw),
            rmse_calibrated: Some(rmse_calibrated),
            improvement_pct,
            r_squared: Some(r2_score(&test_ground, &calibrated)),
            mae: Some(mae(&test_ground, &calibrated)),
            bias: Some(mean_bias(&test_ground, &calibrated)),
            r_squared_train: Some(r2_score(&train_ground, &train_calibrated)),
            slope: Some(model.slope),
            intercept: Some(model.intercept),
            fit_method: Some(model.fit_method),
        });
    }

    let improvements: Vec<f64> = folds.iter().filter_map(|f| f.improvement_pct).collect();
    let n_evaluated = folds.iter().filter(|f| !f.is_skipped()).count();
    let summary = LocoSummary {
        group_by,
        n_skipped: folds.len() - n_evaluated,
        n_evaluated,
        mean_improvement_pct: if improvements.is_empty() {
            None
        } else {
            Some(mean(&improvements))
        },
        n_improved: improvements.iter().filter(|&&i| i > 0.0).count(),
        folds,
    };

    info!(
        "LOCO: {} groups evaluated, {} skipped, {} improved",
        summary.n_evaluated, summary.n_skipped, summary.n_improved
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::matched::fixtures::pair;
    use crate::utils::constants::{DEFAULT_LOCO_MIN_TEST, DEFAULT_LOCO_MIN_TRAIN};

    fn options() -> LocoOptions {
        LocoOptions {
            min_train: DEFAULT_LOCO_MIN_TRAIN,
            min_test: DEFAULT_LOCO_MIN_TEST,
            variance_ratio: None,
        }
    }

    #[test]
    fn test_single_small_group_is_skipped() {
        let pairs = vec![
            pair("Boston", "NYC", 10.0, 11.0),
            pair("Boston", "NYC", 20.0, 19.0),
            pair("Boston", "NYC", 30.0, 31.0),
        ];
        let summary = leave_one_group_out(&pairs, GroupBy::City, &options());

        assert_eq!(summary.folds.len(), 1);
        assert!(summary.folds[0].is_skipped());
        assert_eq!(summary.folds[0].n_train, 0);
        assert_eq!(summary.n_evaluated, 0);
        assert_eq!(summary.mean_improvement_pct, None);
    }

    #[test]
    fn test_shared_offset_generalises() {
        let mut pairs = Vec::new();
        for (city, base) in [("Boston", 20.0), ("Philadelphia", 30.0), ("Toronto", 25.0)] {
            for i in 0..12 {
                let ground = base + i as f64 * 1.5;
                pairs.push(pair(city, "R", ground, ground - 10.0));
            }
        }
        let summary = leave_one_group_out(&pairs, GroupBy::City, &options());

        assert_eq!(summary.n_evaluated, 3);
        assert_eq!(summary.n_improved, 3);
        for fold in &summary.folds {
            assert_eq!(fold.n_train, 24);
            assert_eq!(fold.n_test, 12);
            assert!(fold.rmse_calibrated.unwrap() < 1e-3);
            assert!(fold.improvement_pct.unwrap() > 99.0);
        }
    }

    #[test]
    fn test_mixed_skipped_and_evaluated() {
        let mut pairs = Vec::new();
        for i in 0..15 {
            let g = 10.0 + i as f64;
            pairs.push(pair("Montreal", "CANADA", g, g * 0.8));
            pairs.push(pair("Toronto", "CANADA", g + 3.0, (g + 3.0) * 0.8));
        }
        pairs.push(pair("Hamilton", "CANADA", 12.0, 9.0));

        let summary = leave_one_group_out(&pairs, GroupBy::City, &options());
        let hamilton = summary
            .folds
            .iter()
            .find(|f| f.group_key == "Hamilton")
            .unwrap();
        assert!(hamilton.is_skipped());
        assert_eq!(summary.n_evaluated, 2);
        assert_eq!(summary.n_skipped, 1);
    }
}
