use serde::{Deserialize, Serialize};

use crate::models::Metric;

/// Error statistics of an estimate against ground truth.
///
/// `bias` is estimate minus ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub bias: f64,
    pub r_squared: f64,
}

/// Bland-Altman agreement on `ground - satellite` differences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlandAltman {
    pub difference: String,
    pub mean_difference: f64,
    pub sd_difference: f64,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub proportional_bias_slope: f64,
    pub proportional_bias_p_value: Option<f64>,
    pub proportional_bias_significant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreuschPagan {
    pub lm_statistic: f64,
    pub p_value: f64,
}

/// Residual RMSE for one ground-value tertile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeBucket {
    pub label: String,
    pub lower: f64,
    pub upper: f64,
    pub n_samples: usize,
    pub residual_rmse: Metric<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heteroscedasticity {
    pub breusch_pagan: Metric<BreuschPagan>,
    pub magnitude_buckets: Vec<MagnitudeBucket>,
}

/// p10/p50/p90 anchors of both distributions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantileMapping {
    pub ground_p10: f64,
    pub ground_p50: f64,
    pub ground_p90: f64,
    pub satellite_p10: f64,
    pub satellite_p50: f64,
    pub satellite_p90: f64,
}

impl QuantileMapping {
    /// Map a satellite value onto the ground distribution
    pub fn apply(&self, satellite_value: f64) -> f64 {
        let (s10, s50, s90) = (self.satellite_p10, self.satellite_p50, self.satellite_p90);
        let (g10, g50, g90) = (self.ground_p10, self.ground_p50, self.ground_p90);

        if satellite_value < s10 {
            if s10.abs() < f64::EPSILON {
                g10
            } else {
                satellite_value * g10 / s10
            }
        } else if satellite_value > s90 {
            let slope = if (s90 - s50).abs() < f64::EPSILON {
                1.0
            } else {
                (g90 - g50) / (s90 - s50)
            };
            g90 + (satellite_value - s90) * slope
        } else {
            interpolate(satellite_value, &[s10, s50, s90], &[g10, g50, g90])
        }
    }

    pub fn apply_all(&self, satellite_values: &[f64]) -> Vec<f64> {
        satellite_values.iter().map(|&v| self.apply(v)).collect()
    }
}

/// Piecewise-linear interpolation over ascending anchors, flat outside them.
/// Repeated anchors resolve to the rightmost matching segment.
fn interpolate(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let last = xs.len() - 1;
    if x <= xs[0] {
        return if x == xs[0] {
            // with repeated anchors take the last equal one
            let idx = xs.iter().rposition(|&v| v == x).unwrap_or(0);
            ys[idx]
        } else {
            ys[0]
        };
    }
    if x >= xs[last] {
        return ys[last];
    }
    for i in 0..last {
        let (x0, x1) = (xs[i], xs[i + 1]);
        if x >= x0 && x < x1 {
            let t = (x - x0) / (x1 - x0);
            return ys[i] + t * (ys[i + 1] - ys[i]);
        }
    }
    ys[last]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PermutationTest {
    pub observed_r_squared: f64,
    pub p_value: f64,
    pub n_permutations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMethod {
    /// percentile bootstrap of calibrated R²
    Bootstrap,
    /// Fisher z interval for Spearman's rho
    FisherZ,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub method: IntervalMethod,
    pub statistic: String,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
}

/// Agreement statistics for one group, or for all pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementReport {
    pub group_key: String,
    pub n_samples: usize,
    pub raw: Metric<ErrorMetrics>,
    pub calibrated: Metric<ErrorMetrics>,
    pub quantile_mapped: Metric<ErrorMetrics>,
    pub pearson_r: Metric<f64>,
    pub bland_altman: Metric<BlandAltman>,
    pub heteroscedasticity: Metric<Heteroscedasticity>,
    pub quantile_mapping: Metric<QuantileMapping>,
    pub permutation: Metric<PermutationTest>,
    pub r_squared_ci: Metric<ConfidenceInterval>,
}

impl AgreementReport {
    /// Every statistic marked insufficient
    pub fn insufficient(group_key: impl Into<String>, n_samples: usize, required: usize) -> Self {
        Self {
            group_key: group_key.into(),
            n_samples,
            raw: Metric::insufficient(n_samples, required),
            calibrated: Metric::insufficient(n_samples, required),
            quantile_mapped: Metric::insufficient(n_samples, required),
            pearson_r: Metric::insufficient(n_samples, required),
            bland_altman: Metric::insufficient(n_samples, required),
            heteroscedasticity: Metric::insufficient(n_samples, required),
            quantile_mapping: Metric::insufficient(n_samples, required),
            permutation: Metric::insufficient(n_samples, required),
            r_squared_ci: Metric::insufficient(n_samples, required),
        }
    }

    /// Bland-Altman mean of `ground - satellite`
    pub fn mean_bias(&self) -> Option<f64> {
        self.bland_altman.value().map(|ba| ba.mean_difference)
    }

    pub fn limits_of_agreement(&self) -> Option<(f64, f64)> {
        self.bland_altman
            .value()
            .map(|ba| (ba.lower_limit, ba.upper_limit))
    }

    pub fn proportional_bias_slope(&self) -> Option<f64> {
        self.bland_altman
            .value()
            .map(|ba| ba.proportional_bias_slope)
    }

    pub fn heteroscedasticity_p_value(&self) -> Option<f64> {
        self.heteroscedasticity
            .value()
            .and_then(|h| h.breusch_pagan.value().map(|bp| bp.p_value))
    }

    pub fn permutation_p_value(&self) -> Option<f64> {
        self.permutation.value().map(|p| p.p_value)
    }

    pub fn r_squared_interval(&self) -> Option<(f64, f64)> {
        self.r_squared_ci.value().map(|ci| (ci.lower, ci.upper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> QuantileMapping {
        QuantileMapping {
            ground_p10: 10.0,
            ground_p50: 20.0,
            ground_p90: 40.0,
            satellite_p10: 5.0,
            satellite_p50: 10.0,
            satellite_p90: 20.0,
        }
    }

    #[test]
    fn test_quantile_mapping_segments() {
        let qm = mapping();
        // anchors map exactly
        assert_eq!(qm.apply(5.0), 10.0);
        assert_eq!(qm.apply(10.0), 20.0);
        assert_eq!(qm.apply(20.0), 40.0);
        // interior interpolation
        assert!((qm.apply(7.5) - 15.0).abs() < 1e-12);
        assert!((qm.apply(15.0) - 30.0).abs() < 1e-12);
        // ratio scaling below p10
        assert!((qm.apply(2.5) - 5.0).abs() < 1e-12);
        // p50-p90 slope above p90
        assert!((qm.apply(25.0) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_quantile_mapping_degenerate_anchors() {
        let qm = QuantileMapping {
            ground_p10: 3.0,
            ground_p50: 6.0,
            ground_p90: 9.0,
            satellite_p10: 0.0,
            satellite_p50: 4.0,
            satellite_p90: 4.0,
        };
        assert_eq!(qm.apply(-1.0), 3.0);
        // flat upper segment falls back to unit slope
        assert_eq!(qm.apply(6.0), 11.0);
        assert_eq!(qm.apply(4.0), 9.0);
    }

    #[test]
    fn test_insufficient_report_accessors() {
        let report = AgreementReport::insufficient("Toluca", 3, 5);
        assert_eq!(report.mean_bias(), None);
        assert_eq!(report.limits_of_agreement(), None);
        assert_eq!(report.permutation_p_value(), None);
        assert!(report.raw.is_insufficient());
    }
}
