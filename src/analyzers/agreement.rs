use rand::seq::SliceRandom;
use rand::Rng;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::analyzers::descriptive::{
    error_metrics, linregress, mean, pearson, quantile, quantiles, r2_score, spearman, std_dev,
};
use crate::models::{
    AgreementReport, BlandAltman, BreuschPagan, CalibrationModel, ConfidenceInterval,
    ErrorMetrics, Heteroscedasticity, IntervalMethod, MagnitudeBucket, Metric, PermutationTest,
    QuantileMapping,
};
use crate::utils::constants::{
    BREUSCH_PAGAN_MIN_SAMPLES, DEFAULT_BOOTSTRAP_ITERATIONS, DEFAULT_BOOTSTRAP_MIN_SAMPLES,
    DEFAULT_MIN_GROUP_PAIRS, DEFAULT_PERMUTATION_ITERATIONS, LOA_Z,
    MAGNITUDE_BUCKET_MIN_SAMPLES, PROPORTIONAL_BIAS_SLOPE_THRESHOLD, SIGNIFICANCE_LEVEL,
};

const FISHER_MIN_SAMPLES: usize = 4;
const PERMUTATION_MIN_SAMPLES: usize = 3;
const CI_LEVEL: f64 = 0.95;

/// Sample-size and resampling settings for one agreement pass
#[derive(Debug, Clone, Copy)]
pub struct AgreementOptions {
    pub min_samples: usize,
    pub bootstrap_iterations: usize,
    pub bootstrap_min_samples: usize,
    pub permutation_iterations: usize,
}

impl Default for AgreementOptions {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_GROUP_PAIRS,
            bootstrap_iterations: DEFAULT_BOOTSTRAP_ITERATIONS,
            bootstrap_min_samples: DEFAULT_BOOTSTRAP_MIN_SAMPLES,
            permutation_iterations: DEFAULT_PERMUTATION_ITERATIONS,
        }
    }
}

fn error_metric(actual: &[f64], estimate: &[f64]) -> Metric<ErrorMetrics> {
    let metrics = error_metrics(actual, estimate);
    if metrics.rmse.is_finite() && metrics.r_squared.is_finite() {
        Metric::computed(metrics)
    } else {
        Metric::degenerate(metrics, "non-finite error statistics")
    }
}

/// Bland-Altman analysis of `ground - satellite`
pub fn bland_altman(ground: &[f64], satellite: &[f64]) -> Metric<BlandAltman> {
    let n = ground.len().min(satellite.len());
    Metric::require(n, 2, || {
        let differences: Vec<f64> = ground.iter().zip(satellite).map(|(g, s)| g - s).collect();
        let means: Vec<f64> = ground
            .iter()
            .zip(satellite)
            .map(|(g, s)| (g + s) / 2.0)
            .collect();

        let mean_difference = mean(&differences);
        let sd_difference = std_dev(&differences, 0);
        let trend = linregress(&means, &differences);

        let (slope, p_value) = trend
            .map(|t| (t.slope, t.p_value))
            .unwrap_or((0.0, None));
        let significant = match p_value {
            Some(p) => p < SIGNIFICANCE_LEVEL,
            None => slope.abs() > PROPORTIONAL_BIAS_SLOPE_THRESHOLD,
        };

        let result = BlandAltman {
            difference: "ground_minus_satellite".to_string(),
            mean_difference,
            sd_difference,
            lower_limit: mean_difference - LOA_Z * sd_difference,
            upper_limit: mean_difference + LOA_Z * sd_difference,
            proportional_bias_slope: slope,
            proportional_bias_p_value: p_value,
            proportional_bias_significant: significant,
        };

        if trend.is_none() {
            Metric::degenerate(result, "pair means are constant, no proportional-bias trend")
        } else {
            Metric::computed(result)
        }
    })
}

/// Koenker's Breusch-Pagan test: squared residuals regressed on fitted values
pub fn breusch_pagan(residuals: &[f64], fitted: &[f64]) -> Metric<BreuschPagan> {
    let n = residuals.len().min(fitted.len());
    Metric::require(n, BREUSCH_PAGAN_MIN_SAMPLES, || {
        let squared: Vec<f64> = residuals[..n].iter().map(|r| r * r).collect();
        let r = pearson(&fitted[..n], &squared);
        let r_squared = if r.is_nan() { 0.0 } else { r * r };
        let lm_statistic = n as f64 * r_squared;

        let p_value = match ChiSquared::new(1.0) {
            Ok(chi) => chi.sf(lm_statistic),
            Err(_) => f64::NAN,
        };
        let result = BreuschPagan {
            lm_statistic,
            p_value,
        };

        if r.is_nan() {
            Metric::degenerate(result, "fitted values or squared residuals are constant")
        } else {
            Metric::from_f64(p_value, "Breusch-Pagan p-value").map(|_| result)
        }
    })
}

/// Residual RMSE within ground-value tertiles
pub fn magnitude_buckets(ground: &[f64], residuals: &[f64]) -> Vec<MagnitudeBucket> {
    let n = ground.len().min(residuals.len());
    if n == 0 {
        return Vec::new();
    }
    let cuts = quantiles(&ground[..n], &[0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]);
    let bounds = [
        ("low", cuts[0], cuts[1]),
        ("middle", cuts[1], cuts[2]),
        ("high", cuts[2], cuts[3]),
    ];

    bounds
        .iter()
        .enumerate()
        .map(|(i, &(label, lower, upper))| {
            let in_bucket = |g: f64| match i {
                0 => g <= upper,
                1 => g > lower && g <= upper,
                _ => g > lower,
            };
            let bucket: Vec<f64> = ground[..n]
                .iter()
                .zip(&residuals[..n])
                .filter(|(g, _)| in_bucket(**g))
                .map(|(_, r)| *r)
                .collect();
            let count = bucket.len();
            MagnitudeBucket {
                label: label.to_string(),
                lower,
                upper,
                n_samples: count,
                residual_rmse: Metric::require(count, MAGNITUDE_BUCKET_MIN_SAMPLES, || {
                    let ms = bucket.iter().map(|r| r * r).sum::<f64>() / count as f64;
                    Metric::from_f64(ms.sqrt(), "residual RMSE")
                }),
            }
        })
        .collect()
}

/// Residual structure of `ground - fitted`
pub fn heteroscedasticity(ground: &[f64], fitted: &[f64]) -> Heteroscedasticity {
    let residuals: Vec<f64> = ground.iter().zip(fitted).map(|(g, f)| g - f).collect();
    Heteroscedasticity {
        breusch_pagan: breusch_pagan(&residuals, fitted),
        magnitude_buckets: magnitude_buckets(ground, &residuals),
    }
}

/// Quantile anchors for mapping satellite values onto the ground distribution
pub fn fit_quantile_mapping(ground: &[f64], satellite: &[f64]) -> Metric<QuantileMapping> {
    let n = ground.len().min(satellite.len());
    Metric::require(n, 2, || {
        let g = quantiles(&ground[..n], &[0.1, 0.5, 0.9]);
        let s = quantiles(&satellite[..n], &[0.1, 0.5, 0.9]);
        let mapping = QuantileMapping {
            ground_p10: g[0],
            ground_p50: g[1],
            ground_p90: g[2],
            satellite_p10: s[0],
            satellite_p50: s[1],
            satellite_p90: s[2],
        };
        if s[0] == s[2] {
            Metric::degenerate(mapping, "satellite p10 and p90 coincide")
        } else {
            Metric::computed(mapping)
        }
    })
}

/// Permutation test of R² between ground and satellite.
///
/// The p-value is the fraction of shuffles whose R² reaches the observed one.
pub fn permutation_test<R: Rng>(
    ground: &[f64],
    satellite: &[f64],
    n_permutations: usize,
    rng: &mut R,
) -> Metric<PermutationTest> {
    let n = ground.len().min(satellite.len());
    if n_permutations == 0 {
        return Metric::insufficient(0, 1);
    }
    Metric::require(n, PERMUTATION_MIN_SAMPLES, || {
        let observed = r2_score(ground, satellite);
        let mut shuffled = ground[..n].to_vec();
        let mut at_least = 0usize;

        for _ in 0..n_permutations {
            shuffled.shuffle(rng);
            if r2_score(&shuffled, &satellite[..n]) >= observed {
                at_least += 1;
            }
        }

        let result = PermutationTest {
            observed_r_squared: observed,
            p_value: at_least as f64 / n_permutations as f64,
            n_permutations,
        };
        if observed.is_finite() {
            Metric::computed(result)
        } else {
            Metric::degenerate(result, "observed R² is not finite")
        }
    })
}

/// Fisher z interval for a correlation coefficient
pub fn fisher_ci(rho: f64, n: usize, z: f64) -> Option<(f64, f64)> {
    if n < FISHER_MIN_SAMPLES || !rho.is_finite() {
        return None;
    }
    let z0 = rho.clamp(-1.0, 1.0).atanh();
    let dz = z / ((n - 3) as f64).sqrt();
    Some(((z0 - dz).tanh(), (z0 + dz).tanh()))
}

/// Percentile bootstrap interval of R² between ground and calibrated values
pub fn bootstrap_r2_ci<R: Rng>(
    ground: &[f64],
    calibrated: &[f64],
    iterations: usize,
    rng: &mut R,
) -> Metric<ConfidenceInterval> {
    let n = ground.len().min(calibrated.len());
    if iterations == 0 {
        return Metric::insufficient(0, 1);
    }
    Metric::require(n, 2, || {
        let mut g = vec![0.0; n];
        let mut c = vec![0.0; n];
        let mut replicates = Vec::with_capacity(iterations);

        for _ in 0..iterations {
            for k in 0..n {
                let idx = rng.random_range(0..n);
                g[k] = ground[idx];
                c[k] = calibrated[idx];
            }
            let r2 = r2_score(&g, &c);
            if r2.is_finite() {
                replicates.push(r2);
            }
        }

        let estimate = r2_score(&ground[..n], &calibrated[..n]);
        let interval = |lower, upper| ConfidenceInterval {
            method: IntervalMethod::Bootstrap,
            statistic: "r_squared".to_string(),
            estimate,
            lower,
            upper,
            level: CI_LEVEL,
            iterations: Some(iterations),
        };

        if replicates.is_empty() {
            return Metric::degenerate(
                interval(f64::NAN, f64::NAN),
                "no finite bootstrap replicates",
            );
        }
        Metric::computed(interval(
            quantile(&replicates, 0.025),
            quantile(&replicates, 0.975),
        ))
    })
}

/// R² interval: bootstrap with enough samples, Fisher z on Spearman's rho otherwise
pub fn r_squared_confidence_interval<R: Rng>(
    ground: &[f64],
    calibrated: &[f64],
    options: &AgreementOptions,
    rng: &mut R,
) -> Metric<ConfidenceInterval> {
    let n = ground.len().min(calibrated.len());
    if n >= options.bootstrap_min_samples {
        return bootstrap_r2_ci(ground, calibrated, options.bootstrap_iterations, rng);
    }

    Metric::require(n, FISHER_MIN_SAMPLES, || {
        let rho = spearman(ground, calibrated);
        match fisher_ci(rho, n, LOA_Z) {
            Some((lower, upper)) => Metric::computed(ConfidenceInterval {
                method: IntervalMethod::FisherZ,
                statistic: "spearman_rho".to_string(),
                estimate: rho,
                lower,
                upper,
                level: CI_LEVEL,
                iterations: None,
            }),
            None => Metric::degenerate(
                ConfidenceInterval {
                    method: IntervalMethod::FisherZ,
                    statistic: "spearman_rho".to_string(),
                    estimate: rho,
                    lower: f64::NAN,
                    upper: f64::NAN,
                    level: CI_LEVEL,
                    iterations: None,
                },
                "rank correlation undefined for constant values",
            ),
        }
    })
}

/// Full agreement battery for one group of pairs.
///
/// Resampling draws from `rng` in a fixed order (permutations, then bootstrap).
pub fn assess_group<R: Rng>(
    group_key: &str,
    ground: &[f64],
    satellite: &[f64],
    calibration: &CalibrationModel,
    options: &AgreementOptions,
    rng: &mut R,
) -> AgreementReport {
    let n = ground.len().min(satellite.len());
    if n < options.min_samples.max(2) {
        return AgreementReport::insufficient(group_key, n, options.min_samples.max(2));
    }
    let (ground, satellite) = (&ground[..n], &satellite[..n]);

    let calibrated = calibration.apply_all(satellite);
    let calibrated_metrics = match (error_metric(ground, &calibrated), calibration.is_degenerate()) {
        (Metric::Computed { value }, true) => {
            let reason = calibration
                .degenerate_reason
                .clone()
                .unwrap_or_else(|| format!("{} calibration", calibration.fit_method));
            Metric::degenerate(value, reason)
        }
        (metric, _) => metric,
    };

    let quantile_mapping = fit_quantile_mapping(ground, satellite);
    let quantile_mapped = quantile_mapping
        .as_ref()
        .map(|qm| error_metrics(ground, &qm.apply_all(satellite)));

    AgreementReport {
        group_key: group_key.to_string(),
        n_samples: n,
        raw: error_metric(ground, satellite),
        calibrated: calibrated_metrics,
        quantile_mapped,
        pearson_r: Metric::from_f64(pearson(ground, &calibrated), "Pearson r"),
        bland_altman: bland_altman(ground, satellite),
        heteroscedasticity: Metric::computed(heteroscedasticity(ground, &calibrated)),
        quantile_mapping,
        permutation: permutation_test(ground, satellite, options.permutation_iterations, rng),
        r_squared_ci: r_squared_confidence_interval(ground, &calibrated, options, rng),
    }
}
