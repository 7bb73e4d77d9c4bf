use tracing::{debug, warn};

use crate::analyzers::descriptive::{mad, ols_fit, r2_score, variance};
use crate::analyzers::optimizer::{nelder_mead, NelderMeadOptions};
use crate::models::{CalibrationModel, FitMethod};
use crate::utils::constants::{
    DEGENERATE_VARIANCE, LAMBDA_MAX, LAMBDA_MIN, MAD_EPSILON, MAD_TO_SIGMA,
};

/// Result of an errors-in-variables fit of satellite (y) on ground (x)
#[derive(Debug, Clone, PartialEq)]
pub struct DemingFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub lambda: f64,
    pub lambda_clamped: bool,
    pub method: FitMethod,
    pub n_samples: usize,
    pub reason: Option<String>,
}

impl DemingFit {
    fn neutral(lambda: f64, lambda_clamped: bool, n_samples: usize, reason: String) -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
            r_squared: 0.0,
            lambda,
            lambda_clamped,
            method: FitMethod::Neutral,
            n_samples,
            reason: Some(reason),
        }
    }
}

/// Variance estimate from the median absolute deviation
pub fn robust_var(values: &[f64]) -> f64 {
    let sigma = MAD_TO_SIGMA * (mad(values) + MAD_EPSILON);
    sigma * sigma
}

/// Resolve λ, clamping into the supported range. Returns (λ, clamped).
fn resolve_lambda(x: &[f64], y: &[f64], requested: Option<f64>) -> (f64, bool) {
    let raw = match requested {
        Some(lambda) => lambda,
        None if x.is_empty() => 1.0,
        None => robust_var(x) / robust_var(y).max(MAD_EPSILON),
    };

    if !raw.is_finite() {
        warn!("variance ratio {} is not finite, using 1.0", raw);
        return (1.0, true);
    }

    let clamped = raw.clamp(LAMBDA_MIN, LAMBDA_MAX);
    if clamped != raw {
        warn!(
            "variance ratio clamped from {:.3e} to {:.2} (degenerate variance)",
            raw, clamped
        );
        return (clamped, true);
    }
    (raw, false)
}

/// Deming regression of `y` (satellite) on `x` (ground).
///
/// Never fails: degenerate input or an optimisation that fails or does not
/// converge falls back to OLS on the finite pairs, and fewer than two usable
/// pairs give the neutral line.
pub fn fit_deming(x: &[f64], y: &[f64], variance_ratio: Option<f64>) -> DemingFit {
    fit_deming_with(x, y, variance_ratio, NelderMeadOptions::default())
}

pub fn fit_deming_with(
    x: &[f64],
    y: &[f64],
    variance_ratio: Option<f64>,
    options: NelderMeadOptions,
) -> DemingFit {
    let n = x.len().min(y.len());
    let (fx, fy): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .unzip();

    let (lambda, lambda_clamped) = resolve_lambda(&fx, &fy, variance_ratio);

    if fx.len() < 2 {
        warn!("only {} finite pairs, using neutral calibration", fx.len());
        return DemingFit::neutral(
            lambda,
            lambda_clamped,
            fx.len(),
            format!("{} finite pairs, at least 2 required", fx.len()),
        );
    }

    let has_non_finite = fx.len() < n;
    let var_x = variance(&fx, 0);
    let var_y = variance(&fy, 0);

    if has_non_finite || var_x < DEGENERATE_VARIANCE || var_y < DEGENERATE_VARIANCE {
        let trigger = if has_non_finite {
            format!("{} non-finite values", n - fx.len())
        } else {
            format!("variance below {:e} (ground {:.3e}, satellite {:.3e})", DEGENERATE_VARIANCE, var_x, var_y)
        };
        warn!("degenerate input ({}), using linear regression", trigger);
        return ols_or_neutral(&fx, &fy, lambda, lambda_clamped, trigger);
    }

    // var_x above the threshold guarantees a defined OLS line
    let Some((slope_ols, intercept_ols)) = ols_fit(&fx, &fy) else {
        return DemingFit::neutral(
            lambda,
            lambda_clamped,
            fx.len(),
            "ordinary least squares undefined".to_string(),
        );
    };

    let objective = |p: &[f64]| -> f64 {
        let (slope, intercept) = (p[0], p[1]);
        let denominator = lambda + slope * slope;
        fx.iter()
            .zip(&fy)
            .map(|(a, b)| (b - (slope * a + intercept)).powi(2))
            .sum::<f64>()
            / denominator
    };

    match nelder_mead(objective, &[slope_ols, intercept_ols], options) {
        Some(min) if min.converged => {
            let (slope, intercept) = (min.x[0], min.x[1]);
            debug!("Deming optimisation converged after {} iterations", min.iterations);
            let predicted: Vec<f64> = fx.iter().map(|a| slope * a + intercept).collect();
            DemingFit {
                slope,
                intercept,
                r_squared: r2_score(&fy, &predicted),
                lambda,
                lambda_clamped,
                method: FitMethod::Deming,
                n_samples: fx.len(),
                reason: None,
            }
        }
        Some(min) => {
            warn!(
                "Deming optimisation did not converge after {} iterations, using OLS fallback",
                min.iterations
            );
            ols_or_neutral(
                &fx,
                &fy,
                lambda,
                lambda_clamped,
                format!("Deming optimisation did not converge after {} iterations", min.iterations),
            )
        }
        None => {
            warn!("Deming optimisation failed, using OLS fallback");
            ols_or_neutral(
                &fx,
                &fy,
                lambda,
                lambda_clamped,
                "Deming optimisation failed".to_string(),
            )
        }
    }
}

fn ols_or_neutral(x: &[f64], y: &[f64], lambda: f64, lambda_clamped: bool, reason: String) -> DemingFit {
    match ols_fit(x, y) {
        Some((slope, intercept)) => {
            let predicted: Vec<f64> = x.iter().map(|a| slope * a + intercept).collect();
            DemingFit {
                slope,
                intercept,
                r_squared: r2_score(y, &predicted),
                lambda,
                lambda_clamped,
                method: FitMethod::OlsFallback,
                n_samples: x.len(),
                reason: Some(reason),
            }
        }
        None => DemingFit::neutral(
            lambda,
            lambda_clamped,
            x.len(),
            format!("{}; ground values constant", reason),
        ),
    }
}

/// Fit a calibration for one group of (ground, satellite) values
pub fn calibrate(
    group_key: &str,
    ground: &[f64],
    satellite: &[f64],
    variance_ratio: Option<f64>,
) -> CalibrationModel {
    let fit = fit_deming(ground, satellite, variance_ratio);
    debug!(
        "{}: {} fit slope={:.4} intercept={:.4} lambda={:.3}",
        group_key, fit.method, fit.slope, fit.intercept, fit.lambda
    );
    CalibrationModel::new(
        group_key,
        fit.slope,
        fit.intercept,
        fit.lambda,
        fit.lambda_clamped,
        fit.r_squared,
        fit.method,
        fit.n_samples,
        fit.reason,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::descriptive::rmse;

    #[test]
    fn test_robust_var() {
        // MAD of 1..=5 is 1
        let v = robust_var(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((v - (MAD_TO_SIGMA * (1.0 + MAD_EPSILON)).powi(2)).abs() < 1e-9);
    }

    #[test]
    fn test_close_agreement_fits_unit_slope() {
        let ground = [10.0, 20.0, 30.0, 40.0];
        let satellite = [12.0, 18.0, 33.0, 38.0];
        let fit = fit_deming(&ground, &satellite, None);

        assert_eq!(fit.method, FitMethod::Deming);
        assert!(!fit.lambda_clamped);
        assert!((fit.slope - 1.0).abs() < 0.1, "slope {}", fit.slope);
        assert!(fit.r_squared > 0.9);
    }

    #[test]
    fn test_orthogonal_regression_with_unit_lambda() {
        let ground = [10.0, 20.0, 30.0, 40.0];
        let satellite = [12.0, 18.0, 33.0, 38.0];
        let fit = fit_deming(&ground, &satellite, Some(1.0));

        // closed form for λ = 1
        let (sxx, syy, sxy) = (500.0f64, 450.75f64, 465.0f64);
        let expected = (syy - sxx + ((syy - sxx).powi(2) + 4.0 * sxy * sxy).sqrt()) / (2.0 * sxy);
        assert!((fit.slope - expected).abs() < 1e-4, "{} vs {}", fit.slope, expected);
        assert!((fit.intercept - (25.25 - expected * 25.0)).abs() < 1e-3);
    }

    #[test]
    fn test_zero_variance_gives_neutral() {
        let fit = fit_deming(&[5.0; 6], &[5.0; 6], None);
        assert_eq!(fit.method, FitMethod::Neutral);
        assert_eq!((fit.slope, fit.intercept, fit.r_squared), (1.0, 0.0, 0.0));

        let fit = fit_deming(&[5.0; 4], &[1.0, 2.0, 3.0, 4.0], None);
        assert_eq!(fit.method, FitMethod::Neutral);
    }

    #[test]
    fn test_too_few_points_gives_neutral() {
        for (x, y) in [(vec![], vec![]), (vec![1.0], vec![2.0])] {
            let fit = fit_deming(&x, &y, None);
            assert_eq!(fit.method, FitMethod::Neutral);
            assert!(fit.reason.is_some());
        }
    }

    #[test]
    fn test_non_finite_values_use_ols_on_clean_subset() {
        let ground = [1.0, 2.0, f64::NAN, 4.0, 5.0];
        let satellite = [2.0, 4.0, 6.0, f64::INFINITY, 10.0];
        let fit = fit_deming(&ground, &satellite, None);

        assert_eq!(fit.method, FitMethod::OlsFallback);
        assert_eq!(fit.n_samples, 3);
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!(fit.intercept.abs() < 1e-12);
    }

    #[test]
    fn test_unconverged_optimisation_falls_back_to_ols() {
        let ground = [10.0, 20.0, 30.0, 40.0];
        let satellite = [12.0, 18.0, 33.0, 38.0];
        let options = NelderMeadOptions {
            max_iterations: 0,
            ..Default::default()
        };
        let fit = fit_deming_with(&ground, &satellite, None, options);

        assert_eq!(fit.method, FitMethod::OlsFallback);
        assert!(fit.reason.as_deref().unwrap().contains("did not converge"));
        let (slope, intercept) = ols_fit(&ground, &satellite).unwrap();
        assert!((fit.slope - slope).abs() < 1e-12);
        assert!((fit.intercept - intercept).abs() < 1e-12);

        let model = CalibrationModel::new(
            "Toronto",
            fit.slope,
            fit.intercept,
            fit.lambda,
            fit.lambda_clamped,
            fit.r_squared,
            fit.method,
            fit.n_samples,
            fit.reason,
        );
        assert!(model.is_degenerate());
    }

    #[test]
    fn test_lambda_clamped() {
        let ground: Vec<f64> = (1..=20).map(|i| i as f64 * 100.0).collect();
        let satellite: Vec<f64> = (1..=20).map(|i| i as f64 + (i % 3) as f64 * 0.1).collect();
        let fit = fit_deming(&ground, &satellite, None);

        assert!(fit.lambda_clamped);
        assert_eq!(fit.lambda, LAMBDA_MAX);

        let fit = fit_deming(&satellite, &ground, None);
        assert!(fit.lambda_clamped);
        assert_eq!(fit.lambda, LAMBDA_MIN);
    }

    #[test]
    fn test_calibration_removes_constant_offset() {
        let ground: Vec<f64> = (0..30).map(|i| 20.0 + (i as f64 * 1.7) % 25.0).collect();
        let satellite: Vec<f64> = ground.iter().map(|g| g - 10.0).collect();
        let model = calibrate("Boston", &ground, &satellite, None);

        assert!((model.correction_intercept - 10.0).abs() < 0.1);
        let calibrated = model.apply_all(&satellite);
        assert!(rmse(&ground, &calibrated) < rmse(&ground, &satellite));
    }
}
