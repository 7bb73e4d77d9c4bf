use serde::{Deserialize, Serialize};
use std::fmt;

/// How a calibration line was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    Deming,
    OlsFallback,
    /// slope 1, intercept 0, r² 0
    Neutral,
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMethod::Deming => write!(f, "Deming"),
            FitMethod::OlsFallback => write!(f, "OLS-fallback"),
            FitMethod::Neutral => write!(f, "Neutral"),
        }
    }
}

/// Per-group calibration.
///
/// `slope`/`intercept` describe the fitted line `satellite = slope * ground + intercept`.
/// The correction line maps a satellite value back onto the ground scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub group_key: String,
    pub slope: f64,
    pub intercept: f64,
    pub correction_slope: f64,
    pub correction_intercept: f64,
    pub variance_ratio_lambda: f64,
    pub lambda_clamped: bool,
    pub r_squared: f64,
    pub fit_method: FitMethod,
    pub n_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degenerate_reason: Option<String>,
}

impl CalibrationModel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group_key: impl Into<String>,
        slope: f64,
        intercept: f64,
        variance_ratio_lambda: f64,
        lambda_clamped: bool,
        r_squared: f64,
        fit_method: FitMethod,
        n_samples: usize,
        degenerate_reason: Option<String>,
    ) -> Self {
        let mut reason = degenerate_reason;
        let (correction_slope, correction_intercept) =
            if slope.is_finite() && intercept.is_finite() && slope.abs() >= 1e-9 {
                (1.0 / slope, -intercept / slope)
            } else {
                reason.get_or_insert_with(|| {
                    format!("fitted slope {} cannot be inverted, identity correction used", slope)
                });
                (1.0, 0.0)
            };

        Self {
            group_key: group_key.into(),
            slope,
            intercept,
            correction_slope,
            correction_intercept,
            variance_ratio_lambda,
            lambda_clamped,
            r_squared,
            fit_method,
            n_samples,
            degenerate_reason: reason,
        }
    }

    /// Satellite value mapped onto the ground scale
    pub fn apply(&self, satellite_value: f64) -> f64 {
        self.correction_slope * satellite_value + self.correction_intercept
    }

    pub fn apply_all(&self, satellite_values: &[f64]) -> Vec<f64> {
        satellite_values.iter().map(|&v| self.apply(v)).collect()
    }

    pub fn is_degenerate(&self) -> bool {
        self.fit_method != FitMethod::Deming || self.degenerate_reason.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(slope: f64, intercept: f64) -> CalibrationModel {
        CalibrationModel::new("Boston", slope, intercept, 1.0, false, 0.9, FitMethod::Deming, 30, None)
    }

    #[test]
    fn test_correction_inverts_fitted_line() {
        // satellite reads 10 low
        let m = model(1.0, -10.0);
        assert!((m.correction_intercept - 10.0).abs() < 1e-12);
        assert!((m.apply(30.0) - 40.0).abs() < 1e-12);

        let m = model(2.0, 4.0);
        let ground = 7.0;
        let satellite = 2.0 * ground + 4.0;
        assert!((m.apply(satellite) - ground).abs() < 1e-12);
        assert!(!m.is_degenerate());
    }

    #[test]
    fn test_flat_fit_uses_identity() {
        let m = model(0.0, 5.0);
        assert_eq!(m.correction_slope, 1.0);
        assert_eq!(m.correction_intercept, 0.0);
        assert!(m.degenerate_reason.is_some());
        assert!(m.is_degenerate());
        assert_eq!(m.apply_all(&[1.0, 2.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn test_fit_method_serialization() {
        assert_eq!(
            serde_json::to_string(&FitMethod::OlsFallback).unwrap(),
            "\"ols_fallback\""
        );
        assert_eq!(FitMethod::OlsFallback.to_string(), "OLS-fallback");
    }
}
