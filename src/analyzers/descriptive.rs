use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::models::ErrorMetrics;

/// Arithmetic mean; NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Variance with `ddof` delta degrees of freedom; NaN when `len <= ddof`
pub fn variance(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    ss / (values.len() - ddof) as f64
}

pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    variance(values, ddof).sqrt()
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Quantile with linear interpolation between order statistics
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    quantile_sorted(&sorted(values), q)
}

/// Several quantiles from one sort
pub fn quantiles(values: &[f64], qs: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return vec![f64::NAN; qs.len()];
    }
    let sorted = sorted(values);
    qs.iter().map(|&q| quantile_sorted(&sorted, q)).collect()
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

/// Median absolute deviation from the median
pub fn mad(values: &[f64]) -> f64 {
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

pub fn rmse(actual: &[f64], estimate: &[f64]) -> f64 {
    let n = actual.len().min(estimate.len());
    if n == 0 {
        return f64::NAN;
    }
    let ss: f64 = actual
        .iter()
        .zip(estimate)
        .map(|(a, e)| (a - e).powi(2))
        .sum();
    (ss / n as f64).sqrt()
}

pub fn mae(actual: &[f64], estimate: &[f64]) -> f64 {
    let n = actual.len().min(estimate.len());
    if n == 0 {
        return f64::NAN;
    }
    let sum: f64 = actual.iter().zip(estimate).map(|(a, e)| (a - e).abs()).sum();
    sum / n as f64
}

/// Mean of `estimate - actual`
pub fn mean_bias(actual: &[f64], estimate: &[f64]) -> f64 {
    let n = actual.len().min(estimate.len());
    if n == 0 {
        return f64::NAN;
    }
    let sum: f64 = actual.iter().zip(estimate).map(|(a, e)| e - a).sum();
    sum / n as f64
}

/// Coefficient of determination of `estimate` as a predictor of `actual`.
///
/// Constant `actual` gives 1.0 for a perfect prediction and 0.0 otherwise.
pub fn r2_score(actual: &[f64], estimate: &[f64]) -> f64 {
    let n = actual.len().min(estimate.len());
    if n < 2 {
        return f64::NAN;
    }
    let actual = &actual[..n];
    let m = mean(actual);
    let ss_res: f64 = actual
        .iter()
        .zip(estimate)
        .map(|(a, e)| (a - e).powi(2))
        .sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - m).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Pearson correlation; NaN when either side is constant
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (mx, my) = (mean(x), mean(y));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// 1-based ranks, ties share their average rank
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    pearson(&ranks(&x[..n]), &ranks(&y[..n]))
}

/// Least-squares line `y = slope * x + intercept`; `None` when x is constant
pub fn ols_fit(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (mx, my) = (mean(x), mean(y));
    let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    if sxx == 0.0 || !sxx.is_finite() {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let slope = sxy / sxx;
    Some((slope, my - slope * mx))
}

/// Simple linear regression with a two-sided slope test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRegression {
    pub slope: f64,
    pub intercept: f64,
    pub r_value: f64,
    /// `None` with fewer than 3 points
    pub p_value: Option<f64>,
}

pub fn linregress(x: &[f64], y: &[f64]) -> Option<LinearRegression> {
    let (slope, intercept) = ols_fit(x, y)?;
    let n = x.len().min(y.len());
    let r_value = {
        let r = pearson(x, y);
        // constant y: no correlation
        if r.is_nan() {
            0.0
        } else {
            r
        }
    };

    let p_value = if n < 3 {
        None
    } else if (1.0 - r_value.abs()) < 1e-12 {
        Some(0.0)
    } else {
        let df = (n - 2) as f64;
        let t = r_value * (df / ((1.0 - r_value) * (1.0 + r_value))).sqrt();
        StudentsT::new(0.0, 1.0, df)
            .ok()
            .map(|dist| (2.0 * dist.sf(t.abs())).min(1.0))
    };

    Some(LinearRegression {
        slope,
        intercept,
        r_value,
        p_value,
    })
}

/// RMSE, MAE, bias and R² of `estimate` against `actual`
pub fn error_metrics(actual: &[f64], estimate: &[f64]) -> ErrorMetrics {
    ErrorMetrics {
        rmse: rmse(actual, estimate),
        mae: mae(actual, estimate),
        bias: mean_bias(actual, estimate),
        r_squared: r2_score(actual, estimate),
    }
}
