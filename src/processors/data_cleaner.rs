use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use validator::Validate;

use crate::analyzers::descriptive::quantile;
use crate::models::{GroundObservation, Pollutant};
use crate::utils::constants::{DEFAULT_GROUND_MAX_VALUE, DEFAULT_TRIM_MIN_ROWS};

/// Why a raw input row was left out of the cleaned dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    MalformedRow,
    InvalidCoordinates,
    CoordinatesOutOfRange,
    InvalidTimestamp,
    UnknownParameter,
    ParameterFiltered,
    NonPositiveValue,
    NonFiniteValue,
    NoPollutantValues,
    AboveMaxValue,
    PercentileOutlier,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExclusionReason::MalformedRow => "malformed row",
            ExclusionReason::InvalidCoordinates => "unparseable or non-finite coordinates",
            ExclusionReason::CoordinatesOutOfRange => "coordinates out of range",
            ExclusionReason::InvalidTimestamp => "unparseable timestamp",
            ExclusionReason::UnknownParameter => "unknown parameter",
            ExclusionReason::ParameterFiltered => "other pollutant than the selected parameter",
            ExclusionReason::NonPositiveValue => "non-positive value",
            ExclusionReason::NonFiniteValue => "missing or non-finite value",
            ExclusionReason::NoPollutantValues => "no pollutant values",
            ExclusionReason::AboveMaxValue => "value at or above the upper bound",
            ExclusionReason::PercentileOutlier => "outside the per-city percentile band",
        };
        write!(f, "{}", label)
    }
}

/// Row counts of one cleaning pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub total_rows: usize,
    pub kept_rows: usize,
    pub exclusions: BTreeMap<ExclusionReason, usize>,
}

impl CleaningReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep(&mut self) {
        self.total_rows += 1;
        self.kept_rows += 1;
    }

    pub fn exclude(&mut self, reason: ExclusionReason) {
        self.total_rows += 1;
        *self.exclusions.entry(reason).or_insert(0) += 1;
    }

    /// Move a previously kept row to an exclusion
    pub fn exclude_kept(&mut self, reason: ExclusionReason) {
        self.kept_rows = self.kept_rows.saturating_sub(1);
        *self.exclusions.entry(reason).or_insert(0) += 1;
    }

    pub fn excluded_rows(&self) -> usize {
        self.exclusions.values().sum()
    }

    pub fn count(&self, reason: ExclusionReason) -> usize {
        self.exclusions.get(&reason).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &CleaningReport) {
        self.total_rows += other.total_rows;
        self.kept_rows += other.kept_rows;
        for (reason, count) in &other.exclusions {
            *self.exclusions.entry(*reason).or_insert(0) += count;
        }
    }

    pub fn kept_percentage(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.kept_rows as f64 / self.total_rows as f64 * 100.0
        }
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Rows: {} total, {} kept ({:.1}%), {} excluded",
            self.total_rows,
            self.kept_rows,
            self.kept_percentage(),
            self.excluded_rows()
        )];
        for (reason, count) in &self.exclusions {
            lines.push(format!("  - {}: {}", reason, count));
        }
        lines.join("\n")
    }
}

/// Value-level quality control of a cleaned ground dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GroundQc {
    /// Values at or above this bound are dropped
    #[validate(range(exclusive_min = 0.0))]
    pub max_value: Option<f64>,

    /// Lower percentile of the per-city band; values outside
    /// `[p, 100 - p]` of their city and pollutant are dropped
    #[validate(range(min = 0.0, exclusive_max = 50.0))]
    pub trim_percentile: Option<f64>,

    /// Only cities with more rows than this are trimmed
    pub trim_min_rows: usize,
}

impl Default for GroundQc {
    fn default() -> Self {
        Self {
            max_value: Some(DEFAULT_GROUND_MAX_VALUE),
            trim_percentile: None,
            trim_min_rows: DEFAULT_TRIM_MIN_ROWS,
        }
    }
}

type TrimBounds = BTreeMap<(String, Pollutant), (f64, f64)>;

impl GroundQc {
    /// No value-level filtering
    pub fn disabled() -> Self {
        Self {
            max_value: None,
            trim_percentile: None,
            trim_min_rows: DEFAULT_TRIM_MIN_ROWS,
        }
    }

    /// Drop out-of-bound values, then trim each city's values to its percentile band.
    ///
    /// Removed rows must already be counted as kept in `cleaning`; they are
    /// moved to their exclusion reason. Input order is preserved.
    pub fn apply(
        &self,
        observations: Vec<GroundObservation>,
        cleaning: &mut CleaningReport,
    ) -> Vec<GroundObservation> {
        let below_max = |obs: &GroundObservation| self.max_value.is_none_or(|max| obs.value < max);
        let bounds = self.trim_bounds(observations.iter().filter(|obs| below_max(obs)));

        observations
            .into_iter()
            .filter(|obs| {
                if !below_max(obs) {
                    cleaning.exclude_kept(ExclusionReason::AboveMaxValue);
                    return false;
                }
                let key = (obs.city.clone(), obs.parameter);
                match bounds.get(&key) {
                    Some((low, high)) if obs.value < *low || obs.value > *high => {
                        cleaning.exclude_kept(ExclusionReason::PercentileOutlier);
                        false
                    }
                    _ => true,
                }
            })
            .collect()
    }

    fn trim_bounds<'a, I>(&self, observations: I) -> TrimBounds
    where
        I: Iterator<Item = &'a GroundObservation>,
    {
        let Some(percentile) = self.trim_percentile else {
            return TrimBounds::new();
        };

        let mut values: BTreeMap<(String, Pollutant), Vec<f64>> = BTreeMap::new();
        for obs in observations {
            values
                .entry((obs.city.clone(), obs.parameter))
                .or_default()
                .push(obs.value);
        }

        let q = percentile / 100.0;
        values
            .into_iter()
            .filter(|(_, v)| v.len() > self.trim_min_rows)
            .map(|(key, v)| {
                let band = (quantile(&v, q), quantile(&v, 1.0 - q));
                debug!("{} {}: trimming to [{:.3}, {:.3}]", key.0, key.1, band.0, band.1);
                (key, band)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counts_and_merge() {
        let mut ground = CleaningReport::new();
        ground.keep();
        ground.keep();
        ground.exclude(ExclusionReason::NonPositiveValue);

        let mut other = CleaningReport::new();
        other.keep();
        other.exclude(ExclusionReason::NonPositiveValue);
        other.exclude(ExclusionReason::InvalidTimestamp);

        ground.merge(&other);
        assert_eq!(ground.total_rows, 6);
        assert_eq!(ground.kept_rows, 3);
        assert_eq!(ground.excluded_rows(), 3);
        assert_eq!(ground.count(ExclusionReason::NonPositiveValue), 2);
        assert_eq!(ground.count(ExclusionReason::UnknownParameter), 0);
        assert_eq!(ground.kept_percentage(), 50.0);
    }

    #[test]
    fn test_summary_lists_reasons() {
        let mut report = CleaningReport::new();
        report.keep();
        report.exclude(ExclusionReason::CoordinatesOutOfRange);
        let summary = report.summary();
        assert!(summary.contains("2 total, 1 kept"));
        assert!(summary.contains("coordinates out of range: 1"));
    }

    #[test]
    fn test_serializes_reason_keys() {
        let mut report = CleaningReport::new();
        report.exclude(ExclusionReason::NoPollutantValues);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["exclusions"]["no_pollutant_values"], 1);
    }

    fn observation(city: &str, value: f64) -> GroundObservation {
        GroundObservation::new(
            format!("{}-1", city),
            43.65,
            -79.38,
            chrono::Utc::now(),
            Pollutant::No2,
            value,
            city.to_string(),
            None,
        )
    }

    fn qc_input(observations: &[GroundObservation]) -> CleaningReport {
        let mut cleaning = CleaningReport::new();
        for _ in observations {
            cleaning.keep();
        }
        cleaning
    }

    #[test]
    fn test_upper_bound_excludes_at_or_above() {
        let observations = vec![
            observation("Toronto", 20.0),
            observation("Toronto", 500.0),
            observation("Toronto", 720.0),
            observation("Toronto", 499.9),
        ];
        let mut cleaning = qc_input(&observations);
        let kept = GroundQc::default().apply(observations, &mut cleaning);

        assert_eq!(kept.iter().map(|o| o.value).collect::<Vec<_>>(), vec![20.0, 499.9]);
        assert_eq!(cleaning.total_rows, 4);
        assert_eq!(cleaning.kept_rows, 2);
        assert_eq!(cleaning.count(ExclusionReason::AboveMaxValue), 2);
    }

    #[test]
    fn test_percentile_trim_per_city() {
        // 30 Toronto values 1..=30 plus one above the bound; Hamilton is too small to trim
        let mut observations: Vec<GroundObservation> =
            (1..=30).map(|v| observation("Toronto", v as f64)).collect();
        observations.push(observation("Toronto", 900.0));
        observations.extend([1.0, 50.0, 400.0].map(|v| observation("Hamilton", v)));

        let qc = GroundQc {
            trim_percentile: Some(1.0),
            ..Default::default()
        };
        let mut cleaning = qc_input(&observations);
        let kept = qc.apply(observations, &mut cleaning);

        // band is [1.29, 29.71] on the values below the bound
        let toronto: Vec<f64> = kept.iter().filter(|o| o.city == "Toronto").map(|o| o.value).collect();
        assert_eq!(toronto, (2..=29).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(kept.iter().filter(|o| o.city == "Hamilton").count(), 3);
        assert_eq!(cleaning.count(ExclusionReason::PercentileOutlier), 2);
        assert_eq!(cleaning.count(ExclusionReason::AboveMaxValue), 1);
        assert_eq!(cleaning.kept_rows + cleaning.excluded_rows(), cleaning.total_rows);
    }

    #[test]
    fn test_disabled_keeps_everything() {
        let observations = vec![observation("Toronto", 20.0), observation("Toronto", 800.0)];
        let mut cleaning = qc_input(&observations);
        let kept = GroundQc::disabled().apply(observations, &mut cleaning);
        assert_eq!(kept.len(), 2);
        assert_eq!(cleaning.excluded_rows(), 0);
    }
}
