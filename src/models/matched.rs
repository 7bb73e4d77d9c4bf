use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::Pollutant;

/// Key used to partition matched pairs for calibration and cross-validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    City,
    Region,
}

impl GroupBy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "city" => Some(GroupBy::City),
            "region" => Some(GroupBy::Region),
            _ => None,
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::City => write!(f, "city"),
            GroupBy::Region => write!(f, "region"),
        }
    }
}

/// A ground observation paired with its best satellite pixel.
///
/// `ground_ref` indexes the cleaned ground observations and `satellite_ref`
/// indexes the pixel list of `region`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub ground_ref: usize,
    pub satellite_ref: usize,
    pub station_id: String,
    pub city: String,
    pub region: String,
    pub parameter: Pollutant,
    pub satellite_column: String,
    pub ground_time: DateTime<Utc>,
    pub satellite_time: DateTime<Utc>,
    pub ground_latitude: f64,
    pub ground_longitude: f64,
    pub satellite_latitude: f64,
    pub satellite_longitude: f64,
    pub distance_km: f64,
    pub time_diff_hours: f64,
    pub ground_value: f64,
    pub satellite_value: f64,
}

impl MatchedPair {
    pub fn group_key(&self, group_by: GroupBy) -> &str {
        match group_by {
            GroupBy::City => &self.city,
            GroupBy::Region => &self.region,
        }
    }

    /// Satellite minus ground
    pub fn bias(&self) -> f64 {
        self.satellite_value - self.ground_value
    }

    pub fn is_daytime(&self) -> bool {
        (6..=18).contains(&self.ground_time.hour())
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self.ground_time.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// Split pairs by group key, preserving input order within each group
pub fn group_pairs(pairs: &[MatchedPair], group_by: GroupBy) -> BTreeMap<String, Vec<&MatchedPair>> {
    let mut groups: BTreeMap<String, Vec<&MatchedPair>> = BTreeMap::new();
    for pair in pairs {
        groups
            .entry(pair.group_key(group_by).to_string())
            .or_default()
            .push(pair);
    }
    groups
}

/// Parallel (ground, satellite) value vectors
pub fn value_columns<'a, I>(pairs: I) -> (Vec<f64>, Vec<f64>)
where
    I: IntoIterator<Item = &'a MatchedPair>,
{
    pairs
        .into_iter()
        .map(|p| (p.ground_value, p.satellite_value))
        .unzip()
}
