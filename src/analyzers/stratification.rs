use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::analyzers::descriptive::{mean, median, r2_score, rmse, std_dev};
use crate::models::{group_pairs, value_columns, GroupBy, MatchedPair, Metric};
use crate::utils::constants::{
    DIURNAL_CITY_MIN_PAIRS, STATION_CITY_MIN_PAIRS, STATION_MIN_PAIRS, STRATUM_MIN_SAMPLES,
};

/// Ground-value categories on the AQI scale, upper bounds inclusive
const AQI_CATEGORIES: [(&str, f64, f64); 4] = [
    ("Good", 0.0, 50.0),
    ("Moderate", 50.0, 100.0),
    ("Unhealthy", 100.0, 200.0),
    ("Very Unhealthy", 200.0, 500.0),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stratum {
    pub dimension: String,
    pub label: String,
    pub n_samples: usize,
    pub r_squared: Metric<f64>,
    pub rmse: Metric<f64>,
}

/// Spread of per-station mean bias (satellite minus ground) within one city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationBiasSpread {
    pub city: String,
    pub n_stations: usize,
    pub mean_bias: f64,
    pub sd_bias: f64,
    pub min_bias: f64,
    pub max_bias: f64,
}

/// Median values for one UTC hour of the ground timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyMedian {
    pub hour: u32,
    pub n_samples: usize,
    pub ground_median: f64,
    pub satellite_median: f64,
    pub calibrated_median: f64,
}

/// Hour-of-day profile of one city, hours without pairs omitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiurnalProfile {
    pub city: String,
    pub n_samples: usize,
    pub hours: Vec<HourlyMedian>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StratifiedAnalysis {
    pub strata: Vec<Stratum>,
    pub station_bias: Vec<StationBiasSpread>,
    pub diurnal: Vec<DiurnalProfile>,
}

impl StratifiedAnalysis {
    pub fn stratum(&self, dimension: &str, label: &str) -> Option<&Stratum> {
        self.strata
            .iter()
            .find(|s| s.dimension == dimension && s.label == label)
    }
}

fn stratum<'a, I>(dimension: &str, label: &str, pairs: I) -> Stratum
where
    I: IntoIterator<Item = &'a MatchedPair>,
{
    let (ground, satellite) = value_columns(pairs);
    let n = ground.len();
    Stratum {
        dimension: dimension.to_string(),
        label: label.to_string(),
        n_samples: n,
        r_squared: Metric::require(n, STRATUM_MIN_SAMPLES, || {
            Metric::from_f64(r2_score(&ground, &satellite), "R²")
        }),
        rmse: Metric::require(n, STRATUM_MIN_SAMPLES, || {
            Metric::from_f64(rmse(&ground, &satellite), "RMSE")
        }),
    }
}

pub fn aqi_category(value: f64) -> Option<&'static str> {
    AQI_CATEGORIES
        .iter()
        .find(|(_, lower, upper)| value > *lower && value <= *upper)
        .map(|(label, _, _)| *label)
}

/// Raw agreement split by time of day, day of week and AQI category, plus
/// per-city diurnal profiles. `calibrated` runs parallel to `pairs`.
pub fn stratify(pairs: &[MatchedPair], calibrated: &[f64]) -> StratifiedAnalysis {
    let mut strata = vec![
        stratum("time_of_day", "daytime", pairs.iter().filter(|p| p.is_daytime())),
        stratum("time_of_day", "nighttime", pairs.iter().filter(|p| !p.is_daytime())),
        stratum("day_of_week", "weekday", pairs.iter().filter(|p| !p.is_weekend())),
        stratum("day_of_week", "weekend", pairs.iter().filter(|p| p.is_weekend())),
    ];
    for (label, _, _) in AQI_CATEGORIES {
        strata.push(stratum(
            "aqi_category",
            label,
            pairs
                .iter()
                .filter(|p| aqi_category(p.ground_value) == Some(label)),
        ));
    }

    StratifiedAnalysis {
        strata,
        station_bias: station_bias_spread(pairs),
        diurnal: diurnal_profiles(pairs, calibrated),
    }
}

/// Hour-of-day medians of ground, satellite and calibrated values for cities
/// with enough pairs
pub fn diurnal_profiles(pairs: &[MatchedPair], calibrated: &[f64]) -> Vec<DiurnalProfile> {
    type HourValues = (Vec<f64>, Vec<f64>, Vec<f64>);
    let mut cities: BTreeMap<&str, BTreeMap<u32, HourValues>> = BTreeMap::new();
    for (pair, value) in pairs.iter().zip(calibrated) {
        let (ground, satellite, corrected) = cities
            .entry(pair.city.as_str())
            .or_default()
            .entry(pair.ground_time.hour())
            .or_default();
        ground.push(pair.ground_value);
        satellite.push(pair.satellite_value);
        corrected.push(*value);
    }

    cities
        .into_iter()
        .filter_map(|(city, hours)| {
            let n_samples: usize = hours.values().map(|(g, _, _)| g.len()).sum();
            if n_samples < DIURNAL_CITY_MIN_PAIRS {
                debug!("{}: {} pairs, no diurnal profile", city, n_samples);
                return None;
            }
            let hours = hours
                .into_iter()
                .map(|(hour, (ground, satellite, calibrated))| HourlyMedian {
                    hour,
                    n_samples: ground.len(),
                    ground_median: median(&ground),
                    satellite_median: median(&satellite),
                    calibrated_median: median(&calibrated),
                })
                .collect();
            Some(DiurnalProfile {
                city: city.to_string(),
                n_samples,
                hours,
            })
        })
        .collect()
}

/// Per-station mean bias for cities with enough pairs.
///
/// Stations need more than three pairs; cities with no qualifying station are omitted.
pub fn station_bias_spread(pairs: &[MatchedPair]) -> Vec<StationBiasSpread> {
    let mut spreads = Vec::new();

    for (city, city_pairs) in group_pairs(pairs, GroupBy::City) {
        if city_pairs.len() < STATION_CITY_MIN_PAIRS {
            continue;
        }

        let mut stations: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for pair in &city_pairs {
            stations
                .entry(pair.station_id.as_str())
                .or_default()
                .push(pair.bias());
        }

        let station_means: Vec<f64> = stations
            .values()
            .filter(|biases| biases.len() >= STATION_MIN_PAIRS)
            .map(|biases| mean(biases))
            .collect();
        if station_means.is_empty() {
            debug!("{}: no station with {} or more pairs", city, STATION_MIN_PAIRS);
            continue;
        }

        spreads.push(StationBiasSpread {
            n_stations: station_means.len(),
            mean_bias: mean(&station_means),
            sd_bias: std_dev(&station_means, 0),
            min_bias: station_means.iter().copied().fold(f64::INFINITY, f64::min),
            max_bias: station_means.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            city,
        });
    }
    spreads
}
