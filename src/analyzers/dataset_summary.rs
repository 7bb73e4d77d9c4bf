use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::analyzers::descriptive::mean;
use crate::models::{GroundObservation, MatchedPair, Pollutant, SatellitePixel};
use crate::processors::data_cleaner::CleaningReport;
use crate::readers::{GroundDataset, SatelliteDataset};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    fn from_times(times: impl IntoIterator<Item = DateTime<Utc>>) -> Option<Self> {
        times.into_iter().fold(None, |range, t| match range {
            None => Some(TimeRange { start: t, end: t }),
            Some(r) => Some(TimeRange {
                start: r.start.min(t),
                end: r.end.max(t),
            }),
        })
    }

    pub fn span_hours(&self) -> f64 {
        (self.end - self.start).num_minutes() as f64 / 60.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeographicBounds {
    fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        points.into_iter().fold(None, |bounds, (lat, lon)| match bounds {
            None => Some(GeographicBounds {
                min_lat: lat,
                max_lat: lat,
                min_lon: lon,
                max_lon: lon,
            }),
            Some(b) => Some(GeographicBounds {
                min_lat: b.min_lat.min(lat),
                max_lat: b.max_lat.max(lat),
                min_lon: b.min_lon.min(lon),
                max_lon: b.max_lon.max(lon),
            }),
        })
    }
}

/// Counts and extents of one input dataset after cleaning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub n_records: usize,
    pub n_stations: Option<usize>,
    pub n_cities: Option<usize>,
    pub parameters: BTreeMap<Pollutant, usize>,
    pub time_range: Option<TimeRange>,
    pub bounds: Option<GeographicBounds>,
    pub cleaning: CleaningReport,
}

impl DatasetSummary {
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Records: {}", self.n_records)];
        if let Some(stations) = self.n_stations {
            lines.push(format!("Stations: {}", stations));
        }
        if let Some(cities) = self.n_cities {
            lines.push(format!("Cities: {}", cities));
        }
        if !self.parameters.is_empty() {
            let parameters: Vec<String> = self
                .parameters
                .iter()
                .map(|(p, n)| format!("{} ({})", p, n))
                .collect();
            lines.push(format!("Parameters: {}", parameters.join(", ")));
        }
        match &self.time_range {
            Some(range) => lines.push(format!(
                "Time Range: {} to {} ({:.1} h)",
                range.start.format("%Y-%m-%d %H:%M"),
                range.end.format("%Y-%m-%d %H:%M"),
                range.span_hours()
            )),
            None => lines.push("Time Range: no records".to_string()),
        }
        if let Some(b) = &self.bounds {
            lines.push(format!(
                "Coverage: {:.2} to {:.2} lat, {:.2} to {:.2} lon",
                b.min_lat, b.max_lat, b.min_lon, b.max_lon
            ));
        }
        lines.push(self.cleaning.summary());
        lines.join("\n")
    }
}

/// Distances and offsets of the matched pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSummary {
    pub n_pairs: usize,
    pub n_stations: usize,
    pub pairs_by_region: BTreeMap<String, usize>,
    pub pairs_by_city: BTreeMap<String, usize>,
    pub mean_distance_km: Option<f64>,
    pub max_distance_km: Option<f64>,
    pub mean_time_diff_hours: Option<f64>,
    pub time_range: Option<TimeRange>,
}

pub fn summarize_observations(
    observations: &[GroundObservation],
    cleaning: &CleaningReport,
) -> DatasetSummary {
    let stations: HashSet<&str> = observations.iter().map(|o| o.station_id.as_str()).collect();
    let cities: HashSet<&str> = observations.iter().map(|o| o.city.as_str()).collect();
    let mut parameters = BTreeMap::new();
    for obs in observations {
        *parameters.entry(obs.parameter).or_insert(0) += 1;
    }

    DatasetSummary {
        n_records: observations.len(),
        n_stations: Some(stations.len()),
        n_cities: Some(cities.len()),
        parameters,
        time_range: TimeRange::from_times(observations.iter().map(|o| o.timestamp)),
        bounds: GeographicBounds::from_points(observations.iter().map(|o| (o.latitude, o.longitude))),
        cleaning: cleaning.clone(),
    }
}

pub fn summarize_ground(dataset: &GroundDataset) -> DatasetSummary {
    summarize_observations(&dataset.observations, &dataset.cleaning)
}

pub fn summarize_pixels<'a, I>(pixels: I, cleaning: &CleaningReport) -> DatasetSummary
where
    I: IntoIterator<Item = &'a SatellitePixel> + Clone,
{
    let mut parameters = BTreeMap::new();
    let mut n_records = 0;
    for pixel in pixels.clone() {
        n_records += 1;
        for pollutant in pixel.column_values.keys() {
            *parameters.entry(*pollutant).or_insert(0) += 1;
        }
    }

    DatasetSummary {
        n_records,
        n_stations: None,
        n_cities: None,
        parameters,
        time_range: TimeRange::from_times(pixels.clone().into_iter().map(|p| p.timestamp)),
        bounds: GeographicBounds::from_points(pixels.into_iter().map(|p| (p.latitude, p.longitude))),
        cleaning: cleaning.clone(),
    }
}

/// Summary per region plus the total across regions
pub fn summarize_satellite(dataset: &SatelliteDataset) -> (DatasetSummary, BTreeMap<String, DatasetSummary>) {
    let empty = CleaningReport::new();
    let per_region = dataset
        .pixels_by_region
        .iter()
        .map(|(region, pixels)| {
            let cleaning = dataset.cleaning.get(region).unwrap_or(&empty);
            (region.clone(), summarize_pixels(pixels.iter(), cleaning))
        })
        .collect();

    let total = summarize_pixels(
        dataset.pixels_by_region.values().flatten(),
        &dataset.total_cleaning(),
    );
    (total, per_region)
}

pub fn summarize_pairs(pairs: &[MatchedPair]) -> PairSummary {
    let mut pairs_by_region = BTreeMap::new();
    let mut pairs_by_city = BTreeMap::new();
    for pair in pairs {
        *pairs_by_region.entry(pair.region.clone()).or_insert(0) += 1;
        *pairs_by_city.entry(pair.city.clone()).or_insert(0) += 1;
    }
    let distances: Vec<f64> = pairs.iter().map(|p| p.distance_km).collect();
    let time_diffs: Vec<f64> = pairs.iter().map(|p| p.time_diff_hours).collect();
    let stations: HashSet<&str> = pairs.iter().map(|p| p.station_id.as_str()).collect();

    PairSummary {
        n_pairs: pairs.len(),
        n_stations: stations.len(),
        pairs_by_region,
        pairs_by_city,
        mean_distance_km: (!pairs.is_empty()).then(|| mean(&distances)),
        max_distance_km: distances.iter().copied().reduce(f64::max),
        mean_time_diff_hours: (!pairs.is_empty()).then(|| mean(&time_diffs)),
        time_range: TimeRange::from_times(pairs.iter().map(|p| p.ground_time)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::matched::fixtures::pair;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn observation(station: &str, city: &str, lat: f64, hour: u32, parameter: Pollutant) -> GroundObservation {
        GroundObservation::new(
            station.to_string(),
            lat,
            -79.0,
            Utc.with_ymd_and_hms(2025, 6, 6, hour, 0, 0).unwrap(),
            parameter,
            10.0,
            city.to_string(),
            None,
        )
    }

    #[test]
    fn test_ground_summary() {
        let observations = vec![
            observation("a", "Toronto", 43.6, 12, Pollutant::No2),
            observation("a", "Toronto", 43.6, 15, Pollutant::Ozone),
            observation("b", "Hamilton", 43.2, 13, Pollutant::No2),
        ];
        let summary = summarize_observations(&observations, &CleaningReport::new());

        assert_eq!(summary.n_records, 3);
        assert_eq!(summary.n_stations, Some(2));
        assert_eq!(summary.n_cities, Some(2));
        assert_eq!(summary.parameters[&Pollutant::No2], 2);
        assert_eq!(summary.time_range.unwrap().span_hours(), 3.0);
        let bounds = summary.bounds.unwrap();
        assert_eq!((bounds.min_lat, bounds.max_lat), (43.2, 43.6));
        assert!(summary.summary().contains("Stations: 2"));
    }

    #[test]
    fn test_empty_summary() {
        let summary = summarize_observations(&[], &CleaningReport::new());
        assert_eq!(summary.time_range, None);
        assert_eq!(summary.bounds, None);
        assert!(summary.summary().contains("no records"));
    }

    #[test]
    fn test_satellite_summary_per_region() {
        let time = Utc.with_ymd_and_hms(2025, 6, 6, 14, 0, 0).unwrap();
        let mut by_region = crate::models::PixelsByRegion::new();
        by_region.insert(
            "CANADA".to_string(),
            vec![SatellitePixel::new(43.6, -79.4, time).with_column(Pollutant::No2, 1.0)],
        );
        by_region.insert(
            "NYC".to_string(),
            vec![
                SatellitePixel::new(40.7, -74.0, time).with_column(Pollutant::No2, 1.0),
                SatellitePixel::new(40.8, -74.0, time).with_column(Pollutant::Hcho, 1.0),
            ],
        );
        let dataset = SatelliteDataset::from_pixels(by_region);
        let (total, per_region) = summarize_satellite(&dataset);

        assert_eq!(total.n_records, 3);
        assert_eq!(total.cleaning.kept_rows, 3);
        assert_eq!(per_region["NYC"].n_records, 2);
        assert_eq!(per_region["NYC"].parameters.len(), 2);
    }

    #[test]
    fn test_pair_summary() {
        let mut a = pair("Toronto", "CANADA", 10.0, 11.0);
        a.distance_km = 2.0;
        a.time_diff_hours = 0.5;
        let mut b = pair("Boston", "NYC", 10.0, 11.0);
        b.distance_km = 4.0;
        let summary = summarize_pairs(&[a, b]);

        assert_eq!(summary.n_pairs, 2);
        assert_eq!(summary.mean_distance_km, Some(3.0));
        assert_eq!(summary.max_distance_km, Some(4.0));
        assert_eq!(summary.mean_time_diff_hours, Some(0.25));
        assert_eq!(summary.pairs_by_region["NYC"], 1);

        let empty = summarize_pairs(&[]);
        assert_eq!(empty.mean_distance_km, None);
    }
}
