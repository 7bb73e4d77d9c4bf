use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{ProcessingError, Result};
use crate::models::{
    GroundObservation, MatchedPair, PixelsByRegion, Pollutant, QualityFilter, SatellitePixel,
};
use crate::utils::constants::{
    DEFAULT_SPATIAL_RADIUS_KM, DEFAULT_TEMPORAL_WINDOW_HOURS, DEFAULT_TIME_WEIGHT,
};
use crate::utils::coordinates::haversine_distance;

/// Why a ground observation produced no pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    ParameterExcluded,
    UnmappedCity,
    RegionWithoutSatelliteData,
    MissingSatelliteColumn,
    NoPixelInRadius,
    NoPixelInWindow,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DropReason::ParameterExcluded => "parameter excluded by filter",
            DropReason::UnmappedCity => "city not in region table",
            DropReason::RegionWithoutSatelliteData => "region has no satellite data",
            DropReason::MissingSatelliteColumn => "no satellite column for parameter",
            DropReason::NoPixelInRadius => "no pixel within radius",
            DropReason::NoPixelInWindow => "no pixel within time window",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionMatchStatistics {
    pub observations: usize,
    pub total_pixels: usize,
    pub admissible_pixels: usize,
    pub matched: usize,
    pub dropped: BTreeMap<DropReason, usize>,
}

impl RegionMatchStatistics {
    fn drop(&mut self, reason: DropReason) {
        *self.dropped.entry(reason).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStatistics {
    pub total_observations: usize,
    pub matched: usize,
    pub dropped: BTreeMap<DropReason, usize>,
    pub regions: BTreeMap<String, RegionMatchStatistics>,
}

impl MatchStatistics {
    fn drop(&mut self, reason: DropReason, count: usize) {
        if count > 0 {
            *self.dropped.entry(reason).or_insert(0) += count;
        }
    }

    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }

    pub fn match_rate(&self) -> f64 {
        if self.total_observations == 0 {
            0.0
        } else {
            self.matched as f64 / self.total_observations as f64 * 100.0
        }
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Matched {} of {} observations ({:.1}%)",
            self.matched,
            self.total_observations,
            self.match_rate()
        )];
        for (region, stats) in &self.regions {
            lines.push(format!(
                "  {}: {} matched / {} observations, {} of {} pixels admissible",
                region, stats.matched, stats.observations, stats.admissible_pixels, stats.total_pixels
            ));
        }
        for (reason, count) in &self.dropped {
            lines.push(format!("  dropped, {}: {}", reason, count));
        }
        lines.join("\n")
    }
}

/// Matching tolerances and pixel admissibility
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSettings {
    pub spatial_radius_km: f64,
    pub temporal_window_hours: f64,
    pub time_weight: f64,
    pub quality: QualityFilter,
    pub parameter: Option<Pollutant>,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            spatial_radius_km: DEFAULT_SPATIAL_RADIUS_KM,
            temporal_window_hours: DEFAULT_TEMPORAL_WINDOW_HOURS,
            time_weight: DEFAULT_TIME_WEIGHT,
            quality: QualityFilter::default(),
            parameter: None,
        }
    }
}

/// Pairs ground observations with their nearest admissible satellite pixel
pub struct Matcher {
    settings: MatchSettings,
    city_regions: HashMap<String, String>,
    max_workers: usize,
}

impl Matcher {
    /// `regions` maps an upper-case region key to its city names
    pub fn new(settings: MatchSettings, regions: &BTreeMap<String, Vec<String>>) -> Self {
        let city_regions = regions
            .iter()
            .flat_map(|(region, cities)| {
                cities
                    .iter()
                    .map(move |city| (normalize_city(city), region.to_uppercase()))
            })
            .collect();

        Self {
            settings,
            city_regions,
            max_workers: num_cpus::get(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Same region table and pool size, different tolerances
    pub fn with_settings(&self, settings: MatchSettings) -> Self {
        Self {
            settings,
            city_regions: self.city_regions.clone(),
            max_workers: self.max_workers,
        }
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn region_for_city(&self, city: &str) -> Option<&str> {
        self.city_regions.get(&normalize_city(city)).map(String::as_str)
    }

    /// Match every observation, one parallel task per region.
    ///
    /// The output is in ground-input order regardless of scheduling.
    pub fn match_all(
        &self,
        observations: &[GroundObservation],
        pixels_by_region: &PixelsByRegion,
    ) -> Result<(Vec<MatchedPair>, MatchStatistics)> {
        let mut statistics = MatchStatistics {
            total_observations: observations.len(),
            ..Default::default()
        };

        let mut by_region: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut unmapped = 0;
        let mut excluded = 0;
        for (idx, obs) in observations.iter().enumerate() {
            if self.settings.parameter.is_some_and(|p| p != obs.parameter) {
                excluded += 1;
                continue;
            }
            match self.region_for_city(&obs.city) {
                Some(region) => by_region.entry(region.to_string()).or_default().push(idx),
                None => unmapped += 1,
            }
        }
        statistics.drop(DropReason::ParameterExcluded, excluded);
        statistics.drop(DropReason::UnmappedCity, unmapped);
        if unmapped > 0 {
            debug!("{} observations from cities outside the region table", unmapped);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let regions: Vec<(&String, &Vec<usize>)> = by_region.iter().collect();
        let results: Vec<(String, Vec<MatchedPair>, RegionMatchStatistics)> = pool.install(|| {
            regions
                .par_iter()
                .map(|(region, indices)| {
                    let (pairs, stats) = self.match_region(
                        region,
                        indices,
                        observations,
                        pixels_by_region.get(region.as_str()),
                    );
                    (region.to_string(), pairs, stats)
                })
                .collect()
        });

        let mut pairs = Vec::new();
        for (region, region_pairs, stats) in results {
            statistics.matched += stats.matched;
            for (reason, count) in &stats.dropped {
                statistics.drop(*reason, *count);
            }
            statistics.regions.insert(region, stats);
            pairs.extend(region_pairs);
        }
        pairs.sort_by_key(|p| p.ground_ref);

        info!(
            "Matched {} of {} observations (radius {} km, window {} h)",
            statistics.matched,
            statistics.total_observations,
            self.settings.spatial_radius_km,
            self.settings.temporal_window_hours
        );
        Ok((pairs, statistics))
    }

    fn match_region(
        &self,
        region: &str,
        indices: &[usize],
        observations: &[GroundObservation],
        pixels: Option<&Vec<SatellitePixel>>,
    ) -> (Vec<MatchedPair>, RegionMatchStatistics) {
        let mut stats = RegionMatchStatistics {
            observations: indices.len(),
            ..Default::default()
        };

        let Some(pixels) = pixels else {
            warn!(
                "Region {} has {} ground observations but no satellite data",
                region,
                indices.len()
            );
            for _ in indices {
                stats.drop(DropReason::RegionWithoutSatelliteData);
            }
            return (Vec::new(), stats);
        };

        let admissible: Vec<(usize, &SatellitePixel)> = pixels
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_admissible(&self.settings.quality))
            .collect();
        stats.total_pixels = pixels.len();
        stats.admissible_pixels = admissible.len();

        let available: BTreeSet<Pollutant> = admissible
            .iter()
            .flat_map(|(_, p)| p.column_values.keys().copied())
            .collect();

        let mut pairs = Vec::new();
        for &idx in indices {
            let obs = &observations[idx];
            if !available.contains(&obs.parameter) {
                stats.drop(DropReason::MissingSatelliteColumn);
                continue;
            }
            match self.best_pixel(obs, &admissible) {
                Ok((pixel_idx, pixel, satellite_value, distance_km, time_diff_hours)) => {
                    stats.matched += 1;
                    pairs.push(MatchedPair {
                        ground_ref: idx,
                        satellite_ref: pixel_idx,
                        station_id: obs.station_id.clone(),
                        city: obs.city.clone(),
                        region: region.to_string(),
                        parameter: obs.parameter,
                        satellite_column: obs.parameter.satellite_column().to_string(),
                        ground_time: obs.timestamp,
                        satellite_time: pixel.timestamp,
                        ground_latitude: obs.latitude,
                        ground_longitude: obs.longitude,
                        satellite_latitude: pixel.latitude,
                        satellite_longitude: pixel.longitude,
                        distance_km,
                        time_diff_hours,
                        ground_value: obs.value,
                        satellite_value,
                    });
                }
                Err(reason) => stats.drop(reason),
            }
        }

        debug!(
            "{}: {} pairs from {} observations and {} admissible pixels",
            region,
            stats.matched,
            indices.len(),
            admissible.len()
        );
        (pairs, stats)
    }

    /// Lowest `distance + time_weight * hours` among pixels inside both tolerances.
    /// Ties keep the earlier pixel.
    #[allow(clippy::type_complexity)]
    fn best_pixel<'a>(
        &self,
        obs: &GroundObservation,
        admissible: &[(usize, &'a SatellitePixel)],
    ) -> std::result::Result<(usize, &'a SatellitePixel, f64, f64, f64), DropReason> {
        let mut any_in_radius = false;
        let mut best: Option<(usize, &SatellitePixel, f64, f64, f64)> = None;
        let mut best_score = f64::INFINITY;

        for &(pixel_idx, pixel) in admissible {
            let Some(value) = pixel.column_value(obs.parameter) else {
                continue;
            };
            let distance = haversine_distance(obs.latitude, obs.longitude, pixel.latitude, pixel.longitude);
            if distance.is_nan() || distance > self.settings.spatial_radius_km {
                continue;
            }
            any_in_radius = true;

            let hours = hours_between(obs, pixel);
            if hours > self.settings.temporal_window_hours {
                continue;
            }

            let score = distance + hours * self.settings.time_weight;
            if score < best_score {
                best_score = score;
                best = Some((pixel_idx, pixel, value, distance, hours));
            }
        }

        match best {
            Some(found) => Ok(found),
            None if any_in_radius => Err(DropReason::NoPixelInWindow),
            None => Err(DropReason::NoPixelInRadius),
        }
    }
}

fn hours_between(obs: &GroundObservation, pixel: &SatellitePixel) -> f64 {
    (obs.timestamp - pixel.timestamp).num_milliseconds().abs() as f64 / 3_600_000.0
}

fn normalize_city(city: &str) -> String {
    city.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::DEFAULT_REGION_CITIES;
    use chrono::{Duration, TimeZone, Utc};

    fn regions() -> BTreeMap<String, Vec<String>> {
        DEFAULT_REGION_CITIES
            .iter()
            .map(|(region, cities)| {
                (
                    region.to_string(),
                    cities.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect()
    }

    fn observation(city: &str, lat: f64, lon: f64, hour: u32, value: f64) -> GroundObservation {
        GroundObservation::new(
            format!("{}-{}", city, hour),
            lat,
            lon,
            Utc.with_ymd_and_hms(2025, 6, 6, hour, 0, 0).unwrap(),
            Pollutant::No2,
            value,
            city.to_string(),
            None,
        )
    }

    fn pixel(lat: f64, lon: f64, hour: u32, minute: u32, value: f64) -> SatellitePixel {
        SatellitePixel::new(lat, lon, Utc.with_ymd_and_hms(2025, 6, 6, hour, minute, 0).unwrap())
            .with_column(Pollutant::No2, value)
    }

    fn matcher() -> Matcher {
        Matcher::new(MatchSettings::default(), &regions()).with_max_workers(2)
    }

    #[test]
    fn test_city_lookup_is_case_insensitive() {
        let m = matcher();
        assert_eq!(m.region_for_city("toronto"), Some("CANADA"));
        assert_eq!(m.region_for_city(" New York City "), Some("NYC"));
        assert_eq!(m.region_for_city("Chicago"), None);
    }

    #[test]
    fn test_nearest_pixel_wins() {
        let obs = vec![observation("Boston", 42.36, -71.06, 14, 20.0)];
        let mut pixels = PixelsByRegion::new();
        pixels.insert(
            "NYC".to_string(),
            vec![
                pixel(42.40, -71.06, 14, 0, 30.0),
                pixel(42.361, -71.06, 14, 0, 21.0),
            ],
        );

        let (pairs, stats) = matcher().match_all(&obs, &pixels).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].satellite_ref, 1);
        assert_eq!(pairs[0].satellite_value, 21.0);
        assert_eq!(pairs[0].region, "NYC");
        assert_eq!(stats.matched, 1);
    }

    #[test]
    fn test_time_weight_trades_distance_for_time() {
        let obs = vec![observation("Toronto", 43.65, -79.38, 14, 20.0)];
        let mut pixels = PixelsByRegion::new();
        // ~1.1 km away but 50 minutes off, versus ~2.2 km away and on time
        pixels.insert(
            "CANADA".to_string(),
            vec![
                pixel(43.66, -79.38, 14, 50, 10.0),
                pixel(43.67, -79.38, 14, 0, 11.0),
            ],
        );

        let (pairs, _) = matcher().match_all(&obs, &pixels).unwrap();
        assert_eq!(pairs[0].satellite_ref, 1);
    }

    #[test]
    fn test_exact_tie_keeps_first_pixel() {
        let obs = vec![observation("Toronto", 43.65, -79.38, 14, 20.0)];
        let mut pixels = PixelsByRegion::new();
        pixels.insert(
            "CANADA".to_string(),
            vec![
                pixel(43.66, -79.38, 14, 0, 10.0),
                pixel(43.66, -79.38, 14, 0, 99.0),
            ],
        );

        let (pairs, _) = matcher().match_all(&obs, &pixels).unwrap();
        assert_eq!(pairs[0].satellite_ref, 0);
    }

    #[test]
    fn test_drop_reasons() {
        let obs = vec![
            observation("Chicago", 41.88, -87.63, 14, 20.0),
            observation("Mexico City", 19.43, -99.13, 14, 20.0),
            observation("Toronto", 43.65, -79.38, 14, 20.0),
            observation("Montreal", 45.50, -73.57, 14, 20.0),
            observation("Hamilton", 43.26, -79.87, 10, 20.0),
        ];
        let mut pixels = PixelsByRegion::new();
        pixels.insert(
            "CANADA".to_string(),
            vec![
                pixel(43.651, -79.38, 14, 0, 10.0),
                pixel(43.26, -79.87, 14, 0, 10.0),
            ],
        );

        let (pairs, stats) = matcher().match_all(&obs, &pixels).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].city, "Toronto");
        assert_eq!(stats.dropped[&DropReason::UnmappedCity], 1);
        assert_eq!(stats.dropped[&DropReason::RegionWithoutSatelliteData], 1);
        assert_eq!(stats.dropped[&DropReason::NoPixelInRadius], 1);
        assert_eq!(stats.dropped[&DropReason::NoPixelInWindow], 1);
        assert_eq!(stats.matched + stats.dropped_total(), obs.len());
        assert_eq!(stats.regions["MEXICO"].observations, 1);
    }

    #[test]
    fn test_missing_column_and_quality() {
        let mut obs = vec![observation("Toronto", 43.65, -79.38, 14, 20.0)];
        obs[0].parameter = Pollutant::Hcho;
        obs.push(observation("Montreal", 45.50, -73.57, 14, 20.0));

        let mut pixels = PixelsByRegion::new();
        pixels.insert(
            "CANADA".to_string(),
            vec![
                pixel(43.651, -79.38, 14, 0, 10.0),
                pixel(45.501, -73.57, 14, 0, 10.0).with_quality(0, 0.95, 30.0),
            ],
        );

        let (pairs, stats) = matcher().match_all(&obs, &pixels).unwrap();
        assert!(pairs.is_empty());
        assert_eq!(stats.dropped[&DropReason::MissingSatelliteColumn], 1);
        assert_eq!(stats.dropped[&DropReason::NoPixelInRadius], 1);
        assert_eq!(stats.regions["CANADA"].admissible_pixels, 1);
    }

    #[test]
    fn test_parameter_filter() {
        let obs = vec![observation("Toronto", 43.65, -79.38, 14, 20.0)];
        let mut pixels = PixelsByRegion::new();
        pixels.insert("CANADA".to_string(), vec![pixel(43.651, -79.38, 14, 0, 10.0)]);

        let settings = MatchSettings {
            parameter: Some(Pollutant::Ozone),
            ..Default::default()
        };
        let (pairs, stats) = Matcher::new(settings, &regions())
            .match_all(&obs, &pixels)
            .unwrap();
        assert!(pairs.is_empty());
        assert_eq!(stats.dropped[&DropReason::ParameterExcluded], 1);
    }

    #[test]
    fn test_output_follows_ground_order_and_tolerances() {
        let cities = [
            ("Toronto", 43.65, -79.38),
            ("Boston", 42.36, -71.06),
            ("Toluca", 19.28, -99.65),
        ];
        let mut obs = Vec::new();
        for hour in 12..18 {
            for (city, lat, lon) in cities {
                obs.push(observation(city, lat, lon, hour, 10.0 + hour as f64));
            }
        }
        let mut pixels = PixelsByRegion::new();
        for (region, (_, lat, lon)) in ["CANADA", "NYC", "MEXICO"].iter().zip(cities) {
            let region_pixels = (12..18)
                .flat_map(|h| {
                    [
                        pixel(lat + 0.05, lon, h, 20, 9.0 + h as f64),
                        pixel(lat - 0.1, lon + 0.1, h, 5, 8.0 + h as f64),
                    ]
                })
                .collect();
            pixels.insert(region.to_string(), region_pixels);
        }

        let (pairs, _) = matcher().match_all(&obs, &pixels).unwrap();
        assert_eq!(pairs.len(), obs.len());
        assert!(pairs.windows(2).all(|w| w[0].ground_ref < w[1].ground_ref));
        for p in &pairs {
            assert!(p.distance_km <= 20.0);
            assert!(p.time_diff_hours <= 1.0);
            assert!(p.satellite_time - p.ground_time <= Duration::hours(1));
        }

        let (again, _) = matcher().match_all(&obs, &pixels).unwrap();
        assert_eq!(pairs, again);
    }
}
