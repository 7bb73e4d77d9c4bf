use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{ProcessingError, Result};
use crate::models::{PixelsByRegion, Pollutant, SatellitePixel};
use crate::processors::data_cleaner::{CleaningReport, ExclusionReason};
use crate::readers::source::{
    csv_reader, field, load_source, parse_number, parse_timestamp, HeaderIndex, InputChecksum,
};
use crate::utils::constants::SATELLITE_FILL_VALUE;
use crate::utils::coordinates::is_valid_coordinate;

const LATITUDE: &[&str] = &["latitude", "lat"];
const LONGITUDE: &[&str] = &["longitude", "lon"];
const TIME: &[&str] = &["time", "time_utc", "datetime", "timestamp"];
const QUALITY_FLAG: &[&str] = &["quality_flag", "qa_value"];
const CLOUD_FRACTION: &[&str] = &["cloud_fraction"];
const SOLAR_ZENITH: &[&str] = &["solar_zenith_angle"];

/// Cleaned satellite pixels for every region read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteDataset {
    pub pixels_by_region: PixelsByRegion,
    pub cleaning: BTreeMap<String, CleaningReport>,
    pub sources: Vec<InputChecksum>,
}

impl SatelliteDataset {
    /// Dataset from in-memory pixels; unusable ones are excluded and counted,
    /// and region keys are upper-cased as `insert` does
    pub fn from_pixels(pixels_by_region: PixelsByRegion) -> Self {
        let mut dataset = Self::default();
        for (region, pixels) in pixels_by_region {
            let mut cleaning = CleaningReport::new();
            let pixels = pixels
                .into_iter()
                .filter(|pixel| match exclusion_for(pixel) {
                    Some(reason) => {
                        cleaning.exclude(reason);
                        false
                    }
                    None => {
                        cleaning.keep();
                        true
                    }
                })
                .collect();
            dataset.insert(&region, pixels, cleaning, None);
        }
        dataset
    }

    /// Append one region's pixels; repeated regions are concatenated in call order
    pub fn insert(
        &mut self,
        region: &str,
        pixels: Vec<SatellitePixel>,
        cleaning: CleaningReport,
        source: Option<InputChecksum>,
    ) {
        let region = region.to_uppercase();
        self.pixels_by_region
            .entry(region.clone())
            .or_default()
            .extend(pixels);
        self.cleaning.entry(region).or_default().merge(&cleaning);
        self.sources.extend(source);
    }

    pub fn total_pixels(&self) -> usize {
        self.pixels_by_region.values().map(Vec::len).sum()
    }

    pub fn total_cleaning(&self) -> CleaningReport {
        let mut total = CleaningReport::new();
        for report in self.cleaning.values() {
            total.merge(report);
        }
        total
    }
}

/// Reads per-region satellite CSV extracts
pub struct SatelliteReader;

impl SatelliteReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read(&self, path: &Path) -> Result<(Vec<SatellitePixel>, CleaningReport, InputChecksum)> {
        let source = load_source(path)?;
        let (pixels, cleaning) = self.parse_str(&source.text, &source.name())?;

        info!(
            "Loaded {} satellite pixels from {} ({} rows excluded)",
            pixels.len(),
            path.display(),
            cleaning.excluded_rows()
        );
        Ok((pixels, cleaning, source.checksum))
    }

    /// Parse CSV text. Fails on a missing coordinate or time column, or when no
    /// pollutant column is present.
    pub fn parse_str(
        &self,
        text: &str,
        source_name: &str,
    ) -> Result<(Vec<SatellitePixel>, CleaningReport)> {
        let mut reader = csv_reader(text);
        let headers = HeaderIndex::new(reader.headers()?, source_name);

        let lat_idx = headers.require(LATITUDE)?;
        let lon_idx = headers.require(LONGITUDE)?;
        let time_idx = headers.require(TIME)?;
        let quality_idx = headers.find(QUALITY_FLAG);
        let cloud_idx = headers.find(CLOUD_FRACTION);
        let zenith_idx = headers.find(SOLAR_ZENITH);

        let columns: Vec<(Pollutant, usize)> = Pollutant::ALL
            .iter()
            .filter_map(|p| headers.find(p.satellite_column_aliases()).map(|idx| (*p, idx)))
            .collect();
        if columns.is_empty() {
            return Err(ProcessingError::MissingColumn {
                column: Pollutant::No2.satellite_column().to_string(),
                source_name: source_name.to_string(),
            });
        }
        debug!(
            "{}: pollutant columns {:?}",
            source_name,
            columns.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>()
        );

        let mut pixels = Vec::new();
        let mut cleaning = CleaningReport::new();

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    debug!("{}: malformed row: {}", source_name, e);
                    cleaning.exclude(ExclusionReason::MalformedRow);
                    continue;
                }
            };

            let (Some(latitude), Some(longitude)) = (
                parse_number(field(&record, lat_idx)),
                parse_number(field(&record, lon_idx)),
            ) else {
                cleaning.exclude(ExclusionReason::InvalidCoordinates);
                continue;
            };
            if !latitude.is_finite() || !longitude.is_finite() {
                cleaning.exclude(ExclusionReason::InvalidCoordinates);
                continue;
            }
            if !is_valid_coordinate(latitude, longitude) {
                cleaning.exclude(ExclusionReason::CoordinatesOutOfRange);
                continue;
            }

            let Some(timestamp) = parse_timestamp(field(&record, time_idx)) else {
                cleaning.exclude(ExclusionReason::InvalidTimestamp);
                continue;
            };

            let mut pixel = SatellitePixel::new(latitude, longitude, timestamp);
            for &(pollutant, idx) in &columns {
                if let Some(value) = parse_number(field(&record, idx)).filter(|v| is_present(*v)) {
                    pixel = pixel.with_column(pollutant, value);
                }
            }
            if pixel.column_values.is_empty() {
                cleaning.exclude(ExclusionReason::NoPollutantValues);
                continue;
            }

            pixel.quality_flag = quality_idx
                .and_then(|idx| parse_number(field(&record, idx)))
                .filter(|v| v.is_finite())
                .map(|v| v.round() as i32);
            pixel.cloud_fraction = cloud_idx
                .and_then(|idx| parse_number(field(&record, idx)))
                .filter(|v| v.is_finite());
            pixel.solar_zenith_angle = zenith_idx
                .and_then(|idx| parse_number(field(&record, idx)))
                .filter(|v| v.is_finite());

            pixels.push(pixel);
            cleaning.keep();
        }

        if pixels.is_empty() {
            warn!("{}: no usable satellite pixels", source_name);
        }
        Ok((pixels, cleaning))
    }
}

impl Default for SatelliteReader {
    fn default() -> Self {
        Self::new()
    }
}

fn exclusion_for(pixel: &SatellitePixel) -> Option<ExclusionReason> {
    if !pixel.latitude.is_finite() || !pixel.longitude.is_finite() {
        Some(ExclusionReason::InvalidCoordinates)
    } else if !is_valid_coordinate(pixel.latitude, pixel.longitude) {
        Some(ExclusionReason::CoordinatesOutOfRange)
    } else if !pixel.column_values.values().any(|v| is_present(*v)) {
        Some(ExclusionReason::NoPollutantValues)
    } else {
        None
    }
}

/// Fill values and non-finite numbers mark an absent column value
fn is_present(value: f64) -> bool {
    value.is_finite() && value != SATELLITE_FILL_VALUE
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
latitude,longitude,time,no2_trop_column,o3,quality_flag,cloud_fraction,solar_zenith_angle
43.65,-79.38,2025-06-06T14:05:00Z,18.5,310.0,0,0.1,40.0
43.70,-79.40,2025-06-06T14:05:00Z,-999,,1.0,0.2,41.0
43.75,-79.42,2025-06-06T14:05:00Z,-999,,0,0.2,41.0
43.75,-79.42,bad,12.0,,0,0.2,41.0
-91.0,-79.42,2025-06-06T14:05:00Z,12.0,,0,0.2,41.0
";

    #[test]
    fn test_columns_fill_values_and_quality() {
        let (pixels, cleaning) = SatelliteReader::new().parse_str(SAMPLE, "canada.csv").unwrap();

        assert_eq!(pixels.len(), 1);
        assert_eq!(cleaning.total_rows, 5);
        assert_eq!(cleaning.count(ExclusionReason::NoPollutantValues), 2);
        assert_eq!(cleaning.count(ExclusionReason::InvalidTimestamp), 1);
        assert_eq!(cleaning.count(ExclusionReason::CoordinatesOutOfRange), 1);

        let pixel = &pixels[0];
        assert_eq!(pixel.column_value(Pollutant::No2), Some(18.5));
        assert_eq!(pixel.column_value(Pollutant::Ozone), Some(310.0));
        assert_eq!(pixel.column_value(Pollutant::Hcho), None);
        assert_eq!(pixel.quality_flag, Some(0));
        assert_eq!(pixel.cloud_fraction, Some(0.1));
    }

    #[test]
    fn test_optional_quality_columns() {
        let text = "lat,lon,datetime,no2\n19.43,-99.13,2025-06-06 14:00:00,20.0\n";
        let (pixels, _) = SatelliteReader::new().parse_str(text, "mexico.csv").unwrap();
        assert_eq!(pixels.len(), 1);
        assert_eq!(pixels[0].quality_flag, None);
        assert_eq!(pixels[0].cloud_fraction, None);
    }

    #[test]
    fn test_requires_a_pollutant_column() {
        let text = "lat,lon,time,quality_flag\n19.43,-99.13,2025-06-06 14:00:00,0\n";
        let err = SatelliteReader::new().parse_str(text, "mexico.csv").unwrap_err();
        assert!(matches!(err, ProcessingError::MissingColumn { .. }));

        let text = "lat,time,no2\n19.43,2025-06-06 14:00:00,1\n";
        let err = SatelliteReader::new().parse_str(text, "mexico.csv").unwrap_err();
        assert!(err.to_string().contains("'longitude'"));
    }

    #[test]
    fn test_dataset_merges_regions() {
        let (pixels, cleaning) = SatelliteReader::new().parse_str(SAMPLE, "canada.csv").unwrap();
        let mut dataset = SatelliteDataset::default();
        dataset.insert("canada", pixels.clone(), cleaning.clone(), None);
        dataset.insert("CANADA", pixels, cleaning, None);

        assert_eq!(dataset.pixels_by_region.len(), 1);
        assert_eq!(dataset.total_pixels(), 2);
        assert_eq!(dataset.cleaning["CANADA"].total_rows, 10);
        assert_eq!(dataset.total_cleaning().kept_rows, 2);
    }

    #[test]
    fn test_from_pixels_normalises_regions_and_excludes() {
        let time = chrono::Utc::now();
        let good = SatellitePixel::new(43.65, -79.38, time).with_column(Pollutant::No2, 18.0);
        let mut by_region = PixelsByRegion::new();
        by_region.insert(
            "Canada".to_string(),
            vec![
                good.clone(),
                SatellitePixel::new(f64::NAN, -79.38, time).with_column(Pollutant::No2, 18.0),
                SatellitePixel::new(43.65, -79.38, time),
                SatellitePixel::new(43.65, -79.38, time).with_column(Pollutant::No2, SATELLITE_FILL_VALUE),
            ],
        );
        by_region.insert("mexico".to_string(), vec![good.clone()]);

        let dataset = SatelliteDataset::from_pixels(by_region);
        assert_eq!(
            dataset.pixels_by_region.keys().collect::<Vec<_>>(),
            vec!["CANADA", "MEXICO"]
        );
        assert_eq!(dataset.pixels_by_region["CANADA"], vec![good]);
        let canada = &dataset.cleaning["CANADA"];
        assert_eq!(canada.total_rows, 4);
        assert_eq!(canada.count(ExclusionReason::InvalidCoordinates), 1);
        assert_eq!(canada.count(ExclusionReason::NoPollutantValues), 2);
        assert_eq!(dataset.total_pixels(), 2);
    }
}
