use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ProcessingError, Result};
use crate::models::{GroundObservation, Pollutant};
use crate::processors::data_cleaner::{CleaningReport, ExclusionReason, GroundQc};
use crate::readers::source::{
    csv_reader, field, load_source, parse_number, parse_timestamp, HeaderIndex, InputChecksum,
};
use crate::utils::coordinates::is_valid_coordinate;

const LATITUDE: &[&str] = &["latitude", "lat"];
const LONGITUDE: &[&str] = &["longitude", "lon", "lng"];
const TIMESTAMP: &[&str] = &["timestamp", "utc", "datetime", "time_utc", "time", "date_utc"];
const PARAMETER: &[&str] = &["parameter", "parametername", "pollutant"];
const VALUE: &[&str] = &["value", "concentration"];
const AQI: &[&str] = &["aqi"];
const CITY: &[&str] = &["city"];
const STATION: &[&str] = &["station_id", "site_id", "siteid", "aqs_site_id", "stationid"];
const REGION: &[&str] = &["region"];

/// Cleaned ground observations plus the provenance of the file they came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundDataset {
    pub observations: Vec<GroundObservation>,
    pub cleaning: CleaningReport,
    pub source: Option<InputChecksum>,
}

impl GroundDataset {
    /// Dataset from in-memory observations; unusable ones are excluded and counted
    pub fn from_observations(observations: Vec<GroundObservation>) -> Self {
        let mut cleaning = CleaningReport::new();
        let observations = observations
            .into_iter()
            .filter(|obs| match exclusion_for(obs) {
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

        Self {
            observations,
            cleaning,
            source: None,
        }
    }

    /// Apply value-level quality control; the reader does this while loading
    pub fn apply_qc(mut self, qc: &GroundQc) -> Self {
        self.observations = qc.apply(self.observations, &mut self.cleaning);
        self
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

fn exclusion_for(obs: &GroundObservation) -> Option<ExclusionReason> {
    if !obs.latitude.is_finite() || !obs.longitude.is_finite() {
        Some(ExclusionReason::InvalidCoordinates)
    } else if !is_valid_coordinate(obs.latitude, obs.longitude) {
        Some(ExclusionReason::CoordinatesOutOfRange)
    } else if !obs.value.is_finite() {
        Some(ExclusionReason::NonFiniteValue)
    } else if !obs.is_usable() {
        Some(ExclusionReason::NonPositiveValue)
    } else {
        None
    }
}

/// Reads ground-station CSV exports
pub struct GroundReader {
    parameter: Option<Pollutant>,
    qc: GroundQc,
}

impl GroundReader {
    pub fn new() -> Self {
        Self {
            parameter: None,
            qc: GroundQc::default(),
        }
    }

    /// Keep only rows for one pollutant; other rows are counted as excluded
    pub fn with_parameter(parameter: Option<Pollutant>) -> Self {
        Self {
            parameter,
            ..Self::new()
        }
    }

    pub fn with_qc(mut self, qc: GroundQc) -> Self {
        self.qc = qc;
        self
    }

    pub fn read(&self, path: &Path) -> Result<GroundDataset> {
        let source = load_source(path)?;
        let (observations, cleaning) = self.parse_str(&source.text, &source.name())?;

        info!(
            "Loaded {} ground observations from {} ({} rows excluded)",
            observations.len(),
            path.display(),
            cleaning.excluded_rows()
        );
        if observations.is_empty() {
            return Err(ProcessingError::NoUsableRows(format!(
                "{} has no usable ground observations after cleaning",
                path.display()
            )));
        }

        Ok(GroundDataset {
            observations,
            cleaning,
            source: Some(source.checksum),
        })
    }

    /// Parse CSV text, then apply value-level quality control. Fails only on a
    /// missing required column.
    pub fn parse_str(
        &self,
        text: &str,
        source_name: &str,
    ) -> Result<(Vec<GroundObservation>, CleaningReport)> {
        let mut reader = csv_reader(text);
        let headers = HeaderIndex::new(reader.headers()?, source_name);

        let lat_idx = headers.require(LATITUDE)?;
        let lon_idx = headers.require(LONGITUDE)?;
        let time_idx = headers.require(TIMESTAMP)?;
        let param_idx = headers.require(PARAMETER)?;
        let city_idx = headers.require(CITY)?;
        let value_idx = headers.find(VALUE);
        let aqi_idx = headers.find(AQI);
        if value_idx.is_none() && aqi_idx.is_none() {
            return Err(ProcessingError::MissingColumn {
                column: VALUE[0].to_string(),
                source_name: source_name.to_string(),
            });
        }
        let station_idx = headers.find(STATION);
        let region_idx = headers.find(REGION);

        let mut observations = Vec::new();
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

            let Some(parameter) = Pollutant::parse(field(&record, param_idx)) else {
                cleaning.exclude(ExclusionReason::UnknownParameter);
                continue;
            };
            if self.parameter.is_some_and(|p| p != parameter) {
                cleaning.exclude(ExclusionReason::ParameterFiltered);
                continue;
            }

            // AQI stands in for rows whose value field is blank
            let value = value_idx
                .and_then(|idx| parse_number(field(&record, idx)))
                .or_else(|| aqi_idx.and_then(|idx| parse_number(field(&record, idx))));
            let value = match value {
                Some(v) if !v.is_finite() => {
                    cleaning.exclude(ExclusionReason::NonFiniteValue);
                    continue;
                }
                Some(v) if v <= 0.0 => {
                    cleaning.exclude(ExclusionReason::NonPositiveValue);
                    continue;
                }
                Some(v) => v,
                None => {
                    cleaning.exclude(ExclusionReason::NonFiniteValue);
                    continue;
                }
            };

            let station_id = station_idx
                .map(|idx| field(&record, idx))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| GroundObservation::coordinate_station_id(latitude, longitude));
            let region = region_idx
                .map(|idx| field(&record, idx))
                .filter(|s| !s.is_empty())
                .map(str::to_uppercase);

            observations.push(GroundObservation::new(
                station_id,
                latitude,
                longitude,
                timestamp,
                parameter,
                value,
                field(&record, city_idx).to_string(),
                region,
            ));
            cleaning.keep();
        }

        let observations = self.qc.apply(observations, &mut cleaning);
        Ok((observations, cleaning))
    }
}

impl Default for GroundReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
City,Lat,Lng,UTC,ParameterName,Value,AQI
Toronto,43.65,-79.38,2025-06-06 14:00:00,NO2,21.5,
Toronto,43.65,-79.38,2025-06-06 15:00:00,O3,,42
Toronto,abc,-79.38,2025-06-06 15:00:00,NO2,10,
Toronto,95.0,-79.38,2025-06-06 15:00:00,NO2,10,
Toronto,43.65,-79.38,not a time,NO2,10,
Toronto,43.65,-79.38,2025-06-06 15:00:00,CO,10,
Toronto,43.65,-79.38,2025-06-06 15:00:00,NO2,0,
Toronto,43.65,-79.38,2025-06-06 15:00:00,NO2,,
";

    #[test]
    fn test_aliases_and_exclusions() {
        let (observations, cleaning) = GroundReader::new().parse_str(SAMPLE, "sample").unwrap();

        assert_eq!(observations.len(), 2);
        assert_eq!(cleaning.total_rows, 8);
        assert_eq!(cleaning.kept_rows, 2);
        assert_eq!(cleaning.count(ExclusionReason::InvalidCoordinates), 1);
        assert_eq!(cleaning.count(ExclusionReason::CoordinatesOutOfRange), 1);
        assert_eq!(cleaning.count(ExclusionReason::InvalidTimestamp), 1);
        assert_eq!(cleaning.count(ExclusionReason::UnknownParameter), 1);
        assert_eq!(cleaning.count(ExclusionReason::NonPositiveValue), 1);
        assert_eq!(cleaning.count(ExclusionReason::NonFiniteValue), 1);

        let first = &observations[0];
        assert_eq!(first.city, "Toronto");
        assert_eq!(first.parameter, Pollutant::No2);
        assert_eq!(first.value, 21.5);
        assert_eq!(first.station_id, "43.650_-79.380");
        assert_eq!(
            first.timestamp,
            Utc.with_ymd_and_hms(2025, 6, 6, 14, 0, 0).unwrap()
        );

        // AQI fallback
        assert_eq!(observations[1].parameter, Pollutant::Ozone);
        assert_eq!(observations[1].value, 42.0);
    }

    #[test]
    fn test_parameter_filter_and_station_column() {
        let text = "city,latitude,longitude,timestamp,parameter,value,site_id,region\n\
                    Boston,42.36,-71.06,2025-06-06T14:00:00Z,NO2,12.0,250250042,nyc\n\
                    Boston,42.36,-71.06,2025-06-06T14:00:00Z,OZONE,30.0,250250042,nyc\n";
        let reader = GroundReader::with_parameter(Some(Pollutant::No2));
        let (observations, cleaning) = reader.parse_str(text, "boston.csv").unwrap();

        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].station_id, "250250042");
        assert_eq!(observations[0].region.as_deref(), Some("NYC"));
        assert_eq!(cleaning.count(ExclusionReason::ParameterFiltered), 1);
        assert_eq!(cleaning.count(ExclusionReason::UnknownParameter), 0);
    }

    #[test]
    fn test_value_quality_control() {
        let mut text = String::from("city,lat,lon,time,parameter,value\n");
        for v in 1..=30 {
            text.push_str(&format!("Toronto,43.65,-79.38,2025-06-06 14:00:00,NO2,{}\n", v));
        }
        text.push_str("Toronto,43.65,-79.38,2025-06-06 14:00:00,NO2,512\n");

        let (observations, cleaning) = GroundReader::new().parse_str(&text, "qc.csv").unwrap();
        assert_eq!(observations.len(), 30);
        assert_eq!(cleaning.count(ExclusionReason::AboveMaxValue), 1);

        let qc = GroundQc {
            trim_percentile: Some(1.0),
            ..Default::default()
        };
        let (observations, cleaning) = GroundReader::new().with_qc(qc).parse_str(&text, "qc.csv").unwrap();
        assert_eq!(observations.len(), 28);
        assert_eq!(cleaning.count(ExclusionReason::PercentileOutlier), 2);
        assert_eq!(cleaning.total_rows, 31);
        assert_eq!(cleaning.kept_rows, 28);
    }

    #[test]
    fn test_missing_required_column() {
        let text = "latitude,longitude,timestamp,parameter,value\n40.0,-74.0,2025-06-06 14:00:00,NO2,1\n";
        let err = GroundReader::new().parse_str(text, "nocity.csv").unwrap_err();
        match err {
            ProcessingError::MissingColumn { column, source_name } => {
                assert_eq!(column, "city");
                assert_eq!(source_name, "nocity.csv");
            }
            other => panic!("unexpected error: {}", other),
        }

        let text = "city,latitude,longitude,timestamp,parameter\n";
        assert!(matches!(
            GroundReader::new().parse_str(text, "novalue.csv"),
            Err(ProcessingError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_read_file_records_checksum() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{}", SAMPLE)?;

        let first = GroundReader::new().read(file.path())?;
        let second = GroundReader::new().read(file.path())?;
        let checksum = first.source.clone().unwrap();
        assert_eq!(checksum.sha256.len(), 64);
        assert_eq!(checksum, second.source.unwrap());
        assert_eq!(first.len(), 2);
        Ok(())
    }

    #[test]
    fn test_empty_after_cleaning_is_an_error() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "city,lat,lon,time,parameter,value")?;
        writeln!(file, "Toronto,43.65,-79.38,2025-06-06 14:00:00,NO2,-5")?;

        let err = GroundReader::new().read(file.path()).unwrap_err();
        assert!(matches!(err, ProcessingError::NoUsableRows(_)));
        Ok(())
    }

    #[test]
    fn test_from_observations_counts_exclusions() {
        let time = Utc.with_ymd_and_hms(2025, 6, 6, 14, 0, 0).unwrap();
        let obs = |lat: f64, value: f64| {
            GroundObservation::new(
                "s".to_string(),
                lat,
                -79.0,
                time,
                Pollutant::No2,
                value,
                "Toronto".to_string(),
                None,
            )
        };
        let dataset = GroundDataset::from_observations(vec![
            obs(43.0, 10.0),
            obs(f64::NAN, 10.0),
            obs(43.0, -1.0),
            obs(43.0, f64::INFINITY),
        ]);
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.cleaning.count(ExclusionReason::InvalidCoordinates), 1);
        assert_eq!(dataset.cleaning.count(ExclusionReason::NonPositiveValue), 1);
        assert_eq!(dataset.cleaning.count(ExclusionReason::NonFiniteValue), 1);
    }
}
