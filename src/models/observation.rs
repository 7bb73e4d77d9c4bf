use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::error::ProcessingError;
use crate::utils::coordinates::is_valid_coordinate;

/// Pollutants measured by both the ground networks and TEMPO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pollutant {
    #[serde(rename = "NO2")]
    No2,
    #[serde(rename = "OZONE", alias = "O3")]
    Ozone,
    #[serde(rename = "PM2.5", alias = "PM25")]
    Pm25,
    #[serde(rename = "HCHO")]
    Hcho,
}

impl Pollutant {
    pub const ALL: [Pollutant; 4] = [
        Pollutant::No2,
        Pollutant::Ozone,
        Pollutant::Pm25,
        Pollutant::Hcho,
    ];

    /// Parse a ground-network parameter name, accepting the common spellings
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "NO2" => Some(Pollutant::No2),
            "OZONE" | "O3" => Some(Pollutant::Ozone),
            "PM2.5" | "PM25" | "PM2_5" => Some(Pollutant::Pm25),
            "HCHO" | "FORMALDEHYDE" => Some(Pollutant::Hcho),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pollutant::No2 => "NO2",
            Pollutant::Ozone => "OZONE",
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Hcho => "HCHO",
        }
    }

    /// Canonical satellite column carrying this pollutant
    pub fn satellite_column(&self) -> &'static str {
        match self {
            Pollutant::No2 => "no2_tropospheric_column",
            Pollutant::Ozone => "ozone_total_column",
            Pollutant::Pm25 => "pm25",
            Pollutant::Hcho => "hcho_tropospheric_column",
        }
    }

    /// Header spellings accepted for the satellite column, canonical first
    pub fn satellite_column_aliases(&self) -> &'static [&'static str] {
        match self {
            Pollutant::No2 => &["no2_tropospheric_column", "no2_trop_column", "no2"],
            Pollutant::Ozone => &["ozone_total_column", "ozone_column", "o3"],
            Pollutant::Pm25 => &["pm25", "pm2.5", "pm2_5"],
            Pollutant::Hcho => &["hcho_tropospheric_column", "hcho_column", "hcho"],
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Pollutant {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pollutant::parse(s).ok_or_else(|| ProcessingError::UnknownParameter(s.to_string()))
    }
}

/// One ground-station measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GroundObservation {
    #[validate(length(min = 1))]
    pub station_id: String,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,

    pub timestamp: DateTime<Utc>,

    pub parameter: Pollutant,

    #[validate(range(exclusive_min = 0.0))]
    pub value: f64,

    pub city: String,

    pub region: Option<String>,
}

impl GroundObservation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        station_id: String,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
        parameter: Pollutant,
        value: f64,
        city: String,
        region: Option<String>,
    ) -> Self {
        Self {
            station_id,
            latitude,
            longitude,
            timestamp,
            parameter,
            value,
            city,
            region,
        }
    }

    /// Station identity derived from coordinates when the input carries no station column
    pub fn coordinate_station_id(latitude: f64, longitude: f64) -> String {
        format!("{:.3}_{:.3}", latitude, longitude)
    }

    /// Finite, in-range coordinates and a finite positive value.
    ///
    /// `validate()` alone lets NaN through, since every range comparison with NaN is false.
    pub fn is_usable(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
            && self.value.is_finite()
            && self.value > 0.0
            && self.validate().is_ok()
    }
}
