use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::models::Pollutant;
use crate::utils::constants::{
    RELAXED_MAX_CLOUD_FRACTION, RELAXED_MAX_QUALITY_FLAG, RELAXED_MAX_SOLAR_ZENITH_DEG,
    STRICT_MAX_CLOUD_FRACTION, STRICT_MAX_QUALITY_FLAG, STRICT_MAX_SOLAR_ZENITH_DEG,
};

/// Satellite pixels keyed by upper-case region name
pub type PixelsByRegion = BTreeMap<String, Vec<SatellitePixel>>;

/// One TEMPO L2 pixel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatellitePixel {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub column_values: BTreeMap<Pollutant, f64>,
    pub quality_flag: Option<i32>,
    pub cloud_fraction: Option<f64>,
    pub solar_zenith_angle: Option<f64>,
}

impl SatellitePixel {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            column_values: BTreeMap::new(),
            quality_flag: None,
            cloud_fraction: None,
            solar_zenith_angle: None,
        }
    }

    pub fn with_column(mut self, pollutant: Pollutant, value: f64) -> Self {
        self.column_values.insert(pollutant, value);
        self
    }

    pub fn with_quality(
        mut self,
        quality_flag: i32,
        cloud_fraction: f64,
        solar_zenith_angle: f64,
    ) -> Self {
        self.quality_flag = Some(quality_flag);
        self.cloud_fraction = Some(cloud_fraction);
        self.solar_zenith_angle = Some(solar_zenith_angle);
        self
    }

    pub fn column_value(&self, pollutant: Pollutant) -> Option<f64> {
        self.column_values.get(&pollutant).copied()
    }

    /// A filter whose field is absent from the pixel does not apply
    pub fn is_admissible(&self, filter: &QualityFilter) -> bool {
        let quality_ok = self
            .quality_flag
            .is_none_or(|flag| flag <= filter.max_quality_flag);
        let cloud_ok = self
            .cloud_fraction
            .is_none_or(|cf| cf < filter.max_cloud_fraction);
        let zenith_ok = self
            .solar_zenith_angle
            .is_none_or(|sza| sza < filter.max_solar_zenith_angle);

        quality_ok && cloud_ok && zenith_ok
    }
}

/// Pixel admissibility thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct QualityFilter {
    pub max_quality_flag: i32,

    #[validate(range(min = 0.0, max = 1.0))]
    pub max_cloud_fraction: f64,

    #[validate(range(min = 0.0, max = 180.0))]
    pub max_solar_zenith_angle: f64,
}

impl QualityFilter {
    /// Thresholds loose enough for the synthetic demo pixels
    pub fn relaxed() -> Self {
        Self {
            max_quality_flag: RELAXED_MAX_QUALITY_FLAG,
            max_cloud_fraction: RELAXED_MAX_CLOUD_FRACTION,
            max_solar_zenith_angle: RELAXED_MAX_SOLAR_ZENITH_DEG,
        }
    }

    /// Thresholds for real L2 retrievals
    pub fn strict() -> Self {
        Self {
            max_quality_flag: STRICT_MAX_QUALITY_FLAG,
            max_cloud_fraction: STRICT_MAX_CLOUD_FRACTION,
            max_solar_zenith_angle: STRICT_MAX_SOLAR_ZENITH_DEG,
        }
    }
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self::relaxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pixel() -> SatellitePixel {
        SatellitePixel::new(
            40.75,
            -73.98,
            Utc.with_ymd_and_hms(2025, 6, 6, 14, 10, 0).unwrap(),
        )
        .with_column(Pollutant::No2, 18.2)
    }

    #[test]
    fn test_column_lookup() {
        let p = pixel();
        assert_eq!(p.column_value(Pollutant::No2), Some(18.2));
        assert_eq!(p.column_value(Pollutant::Hcho), None);
    }

    #[test]
    fn test_missing_quality_fields_pass() {
        assert!(pixel().is_admissible(&QualityFilter::strict()));
    }

    #[test]
    fn test_quality_thresholds() {
        let relaxed = QualityFilter::relaxed();
        let strict = QualityFilter::strict();

        let good = pixel().with_quality(0, 0.1, 40.0);
        assert!(good.is_admissible(&relaxed));
        assert!(good.is_admissible(&strict));

        let cloudy = pixel().with_quality(1, 0.5, 40.0);
        assert!(cloudy.is_admissible(&relaxed));
        assert!(!cloudy.is_admissible(&strict));

        // thresholds on cloud fraction and zenith angle are strict inequalities
        let at_cloud_limit = pixel().with_quality(0, 0.8, 40.0);
        assert!(!at_cloud_limit.is_admissible(&relaxed));

        let low_sun = pixel().with_quality(0, 0.1, 86.0);
        assert!(!low_sun.is_admissible(&relaxed));

        let flagged = pixel().with_quality(3, 0.1, 40.0);
        assert!(!flagged.is_admissible(&relaxed));
    }

    #[test]
    fn test_filter_validation() {
        let mut filter = QualityFilter::relaxed();
        assert!(filter.validate().is_ok());
        filter.max_cloud_fraction = 1.5;
        assert!(filter.validate().is_err());
    }
}
