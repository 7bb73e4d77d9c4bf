pub mod agreement;
pub mod calibration;
pub mod matched;
pub mod metric;
pub mod observation;
pub mod pixel;

pub use agreement::{
    AgreementReport, BlandAltman, BreuschPagan, ConfidenceInterval, ErrorMetrics,
    Heteroscedasticity, IntervalMethod, MagnitudeBucket, PermutationTest, QuantileMapping,
};
pub use calibration::{CalibrationModel, FitMethod};
pub use matched::{group_pairs, value_columns, GroupBy, MatchedPair};
pub use metric::Metric;
pub use observation::{GroundObservation, Pollutant};
pub use pixel::{PixelsByRegion, QualityFilter, SatellitePixel};
