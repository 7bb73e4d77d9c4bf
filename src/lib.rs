pub mod analyzers;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod processors;
pub mod readers;
pub mod utils;
pub mod writers;

pub use config::ValidationConfig;
pub use error::{ProcessingError, Result};
pub use models::{GroundObservation, MatchedPair, Metric, Pollutant, SatellitePixel};
pub use processors::pipeline::{run_validation, ValidationOutput};
pub use processors::report_assembler::ValidationReport;
pub use readers::{GroundDataset, SatelliteDataset};
