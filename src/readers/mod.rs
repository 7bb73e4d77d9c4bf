pub mod concurrent_reader;
pub mod ground_reader;
pub mod satellite_reader;
pub mod source;

pub use concurrent_reader::{ConcurrentReader, SatelliteSource};
pub use ground_reader::{GroundDataset, GroundReader};
pub use satellite_reader::{SatelliteDataset, SatelliteReader};
pub use source::{load_source, parse_timestamp, InputChecksum, SourceFile};
