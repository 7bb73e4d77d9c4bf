pub mod constants;
pub mod coordinates;
pub mod filename;
pub mod progress;

pub use constants::*;
pub use coordinates::{haversine_distance, haversine_pairwise, haversine_to_many, is_valid_coordinate};
pub use filename::{generate_default_output_dir, region_from_filename};
pub use progress::ProgressReporter;
