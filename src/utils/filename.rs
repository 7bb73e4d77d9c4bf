use chrono::{Datelike, Local};
use std::path::{Path, PathBuf};

/// Generate default output directory with format: output/tempo-validation-{YYMMDD}
pub fn generate_default_output_dir() -> PathBuf {
    let now = Local::now();
    let year = now.year() % 100; // Get last 2 digits of year
    let month = now.month();
    let day = now.day();

    let dirname = format!("tempo-validation-{:02}{:02}{:02}", year, month, day);
    PathBuf::from("output").join(dirname)
}

/// Infer a satellite region key from a file name such as `CANADA_FULL_Pollutant.csv`
pub fn region_from_filename(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let region = stem.split('_').next()?.trim();

    if region.is_empty() {
        None
    } else {
        Some(region.to_uppercase())
    }
}
