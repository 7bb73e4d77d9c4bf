use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analyzers::sensitivity::{SensitivityAnalysis, SensitivityCell};
use crate::error::Result;
use crate::models::Metric;

/// Write serializable flat rows with a header line.
///
/// The header comes from the first record, so an empty slice yields an empty file.
pub fn write_rows<T: Serialize>(rows: &[T], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<T>, _>>()?;
    Ok(rows)
}

/// Flat form of a sensitivity cell with metric statuses as their own columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityRow {
    pub spatial_radius_km: f64,
    pub temporal_window_hours: f64,
    pub n_pairs: usize,
    pub r_squared: Option<f64>,
    pub r_squared_status: String,
    pub rmse: Option<f64>,
    pub rmse_status: String,
    pub is_headline: bool,
}

impl From<&SensitivityCell> for SensitivityRow {
    fn from(cell: &SensitivityCell) -> Self {
        Self {
            spatial_radius_km: cell.spatial_radius_km,
            temporal_window_hours: cell.temporal_window_hours,
            n_pairs: cell.n_pairs,
            r_squared: flat(&cell.r_squared),
            r_squared_status: cell.r_squared.status().to_string(),
            rmse: flat(&cell.rmse),
            rmse_status: cell.rmse.status().to_string(),
            is_headline: cell.is_headline,
        }
    }
}

fn flat(metric: &Metric<f64>) -> Option<f64> {
    metric.value().copied()
}

pub fn write_sensitivity(analysis: &SensitivityAnalysis, path: &Path) -> Result<()> {
    let rows: Vec<SensitivityRow> = analysis.cells.iter().map(SensitivityRow::from).collect();
    write_rows(&rows, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::cross_validation::{leave_one_group_out, LocoFold, LocoOptions};
    use crate::models::matched::fixtures::pair;
    use crate::models::{GroupBy, MatchedPair};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_matched_pairs_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("pairs.csv");
        let pairs = vec![pair("Toronto", "CANADA", 10.0, 12.5), pair("Boston", "NYC", 7.0, 6.0)];

        write_rows(&pairs, &path)?;
        let read: Vec<MatchedPair> = read_rows(&path)?;
        assert_eq!(read, pairs);

        let text = std::fs::read_to_string(&path)?;
        assert!(text.starts_with("ground_ref,satellite_ref,station_id,city"));
        Ok(())
    }

    #[test]
    fn test_loco_rows_keep_skipped_folds() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("loco.csv");
        let pairs: Vec<MatchedPair> = (0..3).map(|i| pair("Toronto", "CANADA", i as f64, i as f64)).collect();
        let options = LocoOptions {
            min_train: 10,
            min_test: 5,
            variance_ratio: None,
        };
        let summary = leave_one_group_out(&pairs, GroupBy::City, &options);

        write_rows(&summary.folds, &path)?;
        let read: Vec<LocoFold> = read_rows(&path)?;
        assert_eq!(read.len(), 1);
        assert!(read[0].is_skipped());
        assert_eq!(read[0].rmse_raw, None);
        Ok(())
    }

    #[test]
    fn test_sensitivity_rows_flatten_metrics() {
        let cell = SensitivityCell {
            spatial_radius_km: 10.0,
            temporal_window_hours: 1.0,
            n_pairs: 4,
            r_squared: Metric::insufficient(4, 11),
            rmse: Metric::computed(1.5),
            is_headline: false,
        };
        let row = SensitivityRow::from(&cell);

        assert_eq!(row.r_squared, None);
        assert_eq!(row.r_squared_status, "insufficient");
        assert_eq!(row.rmse, Some(1.5));
        assert_eq!(row.rmse_status, "computed");
    }
}
