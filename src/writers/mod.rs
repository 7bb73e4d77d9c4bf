pub mod csv_writer;
pub mod json_writer;
pub mod parquet_writer;

pub use csv_writer::{read_rows, write_rows, write_sensitivity, SensitivityRow};
pub use json_writer::{read_report, write_report};
pub use parquet_writer::{ParquetFileInfo, ParquetWriter};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ProcessingError, Result};
use crate::models::MatchedPair;
use crate::processors::pipeline::ValidationOutput;
use crate::utils::constants::{
    AGREEMENT_SUMMARY_FILE, DEFAULT_MIN_GROUP_PAIRS, LOCO_RESULTS_FILE, MATCHED_PAIRS_FILE,
    REPORT_FILE, SENSITIVITY_RESULTS_FILE,
};

/// Table format of the matched pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairsFormat {
    #[default]
    Csv,
    Parquet,
}

impl PairsFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(PairsFormat::Csv),
            "parquet" => Ok(PairsFormat::Parquet),
            other => Err(ProcessingError::Config(format!(
                "Unsupported pairs format: {}",
                other
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PairsFormat::Csv => "csv",
            PairsFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for PairsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Writes every artifact of a run into one directory
pub struct ArtifactWriter {
    output_dir: PathBuf,
    pairs_format: PairsFormat,
    parquet: ParquetWriter,
    min_group_pairs: usize,
}

/// Paths of the files one run produced
#[derive(Debug, Clone, Default)]
pub struct WrittenArtifacts {
    pub matched_pairs: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub agreement_summary: Option<PathBuf>,
    pub loco_results: Option<PathBuf>,
    pub sensitivity_results: Option<PathBuf>,
}

impl WrittenArtifacts {
    pub fn paths(&self) -> Vec<&Path> {
        [
            &self.matched_pairs,
            &self.report,
            &self.agreement_summary,
            &self.loco_results,
            &self.sensitivity_results,
        ]
        .into_iter()
        .flatten()
        .map(PathBuf::as_path)
        .collect()
    }
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pairs_format: PairsFormat::Csv,
            parquet: ParquetWriter::new(),
            min_group_pairs: DEFAULT_MIN_GROUP_PAIRS,
        }
    }

    pub fn with_pairs_format(mut self, format: PairsFormat) -> Self {
        self.pairs_format = format;
        self
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.parquet = self.parquet.with_compression(compression)?;
        Ok(self)
    }

    pub fn with_min_group_pairs(mut self, min_group_pairs: usize) -> Self {
        self.min_group_pairs = min_group_pairs;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn matched_pairs_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}",
            MATCHED_PAIRS_FILE,
            self.pairs_format.extension()
        ))
    }

    pub fn write_pairs(&self, pairs: &[MatchedPair]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.matched_pairs_path();
        match self.pairs_format {
            PairsFormat::Csv => write_rows(pairs, &path)?,
            PairsFormat::Parquet => self.parquet.write_pairs(pairs, &path)?,
        }
        info!("Wrote {} matched pairs to {}", pairs.len(), path.display());
        Ok(path)
    }

    /// Matched pairs, JSON report and the per-group, LOCO and sensitivity tables
    pub fn write_all(&self, output: &ValidationOutput) -> Result<WrittenArtifacts> {
        let report = &output.report;
        let mut written = WrittenArtifacts {
            matched_pairs: Some(self.write_pairs(&output.matched_pairs)?),
            ..Default::default()
        };

        let report_path = self.output_dir.join(REPORT_FILE);
        write_report(report, &report_path)?;
        written.report = Some(report_path);

        let summary_path = self.output_dir.join(AGREEMENT_SUMMARY_FILE);
        write_rows(&report.agreement_summary_rows(self.min_group_pairs), &summary_path)?;
        written.agreement_summary = Some(summary_path);

        let loco_path = self.output_dir.join(LOCO_RESULTS_FILE);
        write_rows(&report.cross_validation.folds, &loco_path)?;
        written.loco_results = Some(loco_path);

        if let Some(sensitivity) = &report.sensitivity {
            let path = self.output_dir.join(SENSITIVITY_RESULTS_FILE);
            write_sensitivity(sensitivity, &path)?;
            written.sensitivity_results = Some(path);
        }

        info!(
            "Wrote {} artifacts to {}",
            written.paths().len(),
            self.output_dir.display()
        );
        Ok(written)
    }
}
