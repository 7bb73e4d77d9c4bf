use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::{ProcessingError, Result};
use crate::models::{Pollutant, SatellitePixel};
use crate::processors::data_cleaner::{CleaningReport, GroundQc};
use crate::readers::source::InputChecksum;
use crate::readers::{GroundDataset, GroundReader, SatelliteDataset, SatelliteReader};
use crate::utils::filename::region_from_filename;

/// One satellite input: region key and file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatelliteSource {
    pub region: String,
    pub path: PathBuf,
}

impl SatelliteSource {
    pub fn new(region: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            region: region.into().to_uppercase(),
            path: path.into(),
        }
    }

    /// Parse `REGION=path`, or infer the region from a bare file name
    pub fn parse(arg: &str) -> Result<Self> {
        if let Some((region, path)) = arg.split_once('=') {
            let region = region.trim();
            if region.is_empty() {
                return Err(ProcessingError::Config(format!(
                    "empty region in satellite source '{}'",
                    arg
                )));
            }
            return Ok(Self::new(region, path.trim()));
        }

        let path = PathBuf::from(arg);
        let region = region_from_filename(&path).ok_or_else(|| {
            ProcessingError::Config(format!(
                "cannot infer a region from '{}', use REGION=path",
                arg
            ))
        })?;
        Ok(Self::new(region, path))
    }
}

/// Loads the ground file and every satellite file concurrently
pub struct ConcurrentReader {
    max_workers: usize,
    parameter: Option<Pollutant>,
    ground_qc: GroundQc,
}

type SatelliteFile = (String, Vec<SatellitePixel>, CleaningReport, InputChecksum);

impl ConcurrentReader {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            parameter: None,
            ground_qc: GroundQc::default(),
        }
    }

    pub fn with_parameter(mut self, parameter: Option<Pollutant>) -> Self {
        self.parameter = parameter;
        self
    }

    pub fn with_ground_qc(mut self, qc: GroundQc) -> Self {
        self.ground_qc = qc;
        self
    }

    /// Read both datasets. Fails when either has no usable rows after cleaning.
    pub async fn read_inputs(
        &self,
        ground_path: &Path,
        satellite_sources: &[SatelliteSource],
    ) -> Result<(GroundDataset, SatelliteDataset)> {
        let ground_path = ground_path.to_path_buf();
        let reader = GroundReader::with_parameter(self.parameter).with_qc(self.ground_qc.clone());
        let ground_handle: JoinHandle<Result<GroundDataset>> =
            tokio::task::spawn_blocking(move || reader.read(&ground_path));

        let sources = satellite_sources.to_vec();
        let max_workers = self.max_workers;
        let satellite_handle: JoinHandle<Result<Vec<SatelliteFile>>> =
            tokio::task::spawn_blocking(move || Self::read_satellite_files(&sources, max_workers));

        let (ground, satellite_files) = tokio::try_join!(ground_handle, satellite_handle)?;
        let ground = ground?;

        let mut satellite = SatelliteDataset::default();
        for (region, pixels, cleaning, checksum) in satellite_files? {
            satellite.insert(&region, pixels, cleaning, Some(checksum));
        }
        if satellite.total_pixels() == 0 {
            return Err(ProcessingError::NoUsableRows(
                "no usable satellite pixels in any input file after cleaning".to_string(),
            ));
        }

        info!(
            "Inputs loaded: {} ground observations, {} satellite pixels across {} regions",
            ground.len(),
            satellite.total_pixels(),
            satellite.pixels_by_region.len()
        );
        Ok((ground, satellite))
    }

    /// Parse satellite files in parallel, keeping input order
    fn read_satellite_files(
        sources: &[SatelliteSource],
        max_workers: usize,
    ) -> Result<Vec<SatelliteFile>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        pool.install(|| {
            sources
                .par_iter()
                .map(|source| {
                    let (pixels, cleaning, checksum) = SatelliteReader::new().read(&source.path)?;
                    Ok((source.region.clone(), pixels, cleaning, checksum))
                })
                .collect::<Result<Vec<_>>>()
        })
    }
}

impl Default for ConcurrentReader {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_satellite_source() {
        let source = SatelliteSource::parse("nyc=data/nyc.csv").unwrap();
        assert_eq!(source.region, "NYC");
        assert_eq!(source.path, PathBuf::from("data/nyc.csv"));

        let source = SatelliteSource::parse("data/CANADA_FULL_Pollutant.csv").unwrap();
        assert_eq!(source.region, "CANADA");

        assert!(SatelliteSource::parse("=x.csv").is_err());
    }

    #[tokio::test]
    async fn test_read_inputs() -> Result<()> {
        let dir = TempDir::new()?;
        let ground = write_file(
            &dir,
            "ground.csv",
            "city,lat,lon,timestamp,parameter,value\n\
             Toronto,43.65,-79.38,2025-06-06 14:00:00,NO2,20\n\
             Toronto,43.65,-79.38,2025-06-06 15:00:00,NO2,-1\n",
        );
        let canada = write_file(
            &dir,
            "canada.csv",
            "lat,lon,time,no2\n43.65,-79.38,2025-06-06 14:10:00,18\n",
        );
        let mexico = write_file(
            &dir,
            "mexico.csv",
            "lat,lon,time,no2\n19.43,-99.13,2025-06-06 14:10:00,-999\n",
        );

        let sources = vec![
            SatelliteSource::new("CANADA", canada),
            SatelliteSource::new("MEXICO", mexico),
        ];
        let (ground, satellite) = ConcurrentReader::new(2).read_inputs(&ground, &sources).await?;

        assert_eq!(ground.len(), 1);
        assert_eq!(ground.cleaning.excluded_rows(), 1);
        assert_eq!(satellite.total_pixels(), 1);
        assert_eq!(satellite.sources.len(), 2);
        assert_eq!(satellite.cleaning["MEXICO"].kept_rows, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_satellite_pixels_is_an_error() -> Result<()> {
        let dir = TempDir::new()?;
        let ground = write_file(
            &dir,
            "ground.csv",
            "city,lat,lon,timestamp,parameter,value\nToronto,43.65,-79.38,2025-06-06 14:00:00,NO2,20\n",
        );
        let empty = write_file(&dir, "canada.csv", "lat,lon,time,no2\n");

        let result = ConcurrentReader::new(1)
            .read_inputs(&ground, &[SatelliteSource::new("CANADA", empty)])
            .await;
        assert!(matches!(result, Err(ProcessingError::NoUsableRows(_))));
        Ok(())
    }
}
