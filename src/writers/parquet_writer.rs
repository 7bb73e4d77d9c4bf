use crate::error::{ProcessingError, Result};
use crate::models::{MatchedPair, Pollutant};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_ROW_GROUP_SIZE,
};
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            COMPRESSION_SNAPPY => Compression::SNAPPY,
            COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
            COMPRESSION_LZ4 => Compression::LZ4,
            COMPRESSION_ZSTD => Compression::ZSTD(ZstdLevel::default()),
            COMPRESSION_NONE => Compression::UNCOMPRESSED,
            _ => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    /// Write matched pairs to a Parquet file. An empty slice writes the schema only.
    pub fn write_pairs(&self, pairs: &[MatchedPair], path: &Path) -> Result<()> {
        self.write_pairs_batched(pairs, path, self.row_group_size)
    }

    /// Write pairs in batches for memory efficiency
    pub fn write_pairs_batched(
        &self,
        pairs: &[MatchedPair],
        path: &Path,
        batch_size: usize,
    ) -> Result<()> {
        let schema = self.create_schema();
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
        for chunk in pairs.chunks(batch_size.max(1)) {
            let batch = self.pairs_to_batch(chunk, schema.clone())?;
            writer.write(&batch)?;
        }

        writer.close()?;
        Ok(())
    }

    /// Arrow schema of the matched-pairs table
    fn create_schema(&self) -> Arc<Schema> {
        let timestamp = DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()));
        let fields = vec![
            Field::new("ground_ref", DataType::UInt64, false),
            Field::new("satellite_ref", DataType::UInt64, false),
            Field::new("station_id", DataType::Utf8, false),
            Field::new("city", DataType::Utf8, false),
            Field::new("region", DataType::Utf8, false),
            Field::new("parameter", DataType::Utf8, false),
            Field::new("satellite_column", DataType::Utf8, false),
            Field::new("ground_time", timestamp.clone(), false),
            Field::new("satellite_time", timestamp, false),
            Field::new("ground_latitude", DataType::Float64, false),
            Field::new("ground_longitude", DataType::Float64, false),
            Field::new("satellite_latitude", DataType::Float64, false),
            Field::new("satellite_longitude", DataType::Float64, false),
            Field::new("distance_km", DataType::Float64, false),
            Field::new("time_diff_hours", DataType::Float64, false),
            Field::new("ground_value", DataType::Float64, false),
            Field::new("satellite_value", DataType::Float64, false),
        ];

        Arc::new(Schema::new(fields))
    }

    /// Convert pairs to an Arrow RecordBatch
    fn pairs_to_batch(&self, pairs: &[MatchedPair], schema: Arc<Schema>) -> Result<RecordBatch> {
        let strings = |f: fn(&MatchedPair) -> &str| -> ArrayRef {
            Arc::new(StringArray::from_iter_values(pairs.iter().map(f)))
        };
        let floats = |f: fn(&MatchedPair) -> f64| -> ArrayRef {
            Arc::new(Float64Array::from_iter_values(pairs.iter().map(f)))
        };
        let times = |f: fn(&MatchedPair) -> DateTime<Utc>| -> ArrayRef {
            Arc::new(
                TimestampMillisecondArray::from_iter_values(
                    pairs.iter().map(|p| f(p).timestamp_millis()),
                )
                .with_timezone("UTC"),
            )
        };

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(UInt64Array::from_iter_values(
                    pairs.iter().map(|p| p.ground_ref as u64),
                )),
                Arc::new(UInt64Array::from_iter_values(
                    pairs.iter().map(|p| p.satellite_ref as u64),
                )),
                strings(|p| &p.station_id),
                strings(|p| &p.city),
                strings(|p| &p.region),
                strings(|p| p.parameter.as_str()),
                strings(|p| &p.satellite_column),
                times(|p| p.ground_time),
                times(|p| p.satellite_time),
                floats(|p| p.ground_latitude),
                floats(|p| p.ground_longitude),
                floats(|p| p.satellite_latitude),
                floats(|p| p.satellite_longitude),
                floats(|p| p.distance_km),
                floats(|p| p.time_diff_hours),
                floats(|p| p.ground_value),
                floats(|p| p.satellite_value),
            ],
        )?;

        Ok(batch)
    }

    /// Read up to `limit` pairs back from a file written by `write_pairs`
    pub fn read_pairs(&self, path: &Path, limit: usize) -> Result<Vec<MatchedPair>> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(limit.clamp(1, 8192))
            .build()?;

        let mut pairs = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;

            let ground_ref = column::<UInt64Array>(&batch, "ground_ref")?;
            let satellite_ref = column::<UInt64Array>(&batch, "satellite_ref")?;
            let station_id = column::<StringArray>(&batch, "station_id")?;
            let city = column::<StringArray>(&batch, "city")?;
            let region = column::<StringArray>(&batch, "region")?;
            let parameter = column::<StringArray>(&batch, "parameter")?;
            let satellite_column = column::<StringArray>(&batch, "satellite_column")?;
            let ground_time = column::<TimestampMillisecondArray>(&batch, "ground_time")?;
            let satellite_time = column::<TimestampMillisecondArray>(&batch, "satellite_time")?;
            let ground_latitude = column::<Float64Array>(&batch, "ground_latitude")?;
            let ground_longitude = column::<Float64Array>(&batch, "ground_longitude")?;
            let satellite_latitude = column::<Float64Array>(&batch, "satellite_latitude")?;
            let satellite_longitude = column::<Float64Array>(&batch, "satellite_longitude")?;
            let distance_km = column::<Float64Array>(&batch, "distance_km")?;
            let time_diff_hours = column::<Float64Array>(&batch, "time_diff_hours")?;
            let ground_value = column::<Float64Array>(&batch, "ground_value")?;
            let satellite_value = column::<Float64Array>(&batch, "satellite_value")?;

            for i in 0..batch.num_rows() {
                if pairs.len() >= limit {
                    return Ok(pairs);
                }
                pairs.push(MatchedPair {
                    ground_ref: ground_ref.value(i) as usize,
                    satellite_ref: satellite_ref.value(i) as usize,
                    station_id: station_id.value(i).to_string(),
                    city: city.value(i).to_string(),
                    region: region.value(i).to_string(),
                    parameter: parameter.value(i).parse::<Pollutant>()?,
                    satellite_column: satellite_column.value(i).to_string(),
                    ground_time: timestamp(ground_time.value(i))?,
                    satellite_time: timestamp(satellite_time.value(i))?,
                    ground_latitude: ground_latitude.value(i),
                    ground_longitude: ground_longitude.value(i),
                    satellite_latitude: satellite_latitude.value(i),
                    satellite_longitude: satellite_longitude.value(i),
                    distance_km: distance_km.value(i),
                    time_diff_hours: time_diff_hours.value(i),
                    ground_value: ground_value.value(i),
                    satellite_value: satellite_value.value(i),
                });
            }
        }

        Ok(pairs)
    }

    /// Get file statistics
    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let row_groups = metadata.num_row_groups();
        let row_group_sizes = (0..row_groups)
            .map(|i| metadata.row_group(i).num_rows())
            .collect();

        Ok(ParquetFileInfo {
            total_rows: metadata.file_metadata().num_rows(),
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size: std::fs::metadata(path)?.len(),
            compression: self.compression,
        })
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|array| array.as_any().downcast_ref::<T>())
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("Invalid or missing {} column", name)))
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("Invalid timestamp: {}", millis)))
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        let avg_rows = if self.row_groups > 0 {
            self.total_rows as f64 / self.row_groups as f64
        } else {
            0.0
        };
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}\n\
            - Avg rows per group: {:.0}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0,
            self.compression,
            avg_rows
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::matched::fixtures::pair;
    use tempfile::NamedTempFile;

    fn pairs(n: usize) -> Vec<MatchedPair> {
        (0..n)
            .map(|i| {
                let mut p = pair("Toronto", "CANADA", 10.0 + i as f64, 9.0 + i as f64);
                p.ground_ref = i;
                p.satellite_ref = i * 2;
                p.distance_km = 1.5;
                p.time_diff_hours = 0.25;
                p
            })
            .collect()
    }

    #[test]
    fn test_write_empty_pairs() -> Result<()> {
        let writer = ParquetWriter::new();
        let temp_file = NamedTempFile::new()?;

        writer.write_pairs(&[], temp_file.path())?;
        assert_eq!(writer.get_file_info(temp_file.path())?.total_rows, 0);
        assert!(writer.read_pairs(temp_file.path(), 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_pairs_read_back() -> Result<()> {
        let writer = ParquetWriter::new().with_row_group_size(4);
        let temp_file = NamedTempFile::new()?;
        let original = pairs(10);

        writer.write_pairs(&original, temp_file.path())?;
        let info = writer.get_file_info(temp_file.path())?;
        assert_eq!(info.total_rows, 10);
        assert_eq!(info.row_groups, 3);

        let read = writer.read_pairs(temp_file.path(), usize::MAX)?;
        assert_eq!(read, original);
        assert_eq!(writer.read_pairs(temp_file.path(), 3)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_different_compressions() -> Result<()> {
        let compressions = ["snappy", "gzip", "lz4", "zstd", "none"];

        for compression in &compressions {
            let writer = ParquetWriter::new().with_compression(compression)?;
            let temp_file = NamedTempFile::new()?;

            let result = writer.write_pairs(&pairs(2), temp_file.path());
            assert!(result.is_ok(), "Failed with compression: {}", compression);
        }

        assert!(ParquetWriter::new().with_compression("brotli-max").is_err());
        Ok(())
    }
}
