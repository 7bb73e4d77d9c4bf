use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use encoding_rs::{UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ProcessingError, Result};

/// Naive layouts accepted after RFC 3339, all read as UTC
const NAIVE_TIMESTAMP_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Identity of one input file, recorded in the run manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputChecksum {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub encoding: String,
}

/// Decoded contents of one input file
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
    pub checksum: InputChecksum,
}

impl SourceFile {
    /// Display name used in error messages
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Read a file, hash its raw bytes and decode it to text
pub fn load_source(path: &Path) -> Result<SourceFile> {
    let bytes = std::fs::read(path)?;
    let (text, encoding) = decode_bytes(&bytes);
    if encoding != UTF_8.name() {
        debug!("{} decoded as {}", path.display(), encoding);
    }

    Ok(SourceFile {
        path: path.to_path_buf(),
        checksum: InputChecksum {
            path: path.display().to_string(),
            sha256: sha256_hex(&bytes),
            bytes: bytes.len() as u64,
            encoding: encoding.to_string(),
        },
        text,
    })
}

/// BOM sniffing first, then UTF-8, then Windows-1252
pub fn decode_bytes(bytes: &[u8]) -> (String, &'static str) {
    let (text, encoding, had_errors) = UTF_8.decode(bytes);
    if !had_errors {
        return (text.into_owned(), encoding.name());
    }

    warn!("input is not valid UTF-8, decoding as {}", WINDOWS_1252.name());
    let (text, encoding, _) = WINDOWS_1252.decode(bytes);
    (text.into_owned(), encoding.name())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Parse RFC 3339 or one of the common naive layouts as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%#z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = raw.trim_end_matches('Z');
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(naive, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Parse a numeric field; empty and unparseable fields are `None`
pub fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else {
        raw.parse::<f64>().ok()
    }
}

/// Header positions keyed by trimmed, lower-cased name
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    positions: HashMap<String, usize>,
    source_name: String,
}

impl HeaderIndex {
    pub fn new(headers: &csv::StringRecord, source_name: &str) -> Self {
        let mut positions = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            positions
                .entry(header.trim().trim_start_matches('\u{feff}').to_lowercase())
                .or_insert(idx);
        }
        Self {
            positions,
            source_name: source_name.to_string(),
        }
    }

    /// First alias present in the header
    pub fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| self.positions.get(*alias).copied())
    }

    /// Like `find`, but a missing column is an error naming the canonical alias
    pub fn require(&self, aliases: &[&str]) -> Result<usize> {
        self.find(aliases).ok_or_else(|| ProcessingError::MissingColumn {
            column: aliases.first().copied().unwrap_or_default().to_string(),
            source_name: self.source_name.clone(),
        })
    }
}

/// Field at `idx`, empty when the row is short
pub fn field(record: &csv::StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or("").trim()
}

pub fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 6, 6, 14, 30, 0).unwrap();
        for raw in [
            "2025-06-06T14:30:00Z",
            "2025-06-06T16:30:00+02:00",
            "2025-06-06 14:30:00",
            "2025-06-06 14:30:00+00:00",
            "2025-06-06T14:30:00",
            "2025-06-06 14:30",
            "2025-06-06T14:30",
            "06/06/2025 14:30",
            " 2025-06-06 14:30:00.000 ",
        ] {
            assert_eq!(parse_timestamp(raw), Some(expected), "{}", raw);
        }
        assert_eq!(
            parse_timestamp("2025-06-06"),
            Some(Utc.with_ymd_and_hms(2025, 6, 6, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_decode_bom_and_legacy_bytes() {
        let (text, encoding) = decode_bytes(b"\xEF\xBB\xBFcity\nMontr\xC3\xA9al");
        assert_eq!(text, "city\nMontréal");
        assert_eq!(encoding, "UTF-8");

        let (text, encoding) = decode_bytes(b"city\nMontr\xE9al");
        assert_eq!(text, "city\nMontréal");
        assert_eq!(encoding, "windows-1252");
    }

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_header_aliases() {
        let headers = csv::StringRecord::from(vec![" Lat ", "LNG", "Value"]);
        let index = HeaderIndex::new(&headers, "ground.csv");
        assert_eq!(index.find(&["latitude", "lat"]), Some(0));
        assert_eq!(index.find(&["longitude", "lon", "lng"]), Some(1));
        assert_eq!(index.require(&["value"]).unwrap(), 2);

        let err = index.require(&["city"]).unwrap_err();
        assert!(err.to_string().contains("'city'"));
        assert!(err.to_string().contains("ground.csv"));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 1.5 "), Some(1.5));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
        assert!(parse_number("NaN").unwrap().is_nan());
    }
}
