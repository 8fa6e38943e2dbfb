use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

use crate::db::MediaRecord;

/// exiftool tags requested per batch. `-n` forces numeric GPS output, `-q`
/// suppresses the summary line that would corrupt the JSON stream.
const EXIFTOOL_ARGS: &[&str] = &[
    "-json",
    "-n",
    "-q",
    "-GPSLatitude",
    "-GPSLongitude",
    "-GPSAltitude",
    "-DateTimeOriginal",
    "-FileModifyDate",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("unparsable extractor output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Raw per-file output of the extraction tool. Every field other than the
/// source path is optional; absence is a legal response, not an error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetadata {
    #[serde(rename = "SourceFile")]
    pub source_file: String,
    #[serde(rename = "GPSLatitude")]
    pub gps_latitude: Option<f64>,
    #[serde(rename = "GPSLongitude")]
    pub gps_longitude: Option<f64>,
    /// Kept loose: some containers report altitude as a string.
    #[serde(rename = "GPSAltitude")]
    pub gps_altitude: Option<serde_json::Value>,
    #[serde(rename = "DateTimeOriginal")]
    pub date_time_original: Option<String>,
    #[serde(rename = "FileModifyDate")]
    pub file_modify_date: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing GPS coordinates")]
    MissingCoordinates,
    #[error("no usable timestamp")]
    MissingTimestamp,
    #[error("unparsable timestamp: {0}")]
    BadTimestamp(String),
}

/// Turn a raw metadata entry into a well-formed record candidate.
///
/// Both coordinates are required. The temporal key is the capture time,
/// falling back to the file modification time. Altitude is carried only when
/// it is a finite number. `file_modified` is the fs mtime observed during the
/// walk, not whatever the tool reports.
pub fn validate(raw: &RawMetadata, file_modified: i64) -> Result<MediaRecord, ValidationError> {
    let (latitude, longitude) = match (raw.gps_latitude, raw.gps_longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Err(ValidationError::MissingCoordinates),
    };

    let date_str = raw
        .date_time_original
        .as_deref()
        .or(raw.file_modify_date.as_deref())
        .ok_or(ValidationError::MissingTimestamp)?;
    let taken_at = parse_capture_time(date_str)?;

    let altitude = raw
        .gps_altitude
        .as_ref()
        .and_then(|v| v.as_f64())
        .filter(|a| a.is_finite());

    Ok(MediaRecord {
        path: raw.source_file.clone(),
        latitude,
        longitude,
        altitude,
        taken_at,
        file_modified,
    })
}

/// exiftool prints `YYYY:MM:DD HH:MM:SS`, possibly followed by subseconds or
/// a timezone offset. Truncate to second precision before parsing.
fn parse_capture_time(s: &str) -> Result<NaiveDateTime, ValidationError> {
    let head = s
        .get(..19)
        .ok_or_else(|| ValidationError::BadTimestamp(s.to_string()))?;
    NaiveDateTime::parse_from_str(head, "%Y:%m:%d %H:%M:%S")
        .map_err(|_| ValidationError::BadTimestamp(s.to_string()))
}

/// Batched metadata extraction boundary, so tests and alternative tools can
/// stand in for the exiftool binary.
pub trait MetadataSource: Send + Sync {
    fn extract_batch(&self, paths: &[PathBuf]) -> Result<Vec<RawMetadata>, ExtractError>;
}

pub struct ExiftoolExtractor {
    binary: String,
}

impl ExiftoolExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl MetadataSource for ExiftoolExtractor {
    fn extract_batch(&self, paths: &[PathBuf]) -> Result<Vec<RawMetadata>, ExtractError> {
        let output = Command::new(&self.binary)
            .args(EXIFTOOL_ARGS)
            .args(paths)
            .output()
            .map_err(|source| ExtractError::Spawn {
                tool: self.binary.clone(),
                source,
            })?;

        // exiftool exits non-zero when any file in the batch is unreadable
        // but still emits JSON for the rest; trust stdout and let the parse
        // decide whether the batch as a whole is usable.
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
