//! JSON export of detection history.
//!
//! Output is a pretty-printed array of `{timestamp, summary, detections}` objects in
//! chronological order, written to `<exports_dir>/weapon_detections_<stamp>.json`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertLevel, AlertSummary, DetectionEvent};
use crate::detect::Detection;
use crate::error::{ExportError, PersistError};
use crate::storage::StoredDetection;

const EXPORT_PREFIX: &str = "weapon_detections_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// RFC 3339, UTC, nanosecond precision.
    pub timestamp: String,
    pub summary: AlertSummary,
    pub detections: Vec<Detection>,
}

impl ExportRecord {
    pub fn from_event(event: &DetectionEvent) -> Self {
        Self {
            timestamp: format_timestamp(event.timestamp()),
            summary: event.summary().clone(),
            detections: event.detections().to_vec(),
        }
    }

    /// Rebuilds a record from a persisted row. The stored level is kept as-is.
    pub fn from_stored(row: &StoredDetection) -> Result<Option<Self>, PersistError> {
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| {
                PersistError::Unavailable(format!("row {} has bad timestamp: {}", row.id, e))
            })?
            .with_timezone(&Utc);
        let level: AlertLevel = row.alert_level.parse().map_err(|_| {
            PersistError::Unavailable(format!(
                "row {} has unknown alert level {:?}",
                row.id, row.alert_level
            ))
        })?;
        Ok(DetectionEvent::with_level(timestamp, row.detections()?, level)
            .map(|event| Self::from_event(&event)))
    }
}

pub struct ExportService {
    exports_dir: PathBuf,
}

impl ExportService {
    pub fn new(exports_dir: impl Into<PathBuf>) -> Self {
        Self {
            exports_dir: exports_dir.into(),
        }
    }

    pub fn exports_dir(&self) -> &Path {
        &self.exports_dir
    }

    /// Writes `events` (chronological) and returns the path of the new file.
    pub fn export(&self, events: &[Arc<DetectionEvent>]) -> Result<PathBuf, ExportError> {
        let records: Vec<ExportRecord> = events
            .iter()
            .map(|event| ExportRecord::from_event(event))
            .collect();
        self.write_records(&records, Utc::now())
    }

    pub fn write_records(
        &self,
        records: &[ExportRecord],
        now: DateTime<Utc>,
    ) -> Result<PathBuf, ExportError> {
        if records.is_empty() {
            return Err(ExportError::NothingToExport);
        }
        let json = serde_json::to_vec_pretty(records)?;
        fs::create_dir_all(&self.exports_dir).map_err(|source| ExportError::Io {
            path: self.exports_dir.clone(),
            source,
        })?;
        let path = self.exports_dir.join(export_file_name(now));
        write_atomic(&path, &json).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("exported {} detection event(s) to {}", records.len(), path.display());
        Ok(path)
    }
}

/// RFC 3339 UTC with nanoseconds. Fixed width, so text order matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("{}{}.json", EXPORT_PREFIX, now.format("%Y%m%d_%H%M%S_%3f"))
}

pub fn read_export(path: &Path) -> Result<Vec<ExportRecord>, ExportError> {
    let raw = fs::read(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)
}
