use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::Serialize;

use crate::alert::DetectionEvent;
use crate::export::{write_atomic, ExportRecord};
use crate::error::StillError;
use crate::frame::Frame;

const JPEG_QUALITY: u8 = 90;

/// Writes JPEG stills for operator captures and High alerts.
#[derive(Clone, Debug)]
pub struct StillWriter {
    captures_dir: PathBuf,
}

#[derive(Serialize)]
struct AlertMetadata<'a> {
    image_path: &'a str,
    frame_seq: u64,
    total_weapons: usize,
    #[serde(flatten)]
    record: ExportRecord,
}

impl StillWriter {
    pub fn new(captures_dir: impl Into<PathBuf>) -> Self {
        Self {
            captures_dir: captures_dir.into(),
        }
    }

    pub fn captures_dir(&self) -> &Path {
        &self.captures_dir
    }

    /// `weapon_capture_<stamp>_<seq>.jpg`
    pub fn save_capture(&self, frame: &Frame) -> Result<PathBuf, StillError> {
        let name = format!("weapon_capture_{}_{}.jpg", stamp(frame.captured_at), frame.seq);
        self.write_jpeg(&name, frame)
    }

    /// Writes the annotated alert frame plus a `_metadata.json` sidecar describing the event.
    pub fn save_alert(&self, frame: &Frame, event: &DetectionEvent) -> Result<PathBuf, StillError> {
        let base = format!("weapon_detection_{}_{}", stamp(event.timestamp()), frame.seq);
        let image_path = self.write_jpeg(&format!("{}.jpg", base), frame)?;

        let image_text = image_path.to_string_lossy();
        let metadata = AlertMetadata {
            image_path: &image_text,
            frame_seq: frame.seq,
            total_weapons: event.weapon_count(),
            record: ExportRecord::from_event(event),
        };
        let metadata_path = self.captures_dir.join(format!("{}_metadata.json", base));
        let json = serde_json::to_vec_pretty(&metadata).map_err(|e| StillError::Io {
            path: metadata_path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        write_atomic(&metadata_path, &json).map_err(|source| StillError::Io {
            path: metadata_path.clone(),
            source,
        })?;
        Ok(image_path)
    }

    fn write_jpeg(&self, file_name: &str, frame: &Frame) -> Result<PathBuf, StillError> {
        fs::create_dir_all(&self.captures_dir).map_err(|source| StillError::Io {
            path: self.captures_dir.clone(),
            source,
        })?;
        let bytes = encode_jpeg(frame)?;
        let path = self.captures_dir.join(file_name);
        write_atomic(&path, &bytes).map_err(|source| StillError::Io {
            path: path.clone(),
            source,
        })?;
        log::debug!("wrote still {}", path.display());
        Ok(path)
    }
}

pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, StillError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode(
        frame.pixels(),
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

fn stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d_%H%M%S_%3f").to_string()
}
