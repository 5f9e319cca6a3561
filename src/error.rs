//! Error taxonomy for the detection pipeline.
//!
//! Failures are scoped to where they can be handled:
//! - `CaptureError`: the frame source. Transient errors are retried by the capture loop;
//!   `DeviceUnavailable` and exhausted retries halt the pipeline.
//! - `InferenceError`: one inference cycle. The cycle counts as zero detections.
//! - `PersistError`: the persistence worker. Logged; display and history are unaffected.
//! - `ExportError` / `StillError`: returned synchronously to the control caller.
//! - `ConfigError`: rejected settings. The previous value stays in effect.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device {device:?} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },
    #[error("transient capture failure: {0}")]
    Transient(String),
    #[error("capture device reached end of stream")]
    EndOfStream,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl CaptureError {
    pub fn unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference backend {backend} failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
    #[error("frame {width}x{height} rejected by engine: {reason}")]
    UnsupportedFrame {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("model {path} could not be loaded: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("metadata encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: detection history is empty")]
    NothingToExport,
    #[error("export i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("export encoding failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StillError {
    #[error("pipeline is not running")]
    NotRunning,
    #[error("no frame arrived within {0} ms")]
    Timeout(u64),
    #[error("frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("still i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be within {min}..={max} (got {value})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline already started")]
    AlreadyStarted,
    #[error("pipeline has been stopped and cannot be restarted")]
    Stopped,
    #[error("capture device failure: {0}")]
    Device(#[from] CaptureError),
    #[error("detection engine unavailable: {0}")]
    Engine(#[from] InferenceError),
    #[error("persistence sink unavailable: {0}")]
    Storage(#[from] PersistError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
