//! Weapon Sentinel
//!
//! Real-time weapon detection over a live camera feed.
//!
//! # Architecture
//!
//! A capture thread pulls frames from a [`FrameSource`] into a capacity-1 slot. A
//! coordinator thread runs one [`DetectionEngine`] call at a time on the newest frame,
//! keeps only weapon classes above the confidence threshold, classifies the result with
//! [`AlertClassifier`], and fans out:
//!
//! - annotated frame to the render slot (latest wins)
//! - non-empty results to [`HistoryStore`], the alert queue and the persistence worker
//!
//! Slow inference never backs up capture, and slow storage never backs up detection.
//! [`Pipeline::stop`] closes a publish gate so nothing is delivered afterwards.
//!
//! # Module Structure
//!
//! - `frame`: captured images, pipeline frames, overlay drawing
//! - `ingest`: frame sources (synthetic `stub://`, V4L2)
//! - `detect`: engine contract, weapon filter, model factory, backends
//! - `alert`: alert levels, thresholds, classification, detection events
//! - `history`: in-memory event log and statistics
//! - `storage`: persistence sinks (SQLite, in-memory)
//! - `export` / `stills`: JSON export and JPEG stills
//! - `pipeline`: threads, hand-off slots and the control surface
//! - `config`: file and environment configuration

pub mod alert;
pub mod config;
pub mod detect;
pub mod error;
pub mod export;
pub mod frame;
pub mod history;
pub mod ingest;
pub mod pipeline;
pub mod stills;
pub mod storage;

pub use alert::{AlertClassifier, AlertLevel, AlertSummary, AlertThresholds, DetectionEvent};
pub use config::{DetectionSettings, EngineBackend, SentinelConfig};
pub use detect::{build_engine, Detection, DetectionEngine, SyntheticEngine, WeaponFilter};
pub use error::{
    CaptureError, ConfigError, ExportError, InferenceError, PersistError, PipelineError,
    StillError,
};
pub use export::{ExportRecord, ExportService};
pub use frame::{CapturedImage, Frame, RenderFrame};
pub use history::{HistoryStats, HistoryStore};
pub use ingest::{build_source, FrameSource, SourceStats, SyntheticSource};
pub use pipeline::{
    Components, LatestSlot, Pipeline, PipelineEvent, PipelineState, PipelineStatistics, Taken,
};
pub use stills::StillWriter;
pub use storage::{
    open_sink, DetectionRecord, InMemoryDetectionStore, PersistenceSink, SqliteDetectionStore,
    StoredDetection,
};
