//! Frame ingestion sources.
//!
//! - Synthetic source for `stub://` devices (demos and tests)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Sources only produce pixels. Sequence ids and acquisition timestamps are stamped by the
//! capture loop in `pipeline::capture`, so every source yields comparable frames.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

use crate::config::CaptureSettings;
use crate::error::CaptureError;
use crate::frame::CapturedImage;

const STUB_PREFIX: &str = "stub://";

/// A camera-like producer of RGB images.
///
/// `next_frame` may block until the device has a frame. Errors are classified so the
/// capture loop can decide between retrying (`Transient`, `InvalidFrame`) and halting
/// (`DeviceUnavailable`, `EndOfStream`).
pub trait FrameSource: Send {
    fn describe(&self) -> String;

    fn open(&mut self) -> Result<(), CaptureError>;

    fn next_frame(&mut self) -> Result<CapturedImage, CaptureError>;

    /// Releases the device. Safe to call more than once.
    fn close(&mut self) {}

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Selects a source for the configured device without opening it.
pub fn build_source(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>, CaptureError> {
    if settings.device.starts_with(STUB_PREFIX) {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(settings.clone())))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(CaptureError::unavailable(
            settings.device.clone(),
            "camera devices require the ingest-v4l2 feature",
        ))
    }
}
