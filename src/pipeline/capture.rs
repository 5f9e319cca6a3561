//! Capture producer.
//!
//! Pulls frames from the source as fast as the device delivers them, stamps sequence ids
//! and acquisition time, and overwrites the coordinator's input slot. It never waits on
//! the coordinator.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;

use super::slot::LatestSlot;
use super::Shared;
use crate::error::{CaptureError, PipelineError};
use crate::frame::Frame;
use crate::ingest::FrameSource;

pub(crate) struct CaptureLoop {
    pub source: Box<dyn FrameSource>,
    pub output: Arc<LatestSlot<Frame>>,
    pub shared: Arc<Shared>,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl CaptureLoop {
    pub(crate) fn spawn(self) -> Result<JoinHandle<()>, PipelineError> {
        std::thread::Builder::new()
            .name("sentinel-capture".to_string())
            .spawn(move || self.run())
            .map_err(|source| PipelineError::Spawn {
                name: "capture",
                source,
            })
    }

    fn run(mut self) {
        let device = self.source.describe();
        let mut seq: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        let failure = loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                break None;
            }
            match self.source.next_frame() {
                Ok(image) => {
                    consecutive_failures = 0;
                    let frame = Frame::new(seq, Utc::now(), image);
                    seq += 1;
                    self.shared.stats.frame_captured();
                    if self.output.publish(frame) {
                        self.shared.stats.frame_dropped();
                        log::trace!("frame {} superseded an unprocessed frame", seq - 1);
                    }
                }
                Err(err @ (CaptureError::Transient(_) | CaptureError::InvalidFrame(_))) => {
                    self.shared.stats.capture_error();
                    consecutive_failures += 1;
                    if consecutive_failures > self.max_retries {
                        break Some(CaptureError::unavailable(
                            device.clone(),
                            format!("{} consecutive failures, last: {}", consecutive_failures, err),
                        ));
                    }
                    log::warn!(
                        "capture from {} failed ({}/{}): {}",
                        device,
                        consecutive_failures,
                        self.max_retries,
                        err
                    );
                    std::thread::sleep(self.retry_backoff);
                }
                Err(err) => break Some(err),
            }
        };

        match &failure {
            None => log::info!("capture stopped ({} frames from {})", seq, device),
            Some(CaptureError::EndOfStream) => log::info!("{} reached end of stream", device),
            Some(err) => log::error!("capture halted: {}", err),
        }
        // Halt reason is set before the slot closes; the coordinator announces it
        // once the last pending frame is handled.
        if let Some(err) = failure {
            self.shared.halt(err.to_string());
        }
        self.source.close();
        self.output.close(false);
    }
}
