#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use weapon_sentinel::error::{CaptureError, InferenceError, PersistError};
use weapon_sentinel::{
    CapturedImage, Components, Detection, DetectionEngine, DetectionRecord, Frame, FrameSource,
    PersistenceSink, SentinelConfig, SourceStats,
};

pub const FRAME_WIDTH: u32 = 32;
pub const FRAME_HEIGHT: u32 = 24;

/// Configuration rooted in `dir`, with fast retries and no database.
pub fn test_config(dir: &Path) -> SentinelConfig {
    let mut cfg = SentinelConfig::default();
    cfg.capture.device = "scripted://test".to_string();
    cfg.capture.width = FRAME_WIDTH;
    cfg.capture.height = FRAME_HEIGHT;
    cfg.capture.max_retries = 2;
    cfg.capture.retry_backoff = Duration::from_millis(1);
    cfg.storage.db_path = None;
    cfg.output.captures_dir = dir.join("captures");
    cfg.output.exports_dir = dir.join("exports");
    cfg.output.save_on_alert = false;
    cfg.output.still_timeout = Duration::from_secs(2);
    cfg
}

pub fn components(
    source: ScriptedSource,
    engine: ScriptedEngine,
    sink: RecordingSink,
) -> Components {
    Components {
        source: Box::new(source),
        engine: Box::new(engine),
        sink: Box::new(sink),
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn detection(class_name: &str, confidence: f32) -> Detection {
    Detection::new([2, 2, 12, 12], confidence, 0, class_name).expect("valid detection")
}

#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Transient,
    Unavailable,
}

/// Counter-driven frame source with optional pacing, stream end and failure injection.
pub struct ScriptedSource {
    interval: Duration,
    max_frames: Option<u64>,
    fail_after: Option<(u64, Failure)>,
    fail_open: bool,
    produced: Arc<AtomicU64>,
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_frames: None,
            fail_after: None,
            fail_open: false,
            produced: Arc::new(AtomicU64::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn max_frames(mut self, n: u64) -> Self {
        self.max_frames = Some(n);
        self
    }

    /// Every call after `frames` successful frames fails with `failure`.
    pub fn fail_after(mut self, frames: u64, failure: Failure) -> Self {
        self.fail_after = Some((frames, failure));
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn produced(&self) -> Arc<AtomicU64> {
        self.produced.clone()
    }

    pub fn released(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl FrameSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted://test".to_string()
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if self.fail_open {
            return Err(CaptureError::unavailable("scripted://test", "no such device"));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CapturedImage, CaptureError> {
        std::thread::sleep(self.interval);
        let n = self.produced.load(Ordering::SeqCst);
        if let Some((after, failure)) = self.fail_after {
            if n >= after {
                return Err(match failure {
                    Failure::Transient => CaptureError::Transient("read timed out".into()),
                    Failure::Unavailable => {
                        CaptureError::unavailable("scripted://test", "unplugged")
                    }
                });
            }
        }
        if self.max_frames.is_some_and(|max| n >= max) {
            return Err(CaptureError::EndOfStream);
        }
        self.produced.fetch_add(1, Ordering::SeqCst);
        let shade = (n % 256) as u8;
        let pixels = vec![shade; (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize];
        CapturedImage::from_rgb(FRAME_WIDTH, FRAME_HEIGHT, pixels)
    }

    fn close(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced.load(Ordering::SeqCst),
            device: self.describe(),
        }
    }
}

type Respond = Box<dyn FnMut(u64, f32) -> Result<Vec<Detection>, InferenceError> + Send>;

/// Engine whose output is a function of the frame sequence id and threshold.
///
/// Every call is recorded as `(seq, threshold)`. With a gate installed, each call
/// announces itself on `entered` and then waits for a message on `release`; once the
/// release sender is dropped, calls no longer block.
pub struct ScriptedEngine {
    respond: Respond,
    delay: Duration,
    calls: Arc<Mutex<Vec<(u64, f32)>>>,
    gate: Option<(Sender<u64>, Receiver<()>)>,
}

impl ScriptedEngine {
    pub fn new(
        respond: impl FnMut(u64, f32) -> Result<Vec<Detection>, InferenceError> + Send + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// Returns the same detections on every call.
    pub fn always(detections: Vec<Detection>) -> Self {
        Self::new(move |_, _| Ok(detections.clone()))
    }

    pub fn empty() -> Self {
        Self::always(Vec::new())
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns `(entered, release)`.
    pub fn gated(&mut self) -> (Receiver<u64>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        self.gate = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<(u64, f32)>>> {
        self.calls.clone()
    }
}

impl DetectionEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, InferenceError> {
        self.calls
            .lock()
            .unwrap()
            .push((frame.seq, confidence_threshold));
        if let Some((entered, release)) = &self.gate {
            let _ = entered.send(frame.seq);
            let _ = release.recv();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        (self.respond)(frame.seq, confidence_threshold)
    }
}

/// Sink that records every row it is given, or rejects them all.
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<DetectionRecord>>>,
    failing: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl PersistenceSink for RecordingSink {
    fn describe(&self) -> String {
        "recording".to_string()
    }

    fn persist(&mut self, record: &DetectionRecord) -> Result<i64, PersistError> {
        if self.failing {
            return Err(PersistError::Unavailable("disk full".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(records.len() as i64)
    }
}
