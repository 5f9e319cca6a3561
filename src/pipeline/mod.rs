//! Real-time detection pipeline.
//!
//! Three threads are spawned by [`Pipeline::start`]:
//!
//! - capture: owns the `FrameSource`, overwrites a capacity-1 slot with every new frame
//! - coordinator: owns the `DetectionEngine`, runs one inference at a time on the newest
//!   frame and fans results out
//! - persistence: owns the `PersistenceSink` and writes events off the detection path
//!
//! The host (presentation/control context) reads annotated frames from
//! [`Pipeline::frames`], alerts from [`Pipeline::events`], and drives the pipeline through
//! the control methods. Detection settings and history are shared behind mutexes; every
//! delivery to a sink passes through a publish gate that `stop()` closes.

mod capture;
mod coordinator;
mod gate;
mod persistence;
mod slot;
mod stats;

pub use slot::{LatestSlot, Taken};
pub use stats::{PipelineStats, StatsSnapshot};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::alert::{AlertThresholds, DetectionEvent};
use crate::config::{validate_confidence, CaptureSettings, DetectionSettings, SentinelConfig};
use crate::detect::{build_engine, DetectionEngine};
use crate::error::{ConfigError, ExportError, PipelineError, StillError};
use crate::export::ExportService;
use crate::frame::{Frame, RenderFrame};
use crate::history::{HistoryStats, HistoryStore};
use crate::ingest::{build_source, FrameSource};
use crate::stills::StillWriter;
use crate::storage::{open_sink, PersistenceSink};

use capture::CaptureLoop;
use coordinator::Coordinator;
use gate::PublishGate;
use persistence::PersistenceWorker;

/// How long `stop()` waits for the coordinator before detaching it.
const COORDINATOR_GRACE: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Detecting,
    Passthrough,
    Stopped,
}

#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// A non-empty detection cycle, already appended to history.
    Alert(Arc<DetectionEvent>),
    /// Capture ended with a device failure or end of stream. Follows every alert of the run.
    Halted { reason: String },
}

/// The collaborators a pipeline runs with. Built from configuration, or by hand in tests.
pub struct Components {
    pub source: Box<dyn FrameSource>,
    pub engine: Box<dyn DetectionEngine>,
    pub sink: Box<dyn PersistenceSink>,
}

impl Components {
    pub fn from_config(config: &SentinelConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            source: build_source(&config.capture)?,
            engine: build_engine(&config.engine)?,
            sink: open_sink(&config.storage)?,
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct PipelineStatistics {
    pub history: HistoryStats,
    pub counters: StatsSnapshot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Delivered queue for alerts. When history is capped the queue shares the cap and
/// evicts its oldest undelivered entry instead of growing.
struct EventQueue {
    tx: Sender<PipelineEvent>,
    rx: Receiver<PipelineEvent>,
    capped: bool,
}

impl EventQueue {
    fn new(cap: Option<usize>) -> Self {
        let (tx, rx) = match cap {
            Some(cap) => bounded(cap.max(1)),
            None => unbounded(),
        };
        Self {
            tx,
            rx,
            capped: cap.is_some(),
        }
    }

    fn push(&self, mut event: PipelineEvent, stats: &PipelineStats) {
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) if self.capped => {
                    if self.rx.try_recv().is_ok() {
                        stats.event_evicted();
                    }
                    event = back;
                }
                Err(_) => return,
            }
        }
    }
}

pub(crate) struct Shared {
    settings: Mutex<DetectionSettings>,
    history: Mutex<HistoryStore>,
    phase: Mutex<Phase>,
    halt_reason: Mutex<Option<String>>,
    still_requests: Mutex<Vec<Sender<Frame>>>,
    events: EventQueue,
    pub(crate) gate: PublishGate,
    pub(crate) shutdown: AtomicBool,
    pub(crate) stats: Arc<PipelineStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    pub(crate) fn detection_settings(&self) -> DetectionSettings {
        lock(&self.settings).clone()
    }

    pub(crate) fn record_event(&self, event: Arc<DetectionEvent>) {
        lock(&self.history).append(event);
    }

    pub(crate) fn push_event(&self, event: PipelineEvent) {
        self.events.push(event, &self.stats);
    }

    pub(crate) fn take_still_requests(&self) -> Vec<Sender<Frame>> {
        std::mem::take(&mut *lock(&self.still_requests))
    }

    pub(crate) fn halt_reason(&self) -> Option<String> {
        lock(&self.halt_reason).clone()
    }

    pub(crate) fn halt(&self, reason: String) {
        *lock(&self.halt_reason) = Some(reason);
        *lock(&self.phase) = Phase::Stopped;
    }
}

struct Runtime {
    capture: Option<JoinHandle<()>>,
    coordinator: Option<JoinHandle<()>>,
    persistence: Option<PersistenceWorker>,
    input: Arc<LatestSlot<Frame>>,
}

/// Control surface for the detection pipeline.
pub struct Pipeline {
    shared: Arc<Shared>,
    frames: Arc<LatestSlot<RenderFrame>>,
    runtime: Option<Runtime>,
    exports: ExportService,
    stills: StillWriter,
    capture_settings: CaptureSettings,
    save_on_alert: bool,
    still_timeout: Duration,
}

impl Pipeline {
    pub fn new(config: &SentinelConfig) -> Result<Self, PipelineError> {
        config.detection.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                settings: Mutex::new(config.detection.clone()),
                history: Mutex::new(HistoryStore::with_limit(config.history.max_events)),
                phase: Mutex::new(Phase::Idle),
                halt_reason: Mutex::new(None),
                still_requests: Mutex::new(Vec::new()),
                events: EventQueue::new(config.history.max_events),
                gate: PublishGate::new(),
                shutdown: AtomicBool::new(false),
                stats: Arc::new(PipelineStats::default()),
            }),
            frames: Arc::new(LatestSlot::new()),
            runtime: None,
            exports: ExportService::new(&config.output.exports_dir),
            stills: StillWriter::new(&config.output.captures_dir),
            capture_settings: config.capture.clone(),
            save_on_alert: config.output.save_on_alert,
            still_timeout: config.output.still_timeout,
        })
    }

    /// Opens the source, then starts the persistence worker, coordinator and capture
    /// threads. A source that cannot be opened is reported here and nothing is started.
    pub fn start(&mut self, components: Components) -> Result<(), PipelineError> {
        match *lock(&self.shared.phase) {
            Phase::Idle => {}
            Phase::Running => return Err(PipelineError::AlreadyStarted),
            Phase::Stopped => return Err(PipelineError::Stopped),
        }
        let Components {
            mut source,
            engine,
            sink,
        } = components;

        source.open()?;
        log::info!("capture source opened: {}", source.describe());

        let stills = self.save_on_alert.then(|| self.stills.clone());
        let persistence = match PersistenceWorker::spawn(sink, stills, self.shared.stats.clone()) {
            Ok(worker) => worker,
            Err(err) => {
                source.close();
                return Err(err);
            }
        };
        let input = Arc::new(LatestSlot::new());
        // Before the threads exist, so a capture thread that halts at once is not overwritten.
        *lock(&self.shared.phase) = Phase::Running;

        let coordinator = Coordinator {
            engine,
            input: input.clone(),
            render: self.frames.clone(),
            persist: persistence.queue(),
            shared: self.shared.clone(),
            save_on_alert: self.save_on_alert,
        }
        .spawn();
        let coordinator = match coordinator {
            Ok(handle) => handle,
            Err(err) => {
                source.close();
                *lock(&self.shared.phase) = Phase::Idle;
                return Err(err);
            }
        };

        let capture = CaptureLoop {
            source,
            output: input.clone(),
            shared: self.shared.clone(),
            max_retries: self.capture_settings.max_retries,
            retry_backoff: self.capture_settings.retry_backoff,
        }
        .spawn();
        let capture = match capture {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.shutdown.store(true, Ordering::SeqCst);
                input.close(true);
                persistence.shutdown();
                *lock(&self.shared.phase) = Phase::Stopped;
                return Err(err);
            }
        };

        self.runtime = Some(Runtime {
            capture: Some(capture),
            coordinator: Some(coordinator),
            persistence: Some(persistence),
            input,
        });
        log::info!("pipeline started ({:?})", self.state());
        Ok(())
    }

    /// Stops the pipeline. Idempotent.
    ///
    /// Nothing reaches the render slot, history, event queue or persistence worker after
    /// this returns. An inference call still in flight is left to finish on its own thread
    /// and its result is discarded. The capture device is released before the persistence
    /// sink.
    pub fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.gate.close();
        self.frames.close(false);
        *lock(&self.shared.phase) = Phase::Stopped;
        lock(&self.shared.still_requests).clear();

        let Some(mut runtime) = self.runtime.take() else {
            return;
        };
        runtime.input.close(true);

        if let Some(capture) = runtime.capture.take() {
            if capture.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
        if let Some(persistence) = runtime.persistence.take() {
            persistence.shutdown();
        }
        if let Some(coordinator) = runtime.coordinator.take() {
            let deadline = Instant::now() + COORDINATOR_GRACE;
            while !coordinator.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if coordinator.is_finished() {
                if coordinator.join().is_err() {
                    log::error!("coordinator thread panicked");
                }
            } else {
                log::debug!("inference still in flight; coordinator detached");
            }
        }
        log::info!("pipeline stopped");
    }

    pub fn state(&self) -> PipelineState {
        match *lock(&self.shared.phase) {
            Phase::Idle => PipelineState::Idle,
            Phase::Stopped => PipelineState::Stopped,
            Phase::Running => {
                if lock(&self.shared.settings).enabled {
                    PipelineState::Detecting
                } else {
                    PipelineState::Passthrough
                }
            }
        }
    }

    /// Why capture ended on its own, if it did.
    pub fn halt_reason(&self) -> Option<String> {
        self.shared.halt_reason()
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        lock(&self.shared.settings).enabled = enabled;
        log::info!("detection {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Applies from the next inference call. Out-of-range values leave the threshold as is.
    pub fn set_confidence(&self, threshold: f32) -> Result<(), ConfigError> {
        validate_confidence(threshold)?;
        lock(&self.shared.settings).confidence_threshold = threshold;
        log::info!("confidence threshold set to {:.2}", threshold);
        Ok(())
    }

    pub fn set_alert_thresholds(&self, thresholds: AlertThresholds) -> Result<(), ConfigError> {
        thresholds.validate()?;
        lock(&self.shared.settings).thresholds = thresholds;
        Ok(())
    }

    pub fn set_weapon_classes(&self, classes: Vec<String>) -> Result<(), ConfigError> {
        let mut candidate = self.detection_settings();
        candidate.weapon_classes = classes;
        candidate.validate()?;
        *lock(&self.shared.settings) = candidate;
        Ok(())
    }

    pub fn detection_settings(&self) -> DetectionSettings {
        self.shared.detection_settings()
    }

    /// Writes a copy of the next acquired frame to the captures directory.
    pub fn capture_still_frame(&self) -> Result<PathBuf, StillError> {
        if *lock(&self.shared.phase) != Phase::Running {
            return Err(StillError::NotRunning);
        }
        let (tx, rx) = bounded(1);
        lock(&self.shared.still_requests).push(tx);
        let frame = rx
            .recv_timeout(self.still_timeout)
            .map_err(|_| StillError::Timeout(self.still_timeout.as_millis() as u64))?;
        let path = self.stills.save_capture(&frame)?;
        self.shared.stats.still_saved();
        log::info!("captured still {}", path.display());
        Ok(path)
    }

    /// Empties the in-memory history. Persisted rows and earlier exports are untouched.
    pub fn clear_history(&self) {
        lock(&self.shared.history).clear();
        log::info!("detection history cleared");
    }

    /// Exports the current history, oldest first.
    pub fn export_history(&self) -> Result<PathBuf, ExportError> {
        let events = lock(&self.shared.history).snapshot();
        self.exports.export(&events)
    }

    /// Events newest first, at most `limit` of them.
    pub fn recent_events(&self, limit: usize) -> Vec<Arc<DetectionEvent>> {
        lock(&self.shared.history)
            .recent_first()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            history: lock(&self.shared.history).statistics(),
            counters: self.shared.stats.snapshot(),
        }
    }

    /// Alert queue for the presentation context.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.shared.events.rx.clone()
    }

    /// Latest annotated frame for the presentation context.
    pub fn frames(&self) -> Arc<LatestSlot<RenderFrame>> {
        self.frames.clone()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.runtime.is_some() {
            self.stop();
        }
    }
}
