use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Pipeline counters, updated lock-free from the worker threads.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    capture_errors: AtomicU64,
    inferences: AtomicU64,
    inference_failures: AtomicU64,
    invalid_detections: AtomicU64,
    events_published: AtomicU64,
    events_evicted: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    stills_saved: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    /// Frames overwritten before the coordinator picked them up.
    pub frames_dropped: u64,
    pub capture_errors: u64,
    pub inferences: u64,
    pub inference_failures: u64,
    pub invalid_detections: u64,
    pub events_published: u64,
    /// Undelivered events discarded because the queue reached the history cap.
    pub events_evicted: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub stills_saved: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub(crate) fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    counter!(frame_captured, frames_captured);
    counter!(frame_dropped, frames_dropped);
    counter!(capture_error, capture_errors);
    counter!(inference, inferences);
    counter!(inference_failed, inference_failures);
    counter!(event_published, events_published);
    counter!(event_evicted, events_evicted);
    counter!(persist_ok, persisted);
    counter!(persist_failed, persist_failures);
    counter!(still_saved, stills_saved);

    pub(crate) fn invalid_detections(&self, n: usize) {
        self.invalid_detections
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_captured: get(&self.frames_captured),
            frames_dropped: get(&self.frames_dropped),
            capture_errors: get(&self.capture_errors),
            inferences: get(&self.inferences),
            inference_failures: get(&self.inference_failures),
            invalid_detections: get(&self.invalid_detections),
            events_published: get(&self.events_published),
            events_evicted: get(&self.events_evicted),
            persisted: get(&self.persisted),
            persist_failures: get(&self.persist_failures),
            stills_saved: get(&self.stills_saved),
        }
    }
}
