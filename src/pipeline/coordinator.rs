//! Detection loop.
//!
//! Takes the newest captured frame, runs the engine synchronously (so at most one call is
//! ever outstanding), filters and classifies the result, then fans out to the render slot,
//! history, the event queue and the persistence worker under the publish gate.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::persistence::PersistQueue;
use super::slot::{LatestSlot, Taken};
use super::{PipelineEvent, Shared};
use crate::alert::AlertLevel;
use crate::detect::DetectionEngine;
use crate::error::PipelineError;
use crate::frame::{Frame, RenderFrame};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct Coordinator {
    pub engine: Box<dyn DetectionEngine>,
    pub input: Arc<LatestSlot<Frame>>,
    pub render: Arc<LatestSlot<RenderFrame>>,
    pub persist: PersistQueue,
    pub shared: Arc<Shared>,
    pub save_on_alert: bool,
}

impl Coordinator {
    pub(crate) fn spawn(self) -> Result<JoinHandle<()>, PipelineError> {
        std::thread::Builder::new()
            .name("sentinel-detect".to_string())
            .spawn(move || self.run())
            .map_err(|source| PipelineError::Spawn {
                name: "coordinator",
                source,
            })
    }

    fn stopping(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    fn run(mut self) {
        log::info!("coordinator started (engine: {})", self.engine.name());
        let mut input_closed = false;
        while !self.stopping() {
            let frame = match self.input.take_timeout(POLL_INTERVAL) {
                Taken::Value(frame) => frame,
                Taken::Empty => continue,
                Taken::Closed => {
                    input_closed = true;
                    break;
                }
            };
            if !self.cycle(frame) {
                break;
            }
        }
        if input_closed {
            self.announce_halt();
        }
        self.render.close(false);
        log::info!("coordinator stopped");
    }

    /// `Halted` goes out after every alert from frames captured before the halt.
    fn announce_halt(&self) {
        let Some(reason) = self.shared.halt_reason() else {
            return;
        };
        self.shared.gate.publish(|| {
            self.shared.push_event(PipelineEvent::Halted { reason });
        });
    }

    /// Processes one frame. Returns false once the gate has closed.
    fn cycle(&mut self, frame: Frame) -> bool {
        self.serve_still_requests(&frame);

        // Captured once per cycle: later control calls only affect later frames.
        let settings = self.shared.detection_settings();
        if !settings.enabled {
            let render = RenderFrame::passthrough(frame);
            return self
                .shared
                .gate
                .publish(|| {
                    self.render.publish(render);
                })
                .is_some();
        }

        let threshold = settings.confidence_threshold;
        self.shared.stats.inference();
        let started = Instant::now();
        let result = self.engine.infer(&frame, threshold);
        let elapsed = started.elapsed();

        if self.stopping() {
            log::debug!("discarding result for frame {} produced after stop", frame.seq);
            return false;
        }

        let detections = match result {
            Ok(raw) => {
                let filtered = settings.filter().apply(raw, threshold);
                if filtered.invalid > 0 {
                    self.shared.stats.invalid_detections(filtered.invalid);
                }
                filtered.kept
            }
            Err(err) => {
                self.shared.stats.inference_failed();
                log::warn!("inference failed on frame {}: {}", frame.seq, err);
                Vec::new()
            }
        };
        log::trace!(
            "frame {}: {} detection(s) in {:?}",
            frame.seq,
            detections.len(),
            elapsed
        );

        let classifier = settings.classifier();
        let level = classifier.level(&detections);
        let event = classifier
            .build_event(frame.captured_at, detections.clone())
            .map(Arc::new);
        let render = RenderFrame::annotated(frame, detections, level);
        let still = match &event {
            Some(_) if self.save_on_alert && level == AlertLevel::High => {
                Some(render.frame.duplicate())
            }
            _ => None,
        };

        self.shared
            .gate
            .publish(|| {
                self.render.publish(render);
                if let Some(event) = event {
                    self.shared.record_event(event.clone());
                    self.shared.push_event(PipelineEvent::Alert(event.clone()));
                    self.persist.submit(event, still);
                    self.shared.stats.event_published();
                }
            })
            .is_some()
    }

    fn serve_still_requests(&self, frame: &Frame) {
        let waiting = self.shared.take_still_requests();
        if waiting.is_empty() {
            return;
        }
        self.shared.gate.publish(|| {
            for reply in waiting {
                let _ = reply.try_send(frame.duplicate());
            }
        });
    }
}
