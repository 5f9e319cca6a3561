use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::stats::PipelineStats;
use crate::alert::DetectionEvent;
use crate::error::{PersistError, PipelineError};
use crate::frame::Frame;
use crate::stills::StillWriter;
use crate::storage::{DetectionRecord, PersistenceSink};

enum PersistJob {
    Record {
        event: Arc<DetectionEvent>,
        /// Annotated copy to write before the row, for save-on-alert.
        still: Option<Frame>,
    },
    Shutdown,
}

/// Cheap handle the coordinator uses to queue work.
#[derive(Clone)]
pub(crate) struct PersistQueue {
    tx: Sender<PersistJob>,
}

impl PersistQueue {
    pub(crate) fn submit(&self, event: Arc<DetectionEvent>, still: Option<Frame>) {
        if self.tx.send(PersistJob::Record { event, still }).is_err() {
            log::debug!("persistence worker gone; dropping record");
        }
    }
}

/// Owns the persistence sink on a dedicated thread so storage latency never reaches the
/// detection loop. Records are written at most once, in submission order.
pub(crate) struct PersistenceWorker {
    queue: PersistQueue,
    handle: Option<JoinHandle<()>>,
}

impl PersistenceWorker {
    pub(crate) fn spawn(
        sink: Box<dyn PersistenceSink>,
        stills: Option<StillWriter>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, PipelineError> {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("sentinel-persist".to_string())
            .spawn(move || run_worker(sink, stills, stats, rx))
            .map_err(|source| PipelineError::Spawn {
                name: "persistence",
                source,
            })?;
        Ok(Self {
            queue: PersistQueue { tx },
            handle: Some(handle),
        })
    }

    pub(crate) fn queue(&self) -> PersistQueue {
        self.queue.clone()
    }

    /// Drains jobs queued so far, then releases the sink.
    pub(crate) fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.queue.tx.send(PersistJob::Shutdown);
            if handle.join().is_err() {
                log::error!("persistence worker panicked");
            }
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.finish();
    }
}

fn run_worker(
    mut sink: Box<dyn PersistenceSink>,
    stills: Option<StillWriter>,
    stats: Arc<PipelineStats>,
    rx: Receiver<PersistJob>,
) {
    log::info!("persistence worker started ({})", sink.describe());
    for job in rx.iter() {
        let (event, still) = match job {
            PersistJob::Record { event, still } => (event, still),
            PersistJob::Shutdown => break,
        };
        match persist_one(sink.as_mut(), stills.as_ref(), &event, still, &stats) {
            Ok(id) => {
                stats.persist_ok();
                log::debug!("persisted {} event as row {}", event.level(), id);
            }
            Err(err) => {
                stats.persist_failed();
                log::warn!("failed to persist {} event: {}", event.level(), err);
            }
        }
    }
    log::info!("persistence worker stopped ({})", sink.describe());
}

fn persist_one(
    sink: &mut dyn PersistenceSink,
    stills: Option<&StillWriter>,
    event: &DetectionEvent,
    still: Option<Frame>,
    stats: &PipelineStats,
) -> Result<i64, PersistError> {
    let image_path = match (stills, still) {
        (Some(writer), Some(frame)) => match writer.save_alert(&frame, event) {
            Ok(path) => {
                stats.still_saved();
                log::info!("saved alert frame {}", path.display());
                Some(path.to_string_lossy().into_owned())
            }
            // Row is written without image_path.
            Err(err) => {
                log::warn!("failed to save alert frame: {}", err);
                None
            }
        },
        _ => None,
    };
    sink.persist(&DetectionRecord::from_event(event, image_path))
}
