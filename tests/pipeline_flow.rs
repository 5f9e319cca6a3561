mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tempfile::tempdir;

use common::{
    components, detection, test_config, wait_until, Failure, RecordingSink, ScriptedEngine,
    ScriptedSource,
};
use weapon_sentinel::error::{ExportError, InferenceError, PipelineError, StillError};
use weapon_sentinel::export::read_export;
use weapon_sentinel::{AlertLevel, Pipeline, PipelineEvent, PipelineState, Taken};

const WAIT: Duration = Duration::from_secs(5);

fn next_alert(pipeline: &Pipeline) -> Option<AlertLevel> {
    match pipeline.events().recv_timeout(WAIT) {
        Ok(PipelineEvent::Alert(event)) => Some(event.level()),
        _ => None,
    }
}

#[test]
fn detections_reach_history_events_and_sink() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let sink = RecordingSink::default();
    let engine = ScriptedEngine::new(|seq, _| {
        if seq % 2 == 0 {
            Ok(vec![detection("knife", 0.7), detection("person", 0.99)])
        } else {
            Ok(Vec::new())
        }
    });

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Idle);
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(5)),
            engine,
            sink.clone(),
        ))
        .unwrap();
    assert_eq!(pipeline.state(), PipelineState::Detecting);

    assert_eq!(next_alert(&pipeline), Some(AlertLevel::Medium));
    assert!(wait_until(WAIT, || pipeline.statistics().history.total >= 3));
    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);

    let stats = pipeline.statistics();
    let records = sink.records();
    assert_eq!(records.len(), stats.history.total);
    assert_eq!(stats.counters.persisted as usize, stats.history.total);
    assert_eq!(stats.counters.events_published as usize, stats.history.total);
    assert_eq!(stats.history.medium, stats.history.total);

    // Non-weapon classes never reach the event.
    let recent = pipeline.recent_events(10);
    assert!(recent
        .iter()
        .all(|event| event.detection_types() == ["knife".to_string()]));
    assert!(records
        .iter()
        .all(|record| record.weapon_count == 1 && record.image_path.is_none()));
    // Newest first.
    assert!(recent
        .windows(2)
        .all(|pair| pair[0].timestamp() >= pair[1].timestamp()));
}

#[test]
fn slow_inference_drops_superseded_frames() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let engine = ScriptedEngine::empty().delay(Duration::from_millis(40));
    let calls = engine.calls();

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(2)),
            engine,
            RecordingSink::default(),
        ))
        .unwrap();
    assert!(wait_until(WAIT, || calls.lock().unwrap().len() >= 5));
    pipeline.stop();

    let counters = pipeline.statistics().counters;
    assert!(counters.frames_dropped > 0);
    assert!(counters.inferences < counters.frames_captured);

    let seqs: Vec<u64> = calls.lock().unwrap().iter().map(|(seq, _)| *seq).collect();
    assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
    // Latest wins: consecutive inferences skip the frames captured in between.
    assert!(seqs.windows(2).any(|pair| pair[1] - pair[0] > 1));
}

#[test]
fn nothing_is_delivered_after_stop_returns() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let sink = RecordingSink::default();
    let mut engine = ScriptedEngine::always(vec![detection("gun", 0.95)]);
    let (entered, release) = engine.gated();

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    let source = ScriptedSource::new(Duration::from_millis(2));
    let released = source.released();
    pipeline
        .start(components(source, engine, sink.clone()))
        .unwrap();
    let events = pipeline.events();
    let frames = pipeline.frames();

    entered.recv_timeout(WAIT).expect("inference started");
    pipeline.stop();
    assert!(released.load(Ordering::SeqCst), "device released by stop");

    // Let the in-flight call finish after stop has returned.
    release.send(()).unwrap();
    drop(release);
    std::thread::sleep(Duration::from_millis(150));

    assert!(events.try_recv().is_err());
    assert!(frames.try_take().is_none());
    assert!(sink.records().is_empty());
    assert_eq!(pipeline.statistics().history.total, 0);
    assert!(pipeline.recent_events(5).is_empty());

    pipeline.stop();
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn threshold_change_applies_from_the_next_inference() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut engine = ScriptedEngine::always(vec![detection("knife", 0.7)]);
    let (entered, release) = engine.gated();
    let calls = engine.calls();

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(2)),
            engine,
            RecordingSink::default(),
        ))
        .unwrap();

    entered.recv_timeout(WAIT).expect("first inference");
    pipeline.set_confidence(0.8).unwrap();
    release.send(()).unwrap();
    drop(release);

    assert!(wait_until(WAIT, || calls.lock().unwrap().len() >= 3));
    pipeline.stop();

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls[0].1, 0.5);
    assert!(calls[1..].iter().all(|(_, threshold)| *threshold == 0.8));
    // Only the cycle dispatched at 0.5 kept the 0.7 detection.
    assert_eq!(pipeline.statistics().history.total, 1);
}

#[test]
fn rejected_settings_leave_previous_values() {
    let dir = tempdir().unwrap();
    let pipeline = Pipeline::new(&test_config(dir.path())).unwrap();

    assert!(pipeline.set_confidence(1.5).is_err());
    assert!(pipeline.set_confidence(f32::NAN).is_err());
    assert_eq!(pipeline.detection_settings().confidence_threshold, 0.5);

    assert!(pipeline.set_weapon_classes(vec![" ".to_string()]).is_err());
    assert!(pipeline
        .detection_settings()
        .weapon_classes
        .contains(&"gun".to_string()));

    pipeline.set_confidence(0.0).unwrap();
    pipeline.set_confidence(1.0).unwrap();
    assert_eq!(pipeline.detection_settings().confidence_threshold, 1.0);
}

#[test]
fn passthrough_bypasses_the_engine() {
    let dir = tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.detection.enabled = false;
    let engine = ScriptedEngine::always(vec![detection("gun", 0.9)]);
    let calls = engine.calls();

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(5)),
            engine,
            RecordingSink::default(),
        ))
        .unwrap();
    assert_eq!(pipeline.state(), PipelineState::Passthrough);

    let frames = pipeline.frames();
    for _ in 0..3 {
        match frames.take_timeout(WAIT) {
            Taken::Value(render) => {
                assert!(!render.annotated);
                assert!(render.detections.is_empty());
                assert_eq!(render.level, AlertLevel::Safe);
            }
            _ => panic!("expected a passthrough frame"),
        }
    }
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(pipeline.statistics().history.total, 0);

    pipeline.set_detection_enabled(true);
    assert_eq!(pipeline.state(), PipelineState::Detecting);
    assert!(wait_until(WAIT, || !calls.lock().unwrap().is_empty()));
    assert!(next_alert(&pipeline).is_some());
    pipeline.stop();
}

#[test]
fn inference_errors_count_as_empty_cycles() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let engine = ScriptedEngine::new(|seq, _| {
        if seq % 2 == 1 {
            Err(InferenceError::Backend {
                backend: "scripted",
                message: "tensor shape mismatch".to_string(),
            })
        } else {
            Ok(vec![detection("pistol", 0.85)])
        }
    });
    let calls = engine.calls();

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(15)),
            engine,
            RecordingSink::default(),
        ))
        .unwrap();
    assert!(wait_until(WAIT, || {
        let calls = calls.lock().unwrap();
        calls.iter().any(|(seq, _)| seq % 2 == 1) && calls.len() >= 4
    }));
    assert_eq!(pipeline.state(), PipelineState::Detecting);
    pipeline.stop();

    let stats = pipeline.statistics();
    assert!(stats.counters.inference_failures > 0);
    assert!(stats.history.total > 0);
    assert!(
        stats.history.total as u64 <= stats.counters.inferences - stats.counters.inference_failures
    );
    // 0.85 is above the default high-confidence bar.
    assert_eq!(stats.history.high, stats.history.total);
}

#[test]
fn malformed_engine_output_is_dropped() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut bad = detection("knife", 0.9);
    bad.bbox = [10, 10, 5, 20];
    let engine = ScriptedEngine::always(vec![bad, detection("rifle", 0.7)]);

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(5)),
            engine,
            RecordingSink::default(),
        ))
        .unwrap();
    assert!(next_alert(&pipeline).is_some());
    pipeline.stop();

    let events = pipeline.recent_events(1);
    assert_eq!(events[0].weapon_count(), 1);
    assert_eq!(events[0].detection_types(), ["rifle".to_string()]);
    assert!(pipeline.statistics().counters.invalid_detections > 0);
}

#[test]
fn persistence_failures_do_not_stop_detection() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(5)),
            ScriptedEngine::always(vec![detection("sword", 0.65)]),
            RecordingSink::failing(),
        ))
        .unwrap();
    assert!(wait_until(WAIT, || pipeline.statistics().history.total >= 3));
    assert_eq!(pipeline.state(), PipelineState::Detecting);
    pipeline.stop();

    let stats = pipeline.statistics();
    assert_eq!(stats.counters.persisted, 0);
    assert_eq!(stats.counters.persist_failures as usize, stats.history.total);
}

#[test]
fn device_failure_halts_the_pipeline() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let source = ScriptedSource::new(Duration::from_millis(2)).fail_after(3, Failure::Transient);
    let released = source.released();

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(source, ScriptedEngine::empty(), RecordingSink::default()))
        .unwrap();

    let events = pipeline.events();
    let reason = loop {
        match events.recv_timeout(WAIT) {
            Ok(PipelineEvent::Halted { reason }) => break reason,
            Ok(PipelineEvent::Alert(_)) => continue,
            Err(_) => panic!("pipeline did not halt"),
        }
    };
    assert!(reason.contains("consecutive failures"), "{reason}");
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.halt_reason().as_deref(), Some(reason.as_str()));
    assert!(wait_until(WAIT, || released.load(Ordering::SeqCst)));

    let counters = pipeline.statistics().counters;
    assert_eq!(counters.frames_captured, 3);
    // max_retries = 2: the third consecutive failure escalates.
    assert_eq!(counters.capture_errors, 3);

    assert!(matches!(
        pipeline.capture_still_frame(),
        Err(StillError::NotRunning)
    ));
    let restart = pipeline.start(components(
        ScriptedSource::new(Duration::from_millis(2)),
        ScriptedEngine::empty(),
        RecordingSink::default(),
    ));
    assert!(matches!(restart, Err(PipelineError::Stopped)));
    pipeline.stop();
}

#[test]
fn unplugged_device_halts_without_retrying() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let source =
        ScriptedSource::new(Duration::from_millis(2)).fail_after(2, Failure::Unavailable);

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(source, ScriptedEngine::empty(), RecordingSink::default()))
        .unwrap();
    assert!(wait_until(WAIT, || pipeline.state() == PipelineState::Stopped));
    assert!(pipeline
        .halt_reason()
        .is_some_and(|reason| reason.contains("unplugged")));
    assert_eq!(pipeline.statistics().counters.capture_errors, 0);
}

#[test]
fn halt_is_announced_after_the_last_pending_frame() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut engine = ScriptedEngine::always(vec![detection("pistol", 0.9)]);
    let (entered, release) = engine.gated();
    let source = ScriptedSource::new(Duration::from_millis(1)).max_frames(4);

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(source, engine, RecordingSink::default()))
        .unwrap();
    let events = pipeline.events();
    let frames = pipeline.frames();

    // First frame is held in the engine while capture runs to end of stream.
    entered.recv_timeout(WAIT).expect("first inference");
    assert!(wait_until(WAIT, || pipeline.state() == PipelineState::Stopped));
    assert!(events.try_recv().is_err(), "halt announced before pending frames");

    drop(release);
    let mut alerts = 0;
    loop {
        match events.recv_timeout(WAIT) {
            Ok(PipelineEvent::Alert(_)) => alerts += 1,
            Ok(PipelineEvent::Halted { reason }) => {
                assert!(reason.contains("end of stream"), "{reason}");
                break;
            }
            Err(_) => panic!("pipeline did not announce the halt"),
        }
    }
    // The in-flight frame plus the newest frame left in the slot.
    assert_eq!(alerts, 2);
    assert!(wait_until(WAIT, || frames.is_closed()));
    assert!(events.try_recv().is_err());
    assert_eq!(pipeline.statistics().history.total, 2);
    pipeline.stop();
}

#[test]
fn open_failure_is_reported_by_start() {
    let dir = tempdir().unwrap();
    let mut pipeline = Pipeline::new(&test_config(dir.path())).unwrap();
    let result = pipeline.start(components(
        ScriptedSource::new(Duration::from_millis(2)).fail_open(),
        ScriptedEngine::empty(),
        RecordingSink::default(),
    ));
    assert!(matches!(result, Err(PipelineError::Device(_))));
    assert_eq!(pipeline.state(), PipelineState::Idle);
}

#[test]
fn start_twice_is_rejected() {
    let dir = tempdir().unwrap();
    let mut pipeline = Pipeline::new(&test_config(dir.path())).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(5)),
            ScriptedEngine::empty(),
            RecordingSink::default(),
        ))
        .unwrap();
    let second = pipeline.start(components(
        ScriptedSource::new(Duration::from_millis(5)),
        ScriptedEngine::empty(),
        RecordingSink::default(),
    ));
    assert!(matches!(second, Err(PipelineError::AlreadyStarted)));
    pipeline.stop();
}

#[test]
fn still_capture_writes_the_next_frame() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut pipeline = Pipeline::new(&cfg).unwrap();
    assert!(matches!(
        pipeline.capture_still_frame(),
        Err(StillError::NotRunning)
    ));

    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(5)),
            ScriptedEngine::empty(),
            RecordingSink::default(),
        ))
        .unwrap();
    let path = pipeline.capture_still_frame().unwrap();
    pipeline.stop();

    assert!(path.starts_with(&cfg.output.captures_dir));
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("weapon_capture_") && name.ends_with(".jpg"));
    let decoded = image::open(&path).unwrap();
    assert_eq!(
        (decoded.width(), decoded.height()),
        (common::FRAME_WIDTH, common::FRAME_HEIGHT)
    );
    assert_eq!(pipeline.statistics().counters.stills_saved, 1);
}

#[test]
fn high_alerts_save_a_still_and_link_it_to_the_row() {
    let dir = tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.output.save_on_alert = true;
    let sink = RecordingSink::default();
    let mut fired = false;
    let engine = ScriptedEngine::new(move |_, _| {
        if !std::mem::replace(&mut fired, true) {
            Ok(vec![
                detection("gun", 0.7),
                detection("knife", 0.7),
                detection("rifle", 0.7),
            ])
        } else {
            Ok(Vec::new())
        }
    });

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(5)),
            engine,
            sink.clone(),
        ))
        .unwrap();
    assert_eq!(next_alert(&pipeline), Some(AlertLevel::High));
    pipeline.stop();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].alert_level, AlertLevel::High);
    let image_path = records[0].image_path.clone().expect("alert still");
    assert!(std::path::Path::new(&image_path).exists());
    let metadata = image_path.replace(".jpg", "_metadata.json");
    let sidecar: serde_json::Value =
        serde_json::from_slice(&std::fs::read(metadata).unwrap()).unwrap();
    assert_eq!(sidecar["total_weapons"], 3);
    assert_eq!(sidecar["summary"]["alert_level"], "high");
}

#[test]
fn export_and_clear_history() {
    let dir = tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut pipeline = Pipeline::new(&cfg).unwrap();
    assert!(matches!(
        pipeline.export_history(),
        Err(ExportError::NothingToExport)
    ));

    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(5)),
            ScriptedEngine::always(vec![detection("knife", 0.55)]),
            RecordingSink::default(),
        ))
        .unwrap();
    assert!(wait_until(WAIT, || pipeline.statistics().history.total >= 2));
    pipeline.stop();

    let total = pipeline.statistics().history.total;
    let path = pipeline.export_history().unwrap();
    assert!(path.starts_with(&cfg.output.exports_dir));
    let records = read_export(&path).unwrap();
    assert_eq!(records.len(), total);
    assert!(records
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));

    pipeline.clear_history();
    assert_eq!(pipeline.statistics().history.total, 0);
    assert!(path.exists());
    assert!(matches!(
        pipeline.export_history(),
        Err(ExportError::NothingToExport)
    ));
}

#[test]
fn capped_history_bounds_the_event_queue() {
    let dir = tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.history.max_events = Some(2);

    let mut pipeline = Pipeline::new(&cfg).unwrap();
    pipeline
        .start(components(
            ScriptedSource::new(Duration::from_millis(3)),
            ScriptedEngine::always(vec![detection("gun", 0.6)]),
            RecordingSink::default(),
        ))
        .unwrap();
    assert!(wait_until(WAIT, || {
        pipeline.statistics().counters.events_published >= 5
    }));
    pipeline.stop();

    let stats = pipeline.statistics();
    assert_eq!(stats.history.total, 2);
    assert!(stats.counters.events_evicted > 0);
    let pending: Vec<_> = pipeline.events().try_iter().collect();
    assert!(pending.len() <= 2);
}
