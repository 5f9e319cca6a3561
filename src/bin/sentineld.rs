//! sentineld - Weapon Sentinel daemon
//!
//! This daemon:
//! 1. Loads configuration (`SENTINEL_CONFIG` file + `SENTINEL_*` environment overrides)
//! 2. Opens the capture source, detection engine and SQLite sink
//! 3. Runs the pipeline until Ctrl-C, `quit`, or the capture device goes away
//! 4. Logs alerts as they arrive and accepts operator commands on stdin:
//!    `toggle`, `conf <value>`, `capture`, `clear`, `export`, `stats`, `recent [n]`, `quit`

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{select, tick, unbounded, Receiver};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use weapon_sentinel::{Components, Pipeline, PipelineEvent, PipelineState, SentinelConfig};

#[path = "../ui.rs"]
mod ui;

const FRAME_POLL: Duration = Duration::from_millis(20);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (TOML or JSON).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Start with detection disabled (frames pass through unannotated).
    #[arg(long)]
    passthrough: bool,
    /// Ignore stdin commands.
    #[arg(long)]
    no_stdin: bool,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE")]
    ui: ui::UiMode,
}

#[derive(Debug, PartialEq)]
enum Command {
    Toggle,
    Confidence(f32),
    Capture,
    Clear,
    Export,
    Stats,
    Recent(usize),
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };
    let command = match word.to_ascii_lowercase().as_str() {
        "toggle" | "t" => Command::Toggle,
        "conf" | "confidence" => {
            let value = parts
                .next()
                .ok_or_else(|| "usage: conf <0.0-1.0>".to_string())?;
            let value = value
                .parse::<f32>()
                .map_err(|_| format!("not a number: {}", value))?;
            Command::Confidence(value)
        }
        "capture" | "c" => Command::Capture,
        "clear" => Command::Clear,
        "export" | "e" => Command::Export,
        "stats" | "s" => Command::Stats,
        "recent" | "r" => {
            let limit = match parts.next() {
                Some(n) => n.parse().map_err(|_| format!("not a count: {}", n))?,
                None => 5,
            };
            Command::Recent(limit)
        }
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("sentinel-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(rx)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::detect(args.ui);

    let mut config = {
        let _stage = ui.stage("Load configuration");
        SentinelConfig::load_from(args.config.as_deref())?
    };
    if args.passthrough {
        config.detection.enabled = false;
    }

    let components = {
        let _stage = ui.stage("Open capture source and detection engine");
        Components::from_config(&config)?
    };
    log::info!(
        "source={} engine={} storage={}",
        components.source.describe(),
        components.engine.name(),
        components.sink.describe()
    );

    let mut pipeline = Pipeline::new(&config)?;
    {
        let _stage = ui.stage("Start pipeline");
        pipeline.start(components)?;
    }
    log::info!(
        "sentineld running: confidence={:.2} classes=[{}]",
        config.detection.confidence_threshold,
        config.detection.weapon_classes.join(", ")
    );

    let (shutdown_tx, shutdown_rx) = unbounded::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("install Ctrl-C handler")?;

    let mut commands = if args.no_stdin {
        crossbeam_channel::never()
    } else {
        spawn_stdin_reader()?
    };
    let events = pipeline.events();
    let frames = pipeline.frames();
    let frame_tick = tick(FRAME_POLL);
    let status_tick = tick(STATUS_INTERVAL);
    let mut status = ui.status();
    let mut alerts = 0usize;
    let mut last_level: Option<&'static str> = None;

    loop {
        let mut stdin_closed = false;
        select! {
            recv(shutdown_rx) -> _ => {
                log::info!("interrupt received");
                break;
            }
            recv(commands) -> line => match line.map(|line| parse_command(&line)) {
                Ok(Ok(Some(Command::Quit))) => break,
                Ok(Ok(Some(command))) => run_command(&pipeline, command, &status),
                Ok(Ok(None)) => {}
                Ok(Err(message)) => status.println(&message),
                Err(_) => stdin_closed = true,
            },
            recv(events) -> event => match event {
                Ok(PipelineEvent::Alert(event)) => {
                    alerts += 1;
                    last_level = Some(event.level().as_str());
                    log::warn!(
                        "{} [{}] max_conf={:.2} at {}",
                        event.message(),
                        event.detection_types().join(", "),
                        event.max_confidence(),
                        event.timestamp().format("%H:%M:%S%.3f")
                    );
                }
                Ok(PipelineEvent::Halted { reason }) => {
                    log::error!("pipeline halted: {}", reason);
                    break;
                }
                Err(_) => break,
            },
            recv(frame_tick) -> _ => {
                match frames.try_take() {
                    Some(_) => status.frame(),
                    None if frames.is_closed() => {
                        if pipeline.state() == PipelineState::Stopped {
                            break;
                        }
                    }
                    None => {}
                }
            }
            recv(status_tick) -> _ => {
                let state = pipeline.state();
                status.update(&format!("{:?}", state), alerts, last_level);
                let counters = pipeline.statistics().counters;
                log::info!(
                    "state={:?} display_fps={:.1} captured={} dropped={} inferences={} alerts={}",
                    state,
                    status.fps(),
                    counters.frames_captured,
                    counters.frames_dropped,
                    counters.inferences,
                    counters.events_published
                );
            }
        }
        if stdin_closed {
            log::debug!("stdin closed; commands disabled");
            commands = crossbeam_channel::never();
        }
    }

    pipeline.stop();
    if let Some(reason) = pipeline.halt_reason() {
        status.finish(&format!("stopped: {}", reason));
    } else {
        status.finish("stopped");
    }
    let stats = pipeline.statistics();
    log::info!(
        "session summary: {} event(s) ({} high), {} persisted, {} persist failure(s)",
        stats.history.total,
        stats.history.high,
        stats.counters.persisted,
        stats.counters.persist_failures
    );
    Ok(())
}

fn run_command(pipeline: &Pipeline, command: Command, status: &ui::StatusLine) {
    match command {
        Command::Toggle => {
            let enabled = !pipeline.detection_settings().enabled;
            pipeline.set_detection_enabled(enabled);
        }
        Command::Confidence(value) => {
            if let Err(e) = pipeline.set_confidence(value) {
                status.println(&format!("confidence unchanged: {}", e));
            }
        }
        Command::Capture => match pipeline.capture_still_frame() {
            Ok(path) => status.println(&format!("still saved to {}", path.display())),
            Err(e) => status.println(&format!("capture failed: {}", e)),
        },
        Command::Clear => pipeline.clear_history(),
        Command::Export => match pipeline.export_history() {
            Ok(path) => status.println(&format!("exported to {}", path.display())),
            Err(e) => status.println(&format!("export failed: {}", e)),
        },
        Command::Stats => match serde_json::to_string_pretty(&pipeline.statistics()) {
            Ok(json) => status.println(&json),
            Err(e) => status.println(&format!("stats unavailable: {}", e)),
        },
        Command::Recent(limit) => {
            let recent = pipeline.recent_events(limit);
            if recent.is_empty() {
                status.println("no detections yet");
            }
            for event in recent {
                status.println(&format!(
                    "{} {:<6} {}",
                    event.timestamp().format("%Y-%m-%d %H:%M:%S"),
                    event.level().as_str(),
                    event.message()
                ));
            }
        }
        Command::Quit => {}
    }
}
