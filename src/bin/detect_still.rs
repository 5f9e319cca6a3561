//! detect_still - run the detection engine once on an image file
//!
//! Useful for checking a model and weapon-class configuration without a camera. Prints the
//! alert summary as JSON on stdout and optionally writes the annotated image.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use weapon_sentinel::stills::encode_jpeg;
use weapon_sentinel::{
    build_engine, AlertSummary, CapturedImage, Detection, Frame, SentinelConfig,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyse (any format the `image` crate decodes).
    #[arg(long)]
    image: PathBuf,
    /// Configuration file (TOML or JSON).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Override the confidence threshold.
    #[arg(long)]
    confidence: Option<f32>,
    /// Write the annotated frame as JPEG to this path.
    #[arg(long)]
    output: Option<PathBuf>,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE")]
    ui: ui::UiMode,
}

#[derive(Serialize)]
struct Report {
    image: String,
    engine: &'static str,
    confidence_threshold: f32,
    summary: AlertSummary,
    detections: Vec<Detection>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::detect(args.ui);

    let mut config = SentinelConfig::load_from(args.config.as_deref())?;
    if let Some(threshold) = args.confidence {
        weapon_sentinel::config::validate_confidence(threshold)?;
        config.detection.confidence_threshold = threshold;
    }
    let threshold = config.detection.confidence_threshold;

    let frame = {
        let _stage = ui.stage("Decode image");
        let image = image::open(&args.image)
            .with_context(|| format!("failed to open {}", args.image.display()))?
            .to_rgb8();
        Frame::new(0, Utc::now(), CapturedImage::from_image(image))
    };

    let mut engine = {
        let _stage = ui.stage("Load detection engine");
        build_engine(&config.engine)?
    };

    let raw = {
        let _stage = ui.stage("Run inference");
        engine.infer(&frame, threshold)?
    };
    let filtered = config.detection.filter().apply(raw, threshold);
    if filtered.invalid > 0 {
        log::warn!("{} malformed detection(s) dropped", filtered.invalid);
    }
    let detections = filtered.kept;
    let summary = config.detection.classifier().classify(&detections);

    if let Some(output) = &args.output {
        let _stage = ui.stage("Write annotated image");
        let annotated = frame.annotate(&detections);
        let bytes = encode_jpeg(&annotated)?;
        std::fs::write(output, bytes)
            .with_context(|| format!("failed to write {}", output.display()))?;
    }

    let report = Report {
        image: args.image.display().to_string(),
        engine: engine.name(),
        confidence_threshold: threshold,
        summary,
        detections,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
