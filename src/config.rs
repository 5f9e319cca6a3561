use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::alert::{check_unit, AlertClassifier, AlertThresholds};
use crate::detect::WeaponFilter;
use crate::error::ConfigError;

const DEFAULT_DEVICE: &str = "stub://webcam";
const DEFAULT_FPS: u32 = 15;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_WEAPON_CLASSES: &[&str] = &["gun", "knife", "sword", "pistol", "rifle", "weapon"];
const DEFAULT_TRAINED_MODEL: &str = "models/best.onnx";
const DEFAULT_PRETRAINED_MODEL: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_DB_PATH: &str = "weapon_detections.db";
const DEFAULT_CAPTURES_DIR: &str = "captures";
const DEFAULT_EXPORTS_DIR: &str = "exports";
const DEFAULT_STILL_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    engine: Option<EngineConfigFile>,
    history: Option<HistoryConfigFile>,
    storage: Option<StorageConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    weapon_classes: Option<Vec<String>>,
    high_count: Option<usize>,
    high_confidence: Option<f32>,
    medium_confidence: Option<f32>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    trained_model_path: Option<PathBuf>,
    pretrained_model: Option<PathBuf>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct HistoryConfigFile {
    max_events: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    db_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    captures_dir: Option<PathBuf>,
    exports_dir: Option<PathBuf>,
    save_on_alert: Option<bool>,
    still_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SentinelConfig {
    pub capture: CaptureSettings,
    pub detection: DetectionSettings,
    pub engine: EngineSettings,
    pub history: HistorySettings,
    pub storage: StorageSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Device path (`/dev/video0`) or `stub://name` for the synthetic source.
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Consecutive transient failures tolerated before the device is declared lost.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Synthetic sources end the stream after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            target_fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            max_frames: None,
        }
    }
}

/// Runtime-adjustable detection configuration.
///
/// The coordinator snapshots this once per inference cycle; control calls replace fields
/// between cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub weapon_classes: Vec<String>,
    pub thresholds: AlertThresholds,
    pub enabled: bool,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE,
            weapon_classes: DEFAULT_WEAPON_CLASSES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            thresholds: AlertThresholds::default(),
            enabled: true,
        }
    }
}

impl DetectionSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_confidence(self.confidence_threshold)?;
        self.thresholds.validate()?;
        if self
            .weapon_classes
            .iter()
            .all(|class| class.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "weapon_classes must name at least one class".to_string(),
            ));
        }
        Ok(())
    }

    pub fn filter(&self) -> WeaponFilter {
        WeaponFilter::new(&self.weapon_classes)
    }

    pub fn classifier(&self) -> AlertClassifier {
        AlertClassifier::new(self.thresholds)
    }
}

pub fn validate_confidence(value: f32) -> Result<(), ConfigError> {
    check_unit("confidence_threshold", value)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineBackend {
    /// Deterministic hash-driven engine for demos and tests.
    Synthetic,
    /// ONNX YOLOv8 via tract (feature `backend-tract`).
    Tract,
}

impl FromStr for EngineBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synthetic" | "stub" => Ok(EngineBackend::Synthetic),
            "tract" | "onnx" => Ok(EngineBackend::Tract),
            other => Err(ConfigError::Invalid(format!(
                "unknown engine backend '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub backend: EngineBackend,
    /// Operator-supplied model; takes precedence over everything else.
    pub model_path: Option<PathBuf>,
    /// Locally trained model, used when no custom path is set.
    pub trained_model_path: Option<PathBuf>,
    /// Stock pretrained model, the last resort.
    pub pretrained_model: PathBuf,
    pub input_size: u32,
    pub iou_threshold: f32,
    pub class_names: Option<Vec<String>>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: EngineBackend::Synthetic,
            model_path: None,
            trained_model_path: Some(PathBuf::from(DEFAULT_TRAINED_MODEL)),
            pretrained_model: PathBuf::from(DEFAULT_PRETRAINED_MODEL),
            input_size: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            class_names: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistorySettings {
    pub max_events: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// SQLite path or `file:` URI. `None` keeps records in memory only.
    pub db_path: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: Some(DEFAULT_DB_PATH.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub captures_dir: PathBuf,
    pub exports_dir: PathBuf,
    /// Write an annotated still for every High event.
    pub save_on_alert: bool,
    pub still_timeout: Duration,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            captures_dir: PathBuf::from(DEFAULT_CAPTURES_DIR),
            exports_dir: PathBuf::from(DEFAULT_EXPORTS_DIR),
            save_on_alert: true,
            still_timeout: Duration::from_millis(DEFAULT_STILL_TIMEOUT_MS),
        }
    }
}

impl SentinelConfig {
    /// Loads `SENTINEL_CONFIG` (if set), then environment overrides, then validates.
    pub fn load() -> Result<Self> {
        let path = std::env::var("SENTINEL_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty());
        Self::load_from(path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SentinelConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let capture = file.capture.unwrap_or_default();
        let capture_defaults = CaptureSettings::default();
        let capture = CaptureSettings {
            device: capture.device.unwrap_or(capture_defaults.device),
            target_fps: capture.target_fps.unwrap_or(capture_defaults.target_fps),
            width: capture.width.unwrap_or(capture_defaults.width),
            height: capture.height.unwrap_or(capture_defaults.height),
            max_retries: capture.max_retries.unwrap_or(capture_defaults.max_retries),
            retry_backoff: capture
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(capture_defaults.retry_backoff),
            max_frames: capture.max_frames,
        };

        let detection = file.detection.unwrap_or_default();
        let detection_defaults = DetectionSettings::default();
        let detection = DetectionSettings {
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(detection_defaults.confidence_threshold),
            weapon_classes: detection
                .weapon_classes
                .unwrap_or(detection_defaults.weapon_classes),
            thresholds: AlertThresholds {
                high_count: detection
                    .high_count
                    .unwrap_or(detection_defaults.thresholds.high_count),
                high_confidence: detection
                    .high_confidence
                    .unwrap_or(detection_defaults.thresholds.high_confidence),
                medium_confidence: detection
                    .medium_confidence
                    .unwrap_or(detection_defaults.thresholds.medium_confidence),
            },
            enabled: detection.enabled.unwrap_or(detection_defaults.enabled),
        };

        let engine = file.engine.unwrap_or_default();
        let engine_defaults = EngineSettings::default();
        let engine = EngineSettings {
            backend: match engine.backend {
                Some(name) => name.parse()?,
                None => engine_defaults.backend,
            },
            model_path: engine.model_path,
            trained_model_path: engine
                .trained_model_path
                .or(engine_defaults.trained_model_path),
            pretrained_model: engine
                .pretrained_model
                .unwrap_or(engine_defaults.pretrained_model),
            input_size: engine.input_size.unwrap_or(engine_defaults.input_size),
            iou_threshold: engine
                .iou_threshold
                .unwrap_or(engine_defaults.iou_threshold),
            class_names: engine.class_names,
        };

        let history = HistorySettings {
            max_events: file.history.and_then(|h| h.max_events),
        };

        let storage = StorageSettings {
            db_path: match file.storage.and_then(|s| s.db_path) {
                Some(path) => non_empty(path),
                None => StorageSettings::default().db_path,
            },
        };

        let output = file.output.unwrap_or_default();
        let output_defaults = OutputSettings::default();
        let output = OutputSettings {
            captures_dir: output.captures_dir.unwrap_or(output_defaults.captures_dir),
            exports_dir: output.exports_dir.unwrap_or(output_defaults.exports_dir),
            save_on_alert: output.save_on_alert.unwrap_or(output_defaults.save_on_alert),
            still_timeout: output
                .still_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(output_defaults.still_timeout),
        };

        Ok(Self {
            capture,
            detection,
            engine,
            history,
            storage,
            output,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_value("SENTINEL_DEVICE") {
            self.capture.device = device;
        }
        if let Ok(path) = std::env::var("SENTINEL_DB_PATH") {
            self.storage.db_path = non_empty(path);
        }
        if let Some(conf) = env_value("SENTINEL_CONFIDENCE") {
            self.detection.confidence_threshold = conf
                .parse()
                .map_err(|_| anyhow!("SENTINEL_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(classes) = env_value("SENTINEL_WEAPON_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.detection.weapon_classes = parsed;
            }
        }
        if let Some(path) = env_value("SENTINEL_MODEL_PATH") {
            self.engine.model_path = Some(PathBuf::from(path));
        }
        if let Some(backend) = env_value("SENTINEL_ENGINE") {
            self.engine.backend = backend.parse()?;
        }
        if let Some(enabled) = env_value("SENTINEL_DETECTION_ENABLED") {
            self.detection.enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("SENTINEL_DETECTION_ENABLED must be true or false"))?;
        }
        if let Some(dir) = env_value("SENTINEL_EXPORTS_DIR") {
            self.output.exports_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_value("SENTINEL_CAPTURES_DIR") {
            self.output.captures_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detection.validate()?;
        self.detection.weapon_classes = self
            .detection
            .weapon_classes
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        if self.capture.device.trim().is_empty() {
            return Err(anyhow!("capture device must not be empty"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.engine.input_size == 0 || self.engine.input_size % 32 != 0 {
            return Err(anyhow!("engine input_size must be a positive multiple of 32"));
        }
        check_unit("iou_threshold", self.engine.iou_threshold)?;
        if self.history.max_events == Some(0) {
            return Err(anyhow!("history max_events must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let cfg = SentinelConfig::from_file(SentinelConfigFile::default()).unwrap();
        assert_eq!(cfg.detection.confidence_threshold, 0.5);
        assert_eq!(cfg.detection.thresholds, AlertThresholds::default());
        assert!(cfg.detection.enabled);
        assert!(cfg.detection.weapon_classes.iter().any(|c| c == "gun"));
        assert_eq!(cfg.engine.backend, EngineBackend::Synthetic);
        assert_eq!(cfg.storage.db_path.as_deref(), Some("weapon_detections.db"));
        assert_eq!(cfg.capture.max_retries, 3);
    }

    #[test]
    fn detection_settings_reject_out_of_range_confidence() {
        let mut settings = DetectionSettings::default();
        settings.confidence_threshold = 1.5;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::OutOfRange {
                name: "confidence_threshold",
                ..
            })
        ));
        settings.confidence_threshold = f32::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn detection_settings_require_a_weapon_class() {
        let mut settings = DetectionSettings::default();
        settings.weapon_classes = vec!["  ".to_string()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn engine_backend_parses_aliases() {
        assert_eq!(
            "ONNX".parse::<EngineBackend>().unwrap(),
            EngineBackend::Tract
        );
        assert_eq!(
            "stub".parse::<EngineBackend>().unwrap(),
            EngineBackend::Synthetic
        );
        assert!("yolo9000".parse::<EngineBackend>().is_err());
    }

    #[test]
    fn empty_db_path_disables_persistence() {
        let file: SentinelConfigFile =
            serde_json::from_str(r#"{"storage": {"db_path": ""}}"#).unwrap();
        let cfg = SentinelConfig::from_file(file).unwrap();
        assert!(cfg.storage.db_path.is_none());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
