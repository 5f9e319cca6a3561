use std::path::{Path, PathBuf};

use crate::config::{EngineBackend, EngineSettings};
use crate::detect::backend::DetectionEngine;
use crate::detect::backends::SyntheticEngine;
use crate::error::InferenceError;

/// Which model file the engine should load, in order of preference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelChoice {
    /// Operator-supplied path. Must exist.
    Custom(PathBuf),
    /// Locally trained model found on disk.
    Trained(PathBuf),
    /// Stock pretrained model.
    Pretrained(PathBuf),
}

impl ModelChoice {
    pub fn path(&self) -> &Path {
        match self {
            ModelChoice::Custom(p) | ModelChoice::Trained(p) | ModelChoice::Pretrained(p) => p,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModelChoice::Custom(_) => "custom",
            ModelChoice::Trained(_) => "trained",
            ModelChoice::Pretrained(_) => "pretrained",
        }
    }
}

/// Resolves the model file once, at startup.
///
/// A configured custom path that does not exist is an error rather than a silent fallback.
/// The trained model is used when present on disk; otherwise the pretrained model.
pub fn resolve_model(settings: &EngineSettings) -> Result<ModelChoice, InferenceError> {
    if let Some(custom) = &settings.model_path {
        if !custom.is_file() {
            return Err(InferenceError::ModelLoad {
                path: custom.clone(),
                reason: "custom model file not found".to_string(),
            });
        }
        return Ok(ModelChoice::Custom(custom.clone()));
    }
    if let Some(trained) = settings.trained_model_path.as_ref().filter(|p| p.is_file()) {
        return Ok(ModelChoice::Trained(trained.clone()));
    }
    Ok(ModelChoice::Pretrained(settings.pretrained_model.clone()))
}

/// Builds the configured engine and runs its warm-up hook.
pub fn build_engine(settings: &EngineSettings) -> Result<Box<dyn DetectionEngine>, InferenceError> {
    let mut engine: Box<dyn DetectionEngine> = match settings.backend {
        EngineBackend::Synthetic => Box::new(SyntheticEngine::new()),
        EngineBackend::Tract => build_tract(settings)?,
    };
    engine.warm_up()?;
    log::info!("detection engine ready: {}", engine.name());
    Ok(engine)
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &EngineSettings) -> Result<Box<dyn DetectionEngine>, InferenceError> {
    let choice = resolve_model(settings)?;
    log::info!(
        "using {} model {}",
        choice.kind(),
        choice.path().display()
    );
    Ok(Box::new(crate::detect::backends::TractEngine::load(
        choice.path(),
        settings.input_size,
        settings.iou_threshold,
        settings.class_names.clone(),
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(settings: &EngineSettings) -> Result<Box<dyn DetectionEngine>, InferenceError> {
    let choice = resolve_model(settings)?;
    Err(InferenceError::ModelLoad {
        path: choice.path().to_path_buf(),
        reason: "the tract backend requires the backend-tract feature".to_string(),
    })
}
