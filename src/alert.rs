//! Alert classification.
//!
//! `AlertClassifier::classify` is a pure function of the detections and the thresholds it
//! was built with. The rule table, evaluated in order:
//!
//! | condition                                                  | level  |
//! |------------------------------------------------------------|--------|
//! | no detections                                              | Safe   |
//! | `count >= high_count` or `max_conf > high_confidence`      | High   |
//! | `count >= 1` or `max_conf > medium_confidence`             | Medium |
//! | otherwise                                                  | Low    |
//!
//! The Medium row holds for every non-empty set, so Low is never produced for real input.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detect::Detection;
use crate::error::ConfigError;

pub const DEFAULT_HIGH_COUNT: usize = 3;
pub const DEFAULT_HIGH_CONFIDENCE: f32 = 0.8;
pub const DEFAULT_MEDIUM_CONFIDENCE: f32 = 0.6;

const SAFE_MESSAGE: &str = "no detections";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Safe,
    Low,
    Medium,
    High,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Safe,
        AlertLevel::Low,
        AlertLevel::Medium,
        AlertLevel::High,
    ];

    /// Storage/export spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Safe => "safe",
            AlertLevel::Low => "low",
            AlertLevel::Medium => "medium",
            AlertLevel::High => "high",
        }
    }

    /// Spelling used in alert messages.
    pub fn label(self) -> &'static str {
        match self {
            AlertLevel::Safe => "SAFE",
            AlertLevel::Low => "LOW",
            AlertLevel::Medium => "MEDIUM",
            AlertLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(AlertLevel::Safe),
            "low" => Ok(AlertLevel::Low),
            "medium" => Ok(AlertLevel::Medium),
            "high" => Ok(AlertLevel::High),
            other => Err(format!("unknown alert level '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub high_count: usize,
    pub high_confidence: f32,
    pub medium_confidence: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            high_count: DEFAULT_HIGH_COUNT,
            high_confidence: DEFAULT_HIGH_CONFIDENCE,
            medium_confidence: DEFAULT_MEDIUM_CONFIDENCE,
        }
    }
}

impl AlertThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.high_count == 0 {
            return Err(ConfigError::OutOfRange {
                name: "high_count",
                value: 0.0,
                min: 1.0,
                max: f64::from(u32::MAX),
            });
        }
        check_unit("high_confidence", self.high_confidence)?;
        check_unit("medium_confidence", self.medium_confidence)?;
        Ok(())
    }
}

/// Checks that `value` is a finite number within `0.0..=1.0`.
pub(crate) fn check_unit(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange {
            name,
            value: f64::from(value),
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

/// Classification result; also the `summary` object of the export document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub weapons_detected: usize,
    pub alert_level: AlertLevel,
    pub message: String,
    pub max_confidence: f32,
    /// Distinct class labels, sorted.
    pub detection_types: Vec<String>,
}

impl AlertSummary {
    fn safe() -> Self {
        Self {
            weapons_detected: 0,
            alert_level: AlertLevel::Safe,
            message: SAFE_MESSAGE.to_string(),
            max_confidence: 0.0,
            detection_types: Vec::new(),
        }
    }

    fn for_level(level: AlertLevel, detections: &[Detection]) -> Self {
        if detections.is_empty() {
            return Self::safe();
        }
        let count = detections.len();
        Self {
            weapons_detected: count,
            alert_level: level,
            message: format!("{} ALERT: {} weapon(s) detected", level.label(), count),
            max_confidence: max_confidence(detections),
            detection_types: distinct_labels(detections),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlertClassifier {
    thresholds: AlertThresholds,
}

impl AlertClassifier {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.thresholds
    }

    pub fn level(&self, detections: &[Detection]) -> AlertLevel {
        if detections.is_empty() {
            return AlertLevel::Safe;
        }
        let count = detections.len();
        let max_conf = max_confidence(detections);
        let t = &self.thresholds;

        if count >= t.high_count || max_conf > t.high_confidence {
            AlertLevel::High
        } else if count >= 1 || max_conf > t.medium_confidence {
            AlertLevel::Medium
        } else {
            AlertLevel::Low
        }
    }

    pub fn classify(&self, detections: &[Detection]) -> AlertSummary {
        AlertSummary::for_level(self.level(detections), detections)
    }

    /// Builds a stored event. Empty detection sets never become events.
    pub fn build_event(
        &self,
        timestamp: DateTime<Utc>,
        detections: Vec<Detection>,
    ) -> Option<DetectionEvent> {
        if detections.is_empty() {
            return None;
        }
        let summary = self.classify(&detections);
        Some(DetectionEvent {
            timestamp,
            detections,
            summary,
        })
    }
}

/// Immutable record of one inference cycle that produced detections.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionEvent {
    timestamp: DateTime<Utc>,
    detections: Vec<Detection>,
    summary: AlertSummary,
}

impl DetectionEvent {
    /// Rebuilds an event whose level was decided earlier (e.g. loaded from storage).
    pub fn with_level(
        timestamp: DateTime<Utc>,
        detections: Vec<Detection>,
        level: AlertLevel,
    ) -> Option<Self> {
        if detections.is_empty() {
            return None;
        }
        let summary = AlertSummary::for_level(level, &detections);
        Some(Self {
            timestamp,
            detections,
            summary,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn summary(&self) -> &AlertSummary {
        &self.summary
    }

    pub fn level(&self) -> AlertLevel {
        self.summary.alert_level
    }

    pub fn message(&self) -> &str {
        &self.summary.message
    }

    pub fn weapon_count(&self) -> usize {
        self.summary.weapons_detected
    }

    pub fn max_confidence(&self) -> f32 {
        self.summary.max_confidence
    }

    pub fn detection_types(&self) -> &[String] {
        &self.summary.detection_types
    }
}

fn max_confidence(detections: &[Detection]) -> f32 {
    detections
        .iter()
        .map(|d| d.confidence)
        .fold(0.0_f32, f32::max)
}

fn distinct_labels(detections: &[Detection]) -> Vec<String> {
    detections
        .iter()
        .map(|d| d.class_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
