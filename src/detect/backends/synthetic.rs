use sha2::{Digest, Sha256};

use crate::detect::backend::DetectionEngine;
use crate::detect::result::Detection;
use crate::error::InferenceError;
use crate::frame::Frame;

/// Labels the synthetic engine draws from. `person` exercises the weapon filter.
pub const SYNTHETIC_CLASSES: &[&str] = &["person", "knife", "gun", "pistol", "rifle", "sword"];

const MAX_CANDIDATES: usize = 3;
const MIN_CONFIDENCE: f32 = 0.30;
const CONFIDENCE_SPAN: f32 = 0.69;

/// Deterministic stand-in for a real detector.
///
/// Candidates are derived from a SHA-256 digest of a coarse colour histogram and the frame
/// sequence id, so the same frame always yields the same detections. Roughly one frame in
/// four yields nothing.
pub struct SyntheticEngine {
    inferences: u64,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self { inferences: 0 }
    }

    pub fn inferences(&self) -> u64 {
        self.inferences
    }

    fn candidates(frame: &Frame) -> Vec<Detection> {
        let digest = frame_digest(frame);
        let count = (digest[0] as usize) % (MAX_CANDIDATES + 1);
        let (w, h) = (frame.width.max(2), frame.height.max(2));

        (0..count)
            .filter_map(|i| {
                let b = &digest[1 + i * 8..1 + (i + 1) * 8];
                let class_id = b[0] as usize % SYNTHETIC_CLASSES.len();
                let confidence = MIN_CONFIDENCE + (b[1] as f32 / 255.0) * CONFIDENCE_SPAN;

                let x1 = scale(b[2], w - 2);
                let y1 = scale(b[3], h - 2);
                let x2 = (x1 + 1 + scale(b[4], w / 3)).min(w - 1);
                let y2 = (y1 + 1 + scale(b[5], h / 3)).min(h - 1);
                Detection::new(
                    [x1, y1, x2, y2],
                    confidence,
                    class_id as u32,
                    SYNTHETIC_CLASSES[class_id],
                )
                .ok()
            })
            .collect()
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionEngine for SyntheticEngine {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, InferenceError> {
        if frame.pixels().is_empty() {
            return Err(InferenceError::UnsupportedFrame {
                width: frame.width,
                height: frame.height,
                reason: "empty frame".to_string(),
            });
        }
        self.inferences += 1;
        Ok(Self::candidates(frame)
            .into_iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .collect())
    }
}

fn frame_digest(frame: &Frame) -> [u8; 32] {
    let mut hasher = Sha256::new();

    let mut histogram = [0u32; 8];
    for &p in frame.pixels().iter().step_by(97) {
        histogram[(p / 32) as usize] += 1;
    }
    for count in &histogram {
        hasher.update(count.to_le_bytes());
    }
    hasher.update(frame.seq.to_le_bytes());

    hasher.finalize().into()
}

fn scale(byte: u8, max: u32) -> u32 {
    (byte as u32 * max) / 255
}
