use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One engine output: pixel bounding box, confidence and class.
///
/// Boxes are `[x1, y1, x2, y2]` in frame pixel coordinates with `x1 < x2` and `y1 < y2`.
/// Confidence lies in `(0, 1]`. Use [`Detection::new`] to build a checked value; engine
/// output is re-validated by the coordinator before it reaches the classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [u32; 4],
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvalidDetection {
    #[error("degenerate box {0:?}")]
    DegenerateBox([u32; 4]),
    #[error("confidence outside (0, 1]")]
    ConfidenceOutOfRange,
    #[error("empty class label")]
    EmptyLabel,
}

impl Detection {
    pub fn new(
        bbox: [u32; 4],
        confidence: f32,
        class_id: u32,
        class_name: impl Into<String>,
    ) -> Result<Self, InvalidDetection> {
        let detection = Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name.into(),
        };
        detection.validate()?;
        Ok(detection)
    }

    pub fn validate(&self) -> Result<(), InvalidDetection> {
        let [x1, y1, x2, y2] = self.bbox;
        if x1 >= x2 || y1 >= y2 {
            return Err(InvalidDetection::DegenerateBox(self.bbox));
        }
        // NaN fails both comparisons.
        if !(self.confidence > 0.0 && self.confidence <= 1.0) {
            return Err(InvalidDetection::ConfidenceOutOfRange);
        }
        if self.class_name.trim().is_empty() {
            return Err(InvalidDetection::EmptyLabel);
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> u32 {
        self.bbox[3] - self.bbox[1]
    }
}
