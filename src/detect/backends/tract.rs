use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use super::yolo::{decode, non_max_suppression, RawBox};
use crate::detect::backend::DetectionEngine;
use crate::detect::result::Detection;
use crate::error::InferenceError;
use crate::frame::Frame;

/// Labels of the stock COCO-trained YOLOv8 checkpoints.
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// ONNX YOLOv8 detector running on tract.
///
/// Frames are stretched to the square model input; boxes are scaled back to frame pixels.
/// The model is loaded once and never touches the network or disk after that.
pub struct TractEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    iou_threshold: f32,
    class_names: Vec<String>,
}

impl TractEngine {
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        iou_threshold: f32,
        class_names: Option<Vec<String>>,
    ) -> Result<Self, InferenceError> {
        let model_path = model_path.as_ref();
        let load_error = |reason: String| InferenceError::ModelLoad {
            path: model_path.to_path_buf(),
            reason,
        };
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load_error(format!("parse: {}", e)))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .map_err(|e| load_error(format!("input fact: {}", e)))?
            .into_optimized()
            .map_err(|e| load_error(format!("optimize: {}", e)))?
            .into_runnable()
            .map_err(|e| load_error(format!("plan: {}", e)))?;

        let class_names = class_names
            .unwrap_or_else(|| COCO_CLASSES.iter().map(|c| c.to_string()).collect());
        log::info!(
            "TractEngine: loaded {} ({} classes, input {}x{})",
            model_path.display(),
            class_names.len(),
            input_size,
            input_size
        );
        Ok(Self {
            model,
            input_size,
            iou_threshold,
            class_names,
        })
    }

    fn backend_error(&self, message: impl ToString) -> InferenceError {
        InferenceError::Backend {
            backend: "tract",
            message: message.to_string(),
        }
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor, InferenceError> {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| InferenceError::UnsupportedFrame {
                width: frame.width,
                height: frame.height,
                reason: "pixel buffer does not match dimensions".to_string(),
            })?;
        let resized = imageops::resize(&image, self.input_size, self.input_size, FilterType::Triangle);
        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn to_detection(&self, raw: &RawBox, frame: &Frame) -> Option<Detection> {
        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;
        let max_x = frame.width.saturating_sub(1) as f32;
        let max_y = frame.height.saturating_sub(1) as f32;
        let bbox = [
            (raw.x1 * sx).clamp(0.0, max_x) as u32,
            (raw.y1 * sy).clamp(0.0, max_y) as u32,
            (raw.x2 * sx).clamp(0.0, max_x) as u32,
            (raw.y2 * sy).clamp(0.0, max_y) as u32,
        ];
        let name = self
            .class_names
            .get(raw.class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", raw.class_id));
        Detection::new(bbox, raw.score.min(1.0), raw.class_id as u32, name).ok()
    }
}

impl DetectionEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, InferenceError> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| self.backend_error(format!("inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| self.backend_error("model produced no outputs"))?;
        let values = output
            .as_slice::<f32>()
            .map_err(|e| self.backend_error(format!("output tensor was not f32: {}", e)))?;
        let raw = decode(values, output.shape(), confidence_threshold).ok_or_else(|| {
            self.backend_error(format!("unexpected output shape {:?}", output.shape()))
        })?;

        Ok(non_max_suppression(raw, self.iou_threshold)
            .iter()
            .filter_map(|b| self.to_detection(b, frame))
            .collect())
    }

    fn warm_up(&mut self) -> Result<(), InferenceError> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        self.model
            .run(tvec!(blank.into()))
            .map_err(|e| self.backend_error(format!("warm-up failed: {}", e)))?;
        Ok(())
    }
}
