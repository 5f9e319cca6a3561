use crate::detect::result::Detection;
use crate::error::InferenceError;
use crate::frame::Frame;

/// Object-detection engine contract.
///
/// Engines are black boxes to the pipeline: the coordinator hands over a borrowed frame and
/// the confidence threshold captured when the call was dispatched, and receives detections
/// in frame pixel coordinates.
///
/// Implementations:
/// - must not retain the frame beyond the call
/// - should return only detections with `confidence >= confidence_threshold`
///   (the coordinator enforces this again)
/// - may block; the coordinator issues at most one call at a time
pub trait DetectionEngine: Send {
    /// Engine identifier for logs.
    fn name(&self) -> &'static str;

    fn infer(
        &mut self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, InferenceError>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<(), InferenceError> {
        Ok(())
    }
}
