//! Inference adapter: the boundary between the capture loop and the models.

use crate::classifier::{ClassifierError, ExpressionClassifier};
use crate::detector::{DetectorError, FaceDetector};
use crate::types::Detection;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "face_detector.onnx";
/// Expression classification model file name inside the model directory.
pub const EXPRESSION_MODEL_FILE: &str = "expression.onnx";

const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// Default model directory, relative to the working directory.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("models not loaded")]
    NotLoaded,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("engine error: {0}")]
    Other(String),
}

/// Per-call detector options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    /// Minimum detector confidence for a face to be reported.
    pub score_threshold: f32,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self { score_threshold: DEFAULT_SCORE_THRESHOLD }
    }
}

/// A face detection + landmark + expression engine.
///
/// `load` must succeed before `detect` is called and is idempotent.
pub trait ExpressionEngine: Send {
    fn load(&mut self, model_dir: &Path) -> Result<(), EngineError>;

    fn is_loaded(&self) -> bool;

    fn detect(
        &mut self,
        image: &RgbImage,
        options: &DetectOptions,
    ) -> Result<Vec<Detection>, EngineError>;
}

/// ONNX Runtime engine: SCRFD faces scored by the expression classifier.
#[derive(Default)]
pub struct OnnxEngine {
    models: Option<(FaceDetector, ExpressionClassifier)>,
}

impl OnnxEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExpressionEngine for OnnxEngine {
    fn load(&mut self, model_dir: &Path) -> Result<(), EngineError> {
        if self.models.is_some() {
            return Ok(());
        }

        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let classifier = ExpressionClassifier::load(&model_dir.join(EXPRESSION_MODEL_FILE))?;
        self.models = Some((detector, classifier));

        tracing::info!(dir = %model_dir.display(), "models resident");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.models.is_some()
    }

    fn detect(
        &mut self,
        image: &RgbImage,
        options: &DetectOptions,
    ) -> Result<Vec<Detection>, EngineError> {
        let (detector, classifier) = self.models.as_mut().ok_or(EngineError::NotLoaded)?;

        let faces = detector.detect(image, options.score_threshold)?;
        let mut detections = Vec::with_capacity(faces.len());

        for face in faces {
            let expressions = match classifier.classify(image, &face.bbox) {
                Ok(scores) => scores,
                Err(ClassifierError::EmptyCrop) => {
                    tracing::debug!(bbox = ?face.bbox, "face box outside frame, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            detections.push(Detection {
                bbox: face.bbox,
                landmarks: face.landmarks.map(Vec::from).unwrap_or_default(),
                expressions,
                frame_width: image.width(),
                frame_height: image.height(),
            });
        }

        tracing::trace!(faces = detections.len(), "detect complete");
        Ok(detections)
    }
}
