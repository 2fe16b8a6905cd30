//! Facial expression classifier via ONNX Runtime.
//!
//! Crops a detected face to a square 112×112 RGB patch and scores it over
//! seven expression classes.

use crate::expression::{Expression, ExpressionScores};
use crate::types::BoundingBox;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EXPRESSION_INPUT_SIZE: u32 = 112;
/// Extra margin around the detector box, as a fraction of its longer side.
const CROP_MARGIN: f32 = 0.1;

/// Output class order of the expression model.
pub const EXPRESSION_CLASSES: [Expression; 7] = [
    Expression::Neutral,
    Expression::Happy,
    Expression::Sad,
    Expression::Angry,
    Expression::Fearful,
    Expression::Disgusted,
    Expression::Surprised,
];

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is empty")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &Path) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded expression model"
        );

        Ok(Self { session })
    }

    /// Score the face inside `bbox`.
    pub fn classify(
        &mut self,
        frame: &RgbImage,
        bbox: &BoundingBox,
    ) -> Result<ExpressionScores, ClassifierError> {
        let crop = crop_face(frame, bbox).ok_or(ClassifierError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("extract scores: {e}")))?;

        if raw.len() < EXPRESSION_CLASSES.len() {
            return Err(ClassifierError::InferenceFailed(format!(
                "expected {} scores, got {}",
                EXPRESSION_CLASSES.len(),
                raw.len()
            )));
        }

        Ok(to_scores(&raw[..EXPRESSION_CLASSES.len()]))
    }
}

/// Square crop around the box with a small margin, resized to the model input.
fn crop_face(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let side = bbox.width.max(bbox.height) * (1.0 + 2.0 * CROP_MARGIN);
    if side.is_nan() || side < 1.0 {
        return None;
    }
    let cx = bbox.x + bbox.width / 2.0;
    let cy = bbox.y + bbox.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0).floor() as u32;
    let y0 = (cy - side / 2.0).max(0.0).floor() as u32;
    let x1 = ((cx + side / 2.0).ceil().max(0.0) as u32).min(frame.width());
    let y1 = ((cy + side / 2.0).ceil().max(0.0) as u32).min(frame.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let view = image::imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(image::imageops::resize(
        &view,
        EXPRESSION_INPUT_SIZE,
        EXPRESSION_INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    ))
}

/// NCHW tensor scaled to [0, 1].
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = EXPRESSION_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Label the model outputs, applying softmax when they are logits.
fn to_scores(raw: &[f32]) -> ExpressionScores {
    let is_distribution =
        raw.iter().all(|v| (0.0..=1.0).contains(v)) && (raw.iter().sum::<f32>() - 1.0).abs() < 1e-3;

    let probs = if is_distribution { raw.to_vec() } else { softmax(raw) };

    EXPRESSION_CLASSES
        .iter()
        .zip(probs)
        .map(|(e, p)| (e.as_str(), p))
        .collect()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_to_scores_passes_through_distribution() {
        let raw = [0.1, 0.6, 0.1, 0.05, 0.05, 0.05, 0.05];
        let scores = to_scores(&raw);
        assert_eq!(scores.len(), 7);
        assert!((scores.get("happy").unwrap() - 0.6).abs() < 1e-6);
        assert_eq!(scores.dominant().map(|(l, _)| l), Some("happy"));
    }

    #[test]
    fn test_to_scores_applies_softmax_to_logits() {
        let raw = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 5.0];
        let scores = to_scores(&raw);
        let total: f32 = scores.iter().map(|(_, s)| s).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(scores.dominant().map(|(l, _)| l), Some("surprised"));
    }

    #[test]
    fn test_crop_face_resizes_to_input() {
        let frame = RgbImage::new(200, 100);
        let bbox = BoundingBox { x: 50.0, y: 20.0, width: 40.0, height: 60.0, confidence: 1.0 };
        let crop = crop_face(&frame, &bbox).unwrap();
        assert_eq!(crop.dimensions(), (EXPRESSION_INPUT_SIZE, EXPRESSION_INPUT_SIZE));
    }

    #[test]
    fn test_crop_face_outside_frame() {
        let frame = RgbImage::new(100, 100);
        let bbox = BoundingBox { x: 500.0, y: 500.0, width: 40.0, height: 40.0, confidence: 1.0 };
        assert!(crop_face(&frame, &bbox).is_none());
    }

    #[test]
    fn test_crop_face_degenerate_box() {
        let frame = RgbImage::new(100, 100);
        let bbox = BoundingBox { x: 10.0, y: 10.0, width: 0.0, height: 0.0, confidence: 1.0 };
        assert!(crop_face(&frame, &bbox).is_none());
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let crop = RgbImage::from_pixel(112, 112, image::Rgb([255, 0, 51]));
        let t = preprocess(&crop);
        assert_eq!(t[[0, 0, 5, 5]], 1.0);
        assert_eq!(t[[0, 1, 5, 5]], 0.0);
        assert!((t[[0, 2, 5, 5]] - 0.2).abs() < 1e-6);
    }
}
