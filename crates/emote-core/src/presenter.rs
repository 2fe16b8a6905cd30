//! Emotion presenter: detections → label text and icon.

use crate::expression::{Expression, Icon};
use crate::types::Detection;
use serde::{Deserialize, Serialize};

/// Label shown for a still image in which no face was found.
pub const NO_FACE_LABEL: &str = "No face detected";

/// Which detection drives the displayed label when a frame has several faces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelection {
    /// Index 0 in the order the engine returned. The order carries no meaning.
    #[default]
    First,
    /// Face with the largest bounding-box area.
    LargestFace,
    /// Face with the highest detector confidence.
    MostConfident,
}

impl FaceSelection {
    /// Pick one detection. Ties keep the earlier detection.
    pub fn select<'a>(&self, detections: &'a [Detection]) -> Option<&'a Detection> {
        match self {
            FaceSelection::First => detections.first(),
            FaceSelection::LargestFace => max_by_key(detections, |d| d.bbox.area()),
            FaceSelection::MostConfident => max_by_key(detections, |d| d.bbox.confidence),
        }
    }
}

fn max_by_key(detections: &[Detection], key: impl Fn(&Detection) -> f32) -> Option<&Detection> {
    let mut best: Option<(&Detection, f32)> = None;
    for d in detections {
        let k = key(d);
        if best.map_or(true, |(_, b)| k > b) {
            best = Some((d, k));
        }
    }
    best.map(|(d, _)| d)
}

/// Whether the frames being presented come from a live stream or a still image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    Camera,
    StillImage,
}

/// What the UI shows for the current tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayState {
    pub label: String,
    /// Score of the displayed expression in [0, 1].
    pub confidence: Option<f32>,
    pub icon: Option<Icon>,
}

impl DisplayState {
    pub fn cleared() -> Self {
        Self::default()
    }

    pub fn is_cleared(&self) -> bool {
        self.label.is_empty() && self.icon.is_none() && self.confidence.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmotionPresenter {
    pub selection: FaceSelection,
    /// Show [`NO_FACE_LABEL`] instead of clearing when a still image has no face.
    pub no_face_label: bool,
}

impl Default for EmotionPresenter {
    fn default() -> Self {
        Self {
            selection: FaceSelection::First,
            no_face_label: true,
        }
    }
}

impl EmotionPresenter {
    pub fn new(selection: FaceSelection, no_face_label: bool) -> Self {
        Self { selection, no_face_label }
    }

    pub fn present(&self, detections: &[Detection], mode: InputMode) -> DisplayState {
        let Some(face) = self.selection.select(detections) else {
            return self.no_face(mode);
        };

        let Some((label, score)) = face.expressions.dominant() else {
            tracing::debug!("selected face has no expression scores");
            return DisplayState::cleared();
        };

        DisplayState {
            label: format_label(label, score),
            confidence: Some(score),
            icon: label.parse::<Expression>().ok().map(Expression::icon),
        }
    }

    fn no_face(&self, mode: InputMode) -> DisplayState {
        match mode {
            InputMode::StillImage if self.no_face_label => DisplayState {
                label: NO_FACE_LABEL.to_string(),
                confidence: None,
                icon: None,
            },
            _ => DisplayState::cleared(),
        }
    }
}

/// `"happy", 0.82` → `"Happy (82.0%)"`.
pub fn format_label(label: &str, score: f32) -> String {
    let mut chars = label.chars();
    let word = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    format!("{word} ({:.1}%)", score * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionScores;
    use crate::types::{BoundingBox, Detection};

    fn face(scores: &[(&str, f32)], area: f32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: area, height: 1.0, confidence },
            landmarks: Vec::new(),
            expressions: scores.iter().map(|&(l, s)| (l, s)).collect::<ExpressionScores>(),
            frame_width: 640,
            frame_height: 480,
        }
    }

    #[test]
    fn test_present_happy_example() {
        let d = face(&[("happy", 0.82), ("neutral", 0.10), ("sad", 0.08)], 10.0, 0.9);
        let state = EmotionPresenter::default().present(&[d], InputMode::Camera);
        assert_eq!(state.label, "Happy (82.0%)");
        assert_eq!(state.confidence, Some(0.82));
        assert_eq!(state.icon, Some(Expression::Happy.icon()));
    }

    #[test]
    fn test_present_unique_max_selected() {
        for target in Expression::ALL {
            let scores: Vec<(&str, f32)> = Expression::ALL
                .iter()
                .map(|e| (e.as_str(), if *e == target { 0.6 } else { 0.05 }))
                .collect();
            let state = EmotionPresenter::default().present(&[face(&scores, 1.0, 1.0)], InputMode::Camera);
            assert!(state.label.starts_with(&format_label(target.as_str(), 0.6)));
            assert_eq!(state.icon, Some(target.icon()));
        }
    }

    #[test]
    fn test_present_empty_camera_clears() {
        let state = EmotionPresenter::default().present(&[], InputMode::Camera);
        assert!(state.is_cleared());
        assert_eq!(state.label, "");
    }

    #[test]
    fn test_present_empty_still_image_no_face_label() {
        let state = EmotionPresenter::default().present(&[], InputMode::StillImage);
        assert_eq!(state.label, NO_FACE_LABEL);
        assert!(state.icon.is_none());
    }

    #[test]
    fn test_present_empty_still_image_label_disabled() {
        let presenter = EmotionPresenter::new(FaceSelection::First, false);
        assert!(presenter.present(&[], InputMode::StillImage).is_cleared());
    }

    #[test]
    fn test_present_unknown_label_has_no_icon() {
        let d = face(&[("contempt", 0.9), ("happy", 0.1)], 1.0, 1.0);
        let state = EmotionPresenter::default().present(&[d], InputMode::Camera);
        assert_eq!(state.label, "Contempt (90.0%)");
        assert!(state.icon.is_none());
    }

    #[test]
    fn test_present_first_face_only() {
        let a = face(&[("sad", 0.9)], 1.0, 0.5);
        let b = face(&[("happy", 0.9)], 100.0, 0.99);
        let state = EmotionPresenter::default().present(&[a, b], InputMode::Camera);
        assert_eq!(state.label, "Sad (90.0%)");
    }

    #[test]
    fn test_selection_largest_and_most_confident() {
        let faces = vec![
            face(&[("sad", 0.9)], 1.0, 0.99),
            face(&[("happy", 0.9)], 100.0, 0.5),
        ];
        let largest = EmotionPresenter::new(FaceSelection::LargestFace, true);
        assert_eq!(largest.present(&faces, InputMode::Camera).label, "Happy (90.0%)");
        let confident = EmotionPresenter::new(FaceSelection::MostConfident, true);
        assert_eq!(confident.present(&faces, InputMode::Camera).label, "Sad (90.0%)");
    }

    #[test]
    fn test_format_label_rounding() {
        assert_eq!(format_label("neutral", 0.1234), "Neutral (12.3%)");
        assert_eq!(format_label("surprised", 1.0), "Surprised (100.0%)");
        assert_eq!(format_label("", 0.5), " (50.0%)");
    }
}
