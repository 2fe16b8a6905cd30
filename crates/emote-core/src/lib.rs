//! emote-core — Face detection, expression scoring and presentation.
//!
//! Uses SCRFD for face detection and a seven-class expression classifier,
//! both running via ONNX Runtime for CPU inference. Also owns the overlay
//! surface, the label/icon presenter and snapshot export.

pub mod classifier;
pub mod detector;
pub mod engine;
pub mod expression;
pub mod models;
pub mod overlay;
pub mod presenter;
pub mod snapshot;
pub mod types;

pub use engine::{default_model_dir, DetectOptions, EngineError, ExpressionEngine, OnnxEngine};
pub use expression::{Expression, ExpressionScores, Icon};
pub use models::{ModelGate, ModelState};
pub use overlay::OverlayRenderer;
pub use presenter::{DisplayState, EmotionPresenter, FaceSelection, InputMode};
pub use types::{BoundingBox, Detection, Point};
