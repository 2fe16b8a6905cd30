use serde::{Deserialize, Serialize};

use crate::expression::ExpressionScores;

/// A 2D point in the pixel space of the analysed image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bounding box for a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One located face, its landmarks and its expression probabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Ordered landmark points: [left_eye, right_eye, nose, left_mouth, right_mouth]
    /// for the SCRFD engine, engine-defined otherwise.
    pub landmarks: Vec<Point>,
    pub expressions: ExpressionScores,
    /// Width of the image the engine analysed. Coordinates are in this space.
    pub frame_width: u32,
    /// Height of the image the engine analysed.
    pub frame_height: u32,
}

impl Detection {
    /// Rescale box and landmarks into a `width` x `height` target space.
    ///
    /// Returns an unchanged clone when the analysed size already matches or
    /// is degenerate.
    pub fn scaled_to(&self, width: u32, height: u32) -> Detection {
        if self.frame_width == 0
            || self.frame_height == 0
            || (self.frame_width == width && self.frame_height == height)
        {
            return self.clone();
        }

        let sx = width as f32 / self.frame_width as f32;
        let sy = height as f32 / self.frame_height as f32;

        Detection {
            bbox: BoundingBox {
                x: self.bbox.x * sx,
                y: self.bbox.y * sy,
                width: self.bbox.width * sx,
                height: self.bbox.height * sy,
                confidence: self.bbox.confidence,
            },
            landmarks: self
                .landmarks
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
            expressions: self.expressions.clone(),
            frame_width: width,
            frame_height: height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(frame: (u32, u32)) -> Detection {
        Detection {
            bbox: BoundingBox { x: 10.0, y: 20.0, width: 30.0, height: 40.0, confidence: 0.9 },
            landmarks: vec![Point::new(15.0, 25.0)],
            expressions: ExpressionScores::default(),
            frame_width: frame.0,
            frame_height: frame.1,
        }
    }

    #[test]
    fn test_scaled_to_same_size_is_identity() {
        let d = detection((320, 240));
        let s = d.scaled_to(320, 240);
        assert_eq!(s.bbox, d.bbox);
        assert_eq!(s.landmarks, d.landmarks);
    }

    #[test]
    fn test_scaled_to_double() {
        let s = detection((320, 240)).scaled_to(640, 480);
        assert_eq!(s.bbox.x, 20.0);
        assert_eq!(s.bbox.y, 40.0);
        assert_eq!(s.bbox.width, 60.0);
        assert_eq!(s.bbox.height, 80.0);
        assert_eq!(s.bbox.confidence, 0.9);
        assert_eq!(s.landmarks[0], Point::new(30.0, 50.0));
        assert_eq!((s.frame_width, s.frame_height), (640, 480));
    }

    #[test]
    fn test_scaled_to_degenerate_source() {
        let d = detection((0, 0));
        let s = d.scaled_to(640, 480);
        assert_eq!(s.bbox, d.bbox);
    }

    #[test]
    fn test_area_clamps_negative() {
        let b = BoundingBox { x: 0.0, y: 0.0, width: -5.0, height: 10.0, confidence: 1.0 };
        assert_eq!(b.area(), 0.0);
    }
}
