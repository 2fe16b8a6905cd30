//! Transparent overlay surface aligned with the active frame source.

use crate::types::Detection;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const BOX_COLOR: Rgba<u8> = Rgba([0, 120, 255, 255]);
const LANDMARK_COLOR: Rgba<u8> = Rgba([0, 255, 128, 255]);
const LANDMARK_RADIUS: i32 = 2;
/// Box outline thickness in pixels.
const BOX_THICKNESS: i32 = 2;

pub struct OverlayRenderer {
    surface: RgbaImage,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayRenderer {
    /// An empty 0×0 surface; call [`sync_to`](Self::sync_to) once the source is ready.
    pub fn new() -> Self {
        Self { surface: RgbaImage::new(0, 0) }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    /// Resize the surface to the frame source's intrinsic size.
    ///
    /// Resizing discards the current drawing; a matching size keeps it.
    pub fn sync_to(&mut self, width: u32, height: u32) {
        if self.surface.dimensions() != (width, height) {
            tracing::debug!(width, height, "overlay resized");
            self.surface = RgbaImage::new(width, height);
        }
    }

    /// Make every pixel fully transparent.
    pub fn clear(&mut self) {
        self.surface.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    pub fn is_clear(&self) -> bool {
        self.surface.pixels().all(|p| p.0[3] == 0)
    }

    /// Clear, then draw every detection's box and landmarks.
    pub fn render(&mut self, detections: &[Detection]) {
        self.clear();
        let (width, height) = self.surface.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        for detection in detections {
            let d = detection.scaled_to(width, height);
            self.draw_box(&d);
            for p in &d.landmarks {
                draw_filled_circle_mut(
                    &mut self.surface,
                    (p.x.round() as i32, p.y.round() as i32),
                    LANDMARK_RADIUS,
                    LANDMARK_COLOR,
                );
            }
        }
    }

    fn draw_box(&mut self, d: &Detection) {
        let x = d.bbox.x.round() as i32;
        let y = d.bbox.y.round() as i32;
        let w = d.bbox.width.round() as i32;
        let h = d.bbox.height.round() as i32;

        for inset in 0..BOX_THICKNESS {
            let (rw, rh) = (w - 2 * inset, h - 2 * inset);
            if rw <= 0 || rh <= 0 {
                break;
            }
            let rect = Rect::at(x + inset, y + inset).of_size(rw as u32, rh as u32);
            draw_hollow_rect_mut(&mut self.surface, rect, BOX_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionScores;
    use crate::types::{BoundingBox, Point};

    fn detection(frame: (u32, u32)) -> Detection {
        Detection {
            bbox: BoundingBox { x: 10.0, y: 10.0, width: 20.0, height: 20.0, confidence: 0.9 },
            landmarks: vec![Point::new(20.0, 20.0)],
            expressions: ExpressionScores::default(),
            frame_width: frame.0,
            frame_height: frame.1,
        }
    }

    #[test]
    fn test_sync_to_matches_dimensions() {
        let mut overlay = OverlayRenderer::new();
        assert_eq!(overlay.dimensions(), (0, 0));
        overlay.sync_to(640, 480);
        assert_eq!(overlay.dimensions(), (640, 480));
        overlay.sync_to(320, 240);
        assert_eq!(overlay.dimensions(), (320, 240));
    }

    #[test]
    fn test_render_draws_box_and_landmarks() {
        let mut overlay = OverlayRenderer::new();
        overlay.sync_to(64, 64);
        overlay.render(&[detection((64, 64))]);

        assert_eq!(*overlay.surface().get_pixel(10, 10), BOX_COLOR);
        assert_eq!(*overlay.surface().get_pixel(20, 20), LANDMARK_COLOR);
        // Outside the box stays transparent.
        assert_eq!(overlay.surface().get_pixel(50, 50).0[3], 0);
    }

    #[test]
    fn test_render_empty_leaves_surface_clear() {
        let mut overlay = OverlayRenderer::new();
        overlay.sync_to(64, 64);
        overlay.render(&[detection((64, 64))]);
        assert!(!overlay.is_clear());

        overlay.render(&[]);
        assert!(overlay.is_clear());
    }

    #[test]
    fn test_render_scales_to_surface() {
        let mut overlay = OverlayRenderer::new();
        overlay.sync_to(128, 128);
        overlay.render(&[detection((64, 64))]);

        // Box corner (10, 10) in 64px space → (20, 20) on a 128px surface.
        assert_eq!(*overlay.surface().get_pixel(20, 20), BOX_COLOR);
        assert_eq!(*overlay.surface().get_pixel(40, 40), LANDMARK_COLOR);
    }

    #[test]
    fn test_render_box_partly_outside() {
        let mut overlay = OverlayRenderer::new();
        overlay.sync_to(32, 32);
        let mut d = detection((32, 32));
        d.bbox.x = -10.0;
        d.bbox.width = 100.0;
        overlay.render(&[d]);
        assert!(!overlay.is_clear());
    }

    #[test]
    fn test_render_on_unsynced_surface_is_noop() {
        let mut overlay = OverlayRenderer::new();
        overlay.render(&[detection((64, 64))]);
        assert_eq!(overlay.dimensions(), (0, 0));
    }

    #[test]
    fn test_clear() {
        let mut overlay = OverlayRenderer::new();
        overlay.sync_to(16, 16);
        overlay.render(&[detection((16, 16))]);
        overlay.clear();
        assert!(overlay.is_clear());
    }
}
