//! Still-image frame source (uploaded photo).

use crate::frame::Frame;
use crate::source::{CaptureError, FrameSource, SourceKind};
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;

/// Serves the same decoded image on every tick. Holds no hardware tracks.
pub struct StillImage {
    image: Option<Arc<RgbImage>>,
    sequence: u32,
}

impl StillImage {
    /// Decode an image file into RGB8.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let image = image::open(path)?.to_rgb8();
        tracing::info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "still image loaded"
        );
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image: Some(Arc::new(image)),
            sequence: 0,
        }
    }
}

impl FrameSource for StillImage {
    fn kind(&self) -> SourceKind {
        SourceKind::StillImage
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|i| i.dimensions())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let image = self.image.clone().ok_or(CaptureError::Stopped)?;
        let frame = Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(frame))
    }

    fn active_tracks(&self) -> usize {
        0
    }

    fn stop(&mut self) {
        self.image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbImage::from_pixel(5, 3, image::Rgb([9, 8, 7])).save(&path).unwrap();

        let mut still = StillImage::open(&path).unwrap();
        assert_eq!(still.kind(), SourceKind::StillImage);
        assert_eq!(still.dimensions(), Some((5, 3)));

        let a = still.next_frame().unwrap().unwrap();
        let b = still.next_frame().unwrap().unwrap();
        assert_eq!(a.image.get_pixel(0, 0).0, [9, 8, 7]);
        assert_eq!((a.sequence, b.sequence), (0, 1));
        assert!(Arc::ptr_eq(&a.image, &b.image));
    }

    #[test]
    fn test_open_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-image.png");
        std::fs::write(&path, b"hello").unwrap();
        assert!(matches!(StillImage::open(&path), Err(CaptureError::ImageDecode(_))));
    }

    #[test]
    fn test_stop_releases_image() {
        let mut still = StillImage::from_image(RgbImage::new(2, 2));
        assert_eq!(still.active_tracks(), 0);
        still.stop();
        still.stop();
        assert_eq!(still.dimensions(), None);
        assert!(matches!(still.next_frame(), Err(CaptureError::Stopped)));
    }
}
