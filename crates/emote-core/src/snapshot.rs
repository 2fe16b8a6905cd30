//! Snapshot export: frame + overlay composited into one PNG.

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name every snapshot is written to.
pub const SNAPSHOT_FILE_NAME: &str = "emotion-snapshot.png";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("no frame captured yet")]
    NoFrame,
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Draw `overlay` over `frame` into a new buffer of the frame's size.
pub fn composite(frame: &RgbImage, overlay: &RgbaImage) -> RgbaImage {
    let mut out = DynamicImage::ImageRgb8(frame.clone()).to_rgba8();

    if overlay.dimensions() == frame.dimensions() {
        image::imageops::overlay(&mut out, overlay, 0, 0);
    } else if overlay.width() > 0 && overlay.height() > 0 {
        let scaled = image::imageops::resize(
            overlay,
            frame.width(),
            frame.height(),
            image::imageops::FilterType::Nearest,
        );
        image::imageops::overlay(&mut out, &scaled, 0, 0);
    }

    out
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, SnapshotError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Composite, encode and write `emotion-snapshot.png` into `dir`.
pub fn export(frame: &RgbImage, overlay: &RgbaImage, dir: &Path) -> Result<PathBuf, SnapshotError> {
    let png = encode_png(&composite(frame, overlay))?;
    let path = dir.join(SNAPSHOT_FILE_NAME);

    std::fs::write(&path, &png).map_err(|source| SnapshotError::Write {
        path: path.display().to_string(),
        source,
    })?;

    tracing::info!(
        path = %path.display(),
        width = frame.width(),
        height = frame.height(),
        bytes = png.len(),
        "snapshot written"
    );
    Ok(path)
}
