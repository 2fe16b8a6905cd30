//! Frame sources: the one image-bearing input analysed at a time.

use crate::frame::{Frame, FrameError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("image decode failed: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("frame conversion failed: {0}")]
    Frame(#[from] FrameError),
    #[error("no frame within {0:?}")]
    Timeout(std::time::Duration),
    #[error("source stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Camera,
    StillImage,
}

/// Desired capture size. Drivers may negotiate something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self { width: 640, height: 480 }
    }
}

/// An active frame source (live stream or still image).
pub trait FrameSource: Send {
    fn kind(&self) -> SourceKind;

    /// Intrinsic frame size, `None` until the source is ready or after `stop`.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Next frame to analyse. `Ok(None)` means the source is not ready yet
    /// and the caller should skip this tick.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Number of hardware capture tracks currently held open.
    fn active_tracks(&self) -> usize;

    /// Release the underlying device. Must be idempotent.
    fn stop(&mut self);
}

/// Opens camera frame sources.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, hint: Resolution) -> Result<Box<dyn FrameSource>, CaptureError>;
}
