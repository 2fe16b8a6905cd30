//! emote-hw — Frame sources: V4L2 camera streams and still images.
//!
//! Provides V4L2-based camera access with conversion to RGB8, and a
//! still-image source for analysing uploaded photos.

pub mod camera;
pub mod frame;
pub mod source;
pub mod still;

pub use camera::{CameraStream, DeviceInfo, PixelFormat, V4l2Backend};
pub use frame::Frame;
pub use source::{CaptureBackend, CaptureError, FrameSource, Resolution, SourceKind};
pub use still::StillImage;
