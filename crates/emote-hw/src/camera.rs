//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::{CaptureBackend, CaptureError, FrameSource, Resolution, SourceKind};
use image::RgbImage;
use std::io;
use std::path::Path;
use std::time::Duration;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
/// Upper bound on one blocking buffer dequeue.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb24,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"GREY" => Some(PixelFormat::Grey),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<RgbImage, frame::FrameError> {
        match self {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            PixelFormat::Rgb24 => frame::rgb24_to_rgb(buf, width, height),
            PixelFormat::Grey => frame::grey_to_rgb(buf, width, height),
        }
    }
}

/// Map an OS error from the driver to a capture error.
fn classify_io_error(device_path: &str, e: &io::Error) -> CaptureError {
    match e.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => {
            CaptureError::PermissionDenied(device_path.to_string())
        }
        Some(libc::EBUSY) => CaptureError::DeviceBusy(device_path.to_string()),
        Some(libc::ENOENT) | Some(libc::ENODEV) => {
            CaptureError::DeviceNotFound(device_path.to_string())
        }
        _ => CaptureError::CaptureFailed(format!("{device_path}: {e}")),
    }
}

/// Map a failed `VIDIOC_DQBUF`. A wedged device surfaces as `TimedOut`.
fn dequeue_error(e: &io::Error, timeout: Duration) -> CaptureError {
    match e.kind() {
        io::ErrorKind::TimedOut => CaptureError::Timeout(timeout),
        _ => CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}")),
    }
}

/// A streaming V4L2 camera. Holds one capture track while streaming.
pub struct CameraStream {
    /// Device and its mmap stream; `None` once stopped.
    track: Option<(Device, MmapStream<'static>)>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    /// Frames still to discard before the stream counts as ready.
    warmup_remaining: usize,
    dequeue_timeout: Duration,
}

impl CameraStream {
    /// Open a V4L2 camera (e.g. "/dev/video0"), negotiate a format near
    /// `hint` and start streaming. Each dequeue gives up after `dequeue_timeout`.
    pub fn open(
        device_path: &str,
        hint: Resolution,
        warmup_frames: usize,
        dequeue_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceNotFound(device_path.to_string()));
        }

        let device =
            Device::with_path(device_path).map_err(|e| classify_io_error(device_path, &e))?;

        let caps = device.query_caps().map_err(|e| {
            CaptureError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = hint.width;
        fmt.height = hint.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, RGB3 or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| match classify_io_error(device_path, &e) {
                CaptureError::CaptureFailed(_) => {
                    CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                }
                other => other,
            })?;
        stream.set_timeout(dequeue_timeout);

        Ok(Self {
            track: Some((device, stream)),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
            warmup_remaining: warmup_frames,
            dequeue_timeout,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for CameraStream {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.track.as_ref().map(|_| (self.width, self.height))
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some((_, stream)) = self.track.as_mut() else {
            return Err(CaptureError::Stopped);
        };

        let timeout = self.dequeue_timeout;
        let (buf, meta) = stream.next().map_err(|e| dequeue_error(&e, timeout))?;

        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            tracing::debug!(seq = meta.sequence, "discarding warmup frame");
            return Ok(None);
        }

        let image = self.pixel_format.to_rgb(buf, self.width, self.height)?;
        Ok(Some(Frame::new(image, meta.sequence)))
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.track.is_some())
    }

    fn stop(&mut self) {
        // Dropping the stream issues STREAMOFF and unmaps the buffers; dropping
        // the device closes its handle.
        if let Some((device, stream)) = self.track.take() {
            drop(stream);
            drop(device);
            tracing::info!(device = %self.device_path, "camera released");
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens [`CameraStream`]s on a fixed device path.
#[derive(Debug, Clone)]
pub struct V4l2Backend {
    pub device_path: String,
    pub warmup_frames: usize,
    pub dequeue_timeout: Duration,
}

impl V4l2Backend {
    pub fn new(device_path: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames,
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
        }
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }
}

impl CaptureBackend for V4l2Backend {
    fn open(&self, hint: Resolution) -> Result<Box<dyn FrameSource>, CaptureError> {
        let camera = CameraStream::open(
            &self.device_path,
            hint,
            self.warmup_frames,
            self.dequeue_timeout,
        )?;
        Ok(Box::new(camera))
    }
}
