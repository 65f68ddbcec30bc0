//! V4L2 camera capture via the `v4l` crate.

use crate::backend::{CameraError, CaptureBackend, CaptureDevice};
use crate::frame::{self, Frame};
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel format a V4L2 backend negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpg,
}

impl PixelFormat {
    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpg => FourCC::new(b"MJPG"),
        }
    }
}

/// Path of the V4L2 node for a local camera index.
pub fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

/// V4L2 backend bound to one pixel format.
///
/// Linux has a single capture API, so fallback happens across formats instead
/// of across drivers: some UVC cameras only stream MJPG at useful resolutions.
pub struct V4l2Backend {
    name: &'static str,
    format: PixelFormat,
}

impl V4l2Backend {
    pub fn yuyv() -> Self {
        Self {
            name: "V4L2-YUYV",
            format: PixelFormat::Yuyv,
        }
    }

    pub fn mjpg() -> Self {
        Self {
            name: "V4L2-MJPG",
            format: PixelFormat::Mjpg,
        }
    }

    /// Platform-ordered backend list tried by the source opener.
    pub fn platform_default() -> Vec<Box<dyn CaptureBackend>> {
        vec![Box::new(Self::yuyv()), Box::new(Self::mjpg())]
    }

    /// Query name/driver/bus for a local index without starting a stream.
    pub fn describe(index: u32) -> Option<DeviceInfo> {
        let path = device_path(index);
        if !Path::new(&path).exists() {
            return None;
        }
        let dev = Device::with_path(&path).ok()?;
        let caps = dev.query_caps().ok()?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return None;
        }
        Some(DeviceInfo {
            index,
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        })
    }
}

impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &str {
        self.name
    }

    fn open_index(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
        Ok(Box::new(V4l2Camera::open(&device_path(index), self.format)?))
    }

    fn exists(&self, index: u32) -> bool {
        Self::describe(index).is_some()
    }
}

/// V4L2 camera device handle.
pub struct V4l2Camera {
    device: Device,
    /// Created lazily on first read; dropped whenever the format changes.
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    sequence: u32,
}

impl V4l2Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, pixel_format: PixelFormat) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::debug!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let current = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        let mut camera = Self {
            device,
            stream: None,
            width: current.width,
            height: current.height,
            device_path: device_path.to_string(),
            pixel_format,
            sequence: 0,
        };
        camera.negotiate(current.width, current.height)?;
        Ok(camera)
    }

    /// Set the backend's fourcc at the requested size and record what the
    /// driver actually granted.
    fn negotiate(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
        self.stream = None;

        let mut fmt = self.device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = self.pixel_format.fourcc();
        fmt.width = width;
        fmt.height = height;

        let negotiated = self.device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        if negotiated.fourcc != self.pixel_format.fourcc() {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "driver chose {:?} instead of {:?}",
                negotiated.fourcc,
                self.pixel_format.fourcc()
            )));
        }

        tracing::debug!(
            device = %self.device_path,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        self.width = negotiated.width;
        self.height = negotiated.height;
        Ok(())
    }
}

impl CaptureDevice for V4l2Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
                .map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;
            self.stream = Some(stream);
        }

        let (width, height, format) = (self.width, self.height, self.pixel_format);
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream not started".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;

        let frame = match format {
            PixelFormat::Yuyv => {
                let rgb = frame::yuyv_to_rgb(buf, width, height).map_err(|e| {
                    CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))
                })?;
                Frame::new(rgb, width, height, sequence)
            }
            PixelFormat::Mjpg => Frame::from_jpeg(buf, sequence)
                .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}")))?,
        };
        self.sequence = sequence;
        Ok(frame)
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
        self.negotiate(width, height)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        tracing::debug!(device = %self.device_path, last_sequence = self.sequence, "released camera");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path() {
        assert_eq!(device_path(0), "/dev/video0");
        assert_eq!(device_path(12), "/dev/video12");
    }

    #[test]
    fn test_platform_backend_order() {
        let names: Vec<String> = V4l2Backend::platform_default()
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        assert_eq!(names, vec!["V4L2-YUYV", "V4L2-MJPG"]);
    }

    #[test]
    fn test_open_missing_device() {
        let result = V4l2Camera::open("/dev/video-does-not-exist", PixelFormat::Yuyv);
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::Yuyv.fourcc(), FourCC::new(b"YUYV"));
        assert_eq!(PixelFormat::Mjpg.fourcc(), FourCC::new(b"MJPG"));
    }
}
