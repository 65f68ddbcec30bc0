//! Capture backend seams.
//!
//! A backend knows how to turn a local index (or a URL) into an open
//! [`CaptureDevice`]. Dropping a device releases the underlying handle.

use crate::frame::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("connection failed: {0}")]
    Connection(String),
}

/// An opened capture handle.
pub trait CaptureDevice {
    /// Block until the next frame is available.
    ///
    /// May return an empty frame; callers decide whether that counts as a miss.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Request a capture resolution. The device may negotiate something else.
    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CameraError>;

    /// Currently negotiated resolution, `(0, 0)` when unknown.
    fn resolution(&self) -> (u32, u32);
}

/// A driver for local capture devices addressed by index.
pub trait CaptureBackend {
    /// Short tag reported in the status line (e.g. `V4L2-YUYV`).
    fn name(&self) -> &str;

    fn open_index(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError>;

    /// Cheap existence check used by enumeration. Opening is enough; no
    /// frames are requested.
    fn exists(&self, index: u32) -> bool {
        self.open_index(index).is_ok()
    }
}

/// A transport for network sources addressed by URL.
pub trait NetworkTransport {
    fn name(&self) -> &str;

    fn open_url(&self, url: &str) -> Result<Box<dyn CaptureDevice>, CameraError>;
}
