//! Opens one candidate source with backend fallback and frame warm-up.

use crate::backend::{CameraError, CaptureBackend, CaptureDevice, NetworkTransport};
use crate::camera::V4l2Backend;
use crate::frame::Frame;
use crate::network::HttpTransport;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const WARMUP_TRIES: usize = 12;
pub const WARMUP_DELAY: Duration = Duration::from_millis(20);
/// Resolution retried once when warm-up fails at the preferred size.
pub const FALLBACK_WIDTH: u32 = 1280;
pub const FALLBACK_HEIGHT: u32 = 720;

/// What to open. Re-derivable from the selection arguments, so a reopen
/// targets the same logical source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Local {
        index: u32,
        preferred_width: u32,
        preferred_height: u32,
    },
    Network {
        url: String,
    },
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Local {
                index,
                preferred_width,
                preferred_height,
            } => write!(f, "local:{index}@{preferred_width}x{preferred_height}"),
            SourceSpec::Network { url } => write!(f, "url:{url}"),
        }
    }
}

/// Why one backend did not produce a usable source.
#[derive(Debug)]
pub enum BackendFailure {
    Open { backend: String, error: CameraError },
    NoFrames { backend: String },
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendFailure::Open { backend, error } => write!(f, "{backend}: {error}"),
            BackendFailure::NoFrames { backend } => write!(f, "{backend}: no frames during warm-up"),
        }
    }
}

fn summarize(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backends configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("local camera {index}: {}", summarize(.failures))]
    Local {
        index: u32,
        failures: Vec<BackendFailure>,
    },
    #[error("network source {url}: {failure}")]
    Network { url: String, failure: BackendFailure },
}

/// Warm-up policy: how many reads to spend absorbing initialization garbage.
#[derive(Debug, Clone, Copy)]
pub struct Warmup {
    pub tries: usize,
    pub delay: Duration,
}

impl Default for Warmup {
    fn default() -> Self {
        Self {
            tries: WARMUP_TRIES,
            delay: WARMUP_DELAY,
        }
    }
}

/// An opened, warmed-up source.
///
/// Owns the capture handle; dropping (or [`close`](Self::close)) releases it.
pub struct OpenedSource {
    device: Box<dyn CaptureDevice>,
    backend_name: String,
    width: u32,
    height: u32,
    spec: SourceSpec,
}

impl OpenedSource {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        backend_name: impl Into<String>,
        width: u32,
        height: u32,
        spec: SourceSpec,
    ) -> Self {
        Self {
            device,
            backend_name: backend_name.into(),
            width,
            height,
            spec,
        }
    }

    pub fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.device.read_frame()
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Negotiated `(width, height)` observed during warm-up.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    /// Release the capture handle.
    pub fn close(self) {
        tracing::debug!(spec = %self.spec, backend = %self.backend_name, "closing source");
        drop(self.device);
    }
}

impl fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedSource")
            .field("backend_name", &self.backend_name)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("spec", &self.spec)
            .finish()
    }
}

/// Opens single candidate sources, trying each local backend in order.
pub struct SourceOpener {
    backends: Vec<Box<dyn CaptureBackend>>,
    network: Box<dyn NetworkTransport>,
    warmup: Warmup,
}

impl SourceOpener {
    pub fn new(backends: Vec<Box<dyn CaptureBackend>>, network: Box<dyn NetworkTransport>) -> Self {
        Self {
            backends,
            network,
            warmup: Warmup::default(),
        }
    }

    /// V4L2 backends plus the HTTP transport.
    pub fn platform_default() -> Self {
        Self::new(V4l2Backend::platform_default(), Box::new(HttpTransport::new()))
    }

    pub fn with_warmup(mut self, warmup: Warmup) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn open(&self, spec: &SourceSpec) -> Result<OpenedSource, OpenError> {
        match spec {
            SourceSpec::Local {
                index,
                preferred_width,
                preferred_height,
            } => self.open_local(*index, *preferred_width, *preferred_height),
            SourceSpec::Network { url } => self.open_network(url),
        }
    }

    /// Open a local camera by index, falling over to the next backend on failure.
    pub fn open_local(
        &self,
        index: u32,
        pref_w: u32,
        pref_h: u32,
    ) -> Result<OpenedSource, OpenError> {
        let mut failures = Vec::new();

        for backend in &self.backends {
            let name = backend.name().to_string();
            tracing::debug!(index, backend = %name, width = pref_w, height = pref_h, "trying local camera");

            let mut device = match backend.open_index(index) {
                Ok(device) => device,
                Err(error) => {
                    tracing::debug!(index, backend = %name, %error, "open failed");
                    failures.push(BackendFailure::Open { backend: name, error });
                    continue;
                }
            };

            if let Err(error) = device.set_resolution(pref_w, pref_h) {
                tracing::debug!(index, backend = %name, %error, "preferred resolution rejected");
            }

            let mut first = warm_up(device.as_mut(), &self.warmup);
            if first.is_none() {
                tracing::debug!(
                    index,
                    backend = %name,
                    "warm-up failed at preferred resolution; retrying at {FALLBACK_WIDTH}x{FALLBACK_HEIGHT}"
                );
                if let Err(error) = device.set_resolution(FALLBACK_WIDTH, FALLBACK_HEIGHT) {
                    tracing::debug!(index, backend = %name, %error, "fallback resolution rejected");
                }
                first = warm_up(device.as_mut(), &self.warmup);
            }

            match first {
                Some(frame) => {
                    tracing::info!(
                        index,
                        backend = %name,
                        width = frame.width,
                        height = frame.height,
                        "local camera opened"
                    );
                    return Ok(OpenedSource::new(
                        device,
                        name,
                        frame.width,
                        frame.height,
                        SourceSpec::Local {
                            index,
                            preferred_width: pref_w,
                            preferred_height: pref_h,
                        },
                    ));
                }
                None => {
                    tracing::debug!(index, backend = %name, "no frames during warm-up");
                    drop(device);
                    failures.push(BackendFailure::NoFrames { backend: name });
                }
            }
        }

        Err(OpenError::Local { index, failures })
    }

    /// Open a network URL directly; the transport picks the wire format.
    pub fn open_network(&self, url: &str) -> Result<OpenedSource, OpenError> {
        let name = self.network.name().to_string();
        tracing::debug!(url, transport = %name, "trying network source");

        let mut device = self.network.open_url(url).map_err(|error| OpenError::Network {
            url: url.to_string(),
            failure: BackendFailure::Open {
                backend: name.clone(),
                error,
            },
        })?;

        match warm_up(device.as_mut(), &self.warmup) {
            Some(frame) => {
                tracing::info!(url, width = frame.width, height = frame.height, "network source opened");
                Ok(OpenedSource::new(
                    device,
                    name,
                    frame.width,
                    frame.height,
                    SourceSpec::Network {
                        url: url.to_string(),
                    },
                ))
            }
            None => {
                drop(device);
                Err(OpenError::Network {
                    url: url.to_string(),
                    failure: BackendFailure::NoFrames { backend: name },
                })
            }
        }
    }

    /// Try indices `0..max_index` and return those that open.
    ///
    /// Each device is released immediately; no frames are requested, so a
    /// listed index is not guaranteed to stream.
    pub fn list_local_indices(&self, max_index: u32) -> Vec<u32> {
        let Some(backend) = self.backends.first() else {
            return Vec::new();
        };
        let found: Vec<u32> = (0..max_index).filter(|&i| backend.exists(i)).collect();
        tracing::debug!(?found, max_index, "enumerated local cameras");
        found
    }
}

/// Read up to `warmup.tries` frames, discarding empty ones.
///
/// Returns the first non-empty frame, or `None` if none arrived.
fn warm_up(device: &mut dyn CaptureDevice, warmup: &Warmup) -> Option<Frame> {
    for attempt in 0..warmup.tries {
        match device.read_frame() {
            Ok(frame) if !frame.is_empty() => return Some(frame),
            Ok(_) => tracing::trace!(attempt, "warm-up: empty frame"),
            Err(error) => tracing::trace!(attempt, %error, "warm-up: read failed"),
        }
        if !warmup.delay.is_zero() {
            std::thread::sleep(warmup.delay);
        }
    }
    None
}
