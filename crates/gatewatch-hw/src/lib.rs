//! gatewatch-hw: Video source resilience layer.
//!
//! Opens local cameras (V4L2) and network MJPEG/JPEG sources with backend
//! fallback and warm-up, selects among candidates by strategy, and wraps the
//! winner in a frame stream that transparently reopens the same logical
//! source after repeated read failures.

pub mod backend;
pub mod camera;
pub mod frame;
pub mod network;
pub mod opener;
pub mod selector;
pub mod stream;

pub use backend::{CameraError, CaptureBackend, CaptureDevice, NetworkTransport};
pub use camera::{DeviceInfo, V4l2Backend};
pub use frame::Frame;
pub use network::HttpTransport;
pub use opener::{OpenError, OpenedSource, SourceOpener, SourceSpec, Warmup};
pub use selector::{select, NoSourceError, SelectedId, Selection, SelectionArgs, SourceStrategy};
pub use stream::{reselect, FrameRead, Reopen, ResilientFrames};
