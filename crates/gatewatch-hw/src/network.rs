//! HTTP network sources: multipart MJPEG streams and single-JPEG endpoints.
//!
//! Phone camera apps and IP cameras commonly expose one or the other on the
//! same URL; the content type of the first response decides which.

use crate::backend::{CameraError, CaptureDevice, NetworkTransport};
use crate::frame::Frame;
use std::io::Read;
use std::time::Duration;
use url::Url;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Network transport tagged `URL` in the status line.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self { agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkTransport for HttpTransport {
    fn name(&self) -> &str {
        "URL"
    }

    fn open_url(&self, url: &str) -> Result<Box<dyn CaptureDevice>, CameraError> {
        let parsed = Url::parse(url).map_err(|e| CameraError::Unsupported(format!("{url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(CameraError::Unsupported(format!(
                    "scheme '{other}' (expected http or https)"
                )))
            }
        }

        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| CameraError::Connection(e.to_string()))?;

        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let mode = if content_type.contains("multipart") {
            tracing::debug!(url, %content_type, "network source is an MJPEG stream");
            HttpMode::Mjpeg(MjpegReader::new(response.into_reader()))
        } else {
            tracing::debug!(url, %content_type, "network source is a snapshot endpoint");
            HttpMode::Snapshot
        };

        Ok(Box::new(HttpSource {
            agent: self.agent.clone(),
            url: url.to_string(),
            mode,
            width: 0,
            height: 0,
            sequence: 0,
        }))
    }
}

enum HttpMode {
    Mjpeg(MjpegReader),
    Snapshot,
}

struct HttpSource {
    agent: ureq::Agent,
    url: String,
    mode: HttpMode,
    width: u32,
    height: u32,
    sequence: u32,
}

impl HttpSource {
    fn fetch_snapshot(&self) -> Result<Vec<u8>, CameraError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| CameraError::Connection(e.to_string()))?;
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut body)
            .map_err(|e| CameraError::CaptureFailed(format!("read snapshot body: {e}")))?;
        Ok(body)
    }
}

impl CaptureDevice for HttpSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let jpeg = match &mut self.mode {
            HttpMode::Mjpeg(reader) => reader.next_jpeg()?,
            HttpMode::Snapshot => self.fetch_snapshot()?,
        };
        self.sequence = self.sequence.wrapping_add(1);
        let frame = Frame::from_jpeg(&jpeg, self.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        self.width = frame.width;
        self.height = frame.height;
        Ok(frame)
    }

    /// Network sources stream whatever the sender encodes.
    fn set_resolution(&mut self, _width: u32, _height: u32) -> Result<(), CameraError> {
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Splits a multipart MJPEG byte stream into JPEG payloads by SOI/EOI markers.
struct MjpegReader {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(jpeg);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CameraError::CaptureFailed(format!("read mjpeg chunk: {e}")))?;
            if read == 0 {
                return Err(CameraError::CaptureFailed("mjpeg stream ended".into()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // A runaway part with no EOI; keep the tail so a marker split
            // across reads still matches.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Locate the first complete JPEG (`FFD8 .. FFD9`) in `buf`.
///
/// Returns `(start, end)` with `end` exclusive.
fn find_jpeg_bounds(buf: &[u8]) -> Option<(usize, usize)> {
    let start = buf.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let eoi = buf[start + 2..].windows(2).position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + eoi + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_find_jpeg_bounds() {
        let buf = [0x00, 0x11, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x33];
        assert_eq!(find_jpeg_bounds(&buf), Some((2, 8)));
    }

    #[test]
    fn test_find_jpeg_bounds_incomplete() {
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x01, 0x02]), None);
        assert_eq!(find_jpeg_bounds(&[0x01, 0x02, 0xFF, 0xD9]), None);
        assert_eq!(find_jpeg_bounds(&[]), None);
    }

    #[test]
    fn test_mjpeg_reader_splits_parts() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        body.extend_from_slice(&[0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        body.extend_from_slice(b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        body.extend_from_slice(&[0xFF, 0xD8, 0xBB, 0xBB, 0xFF, 0xD9]);

        let mut reader = MjpegReader::new(Box::new(Cursor::new(body)));
        assert_eq!(reader.next_jpeg().unwrap(), vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        assert_eq!(
            reader.next_jpeg().unwrap(),
            vec![0xFF, 0xD8, 0xBB, 0xBB, 0xFF, 0xD9]
        );
        assert!(reader.next_jpeg().is_err(), "stream end must surface as a read failure");
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let transport = HttpTransport::new();
        let result = transport.open_url("rtsp://192.168.1.20:554/live");
        assert!(matches!(result, Err(CameraError::Unsupported(_))));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let transport = HttpTransport::new();
        assert!(matches!(
            transport.open_url("not a url"),
            Err(CameraError::Unsupported(_))
        ));
    }
}
