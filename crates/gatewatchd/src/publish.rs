//! On-disk state for external readers: the last annotated frame, a status
//! line, the append-only event log and snapshot images.
//!
//! Frame and status files are replaced atomically (temp file + rename) so a
//! concurrent reader sees either the old or the new content, never a torn
//! write. The event log is only ever appended to.

use chrono::{DateTime, Local};
use gatewatch_core::{sanitize_label, Decision, Quality};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const EVENT_HEADER: [&str; 9] = [
    "timestamp",
    "cam_id",
    "name",
    "codigo",
    "grado",
    "distancia",
    "decision",
    "quality",
    "snapshot_path",
];

const JPEG_QUALITY: u8 = 85;
const REPLACE_RETRIES: u32 = 5;
const REPLACE_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encode jpeg: {0}")]
    Encode(#[from] image::ImageError),
    #[error("event log: {0}")]
    Csv(#[from] csv::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PublishError + '_ {
    move |source| PublishError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `cam=<id|None> backend=<name|None> size=<w>x<h>`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusLine {
    pub cam: Option<String>,
    pub backend: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl StatusLine {
    /// Status while no source is open.
    pub fn no_source() -> Self {
        Self::default()
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cam={} backend={} size={}x{}",
            self.cam.as_deref().unwrap_or("None"),
            self.backend.as_deref().unwrap_or("None"),
            self.width,
            self.height
        )
    }
}

/// One row of the event log, in column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp: String,
    pub cam_id: String,
    pub name: String,
    pub codigo: String,
    pub grado: String,
    #[serde(rename = "distancia")]
    pub distance: String,
    pub decision: Decision,
    pub quality: Quality,
    pub snapshot_path: String,
}

pub fn format_timestamp(wall: &DateTime<Local>) -> String {
    wall.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Append-only CSV with a fixed header.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file is absent or empty.
    pub fn append(&self, event: &Event) -> Result<(), PublishError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err(&self.path))?;
        let fresh = file.metadata().map_err(io_err(&self.path))?.len() == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            writer.write_record(EVENT_HEADER)?;
        }
        writer.serialize(event)?;
        writer.flush().map_err(io_err(&self.path))?;
        Ok(())
    }
}

/// Write `data` to a sibling temp file, then rename it over `path`.
///
/// A failing rename is retried with a growing backoff; after the last retry
/// the temp file is copied over `path` instead, so the content still lands.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PublishError> {
    write_atomic_with(path, data, |from, to| fs::rename(from, to))
}

fn write_atomic_with(
    path: &Path,
    data: &[u8],
    replace: impl Fn(&Path, &Path) -> std::io::Result<()>,
) -> Result<(), PublishError> {
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(data).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
    }

    for attempt in 1..=REPLACE_RETRIES {
        match replace(&tmp, path) {
            Ok(()) => return Ok(()),
            Err(error) => {
                tracing::debug!(path = %path.display(), attempt, %error, "atomic replace failed");
                std::thread::sleep(REPLACE_BACKOFF * attempt);
            }
        }
    }

    tracing::warn!(path = %path.display(), "atomic replace kept failing; copying instead");
    let copied = fs::copy(&tmp, path).map_err(io_err(path));
    let _ = fs::remove_file(&tmp);
    copied.map(|_| ())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, PublishError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(image)?;
    Ok(buf)
}

/// Artifact locations under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPaths {
    pub frame: PathBuf,
    pub status: PathBuf,
    pub events: PathBuf,
    pub snapshots: PathBuf,
}

impl PublishPaths {
    pub fn under(data_dir: &Path) -> Self {
        Self {
            frame: data_dir.join("last_frame.jpg"),
            status: data_dir.join("status.txt"),
            events: data_dir.join("logs").join("events.csv"),
            snapshots: data_dir.join("snapshots"),
        }
    }
}

pub struct Publisher {
    paths: PublishPaths,
    events: EventLog,
}

impl Publisher {
    /// Create the artifact directories and a publisher over them.
    pub fn create(paths: PublishPaths) -> Result<Self, PublishError> {
        for dir in [paths.frame.parent(), paths.status.parent(), paths.events.parent()]
            .into_iter()
            .flatten()
            .chain(std::iter::once(paths.snapshots.as_path()))
        {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(io_err(dir))?;
            }
        }
        let events = EventLog::new(paths.events.clone());
        Ok(Self { paths, events })
    }

    pub fn paths(&self) -> &PublishPaths {
        &self.paths
    }

    pub fn publish_frame(&self, image: &RgbImage) -> Result<(), PublishError> {
        write_atomic(&self.paths.frame, &encode_jpeg(image)?)
    }

    pub fn publish_status(&self, status: &StatusLine) -> Result<(), PublishError> {
        write_atomic(&self.paths.status, format!("{status}\n").as_bytes())
    }

    pub fn append_event(&self, event: &Event) -> Result<(), PublishError> {
        self.events.append(event)
    }

    /// Save `<YYYYmmdd_HHMMSS>_<sanitized label>.jpg` and return its path.
    pub fn save_snapshot(
        &self,
        image: &RgbImage,
        label: &str,
        wall: &DateTime<Local>,
    ) -> Result<PathBuf, PublishError> {
        let name = format!("{}_{}.jpg", wall.format("%Y%m%d_%H%M%S"), sanitize_label(label));
        let path = self.paths.snapshots.join(name);
        write_atomic(&path, &encode_jpeg(image)?)?;
        Ok(path)
    }
}
