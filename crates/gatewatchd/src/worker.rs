//! Capture loop: select a source, stream it through the engine, and fall
//! back to the placeholder while nothing is available.

use crate::engine::{RecognitionEngine, SourceInfo};
use crate::overlay::placeholder_frame;
use crate::publish::{Publisher, StatusLine};
use gatewatch_hw::stream::{MAX_MISSES, MISS_DELAY};
use gatewatch_hw::{reselect, select, FrameRead, ResilientFrames, Selection, SelectionArgs, SourceOpener};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Replaces the selected source id in event rows.
    pub cam_id: Option<String>,
    pub max_misses: u32,
    pub miss_delay: Duration,
    pub retry: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            cam_id: None,
            max_misses: MAX_MISSES,
            miss_delay: MISS_DELAY,
            retry: crate::config::DEFAULT_RETRY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Selection found nothing to open.
    NoSource,
    /// A source streamed `frames` frames, then died past recovery.
    Lost { frames: u64 },
}

pub struct Worker {
    opener: SourceOpener,
    args: SelectionArgs,
    engine: RecognitionEngine,
    publisher: Publisher,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        opener: SourceOpener,
        args: SelectionArgs,
        engine: RecognitionEngine,
        publisher: Publisher,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            opener,
            args,
            engine,
            publisher,
            settings,
        }
    }

    /// Runs until the process is terminated.
    pub fn run(mut self) -> ! {
        loop {
            let outcome = self.run_cycle();
            tracing::warn!(
                ?outcome,
                retry_secs = self.settings.retry.as_secs_f32(),
                "no video source; publishing placeholder"
            );
            self.publish_degraded();
            std::thread::sleep(self.settings.retry);
        }
    }

    /// Select once and stream until the source is lost for good.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let Self {
            opener,
            args,
            engine,
            publisher,
            settings,
        } = self;

        let selection = match select(opener, args) {
            Ok(selection) => selection,
            Err(error) => {
                tracing::warn!(%error, "source selection failed");
                return CycleOutcome::NoSource;
            }
        };
        let (width, height) = selection.source.size();
        tracing::info!(id = %selection.id, backend = selection.backend_name(), width, height, "source selected");

        let mut frames = ResilientFrames::new(selection, args.clone(), reselect(opener))
            .with_max_misses(settings.max_misses)
            .with_miss_delay(settings.miss_delay);

        let mut count = 0u64;
        let mut source: Option<(u32, SourceInfo)> = None;
        while let Some(item) = frames.next() {
            let frame = match item {
                FrameRead::Frame(frame) => frame,
                FrameRead::SourceLost => break,
            };
            let reopens = frames.reopen_count();
            if source.as_ref().map_or(true, |(seen, _)| *seen != reopens) {
                let Some(current) = frames.current() else { break };
                source = Some((reopens, source_info(current, settings.cam_id.as_deref())));
            }
            if let Some((_, info)) = &source {
                engine.handle_frame(&frame, publisher, info);
            }
            count += 1;
        }
        CycleOutcome::Lost { frames: count }
    }

    pub fn publish_degraded(&self) {
        if let Err(error) = self.publisher.publish_frame(&placeholder_frame()) {
            tracing::warn!(%error, "placeholder publish failed");
        }
        if let Err(error) = self.publisher.publish_status(&StatusLine::no_source()) {
            tracing::warn!(%error, "status publish failed");
        }
    }
}

fn source_info(selection: &Selection, cam_id: Option<&str>) -> SourceInfo {
    let (width, height) = selection.source.size();
    let id = selection.id.to_string();
    SourceInfo {
        cam_id: cam_id.map_or_else(|| id.clone(), str::to_string),
        status: StatusLine {
            cam: Some(id),
            backend: Some(selection.backend_name().to_string()),
            width,
            height,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Capabilities, EngineContext, EngineSettings};
    use crate::publish::PublishPaths;
    use gatewatch_core::analyzer::AnalyzerError;
    use gatewatch_core::gallery::GalleryEntry;
    use gatewatch_core::matcher::EuclideanDistance;
    use gatewatch_core::{Embedding, FaceAnalyzer, FaceObservation, Gallery, GeometricPoseEstimator, StudentDirectory};
    use gatewatch_hw::{CameraError, CaptureBackend, CaptureDevice, Frame, NetworkTransport, Warmup};
    use image::RgbImage;
    use std::cell::Cell;
    use std::rc::Rc;

    struct NoFaces;

    impl FaceAnalyzer for NoFaces {
        fn detect_and_embed(&mut self, _image: &RgbImage) -> Result<Vec<FaceObservation>, AnalyzerError> {
            Ok(Vec::new())
        }
    }

    /// Yields `remaining` frames, then fails every read.
    struct Dying {
        remaining: u32,
    }

    impl CaptureDevice for Dying {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            if self.remaining == 0 {
                return Err(CameraError::CaptureFailed("unplugged".into()));
            }
            self.remaining -= 1;
            Ok(Frame::new(vec![128; 32 * 24 * 3], 32, 24, self.remaining))
        }

        fn set_resolution(&mut self, _width: u32, _height: u32) -> Result<(), CameraError> {
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (32, 24)
        }
    }

    /// Camera 0 opens exactly once.
    struct OneShot {
        opens: Rc<Cell<u32>>,
    }

    impl CaptureBackend for OneShot {
        fn name(&self) -> &str {
            "FAKE"
        }

        fn open_index(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
            if index != 0 || self.opens.get() > 0 {
                return Err(CameraError::DeviceNotFound(format!("/dev/video{index}")));
            }
            self.opens.set(1);
            Ok(Box::new(Dying { remaining: 5 }))
        }
    }

    struct Offline;

    impl NetworkTransport for Offline {
        fn name(&self) -> &str {
            "URL"
        }

        fn open_url(&self, url: &str) -> Result<Box<dyn CaptureDevice>, CameraError> {
            Err(CameraError::Connection(url.to_string()))
        }
    }

    fn worker(dir: &std::path::Path, opens: &Rc<Cell<u32>>, cam_id: Option<&str>) -> Worker {
        let opener = SourceOpener::new(
            vec![Box::new(OneShot {
                opens: Rc::clone(opens),
            })],
            Box::new(Offline),
        )
        .with_warmup(Warmup {
            tries: 2,
            delay: Duration::ZERO,
        });
        let engine = RecognitionEngine::new(
            EngineContext {
                gallery: Gallery::from_entries(vec![GalleryEntry {
                    label: "1023_ana".into(),
                    embedding: Embedding::new(vec![1.0, 0.0]),
                }])
                .unwrap(),
                metric: Box::new(EuclideanDistance),
                directory: StudentDirectory::default(),
                font: None,
            },
            Capabilities {
                analyzer: Box::new(NoFaces),
                pose: Box::new(GeometricPoseEstimator),
                emotion: None,
            },
            EngineSettings::default(),
        );
        // A preferred index is opened directly. The scan would spend the
        // single open while enumerating.
        let args = SelectionArgs {
            preferred_indices: vec![0],
            scan_limit: 2,
            ..SelectionArgs::default()
        };
        Worker::new(
            opener,
            args,
            engine,
            Publisher::create(PublishPaths::under(dir)).unwrap(),
            WorkerSettings {
                cam_id: cam_id.map(str::to_string),
                max_misses: 2,
                miss_delay: Duration::ZERO,
                retry: Duration::ZERO,
            },
        )
    }

    #[test]
    fn test_cycle_streams_until_lost_then_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let opens = Rc::new(Cell::new(0));
        let mut worker = worker(dir.path(), &opens, None);
        let paths = worker.publisher.paths().clone();

        // One frame goes to warm-up.
        assert_eq!(worker.run_cycle(), CycleOutcome::Lost { frames: 4 });
        assert_eq!(std::fs::read_to_string(&paths.status).unwrap(), "cam=0 backend=FAKE size=32x24\n");
        assert_eq!(image::open(&paths.frame).unwrap().width(), 32);

        worker.publish_degraded();
        assert_eq!(std::fs::read_to_string(&paths.status).unwrap(), "cam=None backend=None size=0x0\n");
        assert_eq!(image::open(&paths.frame).unwrap().width(), 640);

        assert_eq!(worker.run_cycle(), CycleOutcome::NoSource);
    }

    #[test]
    fn test_cam_id_override_only_touches_events() {
        let opens = Rc::new(Cell::new(0));
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path(), &opens, Some("gate-north"));
        let selection = select(&worker.opener, &worker.args).unwrap();
        let info = source_info(&selection, worker.settings.cam_id.as_deref());
        assert_eq!(info.cam_id, "gate-north");
        assert_eq!(info.status.cam.as_deref(), Some("0"));
    }
}
