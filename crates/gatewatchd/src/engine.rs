//! Recognition decision engine.
//!
//! Every `frame_skip + 1`-th frame is a processing tick: faces are detected
//! on a downscaled copy, resolved against the gallery, smoothed through the
//! vote window and fused with liveness, attention and emotion into a
//! decision. Every frame, processed or not, is published with the most
//! recent overlays drawn on it.

use crate::overlay::{draw_overlays, FaceOverlay};
use ab_glyph::FontVec;
use crate::publish::{format_timestamp, Event, Publisher, StatusLine};
use chrono::{DateTime, Local};
use gatewatch_core::matcher::{DEFAULT_MARGIN, DEFAULT_THRESHOLD};
use gatewatch_core::throttle::{DEFAULT_COOLDOWN, DEFAULT_MAX_SNAPSHOTS};
use gatewatch_core::{
    describe_emotion, landmarks_ear, Decision, DistanceMetric, EmotionClassifier, FaceAnalyzer,
    FaceObservation, Gallery, HeadPoseEstimator, Identity, IdentityVotes, LivenessState,
    MarginMatcher, PersonInfo, Quality, SnapshotThrottle, StudentDirectory,
};
use gatewatch_hw::Frame;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub threshold: f32,
    pub margin: f32,
    pub eye_ar_thresh: f32,
    pub votes_window: usize,
    pub frame_skip: u32,
    /// Scale applied before detection, in (0, 1].
    pub downscale: f32,
    pub snapshot_cooldown: Duration,
    pub max_snapshots: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            margin: DEFAULT_MARGIN,
            eye_ar_thresh: gatewatch_core::liveness::DEFAULT_EYE_AR_THRESH,
            votes_window: gatewatch_core::votes::DEFAULT_WINDOW,
            frame_skip: 2,
            downscale: 0.5,
            snapshot_cooldown: DEFAULT_COOLDOWN,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
        }
    }
}

/// Read-only inputs built once at startup.
pub struct EngineContext {
    pub gallery: Gallery,
    pub metric: Box<dyn DistanceMetric>,
    pub directory: StudentDirectory,
    /// Overlay label font. Labels stay blank without one.
    pub font: Option<FontVec>,
}

/// External face capabilities.
pub struct Capabilities {
    pub analyzer: Box<dyn FaceAnalyzer>,
    pub pose: Box<dyn HeadPoseEstimator>,
    /// `None` when no expression model is installed.
    pub emotion: Option<Box<dyn EmotionClassifier>>,
}

/// Wall and monotonic time for one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickTime {
    pub now: Instant,
    pub wall: DateTime<Local>,
}

impl TickTime {
    pub fn now() -> Self {
        Self {
            now: Instant::now(),
            wall: Local::now(),
        }
    }
}

/// Where the current frame came from.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub status: StatusLine,
    /// Value of the event log's `cam_id` column.
    pub cam_id: String,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub processed: bool,
    pub decisions: Vec<Decision>,
    pub events: usize,
    pub snapshots: Vec<PathBuf>,
}

pub struct RecognitionEngine {
    context: EngineContext,
    capabilities: Capabilities,
    settings: EngineSettings,
    matcher: MarginMatcher,
    votes: IdentityVotes,
    liveness: LivenessState,
    throttle: SnapshotThrottle,
    overlays: Vec<FaceOverlay>,
    frames_seen: u64,
}

impl RecognitionEngine {
    pub fn new(context: EngineContext, capabilities: Capabilities, settings: EngineSettings) -> Self {
        Self {
            matcher: MarginMatcher::new(settings.threshold, settings.margin),
            votes: IdentityVotes::new(settings.votes_window),
            liveness: LivenessState::new(),
            throttle: SnapshotThrottle::new(settings.snapshot_cooldown, settings.max_snapshots),
            overlays: Vec::new(),
            frames_seen: 0,
            context,
            capabilities,
            settings,
        }
    }

    pub fn handle_frame(&mut self, frame: &Frame, publisher: &Publisher, source: &SourceInfo) -> TickReport {
        self.handle_frame_at(frame, publisher, source, TickTime::now())
    }

    /// One frame through the pipeline. Never fails: analysis and publish
    /// errors are logged and the frame moves on.
    pub fn handle_frame_at(
        &mut self,
        frame: &Frame,
        publisher: &Publisher,
        source: &SourceInfo,
        time: TickTime,
    ) -> TickReport {
        let mut report = TickReport::default();
        let Some(image) = frame.to_rgb_image() else {
            tracing::debug!(sequence = frame.sequence, "skipping empty frame");
            return report;
        };

        let cadence = u64::from(self.settings.frame_skip) + 1;
        report.processed = self.frames_seen % cadence == 0;
        self.frames_seen += 1;

        if report.processed {
            self.process(&image, publisher, source, time, &mut report);
        }

        let mut annotated = image;
        draw_overlays(&mut annotated, &self.overlays, self.context.font.as_ref());
        if let Err(error) = publisher.publish_frame(&annotated) {
            tracing::warn!(%error, "frame publish failed");
        }
        if let Err(error) = publisher.publish_status(&source.status) {
            tracing::warn!(%error, "status publish failed");
        }
        report
    }

    fn process(
        &mut self,
        image: &RgbImage,
        publisher: &Publisher,
        source: &SourceInfo,
        time: TickTime,
        report: &mut TickReport,
    ) {
        let (small, factor) = downscale(image, self.settings.downscale);
        let faces = match self.capabilities.analyzer.detect_and_embed(small.as_ref().unwrap_or(image)) {
            Ok(faces) => faces,
            Err(error) => {
                tracing::warn!(%error, "face analysis failed; keeping previous overlays");
                return;
            }
        };

        let mut overlays = Vec::with_capacity(faces.len());
        for face in faces {
            let face = face.scaled(factor);
            let overlay = self.decide(face, image, publisher, source, time, report);
            overlays.push(overlay);
        }
        self.overlays = overlays;
    }

    fn decide(
        &mut self,
        face: FaceObservation,
        image: &RgbImage,
        publisher: &Publisher,
        source: &SourceInfo,
        time: TickTime,
        report: &mut TickReport,
    ) -> FaceOverlay {
        let matched = self
            .matcher
            .resolve(&self.context.gallery, self.context.metric.as_ref(), &face.embedding);
        self.votes.push(matched.identity.clone());
        let identity = self.votes.smoothed().cloned().unwrap_or(Identity::Unknown);

        if let (Identity::Known(label), Some(landmarks)) = (&identity, &face.landmarks) {
            self.liveness
                .observe(label, landmarks_ear(landmarks), self.settings.eye_ar_thresh);
        }

        let pose = face
            .landmarks
            .as_ref()
            .and_then(|l| self.capabilities.pose.estimate(l, image.width(), image.height()));
        let classifier = self
            .capabilities
            .emotion
            .as_deref_mut()
            .map(|c| c as &mut dyn EmotionClassifier);
        let emotion = describe_emotion(classifier, &crop(image, &face));

        let decision = Decision::fuse(&identity, self.liveness.is_live(identity.label()));
        let attention = pose.as_ref().map_or("-", |p| p.attention.label());
        tracing::debug!(
            candidate = %matched.identity,
            identity = %identity,
            distance = matched.distance,
            %decision,
            attention,
            emotion = %emotion,
            "face decided"
        );
        report.decisions.push(decision);

        let person = match &identity {
            Identity::Known(label) => self.context.directory.resolve(label),
            Identity::Unknown => PersonInfo {
                name: identity.label().to_string(),
                ..PersonInfo::default()
            },
        };
        let label = FaceOverlay::label_for(&person.name, decision);

        let mut snapshot_path = String::new();
        if decision.takes_snapshot() && self.throttle.permits(identity.label(), time.now) {
            match publisher.save_snapshot(image, identity.label(), &time.wall) {
                Ok(path) => {
                    self.throttle.record(identity.label(), time.now);
                    tracing::info!(path = %path.display(), identity = %identity, %decision, "snapshot saved");
                    snapshot_path = path.display().to_string();
                    report.snapshots.push(path);
                }
                Err(error) => tracing::warn!(%error, "snapshot failed"),
            }
        }

        if decision.is_logged() && self.votes.is_warm() {
            let event = Event {
                timestamp: format_timestamp(&time.wall),
                cam_id: source.cam_id.clone(),
                name: person.name,
                codigo: person.codigo,
                grado: person.grado,
                distance: format!("{:.3}", matched.distance),
                decision,
                quality: Quality::from_distance(matched.distance, self.settings.threshold),
                snapshot_path,
            };
            match publisher.append_event(&event) {
                Ok(()) => {
                    tracing::info!(name = %event.name, %decision, attention, emotion = %emotion, "event logged");
                    report.events += 1;
                }
                Err(error) => tracing::warn!(%error, "event append failed"),
            }
        }

        FaceOverlay {
            bbox: face.bbox,
            decision,
            label,
            pose,
        }
    }
}

/// Resize for detection. Returns the resized copy (if any) and the factor
/// that maps its coordinates back to the original.
fn downscale(image: &RgbImage, scale: f32) -> (Option<RgbImage>, f32) {
    if !(scale > 0.0 && scale < 1.0) {
        return (None, 1.0);
    }
    let w = ((image.width() as f32 * scale).round() as u32).max(1);
    let h = ((image.height() as f32 * scale).round() as u32).max(1);
    let small = imageops::resize(image, w, h, FilterType::Triangle);
    (Some(small), image.width() as f32 / w as f32)
}

/// Face crop for the emotion classifier; empty when the box is off-image.
fn crop(image: &RgbImage, face: &FaceObservation) -> RgbImage {
    match face.bbox.clamp_to(image.width(), image.height()) {
        Some((x, y, w, h)) => imageops::crop_imm(image, x, y, w, h).to_image(),
        None => RgbImage::new(0, 0),
    }
}
