//! gatewatch-core: identity resolution and face capabilities.
//!
//! Pure decision primitives (matching, vote smoothing, liveness, snapshot
//! throttling, decision fusion) plus ONNX Runtime adapters for detection,
//! embedding, landmarks and expression.

pub mod alignment;
pub mod analyzer;
pub mod attention;
pub mod decision;
pub mod detector;
pub mod directory;
pub mod emotion;
pub mod gallery;
pub mod landmarks;
pub mod liveness;
pub mod matcher;
pub mod recognizer;
pub mod throttle;
pub mod types;
pub mod votes;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use attention::{Attention, GeometricPoseEstimator, HeadPose, HeadPoseEstimator};
pub use decision::{sanitize_label, Decision, Quality};
pub use directory::{PersonInfo, StudentDirectory};
pub use emotion::{describe_emotion, EmotionClassifier, FerPlusClassifier, EMOTION_MODEL_FILE};
pub use gallery::{Gallery, GalleryEntry, GalleryError};
pub use liveness::{landmarks_ear, LivenessState};
pub use matcher::{DistanceMetric, Identity, IdentityMatch, MarginMatcher, MetricKind};
pub use throttle::SnapshotThrottle;
pub use types::{BoundingBox, Embedding, FaceObservation, Landmarks};
pub use votes::IdentityVotes;
