use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional five-point keypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Detector keypoints: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub keypoints: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Multiply every coordinate by `factor` (e.g. to undo a downscale).
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            keypoints: self
                .keypoints
                .map(|kps| kps.map(|(x, y)| (x * factor, y * factor))),
        }
    }

    /// Integer crop rectangle `(x, y, w, h)` clamped to a `width`×`height` image.
    ///
    /// Returns `None` when the clamped rectangle is empty.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// 68-point facial landmarks in the iBUG 300-W layout.
///
/// Jaw 0–16, brows 17–26, nose 27–35, eyes 36–47, mouth 48–67.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub points: Vec<(f32, f32)>,
}

pub const LANDMARK_COUNT: usize = 68;

impl Landmarks {
    /// Returns `None` unless exactly 68 points are supplied.
    pub fn new(points: Vec<(f32, f32)>) -> Option<Self> {
        (points.len() == LANDMARK_COUNT).then_some(Self { points })
    }

    pub fn point(&self, idx: usize) -> (f32, f32) {
        self.points[idx]
    }

    /// Subject's right eye (image left), points 36–41.
    pub fn left_eye(&self) -> [(f32, f32); 6] {
        self.eye(36)
    }

    /// Subject's left eye (image right), points 42–47.
    pub fn right_eye(&self) -> [(f32, f32); 6] {
        self.eye(42)
    }

    fn eye(&self, start: usize) -> [(f32, f32); 6] {
        std::array::from_fn(|i| self.points[start + i])
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|&(x, y)| (x * factor, y * factor))
                .collect(),
        }
    }
}

/// One detected face: where it is, what it looks like, and its shape.
#[derive(Debug, Clone)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    /// Absent when no landmark model is loaded or it failed for this face.
    pub landmarks: Option<Landmarks>,
}

impl FaceObservation {
    /// Map coordinates from a resized analysis frame back to the source frame.
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            bbox: self.bbox.scaled(factor),
            embedding: self.embedding,
            landmarks: self.landmarks.map(|l| l.scaled(factor)),
        }
    }
}
