//! Blink-based liveness.
//!
//! The eye aspect ratio (EAR) drops sharply while the eye is closed. Once a
//! label has been seen below the threshold it stays live for the rest of the
//! process; nothing resets it.

use crate::types::Landmarks;
use std::collections::HashSet;

pub const DEFAULT_EYE_AR_THRESH: f32 = 0.25;

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// EAR for six eye points p1..p6: `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)`.
pub fn eye_aspect_ratio(eye: &[(f32, f32); 6]) -> f32 {
    let horizontal = dist(eye[0], eye[3]);
    if horizontal <= f32::EPSILON {
        return 0.0;
    }
    (dist(eye[1], eye[5]) + dist(eye[2], eye[4])) / (2.0 * horizontal)
}

/// Mean EAR of both eyes.
pub fn landmarks_ear(landmarks: &Landmarks) -> f32 {
    (eye_aspect_ratio(&landmarks.left_eye()) + eye_aspect_ratio(&landmarks.right_eye())) / 2.0
}

#[derive(Debug, Default, Clone)]
pub struct LivenessState {
    live: HashSet<String>,
}

impl LivenessState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an EAR sample for `label`. Returns true if this sample was the
    /// first blink seen for it.
    pub fn observe(&mut self, label: &str, ear: f32, threshold: f32) -> bool {
        if ear < threshold && !self.live.contains(label) {
            tracing::info!(label, ear, "blink observed");
            self.live.insert(label.to_string());
            return true;
        }
        false
    }

    pub fn is_live(&self, label: &str) -> bool {
        self.live.contains(label)
    }
}
