//! Attention from head pose.
//!
//! The estimator projects a "nose direction" point in front of the face and
//! classifies attention from its pixel offset to the nose tip, the same way
//! a PnP-based pose would be read.

use crate::types::Landmarks;
use std::fmt;

const SIDE_LIMIT: f32 = 150.0;
const VERTICAL_LIMIT: f32 = 100.0;

const GREEN: [u8; 3] = [0, 255, 0];
const RED: [u8; 3] = [255, 0, 0];

const NOSE_TIP: usize = 30;
const CHIN: usize = 8;
const LEFT_EYE_OUTER: usize = 36;
const RIGHT_EYE_OUTER: usize = 45;
const MOUTH_LEFT: usize = 48;
const MOUTH_RIGHT: usize = 54;

/// Where the nose tip sits between the eye line (0) and the mouth line (1)
/// on a frontal face.
const NEUTRAL_PITCH: f32 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attention {
    Attentive,
    Side,
    Down,
    Up,
}

impl Attention {
    /// Classify a projected nose-direction offset in pixels (y grows downward).
    pub fn classify(dx: f32, dy: f32) -> Self {
        if dx.abs() > SIDE_LIMIT {
            Attention::Side
        } else if dy > VERTICAL_LIMIT {
            Attention::Down
        } else if dy < -VERTICAL_LIMIT {
            Attention::Up
        } else {
            Attention::Attentive
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Attention::Attentive => "ATENTO",
            Attention::Side => "DISTRAIDO (Lado)",
            Attention::Down => "DISTRAIDO (Abajo)",
            Attention::Up => "DISTRAIDO (Arriba)",
        }
    }

    /// RGB colour hint for overlays.
    pub fn color(self) -> [u8; 3] {
        match self {
            Attention::Attentive => GREEN,
            _ => RED,
        }
    }
}

impl fmt::Display for Attention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadPose {
    pub attention: Attention,
    pub color: [u8; 3],
    /// Nose tip in image coordinates.
    pub nose: (f32, f32),
    /// Projected direction point; the overlay draws `nose -> reference`.
    pub reference: (f32, f32),
}

/// Estimates head pose for one face. `None` means no estimate this tick.
pub trait HeadPoseEstimator {
    fn estimate(&self, landmarks: &Landmarks, width: u32, height: u32) -> Option<HeadPose>;
}

/// Landmark-geometry estimator, no model required.
///
/// Yaw comes from the nose offset against the eye-corner midpoint, pitch
/// from the nose position between the eye and mouth lines. The direction
/// vector has length `width / 2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometricPoseEstimator;

impl HeadPoseEstimator for GeometricPoseEstimator {
    fn estimate(&self, landmarks: &Landmarks, width: u32, _height: u32) -> Option<HeadPose> {
        let nose = landmarks.point(NOSE_TIP);
        let chin = landmarks.point(CHIN);
        let (le, re) = (landmarks.point(LEFT_EYE_OUTER), landmarks.point(RIGHT_EYE_OUTER));
        let (ml, mr) = (landmarks.point(MOUTH_LEFT), landmarks.point(MOUTH_RIGHT));

        let eye_mid = ((le.0 + re.0) / 2.0, (le.1 + re.1) / 2.0);
        let mouth_y = (ml.1 + mr.1) / 2.0;
        let eye_span = (re.0 - le.0).hypot(re.1 - le.1);
        let face_height = mouth_y - eye_mid.1;

        if eye_span < 1.0 || face_height < 1.0 || chin.1 <= nose.1 {
            return None;
        }

        let yaw = ((nose.0 - eye_mid.0) / eye_span * 2.0).clamp(-1.0, 1.0);
        let pitch = (((nose.1 - eye_mid.1) / face_height - NEUTRAL_PITCH) * 2.0).clamp(-1.0, 1.0);

        let length = width as f32 / 2.0;
        let (dx, dy) = (yaw * length, pitch * length);
        let attention = Attention::classify(dx, dy);

        Some(HeadPose {
            attention,
            color: attention.color(),
            nose,
            reference: (nose.0 + dx, nose.1 + dy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frontal face: eyes at y=100, mouth at y=200, chin at y=260.
    fn face(nose: (f32, f32)) -> Landmarks {
        let mut points = vec![(150.0, 150.0); 68];
        points[LEFT_EYE_OUTER] = (100.0, 100.0);
        points[RIGHT_EYE_OUTER] = (200.0, 100.0);
        points[MOUTH_LEFT] = (120.0, 200.0);
        points[MOUTH_RIGHT] = (180.0, 200.0);
        points[CHIN] = (150.0, 260.0);
        points[NOSE_TIP] = nose;
        Landmarks::new(points).unwrap()
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(Attention::classify(0.0, 0.0), Attention::Attentive);
        assert_eq!(Attention::classify(-151.0, 0.0), Attention::Side);
        assert_eq!(Attention::classify(151.0, 500.0), Attention::Side);
        assert_eq!(Attention::classify(0.0, 101.0), Attention::Down);
        assert_eq!(Attention::classify(0.0, -101.0), Attention::Up);
        assert_eq!(Attention::classify(150.0, 100.0), Attention::Attentive);
    }

    #[test]
    fn test_labels_and_colors() {
        assert_eq!(Attention::Attentive.label(), "ATENTO");
        assert_eq!(Attention::Down.to_string(), "DISTRAIDO (Abajo)");
        assert_eq!(Attention::Attentive.color(), GREEN);
        assert_eq!(Attention::Up.color(), RED);
    }

    #[test]
    fn test_frontal_face_is_attentive() {
        let pose = GeometricPoseEstimator.estimate(&face((150.0, 155.0)), 640, 480).unwrap();
        assert_eq!(pose.attention, Attention::Attentive);
        assert_eq!(pose.nose, (150.0, 155.0));
    }

    #[test]
    fn test_turned_face_is_side() {
        // Nose 40px right of the eye midpoint over a 100px span: yaw 0.8.
        let pose = GeometricPoseEstimator.estimate(&face((190.0, 155.0)), 640, 480).unwrap();
        assert_eq!(pose.attention, Attention::Side);
        assert!(pose.reference.0 > pose.nose.0);
    }

    #[test]
    fn test_lowered_face_is_down() {
        let pose = GeometricPoseEstimator.estimate(&face((150.0, 190.0)), 640, 480).unwrap();
        assert_eq!(pose.attention, Attention::Down);
    }

    #[test]
    fn test_degenerate_landmarks() {
        let flat = Landmarks::new(vec![(10.0, 10.0); 68]).unwrap();
        assert!(GeometricPoseEstimator.estimate(&flat, 640, 480).is_none());
    }
}
