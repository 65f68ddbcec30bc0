//! Face analysis pipeline: detection, embedding and landmarks in one call.

use crate::detector::{DetectorError, FaceDetector, DETECTOR_MODEL_FILE};
use crate::landmarks::{LandmarkModel, LANDMARK_MODEL_FILE};
use crate::recognizer::{FaceRecognizer, RecognizerError, RECOGNIZER_MODEL_FILE};
use crate::types::FaceObservation;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds every face in an image and describes it.
pub trait FaceAnalyzer {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<FaceObservation>, AnalyzerError>;
}

/// SCRFD + ArcFace, with an optional 68-point landmark model.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    landmarks: Option<LandmarkModel>,
}

impl OnnxFaceAnalyzer {
    /// Load models from `model_dir`. Detector and recognizer are required;
    /// without the landmark model no face ever reports landmarks.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;

        let landmark_path = model_dir.join(LANDMARK_MODEL_FILE);
        let landmarks = match LandmarkModel::load(&landmark_path) {
            Ok(model) => Some(model),
            Err(error) => {
                tracing::warn!(%error, "landmark model unavailable; liveness and attention disabled");
                None
            }
        };

        Ok(Self {
            detector,
            recognizer,
            landmarks,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<FaceObservation>, AnalyzerError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let embedding = match self.recognizer.extract(image, &bbox) {
                Ok(embedding) => embedding,
                Err(error) => {
                    tracing::debug!(%error, "skipping face without embedding");
                    continue;
                }
            };
            let landmarks = self.landmarks.as_mut().and_then(|model| {
                model
                    .predict(image, &bbox)
                    .map_err(|error| tracing::debug!(%error, "landmarks failed for face"))
                    .ok()
            });
            faces.push(FaceObservation {
                bbox,
                embedding,
                landmarks,
            });
        }
        Ok(faces)
    }
}
