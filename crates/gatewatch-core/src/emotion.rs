//! Facial expression classification.
//!
//! Labels reach the overlay in Spanish. A missing classifier reads `N/A`;
//! a crop too small to judge or a failed inference reads `-`.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const EMOTION_MODEL_FILE: &str = "emotion-ferplus-8.onnx";

pub const NOT_AVAILABLE: &str = "N/A";
pub const NO_EMOTION: &str = "-";
pub const MIN_CROP_SIDE: u32 = 40;

const FERPLUS_INPUT: u32 = 64;
const FERPLUS_CLASSES: [&str; 8] = [
    "neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt",
];

#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("emotion model not found: {0}")]
    ModelNotFound(String),
    #[error("emotion model returned {0} scores")]
    BadOutput(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Returns the raw (English, lowercase) dominant emotion of a face crop.
pub trait EmotionClassifier {
    fn classify(&mut self, face: &RgbImage) -> Result<String, EmotionError>;
}

/// Spanish display form of a raw emotion label.
pub fn localize(raw: &str) -> String {
    match raw {
        "happy" => "FELIZ".to_string(),
        "sad" => "TRISTE".to_string(),
        "angry" => "ENOJADO".to_string(),
        "neutral" => "NEUTRAL".to_string(),
        "fear" => "MIEDO".to_string(),
        "surprise" => "SORPRESA".to_string(),
        "disgust" => "DISGUSTO".to_string(),
        other => other.to_uppercase(),
    }
}

/// Overlay label for a face crop, never failing.
pub fn describe_emotion(classifier: Option<&mut dyn EmotionClassifier>, face: &RgbImage) -> String {
    let Some(classifier) = classifier else {
        return NOT_AVAILABLE.to_string();
    };
    if face.width() < MIN_CROP_SIDE || face.height() < MIN_CROP_SIDE {
        return NO_EMOTION.to_string();
    }
    match classifier.classify(face) {
        Ok(raw) => localize(&raw),
        Err(error) => {
            tracing::debug!(%error, "emotion classification failed");
            NO_EMOTION.to_string()
        }
    }
}

/// FER+ expression model: 64×64 grayscale in, 8 class scores out.
pub struct FerPlusClassifier {
    session: Session,
}

impl FerPlusClassifier {
    pub fn load(model_path: &Path) -> Result<Self, EmotionError> {
        if !model_path.exists() {
            return Err(EmotionError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded FER+ emotion model");
        Ok(Self { session })
    }
}

impl EmotionClassifier for FerPlusClassifier {
    fn classify(&mut self, face: &RgbImage) -> Result<String, EmotionError> {
        let input = to_input_tensor(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, scores) = outputs[0].try_extract_tensor::<f32>()?;
        dominant(scores)
            .map(str::to_string)
            .ok_or(EmotionError::BadOutput(scores.len()))
    }
}

/// FER+ expects unnormalised 0–255 luminance.
fn to_input_tensor(face: &RgbImage) -> Array4<f32> {
    let gray = DynamicImage::ImageRgb8(face.clone()).into_luma8();
    let resized = imageops::resize(&gray, FERPLUS_INPUT, FERPLUS_INPUT, FilterType::Triangle);
    let size = FERPLUS_INPUT as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel[0] as f32;
    }
    tensor
}

fn dominant(scores: &[f32]) -> Option<&'static str> {
    if scores.len() != FERPLUS_CLASSES.len() {
        return None;
    }
    scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| FERPLUS_CLASSES[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<&'static str, ()>);

    impl EmotionClassifier for Fixed {
        fn classify(&mut self, _face: &RgbImage) -> Result<String, EmotionError> {
            self.0
                .map(str::to_string)
                .map_err(|_| EmotionError::BadOutput(0))
        }
    }

    #[test]
    fn test_localize() {
        assert_eq!(localize("happy"), "FELIZ");
        assert_eq!(localize("disgust"), "DISGUSTO");
        assert_eq!(localize("contempt"), "CONTEMPT");
    }

    #[test]
    fn test_absent_classifier() {
        let face = RgbImage::new(100, 100);
        assert_eq!(describe_emotion(None, &face), "N/A");
    }

    #[test]
    fn test_small_crop() {
        let mut c = Fixed(Ok("happy"));
        assert_eq!(describe_emotion(Some(&mut c), &RgbImage::new(39, 80)), "-");
        assert_eq!(describe_emotion(Some(&mut c), &RgbImage::new(40, 40)), "FELIZ");
    }

    #[test]
    fn test_failure_degrades() {
        let mut c = Fixed(Err(()));
        assert_eq!(describe_emotion(Some(&mut c), &RgbImage::new(64, 64)), "-");
    }

    #[test]
    fn test_dominant() {
        let scores = [0.1, 0.2, 0.0, 3.0, 0.5, 0.0, 0.0, 0.0];
        assert_eq!(dominant(&scores), Some("sad"));
        assert_eq!(dominant(&[1.0]), None);
    }

    #[test]
    fn test_input_tensor_is_gray() {
        let face = RgbImage::from_pixel(32, 32, image::Rgb([200, 200, 200]));
        let t = to_input_tensor(&face);
        assert_eq!(t.shape(), &[1, 1, 64, 64]);
        assert_eq!(t[[0, 0, 10, 10]], 200.0);
    }
}
