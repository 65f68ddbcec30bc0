//! 68-point landmark regression on a square face crop.
//!
//! The model takes a 112×112 RGB crop scaled to [0, 1] and returns 136
//! values: (x, y) pairs normalised to the crop.

use crate::types::{BoundingBox, Landmarks, LANDMARK_COUNT};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const LANDMARK_MODEL_FILE: &str = "landmarks_68.onnx";

const INPUT_SIZE: u32 = 112;
/// Box expansion so the jaw line and brows fall inside the crop.
const CROP_EXPAND: f32 = 1.2;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("landmark model not found: {0}")]
    ModelNotFound(String),
    #[error("face box lies outside the image")]
    EmptyCrop,
    #[error("expected {n} landmark values, got {0}", n = LANDMARK_COUNT * 2)]
    BadOutput(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Square crop region in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Crop {
    x: u32,
    y: u32,
    side: u32,
}

impl Crop {
    fn around(face: &BoundingBox, width: u32, height: u32) -> Option<Self> {
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;
        let side = face.width.max(face.height) * CROP_EXPAND;
        let square = BoundingBox {
            x: cx - side / 2.0,
            y: cy - side / 2.0,
            width: side,
            height: side,
            confidence: face.confidence,
            keypoints: None,
        };
        let (x, y, w, h) = square.clamp_to(width, height)?;
        Some(Self { x, y, side: w.min(h) })
    }
}

pub struct LandmarkModel {
    session: Session,
}

impl LandmarkModel {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded 68-point landmark model");
        Ok(Self { session })
    }

    pub fn predict(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Landmarks, LandmarkError> {
        let crop = Crop::around(face, image.width(), image.height()).ok_or(LandmarkError::EmptyCrop)?;
        if crop.side == 0 {
            return Err(LandmarkError::EmptyCrop);
        }
        let patch = imageops::crop_imm(image, crop.x, crop.y, crop.side, crop.side).to_image();
        let input = to_input_tensor(&patch);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>()?;
        decode(raw, &crop)
    }
}

fn to_input_tensor(patch: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(patch, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

fn decode(raw: &[f32], crop: &Crop) -> Result<Landmarks, LandmarkError> {
    if raw.len() < LANDMARK_COUNT * 2 {
        return Err(LandmarkError::BadOutput(raw.len()));
    }
    let side = crop.side as f32;
    let points = raw[..LANDMARK_COUNT * 2]
        .chunks_exact(2)
        .map(|p| (crop.x as f32 + p[0] * side, crop.y as f32 + p[1] * side))
        .collect();
    Landmarks::new(points).ok_or(LandmarkError::BadOutput(raw.len()))
}
