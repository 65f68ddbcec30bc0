//! SCRFD face detector via ONNX Runtime.
//!
//! Runs on RGB frames: the frame is letterboxed into a square input, the
//! three stride heads are decoded anchor-free and overlapping boxes are
//! merged with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected detector outputs: {0}")]
    BadOutputs(String),
    #[error("empty input image")]
    EmptyInput,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps letterboxed input coordinates back to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox, kps) output positions for one stride.
type HeadIndices = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    heads: [HeadIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::BadOutputs(format!(
                "expected 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }
        let heads = head_indices(&names);
        tracing::info!(path = %model_path.display(), ?heads, "loaded SCRFD detector");

        Ok(Self { session, heads })
    }

    /// Faces in `image`, highest confidence first, in image coordinates.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyInput);
        }
        let letterbox = Letterbox::fit(image.width(), image.height());
        let input = to_input_tensor(image, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.heads[pos];
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>()?;
            let (_, boxes) = outputs[bbox_idx].try_extract_tensor::<f32>()?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>()?;
            candidates.extend(decode_head(scores, boxes, kps, stride, &letterbox));
        }

        Ok(nms(candidates, NMS_IOU))
    }
}

/// Letterbox into a 640×640 NCHW tensor normalised to the SCRFD input range.
/// Padding uses the mean so it normalises to zero.
fn to_input_tensor(image: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (px, py) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    for y in 0..size {
        for x in 0..size {
            let inside = y >= py && y < py + new_h as usize && x >= px && x < px + new_w as usize;
            for c in 0..3 {
                let value = if inside {
                    resized.get_pixel((x - px) as u32, (y - py) as u32)[c] as f32
                } else {
                    PIXEL_MEAN
                };
                tensor[[0, c, y, x]] = (value - PIXEL_MEAN) / PIXEL_STD;
            }
        }
    }
    tensor
}

/// Named exports (`score_8`, `bbox_16`, `kps_32`, ...) are mapped by name;
/// anything else is assumed to be `[scores×3, boxes×3, kps×3]`.
fn head_indices(names: &[String]) -> [HeadIndices; 3] {
    let find = |prefix: &str, stride: u32| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut named = [(0, 0, 0); 3];
    for (pos, &stride) in STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => named[pos] = (s, b, k),
            _ => {
                tracing::debug!(?names, "detector outputs unnamed; using positional layout");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

fn decode_head(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: u32,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = (INPUT_SIZE / stride) as usize;
    let grid_h = grid_w;
    let step = stride as f32;
    let mut out = Vec::new();

    for idx in 0..grid_w * grid_h * ANCHORS_PER_CELL {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCORE_THRESHOLD {
            continue;
        }
        let Some(b) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * step;
        let ay = (cell / grid_w) as f32 * step;

        let (x1, y1) = letterbox.unmap(ax - b[0] * step, ay - b[1] * step);
        let (x2, y2) = letterbox.unmap(ax + b[2] * step, ay + b[3] * step);

        let keypoints = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
        });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            keypoints,
        });
    }
    out
}

fn nms(mut boxes: Vec<BoundingBox>, threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
