//! Overlay drawing and the "waiting for source" placeholder.

use ab_glyph::{FontVec, PxScale};
use gatewatch_core::{BoundingBox, Decision, HeadPose};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

/// Tried in order when no font is configured.
pub const FONT_SEARCH_PATHS: [&str; 3] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

const BOX_THICKNESS: u32 = 2;
const LABEL_BAR_HEIGHT: u32 = 18;
const LABEL_SCALE: f32 = 16.0;
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const PLACEHOLDER_BG: Rgb<u8> = Rgb([40, 40, 40]);
const PLACEHOLDER_STRIPE: Rgb<u8> = Rgb([90, 90, 90]);
const STRIPE_HALF_WIDTH: i64 = 30;

#[derive(Error, Debug)]
pub enum FontError {
    #[error("{path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}: not a usable TrueType/OpenType font")]
    Invalid(String),
}

pub fn load_font(path: &Path) -> Result<FontVec, FontError> {
    let bytes = std::fs::read(path).map_err(|source| FontError::Read {
        path: path.display().to_string(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| FontError::Invalid(path.display().to_string()))
}

/// The configured font, or the first system font that loads. Labels are
/// left blank when this returns `None`.
pub fn find_font(configured: Option<&Path>) -> Option<FontVec> {
    let candidates: Vec<PathBuf> = match configured {
        Some(path) => vec![path.to_path_buf()],
        None => FONT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
    };
    for path in &candidates {
        match load_font(path) {
            Ok(font) => {
                tracing::debug!(path = %path.display(), "label font loaded");
                return Some(font);
            }
            Err(error) if configured.is_some() => tracing::warn!(%error, "label font unusable"),
            Err(_) => {}
        }
    }
    tracing::warn!("no label font found; overlay labels drawn without text");
    None
}

pub fn decision_color(decision: Decision) -> Rgb<u8> {
    match decision {
        Decision::Acceso => Rgb([0, 200, 0]),
        Decision::Liveness => Rgb([255, 191, 0]),
        Decision::Alerta => Rgb([220, 0, 0]),
    }
}

/// What to draw for one face. Kept between ticks and redrawn on every frame.
#[derive(Debug, Clone)]
pub struct FaceOverlay {
    pub bbox: BoundingBox,
    pub decision: Decision,
    /// Text for the bar above the box.
    pub label: String,
    pub pose: Option<HeadPose>,
}

impl FaceOverlay {
    pub fn label_for(name: &str, decision: Decision) -> String {
        format!("{name} | {decision}")
    }
}

pub fn draw_overlays(image: &mut RgbImage, overlays: &[FaceOverlay], font: Option<&FontVec>) {
    for overlay in overlays {
        let color = decision_color(overlay.decision);
        let Some((x, y, w, h)) = overlay.bbox.clamp_to(image.width(), image.height()) else {
            continue;
        };
        for inset in 0..BOX_THICKNESS.min(w / 2).min(h / 2).max(1) {
            let rect = Rect::at((x + inset) as i32, (y + inset) as i32).of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(image, rect, color);
        }

        let bar_top = y.saturating_sub(LABEL_BAR_HEIGHT);
        if y > bar_top {
            draw_filled_rect_mut(image, Rect::at(x as i32, bar_top as i32).of_size(w, y - bar_top), color);
            if let Some(font) = font {
                draw_text_mut(
                    image,
                    LABEL_TEXT,
                    x as i32 + 2,
                    bar_top as i32 + 1,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &overlay.label,
                );
            }
        }

        if let Some(pose) = &overlay.pose {
            draw_line_segment_mut(image, pose.nose, pose.reference, Rgb(pose.color));
        }
    }
}

/// Dark frame with a diagonal band, published while no source is open.
pub fn placeholder_frame() -> RgbImage {
    let offset = (PLACEHOLDER_WIDTH as i64 - PLACEHOLDER_HEIGHT as i64) / 2;
    RgbImage::from_fn(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, |x, y| {
        if (x as i64 - y as i64 - offset).abs() <= STRIPE_HALF_WIDTH {
            PLACEHOLDER_STRIPE
        } else {
            PLACEHOLDER_BG
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewatch_core::Attention;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            keypoints: None,
        }
    }

    fn overlay(bbox: BoundingBox, decision: Decision, pose: Option<HeadPose>) -> FaceOverlay {
        FaceOverlay {
            bbox,
            decision,
            label: FaceOverlay::label_for("Ana Perez", decision),
            pose,
        }
    }

    #[test]
    fn test_box_colored_by_decision() {
        let mut image = RgbImage::new(100, 100);
        draw_overlays(&mut image, &[overlay(bbox(20.0, 30.0, 40.0, 40.0), Decision::Alerta, None)], None);
        let red = decision_color(Decision::Alerta);
        assert_eq!(*image.get_pixel(20, 50), red);
        assert_eq!(*image.get_pixel(21, 50), red);
        assert_eq!(*image.get_pixel(59, 50), red);
        // Label bar sits above the box; interior untouched.
        assert_eq!(*image.get_pixel(30, 20), red);
        assert_eq!(*image.get_pixel(30, 12), red);
        assert_eq!(*image.get_pixel(30, 11), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(40, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_box_outside_image_is_skipped() {
        let mut image = RgbImage::new(50, 50);
        draw_overlays(&mut image, &[overlay(bbox(200.0, 200.0, 10.0, 10.0), Decision::Acceso, None)], None);
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_box_at_top_edge_has_no_bar() {
        let mut image = RgbImage::new(60, 60);
        draw_overlays(&mut image, &[overlay(bbox(10.0, 0.0, 20.0, 20.0), Decision::Acceso, None)], None);
        let green = decision_color(Decision::Acceso);
        assert_eq!(*image.get_pixel(10, 0), green);
        assert_eq!(*image.get_pixel(20, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_pose_line_drawn_and_clipped() {
        let mut image = RgbImage::new(100, 100);
        let pose = HeadPose {
            attention: Attention::Side,
            color: [255, 0, 0],
            nose: (50.0, 50.0),
            reference: (400.0, 50.0),
        };
        draw_overlays(&mut image, &[overlay(bbox(40.0, 40.0, 5.0, 5.0), Decision::Liveness, Some(pose))], None);
        assert_eq!(*image.get_pixel(80, 50), Rgb([255, 0, 0]));
        assert_eq!(*image.get_pixel(99, 50), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_label_names_person_and_decision() {
        assert_eq!(FaceOverlay::label_for("Ana Perez", Decision::Acceso), "Ana Perez | ACCESO");
    }

    #[test]
    fn test_font_loading_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("label.ttf");
        std::fs::write(&garbage, b"not a font").unwrap();
        assert!(matches!(load_font(&garbage), Err(FontError::Invalid(_))));
        assert!(matches!(load_font(&dir.path().join("missing.ttf")), Err(FontError::Read { .. })));
        assert!(find_font(Some(&garbage)).is_none());
    }

    #[test]
    fn test_placeholder() {
        let image = placeholder_frame();
        assert_eq!(image.dimensions(), (640, 480));
        assert_eq!(*image.get_pixel(0, 479), PLACEHOLDER_BG);
        assert_eq!(*image.get_pixel(80, 0), PLACEHOLDER_STRIPE);
    }
}
