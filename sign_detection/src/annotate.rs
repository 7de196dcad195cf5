use crate::{
    config::AnnotationConfig,
    detection::{Detection, DetectionSet},
    labels::LabelMap,
};
use ab_glyph::{FontArc, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::path::Path;
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

static DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Bundled font could not be parsed: {0}")]
    DefaultFont(#[from] InvalidFont),
}

pub fn label_text(name: &str, score: f32) -> String {
    format!("{}: {:.2}", name, score)
}

/// Layout of one drawn detection, in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub text: String,
    pub bbox: Rect,
    pub label: Rect,
}

pub struct Annotator {
    font: FontArc,
    preferred_font: bool,
    min_font_size: f32,
    font_width_divisor: f32,
    stroke_width: u32,
}

impl Annotator {
    /// Uses `font_path` when it loads, the bundled DejaVu Sans otherwise.
    pub fn new(config: &AnnotationConfig) -> Result<Self, AnnotateError> {
        match config.font_path.as_deref().and_then(load_font) {
            Some(font) => Ok(Self::with_font(config, font, true)),
            None => {
                if config.font_path.is_some() {
                    tracing::warn!("Preferred font unavailable, using bundled DejaVu Sans");
                }
                Ok(Self::with_font(config, default_font()?, false))
            }
        }
    }

    fn with_font(config: &AnnotationConfig, font: FontArc, preferred_font: bool) -> Self {
        Self {
            font,
            preferred_font,
            min_font_size: config.min_font_size,
            font_width_divisor: config.font_width_divisor,
            stroke_width: config.stroke_width.max(1),
        }
    }

    /// Whether the configured `font_path` is in use.
    pub fn has_preferred_font(&self) -> bool {
        self.preferred_font
    }

    pub fn font_size(&self, image_width: u32) -> f32 {
        (image_width as f32 / self.font_width_divisor)
            .floor()
            .max(self.min_font_size)
    }

    /// Computes where each detection at or above `threshold` is drawn.
    pub fn plan(
        &self,
        width: u32,
        height: u32,
        detections: &DetectionSet,
        threshold: f32,
        labels: &LabelMap,
    ) -> Vec<Annotation> {
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let scale = PxScale::from(self.font_size(width));
        detections
            .confident(threshold)
            .map(|detection| self.layout(width, height, detection, scale, labels))
            .collect()
    }

    /// Returns a copy of `image` with boxes and labels drawn for every
    /// detection at or above `threshold`.
    pub fn annotate(
        &self,
        image: &RgbImage,
        detections: &DetectionSet,
        threshold: f32,
        labels: &LabelMap,
    ) -> RgbImage {
        let mut canvas = image.clone();
        let (width, height) = canvas.dimensions();
        let scale = PxScale::from(self.font_size(width));

        for annotation in self.plan(width, height, detections, threshold, labels) {
            self.draw_box(&mut canvas, annotation.bbox);
            draw_filled_rect_mut(&mut canvas, annotation.label, BOX_COLOR);
            draw_text_mut(
                &mut canvas,
                TEXT_COLOR,
                annotation.label.left(),
                annotation.label.top(),
                scale,
                &self.font,
                &annotation.text,
            );
        }

        canvas
    }

    fn layout(
        &self,
        width: u32,
        height: u32,
        detection: &Detection,
        scale: PxScale,
        labels: &LabelMap,
    ) -> Annotation {
        let (left, top, right, bottom) = detection.bbox.to_pixels(width, height);
        let max_x = width as i32 - 1;
        let max_y = height as i32 - 1;

        let left = (left.floor() as i32).clamp(0, max_x);
        let top = (top.floor() as i32).clamp(0, max_y);
        let right = (right.ceil() as i32).clamp(left, max_x);
        let bottom = (bottom.ceil() as i32).clamp(top, max_y);

        let bbox = Rect::at(left, top).of_size(
            (right - left + 1) as u32,
            (bottom - top + 1) as u32,
        );

        let text = label_text(labels.name(detection.class_id), detection.score);
        let (text_width, text_height) = text_size(scale, &self.font, &text);

        let label_width = text_width.clamp(1, (width as i32 - left) as u32);
        let label_height = text_height.clamp(1, height);
        // Above the box only with room to spare, otherwise inside its top edge.
        let label_top = if top > label_height as i32 {
            top - label_height as i32
        } else {
            top
        };

        Annotation {
            text,
            bbox,
            label: Rect::at(left, label_top).of_size(label_width, label_height),
        }
    }

    fn draw_box(&self, canvas: &mut RgbImage, bbox: Rect) {
        for inset in 0..self.stroke_width {
            let inset = inset as i32;
            let width = bbox.width() as i32 - 2 * inset;
            let height = bbox.height() as i32 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(bbox.left() + inset, bbox.top() + inset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
        }
    }
}

fn default_font() -> Result<FontArc, AnnotateError> {
    Ok(FontArc::try_from_slice(DEFAULT_FONT)?)
}

fn load_font(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Font {:?} unavailable: {}", path, e);
            return None;
        }
    };

    match FontArc::try_from_vec(bytes) {
        Ok(font) => {
            tracing::info!("Using font {:?} for detection labels", path);
            Some(font)
        }
        Err(e) => {
            tracing::warn!("Font {:?} could not be parsed: {}", path, e);
            None
        }
    }
}
