//! Drawing landmarks and classification results onto frames.
//!
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use common::protocol::PredictionMsg;
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::detector::Hand;

/// Landmark pairs forming the hand skeleton: wrist, thumb, fingers and palm.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (0, 17),
];

const LANDMARK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const SKELETON_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const LANDMARK_RADIUS: i32 = 4;
const LABEL_HEIGHT: f32 = 32.0;

/// Load a TrueType font from disk.
pub fn load_font(path: impl AsRef<Path>) -> Result<Font<'static>> {
    let data = std::fs::read(path.as_ref())
        .with_context(|| format!("failed to read font {:?}", path.as_ref()))?;
    Font::try_from_vec(data).context("invalid font data")
}

/// Draw skeleton connections and landmark points.
pub fn draw_hand(image: &mut RgbImage, hand: &Hand) {
    for (start, end) in HAND_CONNECTIONS.iter() {
        if let (Some(a), Some(b)) = (hand.landmarks.get(*start), hand.landmarks.get(*end)) {
            draw_line_segment_mut(image, (a.x, a.y), (b.x, b.y), SKELETON_COLOR);
        }
    }

    for lm in hand.landmarks.iter() {
        draw_filled_circle_mut(
            image,
            (lm.x as i32, lm.y as i32),
            LANDMARK_RADIUS,
            LANDMARK_COLOR,
        );
    }
}

/// Text shown for a prediction.
pub fn label_text(prediction: &PredictionMsg) -> String {
    match &prediction.label {
        Some(label) => format!("{} {:.0}%", label, prediction.confidence * 100.0),
        None => format!("? {:.0}%", prediction.confidence * 100.0),
    }
}

/// Draw `text` on a dark box in the top left corner.
pub fn draw_label(image: &mut RgbImage, text: &str, font: &Font<'_>) {
    let scale = Scale::uniform(LABEL_HEIGHT);
    let text_width = font
        .layout(text, scale, rusttype::point(0.0, 0.0))
        .filter_map(|glyph| glyph.pixel_bounding_box())
        .map(|bbox| bbox.max.x)
        .max()
        .unwrap_or(0);

    let box_width = (text_width + 16).max(1) as u32;
    let box_height = LABEL_HEIGHT as u32 + 8;
    draw_filled_rect_mut(
        image,
        Rect::at(0, 0).of_size(box_width, box_height),
        LABEL_BACKGROUND,
    );
    draw_text_mut(image, LABEL_COLOR, 8, 4, scale, font, text);
}

/// Draw the hand and, if both hand and prediction are known, the prediction.
pub fn render(
    mut image: RgbImage,
    hand: Option<&Hand>,
    prediction: Option<&PredictionMsg>,
    font: Option<&Font<'_>>,
) -> RgbImage {
    if let Some(hand) = hand {
        draw_hand(&mut image, hand);

        if let (Some(prediction), Some(font)) = (prediction, font) {
            draw_label(&mut image, &label_text(prediction), font);
        }
    }

    image
}

pub fn encode_jpeg(image: &RgbImage, quality: i32) -> Result<Bytes> {
    let buf = turbojpeg::compress_image(image, quality, turbojpeg::Subsamp::Sub2x2)
        .context("failed to compress frame")?;
    Ok(Bytes::copy_from_slice(&buf))
}
