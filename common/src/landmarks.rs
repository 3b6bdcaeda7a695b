//! Hand landmarks and their normalization before transmission.
//!
use serde::{Deserialize, Serialize};

/// Number of landmarks per hand.
pub const NUM_HAND_LANDMARKS: usize = 21;

/// Length of the flattened feature vector, `[x0, y0, x1, y1, ...]`.
pub const NUM_FEATURES: usize = NUM_HAND_LANDMARKS * 2;

/// Keypoint on a detected hand in frame pixel coordinates.
///
/// The origin is the top left corner of the frame. `z` is the relative depth estimated by the
/// model and shares the scale of `x`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn xy(&self) -> [f32; 2] {
        [self.x, self.y]
    }
}

/// Labeled feature vector used as a nearest-neighbour reference.
///
/// Stored one per line as JSON, e.g. `{"label":"A","features":[0.0,12.5,...]}`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Template {
    pub label: String,
    pub features: Vec<f32>,
}

/// Translate points so that the smallest x and the smallest y become zero.
///
/// This makes the hand pose independent of where the hand is in the frame. Non-finite
/// coordinates do not take part in the minimum search; they are still translated.
pub fn normalize(points: &[[f32; 2]]) -> Vec<[f32; 2]> {
    let (min_x, min_y) = points
        .iter()
        .fold((f32::INFINITY, f32::INFINITY), |(min_x, min_y), p| {
            (finite_min(min_x, p[0]), finite_min(min_y, p[1]))
        });

    // No finite value on an axis leaves that axis untouched
    let min_x = if min_x.is_finite() { min_x } else { 0.0 };
    let min_y = if min_y.is_finite() { min_y } else { 0.0 };

    points.iter().map(|p| [p[0] - min_x, p[1] - min_y]).collect()
}

/// Project landmarks onto the image plane and normalize them.
pub fn normalize_landmarks(landmarks: &[Landmark]) -> Vec<[f32; 2]> {
    let points: Vec<[f32; 2]> = landmarks.iter().map(Landmark::xy).collect();
    normalize(&points)
}

/// Flatten points into `[x0, y0, x1, y1, ...]`.
pub fn flatten(points: &[[f32; 2]]) -> Vec<f32> {
    points.iter().flat_map(|p| p.iter().copied()).collect()
}

fn finite_min(current: f32, value: f32) -> f32 {
    if value.is_finite() && value < current {
        value
    } else {
        current
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_normalize_moves_minimum_to_origin() {
        let points = [[10.0, 40.0], [25.0, 12.0], [14.0, 30.0]];
        let normalized = normalize(&points);

        assert_eq!(normalized, vec![[0.0, 28.0], [15.0, 0.0], [4.0, 18.0]]);
    }

    #[test]
    fn test_normalize_is_translation_invariant() {
        let points = [[1.5, 2.0], [3.0, -4.0], [0.25, 7.0]];
        let shifted: Vec<[f32; 2]> = points.iter().map(|p| [p[0] + 320.0, p[1] - 12.0]).collect();

        assert_eq!(normalize(&points), normalize(&shifted));
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_normalize_ignores_non_finite_for_minimum() {
        let points = [[f32::NAN, 5.0], [2.0, f32::NEG_INFINITY], [4.0, 8.0]];
        let normalized = normalize(&points);

        assert!(normalized[0][0].is_nan());
        assert_eq!(normalized[0][1], 0.0);
        assert_eq!(normalized[1][0], 0.0);
        assert_eq!(normalized[2], [2.0, 3.0]);
    }

    #[test]
    fn test_normalize_landmarks_drops_depth() {
        let landmarks = [Landmark::new(100.0, 50.0, -3.0), Landmark::new(120.0, 80.0, 1.0)];

        assert_eq!(
            normalize_landmarks(&landmarks),
            vec![[0.0, 0.0], [20.0, 30.0]]
        );
    }

    #[test]
    fn test_flatten() {
        assert_eq!(
            flatten(&[[1.0, 2.0], [3.0, 4.0]]),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }
}
