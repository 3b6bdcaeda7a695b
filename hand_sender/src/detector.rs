//! Hand landmark detection.
//!
//! [`HandLandmarker`] runs a MediaPipe-style hand landmark network exported to `.onnx`:
//! - input: `[1, S, S, 3]` RGB, NHWC, values in `[0, 1]`
//! - outputs: `[1, 63]` landmarks as `(x, y, z)` in input pixels, `[1, 1]` hand presence and
//!   `[1, 1]` handedness score. A second `[1, 63]` output (world landmarks) is ignored.
//!
//! The network expects a hand roughly filling its input. After the first detection, the next
//! frame is therefore cropped to the area around the previous landmarks.
use std::path::Path;

use anyhow::{bail, Context, Result};
use common::landmarks::{Landmark, NUM_HAND_LANDMARKS};
use image::{imageops, RgbImage};
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Size of the tracked region relative to the landmark bounding box.
pub const DEFAULT_ROI_SCALE: f32 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// Detected hand in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Hand {
    pub landmarks: Vec<Landmark>,
    pub presence: f32,
    pub handedness: Handedness,
}

impl Hand {
    /// Bounding box of all landmarks as `[x_min, y_min, x_max, y_max]`.
    pub fn bbox(&self) -> Option<[f32; 4]> {
        if self.landmarks.is_empty() {
            return None;
        }

        Some(self.landmarks.iter().fold(
            [f32::MAX, f32::MAX, f32::MIN, f32::MIN],
            |[x_min, y_min, x_max, y_max], lm| {
                [
                    x_min.min(lm.x),
                    y_min.min(lm.y),
                    x_max.max(lm.x),
                    y_max.max(lm.y),
                ]
            },
        ))
    }
}

pub trait HandDetector: Send {
    /// Detect a hand in `image`. `None` if no hand is present.
    fn detect(&mut self, image: &RgbImage) -> Result<Option<Hand>>;
}

/// Region of a frame in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Square region centred on `bbox` with `scale` times its longer side, clamped to the frame.
    pub fn around(bbox: [f32; 4], scale: f32, frame: (u32, u32)) -> Option<Self> {
        let (center_x, center_y) = ((bbox[0] + bbox[2]) / 2.0, (bbox[1] + bbox[3]) / 2.0);
        let half_side = f32::max(bbox[2] - bbox[0], bbox[3] - bbox[1]) * scale / 2.0;

        let x_min = (center_x - half_side).max(0.0).floor();
        let y_min = (center_y - half_side).max(0.0).floor();
        let x_max = (center_x + half_side).min(frame.0 as f32).ceil();
        let y_max = (center_y + half_side).min(frame.1 as f32).ceil();

        if !(x_max - x_min >= 1.0 && y_max - y_min >= 1.0) {
            return None;
        }

        Some(Self {
            x: x_min as u32,
            y: y_min as u32,
            width: (x_max - x_min) as u32,
            height: (y_max - y_min) as u32,
        })
    }
}

/// Placement of a region inside the square network input.
///
/// The region is resized preserving its aspect ratio and centred, the rest is black padding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    roi: Roi,
    resized: (u32, u32),
    pad: (u32, u32),
}

impl Letterbox {
    pub fn new(roi: Roi, size: u32) -> Self {
        let scale = size as f32 / roi.width.max(roi.height).max(1) as f32;
        let resized_width = ((roi.width as f32 * scale).round() as u32).clamp(1, size);
        let resized_height = ((roi.height as f32 * scale).round() as u32).clamp(1, size);

        Self {
            roi,
            resized: (resized_width, resized_height),
            pad: ((size - resized_width) / 2, (size - resized_height) / 2),
        }
    }

    /// Map a point from network input pixels back into the frame.
    pub fn to_frame(&self, x: f32, y: f32, z: f32) -> Landmark {
        let scale_x = self.resized.0 as f32 / self.roi.width.max(1) as f32;
        let scale_y = self.resized.1 as f32 / self.roi.height.max(1) as f32;

        Landmark::new(
            (x - self.pad.0 as f32) / scale_x + self.roi.x as f32,
            (y - self.pad.1 as f32) / scale_y + self.roi.y as f32,
            z / scale_x,
        )
    }
}

pub struct HandLandmarker {
    model: NnModel,
    input_size: u32,
    min_presence: f32,
    roi_scale: f32,
    tracked: Option<[f32; 4]>,
}

impl HandLandmarker {
    pub fn new(model_path: impl AsRef<Path>, input_size: u32, min_presence: f32) -> Result<Self> {
        let model = get_landmark_model(model_path.as_ref(), input_size)?;
        log::info!(
            "Loaded hand landmark model {:?} ({}x{})",
            model_path.as_ref(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            input_size,
            min_presence,
            roi_scale: DEFAULT_ROI_SCALE,
            tracked: None,
        })
    }

    pub fn with_roi_scale(mut self, roi_scale: f32) -> Self {
        self.roi_scale = roi_scale;
        self
    }

    fn preproc(&self, image: &RgbImage, roi: Roi) -> (Tensor, Letterbox) {
        let size = self.input_size;
        let letterbox = Letterbox::new(roi, size);

        let region = imageops::crop_imm(image, roi.x, roi.y, roi.width, roi.height).to_image();
        let resized: RgbImage = imageops::resize(
            &region,
            letterbox.resized.0,
            letterbox.resized.1,
            imageops::FilterType::Triangle,
        );
        let mut canvas = RgbImage::new(size, size);
        imageops::overlay(
            &mut canvas,
            &resized,
            letterbox.pad.0 as i64,
            letterbox.pad.1 as i64,
        );

        let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, size as usize, size as usize, 3),
            |(_, y, x, c)| canvas[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into();

        (tensor, letterbox)
    }
}

impl HandDetector for HandLandmarker {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<Hand>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            bail!("empty image");
        }

        let roi = self
            .tracked
            .and_then(|bbox| Roi::around(bbox, self.roi_scale, (width, height)))
            .unwrap_or_else(|| Roi::full(width, height));

        let (input, letterbox) = self.preproc(image, roi);
        let inputs: TVec<TValue> = tvec!(input.into());
        let raw_nn_out = self.model.run(inputs)?;
        let outputs: Vec<&Tensor> = raw_nn_out.iter().map(|value| &**value).collect();

        let hand = decode_outputs(&outputs, &letterbox, self.min_presence)?;
        self.tracked = hand.as_ref().and_then(Hand::bbox);

        Ok(hand)
    }
}

fn get_landmark_model(path: &Path, input_size: u32) -> Result<NnModel> {
    let size = input_size as usize;
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, size, size, 3));
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Turn raw network outputs into a hand in frame coordinates.
///
/// Outputs are identified by their size: the first one with `NUM_HAND_LANDMARKS * 3` values holds
/// the landmarks, the first and second scalar outputs are presence and handedness.
pub fn decode_outputs(
    outputs: &[&Tensor],
    letterbox: &Letterbox,
    min_presence: f32,
) -> Result<Option<Hand>> {
    let mut scalars = outputs.iter().filter(|t| t.len() == 1);
    let presence = scalars
        .next()
        .context("no presence output")?
        .as_slice::<f32>()?[0];

    if presence < min_presence {
        log::trace!("No hand, presence {presence:.2}");
        return Ok(None);
    }

    let handedness = match scalars.next() {
        Some(t) if t.as_slice::<f32>()?[0] <= 0.5 => Handedness::Left,
        _ => Handedness::Right,
    };

    let coords = outputs
        .iter()
        .find(|t| t.len() == NUM_HAND_LANDMARKS * 3)
        .context("no landmark output")?
        .as_slice::<f32>()?;

    let landmarks = coords
        .chunks(3)
        .map(|xyz| letterbox.to_frame(xyz[0], xyz[1], xyz[2]))
        .collect();

    Ok(Some(Hand {
        landmarks,
        presence,
        handedness,
    }))
}

#[cfg(test)]
mod test {

    use super::*;

    /// 640x480 frame letterboxed into 224x224: scale 0.35, 168 rows, 28 rows padding on top.
    fn landscape() -> Letterbox {
        Letterbox::new(Roi::full(640, 480), 224)
    }

    #[test]
    fn test_letterbox_landscape() {
        let letterbox = landscape();
        assert_eq!(letterbox.resized, (224, 168));
        assert_eq!(letterbox.pad, (0, 28));

        let lm = letterbox.to_frame(112.0, 28.0, 3.5);
        assert!((lm.x - 320.0).abs() < 1e-3);
        assert!(lm.y.abs() < 1e-3);
        assert!((lm.z - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_offset_region() {
        let roi = Roi {
            x: 100,
            y: 50,
            width: 112,
            height: 224,
        };
        let letterbox = Letterbox::new(roi, 224);
        assert_eq!(letterbox.resized, (112, 224));
        assert_eq!(letterbox.pad, (56, 0));

        let lm = letterbox.to_frame(56.0, 10.0, 0.0);
        assert_eq!((lm.x, lm.y), (100.0, 60.0));
    }

    #[test]
    fn test_roi_around_is_clamped() {
        let roi = Roi::around([10.0, 20.0, 50.0, 40.0], 2.0, (640, 480));
        assert_eq!(
            roi,
            Some(Roi {
                x: 0,
                y: 0,
                width: 70,
                height: 70,
            })
        );

        let roi = Roi::around([600.0, 400.0, 640.0, 480.0], 1.0, (640, 480));
        assert_eq!(
            roi,
            Some(Roi {
                x: 580,
                y: 400,
                width: 60,
                height: 80,
            })
        );
    }

    #[test]
    fn test_roi_around_outside_frame() {
        assert_eq!(
            Roi::around([700.0, 500.0, 710.0, 510.0], 1.0, (640, 480)),
            None
        );
    }

    fn outputs(presence: f32, handedness: f32) -> Result<Vec<Tensor>> {
        let coords: Vec<f32> = (0..NUM_HAND_LANDMARKS)
            .flat_map(|i| [i as f32, 28.0 + i as f32, 0.0])
            .collect();

        Ok(vec![
            Tensor::from_shape(&[1, NUM_HAND_LANDMARKS * 3], &coords)?,
            Tensor::from_shape(&[1, 1], &[presence])?,
            Tensor::from_shape(&[1, 1], &[handedness])?,
            Tensor::from_shape(&[1, NUM_HAND_LANDMARKS * 3], &vec![0.0f32; 63])?,
        ])
    }

    #[test]
    fn test_decode_outputs() -> Result<()> {
        let tensors = outputs(0.9, 0.2)?;
        let refs: Vec<&Tensor> = tensors.iter().collect();

        let hand = decode_outputs(&refs, &landscape(), 0.5)?.context("hand expected")?;
        assert_eq!(hand.landmarks.len(), NUM_HAND_LANDMARKS);
        assert_eq!(hand.handedness, Handedness::Left);
        assert_eq!(hand.presence, 0.9);

        // First landmark sits at the top left corner of the frame
        assert!(hand.landmarks[0].x.abs() < 1e-3);
        assert!(hand.landmarks[0].y.abs() < 1e-3);
        assert!((hand.landmarks[20].x - 20.0 / 0.35).abs() < 1e-2);

        Ok(())
    }

    #[test]
    fn test_decode_outputs_below_presence() -> Result<()> {
        let tensors = outputs(0.3, 0.9)?;
        let refs: Vec<&Tensor> = tensors.iter().collect();

        assert_eq!(decode_outputs(&refs, &landscape(), 0.5)?, None);

        Ok(())
    }

    #[test]
    fn test_decode_outputs_missing_landmarks() -> Result<()> {
        let presence = Tensor::from_shape(&[1, 1], &[0.9f32])?;

        assert!(decode_outputs(&[&presence], &landscape(), 0.5).is_err());

        Ok(())
    }

    #[test]
    fn test_hand_bbox() {
        let hand = Hand {
            landmarks: vec![
                Landmark::new(5.0, 9.0, 0.0),
                Landmark::new(1.0, 12.0, 0.0),
                Landmark::new(3.0, 4.0, 0.0),
            ],
            presence: 1.0,
            handedness: Handedness::Right,
        };

        assert_eq!(hand.bbox(), Some([1.0, 4.0, 5.0, 12.0]));
    }
}
