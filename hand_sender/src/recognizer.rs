//! Capture and detection loop.
//!
//! Camera capture and network inference block, so they run on a dedicated thread. Results are
//! handed to the async side through a bounded channel, which also throttles the loop when the
//! consumer falls behind.
use std::{ops::Deref, thread, time::Duration};

use image::RgbImage;
use tokio::sync::mpsc;

use crate::{
    detector::{Hand, HandDetector},
    sensors::decode_frame,
};

/// Pause after a failed capture before trying again.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One processed camera frame.
#[derive(Clone, Debug)]
pub struct Observation {
    pub seq: u64,
    pub image: RgbImage,
    pub hand: Option<Hand>,
}

/// Run capture, decoding and detection until `tx` is closed.
///
/// `capture_fn` yields encoded JPEG frames, e.g. a [`crate::sensors::CaptureFn`].
pub fn spawn_recognizer<C, F>(
    capture_fn: C,
    mut detector: Box<dyn HandDetector>,
    tx: mpsc::Sender<Observation>,
) -> thread::JoinHandle<()>
where
    C: Fn() -> Option<F> + Send + 'static,
    F: Deref<Target = [u8]>,
{
    thread::spawn(move || {
        let mut seq = 0;

        loop {
            if tx.is_closed() {
                log::info!("Observation receiver dropped, stopping recognizer");
                break;
            }

            let frame = match capture_fn() {
                Some(frame) => frame,
                None => {
                    log::error!("Unable to capture frame, trying again...");
                    thread::sleep(CAPTURE_RETRY_DELAY);
                    continue;
                }
            };

            let image = match decode_frame(&frame[..]) {
                Ok(image) => image,
                Err(e) => {
                    log::warn!("Skipping frame: {e}");
                    continue;
                }
            };

            let hand = detector.detect(&image).unwrap_or_else(|e| {
                log::warn!("Hand detection failed: {e}");
                None
            });

            if tx.blocking_send(Observation { seq, image, hand }).is_err() {
                log::info!("Observation receiver dropped, stopping recognizer");
                break;
            }
            seq += 1;
        }
    })
}
