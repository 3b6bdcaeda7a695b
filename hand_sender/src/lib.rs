//! Capture client: webcam frames in, hand landmarks out.
//!
//! Frames are captured and run through the hand landmark detector on a dedicated thread
//! ([`recognizer`]). Normalized landmarks go to the sign server ([`client`]) and the frames,
//! annotated with landmarks and the latest prediction ([`overlay`]), are served over HTTP
//! ([`display`]).
pub mod client;
pub mod detector;
pub mod display;
pub mod overlay;
pub mod recognizer;
pub mod recorder;
pub mod sensors;
pub mod utils;
