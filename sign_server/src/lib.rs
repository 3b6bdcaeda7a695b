//! Classification backend for hand landmark streams.
//!
//! Capture clients connect to the data socket, register a channel name and stream normalized
//! landmarks. Each message is queued for the [`worker::ClassifyWorker`], which replies with a
//! prediction and publishes it on the [`board::PredictionBoard`] for the HTTP endpoints.
pub mod board;
pub mod classifier;
pub mod data_socket;
pub mod endpoints;
pub mod meter;
pub mod worker;
