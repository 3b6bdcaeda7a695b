//! Hand sender binary.
//!
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use hand_sender::{
    client::{HandRun, SignClient},
    detector::{HandLandmarker, DEFAULT_INPUT_SIZE, DEFAULT_ROI_SCALE},
    display::{spawn_display_server, FrameBroadcast},
    overlay::{encode_jpeg, load_font, render},
    recognizer::spawn_recognizer,
    recorder::TemplateRecorder,
    sensors::{get_capture_fn, CameraConfig},
    utils::ensure_model,
};
use tokio::sync::mpsc;

/// JPEG quality of the rendered stream.
const JPEG_QUALITY: i32 = 80;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the sign server data socket
    #[clap(long, default_value = "127.0.0.1:3001")]
    address: String,

    /// Channel name that this sender publishes to
    #[clap(long, default_value = "default")]
    channel: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Hand landmark model (.onnx)
    #[clap(long, default_value = "hand_landmark.onnx")]
    model: PathBuf,

    /// URL to download the model from if it is not available locally
    #[clap(long)]
    model_url: Option<String>,

    /// Side length of the square model input
    #[clap(long, default_value_t = DEFAULT_INPUT_SIZE)]
    input_size: u32,

    /// Minimum hand presence score to accept a detection
    #[clap(long, default_value_t = 0.5)]
    min_presence: f32,

    /// Size of the tracked region relative to the last hand bounding box
    #[clap(long, default_value_t = DEFAULT_ROI_SCALE)]
    roi_scale: f32,

    /// Address to serve the annotated stream on
    #[clap(long, default_value = "127.0.0.1:8080")]
    http_address: String,

    /// TrueType font for drawing predictions
    #[clap(long)]
    font: Option<PathBuf>,

    /// Append normalized landmarks as templates to this file
    #[clap(long, requires = "label")]
    record: Option<PathBuf>,

    /// Label of recorded templates
    #[clap(long)]
    label: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    log::info!("Launching hand sender for channel {}", &args.channel);

    let font = match &args.font {
        Some(path) => Some(load_font(path)?),
        None => {
            log::warn!("No font given, predictions are not drawn on the stream");
            None
        }
    };

    let mut recorder = match (&args.record, &args.label) {
        (Some(path), Some(label)) => Some(TemplateRecorder::create(path, label)?),
        _ => None,
    };

    let model_path = ensure_model(&args.model, args.model_url.as_deref()).await?;
    let detector = HandLandmarker::new(&model_path, args.input_size, args.min_presence)?
        .with_roi_scale(args.roi_scale);

    let mut client = SignClient::connect(&args.address, &args.channel).await?;

    let frames = FrameBroadcast::new();
    spawn_display_server(frames.clone(), client.latest_handle(), &args.http_address).await?;
    let mut hand_run = HandRun::default();

    // Initialize webcam and run capture plus detection on its own thread
    let capture_fn = get_capture_fn(&CameraConfig {
        device: args.device.clone(),
        ..Default::default()
    })?;
    let (observation_tx, mut observation_rx) = mpsc::channel(2);
    spawn_recognizer(capture_fn, Box::new(detector), observation_tx);

    while let Some(observation) = observation_rx.recv().await {
        hand_run.observe(observation.seq, observation.hand.is_some());
        if let Some(hand) = &observation.hand {
            client.send_landmarks(observation.seq, &hand.landmarks).await?;

            if let Some(recorder) = recorder.as_mut() {
                recorder.record(&hand.landmarks)?;
                if recorder.count() % 50 == 0 {
                    log::info!("Recorded {} templates", recorder.count());
                }
            }
        }

        if !client.is_connected() {
            bail!("connection to {} lost", &args.address);
        }

        if frames.has_viewers() {
            let prediction = hand_run.current(client.latest_prediction());
            let image = render(
                observation.image,
                observation.hand.as_ref(),
                prediction.as_ref(),
                font.as_ref(),
            );
            match encode_jpeg(&image, JPEG_QUALITY) {
                Ok(jpeg) => frames.publish(&jpeg),
                Err(e) => log::warn!("Failed to encode frame: {e}"),
            }
        }
    }

    log::info!("Recognizer stopped");

    Ok(())
}
