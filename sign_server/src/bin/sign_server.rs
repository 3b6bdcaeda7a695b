//! Sign server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use axum::{routing::get, Extension, Router};
use clap::Parser;
use env_logger::TimestampPrecision;
use sign_server::{
    board::PredictionBoard,
    classifier::{Classifier, OnnxClassifier, TemplateClassifier},
    data_socket::spawn_data_socket,
    endpoints::{channels, healthcheck, latest},
    meter::spawn_meter_logger,
    worker::{job_channel, ClassifyWorker},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the HTTP status server
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address of the data socket capture clients connect to
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Templates for nearest-neighbour classification (JSON Lines)
    #[clap(long)]
    templates: Option<PathBuf>,

    /// Number of neighbours voting in nearest-neighbour classification
    #[clap(long, default_value_t = 3)]
    k: usize,

    /// ONNX classifier model, used when no templates are given
    #[clap(long)]
    model: Option<PathBuf>,

    /// Labels of the ONNX classifier outputs, one per line
    #[clap(long)]
    labels: Option<PathBuf>,

    /// Predictions below this confidence are sent without label
    #[clap(long, default_value_t = 0.5)]
    min_confidence: f32,

    /// Number of landmark messages waiting for classification
    #[clap(long, default_value_t = 16)]
    queue_size: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let classifier = build_classifier(&args)?;

    // Latest predictions per channel, shared with the HTTP endpoints
    let board = Arc::new(PredictionBoard::new());

    let (jobs_tx, jobs_rx) = job_channel(args.queue_size);
    {
        let worker = ClassifyWorker::new(jobs_rx, classifier, board.clone(), args.min_confidence);
        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                log::error!("Classification worker stopped: {e}");
            }
        });
    }

    // Create socket to receive landmark streams via network
    spawn_data_socket(jobs_tx, board.clone(), &args.socket_address).await?;

    spawn_meter_logger();

    // Build HTTP server with endpoints
    let app = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/channels", get(channels))
        .route("/latest", get(latest))
        .layer(Extension(board));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("HTTP server listening on {}", &addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

fn build_classifier(args: &Args) -> Result<Box<dyn Classifier>> {
    match (&args.templates, &args.model, &args.labels) {
        (Some(templates), _, _) => Ok(Box::new(TemplateClassifier::from_path(templates, args.k)?)),
        (None, Some(model), Some(labels)) => Ok(Box::new(OnnxClassifier::new(model, labels)?)),
        (None, Some(_), None) => bail!("--model requires --labels"),
        (None, None, _) => bail!("either --templates or --model with --labels is required"),
    }
}
