//! HTTP display of the annotated camera stream.
//!
//! The rendered frames are broadcast as multipart items. Browsers show them through a plain
//! `<img>` tag pointed at `/stream`.
use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    body::StreamBody,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Extension, Json, Router,
};
use bytes::Bytes;
use common::protocol::PredictionMsg;
use futures::StreamExt;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::wrappers::BroadcastStream;

use crate::client::{read_latest, LatestPrediction};

/// Rendered frames kept for slow viewers before they start skipping.
const FRAME_BUFFER: usize = 4;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>signcam</title></head>
<body style="margin: 0; background: #111;">
    <img src="/stream" style="display: block; margin: auto; max-width: 100%;">
</body>
</html>
"#;

/// Sender side of the rendered frame stream.
#[derive(Clone)]
pub struct FrameBroadcast {
    tx: broadcast::Sender<Bytes>,
}

impl FrameBroadcast {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FRAME_BUFFER);
        Self { tx }
    }

    /// Whether anyone is watching. Rendering can be skipped otherwise.
    pub fn has_viewers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Publish a JPEG encoded frame.
    pub fn publish(&self, jpeg: &[u8]) {
        // Only fails without receivers
        self.tx.send(as_jpeg_stream_item(jpeg)).ok();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }
}

impl Default for FrameBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a JPEG image as part of a `multipart/x-mixed-replace` body.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

/// Serve the display endpoints on `addr`.
///
/// Returns the bound address, which differs from `addr` when binding to port 0.
pub async fn spawn_display_server(
    frames: FrameBroadcast,
    latest: LatestPrediction,
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let addr: SocketAddr = addr.parse()?;

    let app = Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(stream))
        .route("/prediction", get(prediction))
        .layer(Extension(Arc::new(frames)))
        .layer(Extension(latest));

    let server = axum::Server::try_bind(&addr)?.serve(app.into_make_service());
    let local_addr = server.local_addr();
    log::info!("Display available at http://{}/", &local_addr);

    let handle = tokio::spawn(async move {
        server.await?;
        Ok(())
    });

    Ok((local_addr, handle))
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn prediction(Extension(latest): Extension<LatestPrediction>) -> Json<Option<PredictionMsg>> {
    Json(read_latest(&latest))
}

// Endpoint of the rendered image stream.
pub async fn stream(Extension(frames): Extension<Arc<FrameBroadcast>>) -> impl IntoResponse {
    log::info!("New viewer for the rendered stream");

    // Lagging viewers skip frames instead of ending the stream
    let stream = BroadcastStream::new(frames.subscribe())
        .filter_map(|item| async move { item.ok().map(Ok::<_, Infallible>) });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}
