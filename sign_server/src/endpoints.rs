//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{extract::Query, Extension, Json};
use common::protocol::PredictionMsg;
use serde::Deserialize;

use crate::board::PredictionBoard;

/// Search parameters available to prediction lookups.
#[derive(Debug, Deserialize)]
pub struct LatestParams {
    #[serde(default)]
    name: Option<String>,
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Channels with a connected capture client.
pub async fn channels(Extension(board): Extension<Arc<PredictionBoard>>) -> Json<Vec<String>> {
    Json(board.channels().await)
}

// Latest prediction of a channel, `null` if there is none yet.
pub async fn latest(
    Extension(board): Extension<Arc<PredictionBoard>>,
    Query(params): Query<LatestParams>,
) -> Json<Option<PredictionMsg>> {
    let name = params.name.unwrap_or_else(|| "default".into());
    log::debug!("Latest prediction for {} requested", &name);

    Json(board.latest(&name).await)
}
