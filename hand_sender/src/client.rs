//! Connection to the sign server.
//!
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use common::{
    landmarks::{normalize_landmarks, Landmark},
    protocol::{LandmarksMsg, PredictionMsg, ProtoMsg},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Most recent prediction received from the server.
pub type LatestPrediction = Arc<Mutex<Option<PredictionMsg>>>;

/// Read the shared prediction, also after a panic of the writing task.
pub fn read_latest(latest: &LatestPrediction) -> Option<PredictionMsg> {
    latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Tracks the first frame of the current run of frames showing a hand.
///
/// The server echoes `seq`, so a prediction answering a frame before the run started belongs to
/// a hand that has since left the picture.
#[derive(Clone, Copy, Debug, Default)]
pub struct HandRun {
    since: Option<u64>,
}

impl HandRun {
    pub fn observe(&mut self, seq: u64, hand_visible: bool) {
        if hand_visible {
            self.since.get_or_insert(seq);
        } else {
            self.since = None;
        }
    }

    /// `prediction` if it answers a frame of the current run.
    pub fn current(&self, prediction: Option<PredictionMsg>) -> Option<PredictionMsg> {
        let since = self.since?;
        prediction.filter(|p| p.seq >= since)
    }
}

pub struct SignClient {
    channel: String,
    sink: SplitSink<Transport, Bytes>,
    latest: LatestPrediction,
    reader: JoinHandle<()>,
}

impl SignClient {
    /// Connect to `addr` and register as `channel`.
    pub async fn connect(addr: &str, channel: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| anyhow!("error connecting to {addr}: {e}"))?;
        log::info!("Client connected to {} as {}", addr, channel);

        // Wrap stream in transport handler with length-delimited codec
        let (mut sink, stream) = Framed::new(stream, LengthDelimitedCodec::new()).split();

        // Send init message
        let init_msg = Bytes::from(ProtoMsg::ConnectReq(channel.to_owned()).to_bytes()?);
        sink.send(init_msg).await?;

        let latest: LatestPrediction = Arc::new(Mutex::new(None));
        let reader = tokio::spawn(read_predictions(stream, latest.clone()));

        Ok(Self {
            channel: channel.to_owned(),
            sink,
            latest,
            reader,
        })
    }

    /// Normalize the landmarks of frame `seq` and send them.
    pub async fn send_landmarks(&mut self, seq: u64, landmarks: &[Landmark]) -> Result<()> {
        let points = normalize_landmarks(landmarks);
        let msg = ProtoMsg::LandmarksMsg(LandmarksMsg::new(self.channel.clone(), seq, points));
        self.sink.send(Bytes::from(msg.to_bytes()?)).await?;

        Ok(())
    }

    pub fn latest_prediction(&self) -> Option<PredictionMsg> {
        read_latest(&self.latest)
    }

    /// Shared handle to the most recent prediction.
    pub fn latest_handle(&self) -> LatestPrediction {
        self.latest.clone()
    }

    /// Whether the server side of the connection is still open.
    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished()
    }
}

impl Drop for SignClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_predictions(mut stream: SplitStream<Transport>, latest: LatestPrediction) {
    while let Some(res) = stream.next().await {
        match res {
            Ok(data) => match ProtoMsg::deserialize(&data) {
                Ok(ProtoMsg::PredictionMsg(prediction)) => {
                    log::debug!(
                        "Prediction #{}: {:?} ({:.2})",
                        prediction.seq,
                        &prediction.label,
                        prediction.confidence
                    );
                    *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(prediction);
                }
                Ok(other) => log::warn!("Unexpected message {:?}", other),
                Err(e) => log::warn!("Undecodable message: {e}"),
            },
            Err(e) => {
                log::error!("Error in TCP codec: {e}");
                break;
            }
        }
    }

    log::info!("Server closed the connection");
}
