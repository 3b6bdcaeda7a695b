//! Data socket module to receive landmark streams via network.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Result};
use bytes::Bytes;
use common::{
    landmarks::{flatten, NUM_HAND_LANDMARKS},
    protocol::{LandmarksMsg, PredictionMsg, ProtoMsg},
};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{
    board::PredictionBoard,
    meter::{Event, METER},
    worker::JobSender,
};

/// Replies buffered per connection before new ones are dropped.
const REPLY_QUEUE_SIZE: usize = 16;

/// Bind the data socket and spawn the task accepting connections.
///
/// Returns the bound address, which differs from `addr` when binding to port 0. Connections
/// register their channel on `board` for as long as they are open.
pub async fn spawn_data_socket(
    jobs_tx: JobSender,
    board: Arc<PredictionBoard>,
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;
    let local_addr = listener.local_addr()?;
    log::info!("Data socket listening on {}", &local_addr);

    let handle = tokio::spawn(async move {
        loop {
            let (socket, _peer_addr) = listener.accept().await?;
            let jobs_tx = jobs_tx.clone();
            let board = board.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_incoming(jobs_tx, board, socket).await {
                    log::warn!("Connection closed: {e}");
                }
            });
        }
    });

    Ok((local_addr, handle))
}

async fn handle_incoming(
    jobs_tx: JobSender,
    board: Arc<PredictionBoard>,
    stream: TcpStream,
) -> Result<()> {
    let addr = stream.peer_addr()?;
    log::info!("{}: New TCP connection", &addr);

    let transport = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, mut frames) = transport.split();

    let channel_name = {
        if let Some(Ok(data)) = frames.next().await {
            if let Ok(ProtoMsg::ConnectReq(channel)) = ProtoMsg::deserialize(&data) {
                channel
            } else {
                bail!("{}: no channel name", &addr);
            }
        } else {
            bail!("{}: no channel name", &addr);
        }
    };
    log::info!("{}: Streaming channel {}", &addr, &channel_name);
    board.open(&channel_name).await;

    let (reply_tx, mut reply_rx) = mpsc::channel::<PredictionMsg>(REPLY_QUEUE_SIZE);
    let writer = tokio::spawn(async move {
        while let Some(prediction) = reply_rx.recv().await {
            let data = ProtoMsg::PredictionMsg(prediction).to_bytes()?;
            sink.send(Bytes::from(data)).await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    while let Some(res) = frames.next().await {
        match res {
            Ok(data) => match ProtoMsg::deserialize(&data) {
                Ok(ProtoMsg::LandmarksMsg(msg)) => {
                    METER.tick(Event::Landmarks);
                    queue_job(&jobs_tx, &channel_name, msg, &reply_tx);
                }
                Ok(other) => log::warn!("{}: Unexpected message {:?}", &addr, other),
                Err(e) => log::warn!("{}: Undecodable message: {e}", &addr),
            },
            Err(e) => {
                log::warn!("Error in TCP codec: {e}");
                break;
            }
        }
    }

    log::info!("{}: TCP stream ended", &addr);
    writer.abort();
    board.close(&channel_name).await;

    Ok(())
}

/// Queue landmarks for classification, dropping them if the worker is behind.
fn queue_job(
    jobs_tx: &JobSender,
    channel_name: &str,
    msg: LandmarksMsg,
    reply_tx: &mpsc::Sender<PredictionMsg>,
) {
    if msg.id != channel_name {
        log::debug!(
            "Landmarks for {} arrived on channel {}",
            &msg.id,
            channel_name
        );
    }

    if msg.points.len() != NUM_HAND_LANDMARKS {
        log::warn!(
            "{}: expected {} landmarks, got {}",
            channel_name,
            NUM_HAND_LANDMARKS,
            msg.points.len()
        );
        METER.tick(Event::Dropped);
        return;
    }

    match jobs_tx.try_send_ref() {
        Ok(mut job) => {
            job.channel.clear();
            job.channel.push_str(channel_name);
            job.seq = msg.seq;
            job.features.clear();
            job.features.extend(flatten(&msg.points));
            job.reply = Some(reply_tx.clone());
        }
        Err(_) => {
            log::debug!("Classifier busy, dropping frame {}", msg.seq);
            METER.tick(Event::Dropped);
        }
    }
}
