//! Latest prediction per connected channel.
//!
//! Channels are registered while at least one data socket connection streams under their name.
//! Once the last connection of a channel ends, its entry is removed, so the board only holds
//! channels that are live.
use std::collections::HashMap;

use common::protocol::PredictionMsg;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Channel {
    connections: usize,
    latest: Option<PredictionMsg>,
}

#[derive(Default)]
pub struct PredictionBoard {
    map: Mutex<HashMap<String, Channel>>,
}

impl PredictionBoard {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection streaming under `name`.
    pub async fn open(&self, name: &str) {
        let mut map = self.map.lock().await;
        map.entry(name.to_owned()).or_default().connections += 1;
    }

    /// Unregister a connection of `name`, dropping the channel with its last connection.
    pub async fn close(&self, name: &str) {
        let mut map = self.map.lock().await;
        if let Some(channel) = map.get_mut(name) {
            channel.connections = channel.connections.saturating_sub(1);
            if channel.connections == 0 {
                map.remove(name);
            }
        }
    }

    /// Store `prediction` as the latest of its channel. Ignored if the channel is not open.
    pub async fn publish(&self, prediction: PredictionMsg) {
        let mut map = self.map.lock().await;
        match map.get_mut(&prediction.id) {
            Some(channel) => channel.latest = Some(prediction),
            None => log::debug!("Prediction for closed channel {} discarded", &prediction.id),
        }
    }

    pub async fn latest(&self, name: &str) -> Option<PredictionMsg> {
        let map = self.map.lock().await;
        map.get(name).and_then(|channel| channel.latest.clone())
    }

    /// Names of all open channels, sorted.
    pub async fn channels(&self) -> Vec<String> {
        let map = self.map.lock().await;
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }
}
