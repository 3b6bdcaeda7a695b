//! Protocol definition for the data socket.
//!
//! Every message is a `bincode`-serialized [`ProtoMsg`] inside a length-delimited frame. A client
//! opens with [`ProtoMsg::ConnectReq`] carrying its channel name, then streams
//! [`LandmarksMsg`]s. The server answers each classified message with a [`PredictionMsg`].
use serde::{Deserialize, Serialize};

/// Definition of protocol messages.
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub enum ProtoMsg {
    ConnectReq(String),
    LandmarksMsg(LandmarksMsg),
    PredictionMsg(PredictionMsg),
}

/// Normalized landmarks of one frame.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LandmarksMsg {
    pub id: String,
    pub seq: u64,
    pub points: Vec<[f32; 2]>,
}

impl LandmarksMsg {
    pub fn new(id: String, seq: u64, points: Vec<[f32; 2]>) -> Self {
        Self { id, seq, points }
    }
}

/// Classification result for the frame with sequence number `seq`.
///
/// `label` is `None` when the classifier's confidence stayed below the server threshold.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PredictionMsg {
    pub id: String,
    pub seq: u64,
    pub label: Option<String>,
    pub confidence: f32,
}

impl ProtoMsg {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }
}
