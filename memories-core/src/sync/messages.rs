//! Companion sync wire messages
//!
//! Every message is keyed by the Memory identifier. Payloads are JSON with a
//! `kind` tag so either device can decode them without shared state.

use memories_common::{Image, Memory};
use serde::{Deserialize, Serialize};

/// Kind of a sync message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferSetting {
    Update,
    Delete,
    PlaybackRequest,
    Images,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Full snapshot, images excluded
    Update { memory: Memory },
    Delete { memory_id: String },
    /// Transient "start playing this Memory" signal
    PlaybackRequest { memory_id: String },
    /// Image payload sent separately from its snapshot
    Images { memory_id: String, images: Vec<Image> },
}

impl SyncMessage {
    pub fn memory_id(&self) -> &str {
        match self {
            Self::Update { memory } => &memory.id,
            Self::Delete { memory_id }
            | Self::PlaybackRequest { memory_id }
            | Self::Images { memory_id, .. } => memory_id,
        }
    }

    pub fn setting(&self) -> TransferSetting {
        match self {
            Self::Update { .. } => TransferSetting::Update,
            Self::Delete { .. } => TransferSetting::Delete,
            Self::PlaybackRequest { .. } => TransferSetting::PlaybackRequest,
            Self::Images { .. } => TransferSetting::Images,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
