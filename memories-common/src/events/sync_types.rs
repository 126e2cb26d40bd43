//! Sync and credential related event payload types

use serde::{Deserialize, Serialize};

/// Per-memory sync state, from the perspective of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Exists only on this device
    Local,
    /// Update sent, not yet confirmed by the channel
    Propagating,
    /// Both devices are expected to agree
    Synced,
    /// Tombstoned locally, delete message sent
    Deleted,
}

/// Where a store change came from
///
/// Remote-origin changes are never propagated back to the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// Which credential was acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Service,
    User,
}
