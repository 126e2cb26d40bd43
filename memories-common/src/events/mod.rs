//! Event types for the Memories event system
//!
//! Provides shared event definitions and the EventBus used to decouple the
//! credential, aggregation and sync components from each other and from the
//! presentation layer.

mod sync_types;

pub use sync_types::{ChangeOrigin, SyncState, TokenKind};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Memories event types
///
/// Events are broadcast via EventBus and serialize as tagged JSON so the
/// presentation layer can consume them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MemoriesEvent {
    /// A credential was acquired (fetched or exchanged, not served from cache)
    ///
    /// Triggers:
    /// - Dynamic refresh: run any recomputation deferred for lack of tokens
    TokenAcquired {
        kind: TokenKind,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Cached credentials were dropped (logout or failure)
    TokensInvalidated {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A Memory was created or updated in the local store
    ///
    /// Triggers:
    /// - Sync: propagate to the companion when origin is Local
    /// - UI: refresh the memory
    MemoryChanged {
        memory_id: String,
        origin: ChangeOrigin,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A Memory was deleted from the local store
    MemoryDeleted {
        memory_id: String,
        origin: ChangeOrigin,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The companion asked this device to start playing a Memory
    PlaybackRequested {
        memory_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sync state of a Memory changed
    SyncStateChanged {
        memory_id: String,
        state: SyncState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An aggregation run finished for a Memory
    AggregationCompleted {
        memory_id: String,
        item_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A best-effort candidate source failed; the run continued without it
    SourceFailed {
        source: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl MemoriesEvent {
    /// Memory the event refers to, if any
    pub fn memory_id(&self) -> Option<&str> {
        match self {
            Self::MemoryChanged { memory_id, .. }
            | Self::MemoryDeleted { memory_id, .. }
            | Self::PlaybackRequested { memory_id, .. }
            | Self::SyncStateChanged { memory_id, .. }
            | Self::AggregationCompleted { memory_id, .. } => Some(memory_id),
            Self::TokenAcquired { .. } | Self::TokensInvalidated { .. } | Self::SourceFailed { .. } => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use memories_common::events::{EventBus, MemoriesEvent, TokenKind};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(MemoriesEvent::TokenAcquired {
///     kind: TokenKind::Service,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(MemoriesEvent::TokenAcquired { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MemoriesEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MemoriesEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MemoriesEvent,
    ) -> Result<usize, broadcast::error::SendError<MemoriesEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MemoriesEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
