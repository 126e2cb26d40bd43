//! Companion device reconciliation
//!
//! Sends each local change once and applies incoming messages idempotently.
//! Delivery is at-least-once and may be reordered, so every handler tolerates
//! replay:
//! - Update for an id already present is a no-op (first writer sticks)
//! - Delete for an absent id is a no-op
//! - Images may arrive before, after, or without their Memory
//!
//! Work on one memory id is serialized; different ids proceed concurrently.

use super::channel::{ChannelError, MessageChannel};
use super::messages::SyncMessage;
use crate::db::MemoryStore;
use crate::utils::KeyedLocks;
use memories_common::events::{ChangeOrigin, EventBus, MemoriesEvent, SyncState};
use memories_common::Image;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Store(#[from] memories_common::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Undecodable payload: {0}")]
    Decode(serde_json::Error),
}

/// What applying one incoming message did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Update for an unknown id was written to the store
    Materialized,
    /// Update for an id that already exists; local copy kept
    AlreadyPresent,
    /// Update for a tombstoned id
    Tombstoned,
    Deleted,
    /// Delete for an id that was not present
    Absent,
    PlaybackRequested,
    /// Playback request for a Memory not found locally
    PlaybackDropped,
    ImagesAttached(usize),
    /// Images held until their Memory arrives
    ImagesPending,
    /// Images for a tombstoned id
    ImagesDropped,
}

pub struct SyncCoordinator {
    store: Arc<dyn MemoryStore>,
    channel: Arc<dyn MessageChannel>,
    event_bus: EventBus,
    locks: Arc<KeyedLocks>,
    states: Mutex<HashMap<String, SyncState>>,
    pending_images: Mutex<HashMap<String, Vec<Image>>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        channel: Arc<dyn MessageChannel>,
        event_bus: EventBus,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            channel,
            event_bus,
            locks,
            states: Mutex::new(HashMap::new()),
            pending_images: Mutex::new(HashMap::new()),
        }
    }

    /// Sync state of a memory, if this device has tracked it
    pub fn state(&self, memory_id: &str) -> Option<SyncState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(memory_id).copied())
    }

    /// Number of memories with images waiting for their snapshot
    pub fn pending_image_count(&self) -> usize {
        self.pending_images.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn set_state(&self, memory_id: &str, state: SyncState) {
        if let Ok(mut states) = self.states.lock() {
            if states.insert(memory_id.to_string(), state) == Some(state) {
                return;
            }
        }
        self.event_bus.emit_lossy(MemoriesEvent::SyncStateChanged {
            memory_id: memory_id.to_string(),
            state,
            timestamp: chrono::Utc::now(),
        });
    }

    fn is_tombstoned(&self, memory_id: &str) -> bool {
        self.state(memory_id) == Some(SyncState::Deleted)
    }

    fn take_pending_images(&self, memory_id: &str) -> Vec<Image> {
        self.pending_images
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(memory_id))
            .unwrap_or_default()
    }

    fn stash_pending_images(&self, memory_id: &str, images: Vec<Image>) {
        if let Ok(mut pending) = self.pending_images.lock() {
            let entry = pending.entry(memory_id.to_string()).or_default();
            for image in images {
                if !entry.iter().any(|held| held.id == image.id) {
                    entry.push(image);
                }
            }
        }
    }

    // ========================================
    // Outgoing
    // ========================================

    /// Send the current snapshot of a locally created or edited Memory
    ///
    /// Images go as a separate transfer. Sending is fire-once; the channel
    /// stores and forwards.
    pub async fn publish_update(&self, memory_id: &str) -> Result<(), SyncError> {
        let _guard = self.locks.lock(memory_id).await;

        if self.is_tombstoned(memory_id) {
            debug!(memory_id, "Not publishing update for deleted memory");
            return Ok(());
        }
        let Some(memory) = self.store.get(memory_id).await? else {
            debug!(memory_id, "Memory gone before publish");
            return Ok(());
        };

        self.set_state(memory_id, SyncState::Propagating);

        let update = SyncMessage::Update {
            memory: memory.snapshot(),
        };
        if let Err(e) = self.channel.enqueue(&update).await {
            self.set_state(memory_id, SyncState::Local);
            return Err(e.into());
        }

        if !memory.images.is_empty() {
            let images = SyncMessage::Images {
                memory_id: memory.id.clone(),
                images: memory.images,
            };
            // Images are enrichment; the snapshot already went out
            if let Err(e) = self.channel.transfer(&images).await {
                warn!(memory_id, error = %e, "Image transfer failed");
            }
        }

        self.set_state(memory_id, SyncState::Synced);
        info!(memory_id, "Published memory update");
        Ok(())
    }

    /// Tombstone a locally deleted Memory and tell the companion
    pub async fn publish_delete(&self, memory_id: &str) -> Result<(), SyncError> {
        let _guard = self.locks.lock(memory_id).await;

        self.set_state(memory_id, SyncState::Deleted);
        self.take_pending_images(memory_id);

        self.channel
            .enqueue(&SyncMessage::Delete {
                memory_id: memory_id.to_string(),
            })
            .await?;
        info!(memory_id, "Published memory delete");
        Ok(())
    }

    /// Ask the companion to start playing a Memory now
    ///
    /// Transient: fails with [`ChannelError::Unreachable`] rather than queueing.
    pub async fn request_playback(&self, memory_id: &str) -> Result<(), SyncError> {
        self.channel
            .send_transient(&SyncMessage::PlaybackRequest {
                memory_id: memory_id.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Publish every local change the observer may have missed
    ///
    /// Stored memories not yet synced are sent again. Memories this device
    /// tracked but no longer stores are sent as deletes. Returns how many
    /// messages were published.
    pub async fn republish_unsynced(&self) -> Result<usize, SyncError> {
        let stored = self.store.list_ids().await?;
        let stored_set: HashSet<&str> = stored.iter().map(String::as_str).collect();
        let tracked: Vec<(String, SyncState)> = self
            .states
            .lock()
            .map(|states| states.iter().map(|(id, state)| (id.clone(), *state)).collect())
            .unwrap_or_default();

        let mut published = 0;
        for id in &stored {
            if matches!(self.state(id), Some(SyncState::Synced | SyncState::Deleted)) {
                continue;
            }
            match self.publish_update(id).await {
                Ok(()) => published += 1,
                Err(e) => warn!(memory_id = %id, error = %e, "Republish failed"),
            }
        }

        for (id, state) in tracked {
            if state == SyncState::Deleted || stored_set.contains(id.as_str()) {
                continue;
            }
            // Materialized since the id list was read
            if self.store.contains(&id).await? {
                continue;
            }
            match self.publish_delete(&id).await {
                Ok(()) => published += 1,
                Err(e) => warn!(memory_id = %id, error = %e, "Republish of delete failed"),
            }
        }

        info!(published, "Republished local changes after missed events");
        Ok(published)
    }

    // ========================================
    // Incoming
    // ========================================

    /// Decode and apply one payload from the channel
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<ApplyOutcome, SyncError> {
        let message = SyncMessage::from_payload(payload).map_err(SyncError::Decode)?;
        self.handle(message).await
    }

    /// Apply one incoming message
    pub async fn handle(&self, message: SyncMessage) -> Result<ApplyOutcome, SyncError> {
        let memory_id = message.memory_id().to_string();
        let _guard = self.locks.lock(&memory_id).await;

        let outcome = match message {
            SyncMessage::Update { memory } => self.apply_update(memory).await?,
            SyncMessage::Delete { .. } => self.apply_delete(&memory_id).await?,
            SyncMessage::PlaybackRequest { .. } => self.apply_playback_request(&memory_id).await?,
            SyncMessage::Images { images, .. } => self.apply_images(&memory_id, images).await?,
        };

        debug!(memory_id = %memory_id, ?outcome, "Applied sync message");
        Ok(outcome)
    }

    async fn apply_update(&self, mut memory: memories_common::Memory) -> Result<ApplyOutcome, SyncError> {
        if self.is_tombstoned(&memory.id) {
            return Ok(ApplyOutcome::Tombstoned);
        }
        if self.store.contains(&memory.id).await? {
            return Ok(ApplyOutcome::AlreadyPresent);
        }

        let pending = self.take_pending_images(&memory.id);
        for image in pending {
            if !memory.images.iter().any(|held| held.id == image.id) {
                memory.images.push(image);
            }
        }

        if !self.store.insert_if_absent(&memory).await? {
            return Ok(ApplyOutcome::AlreadyPresent);
        }

        self.set_state(&memory.id, SyncState::Synced);
        self.event_bus.emit_lossy(MemoriesEvent::MemoryChanged {
            memory_id: memory.id.clone(),
            origin: ChangeOrigin::Remote,
            timestamp: chrono::Utc::now(),
        });
        Ok(ApplyOutcome::Materialized)
    }

    async fn apply_delete(&self, memory_id: &str) -> Result<ApplyOutcome, SyncError> {
        // Tombstone first so a late or replayed Update cannot resurrect it
        self.set_state(memory_id, SyncState::Deleted);
        self.take_pending_images(memory_id);

        if !self.store.delete(memory_id).await? {
            return Ok(ApplyOutcome::Absent);
        }

        self.event_bus.emit_lossy(MemoriesEvent::MemoryDeleted {
            memory_id: memory_id.to_string(),
            origin: ChangeOrigin::Remote,
            timestamp: chrono::Utc::now(),
        });
        Ok(ApplyOutcome::Deleted)
    }

    async fn apply_playback_request(&self, memory_id: &str) -> Result<ApplyOutcome, SyncError> {
        if !self.store.contains(memory_id).await? {
            debug!(memory_id, "Playback requested for unknown memory, dropped");
            return Ok(ApplyOutcome::PlaybackDropped);
        }
        self.event_bus.emit_lossy(MemoriesEvent::PlaybackRequested {
            memory_id: memory_id.to_string(),
            timestamp: chrono::Utc::now(),
        });
        Ok(ApplyOutcome::PlaybackRequested)
    }

    async fn apply_images(&self, memory_id: &str, images: Vec<Image>) -> Result<ApplyOutcome, SyncError> {
        if self.is_tombstoned(memory_id) {
            return Ok(ApplyOutcome::ImagesDropped);
        }
        if !self.store.contains(memory_id).await? {
            self.stash_pending_images(memory_id, images);
            return Ok(ApplyOutcome::ImagesPending);
        }

        let added = self.store.attach_images(memory_id, &images).await?;
        if added > 0 {
            self.event_bus.emit_lossy(MemoriesEvent::MemoryChanged {
                memory_id: memory_id.to_string(),
                origin: ChangeOrigin::Remote,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(ApplyOutcome::ImagesAttached(added))
    }

    // ========================================
    // Background tasks
    // ========================================

    /// Drain inbound payloads until the sender closes or `shutdown` fires
    ///
    /// Payloads are applied concurrently; the per-id lock keeps messages for
    /// one Memory from interleaving.
    pub fn spawn_listener(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    payload = inbound.recv() => {
                        let Some(payload) = payload else { break };
                        let coordinator = Arc::clone(&self);
                        in_flight.spawn(async move {
                            if let Err(e) = coordinator.handle_payload(&payload).await {
                                warn!(error = %e, "Failed to apply sync message");
                            }
                        });
                    }
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                }
            }
            while in_flight.join_next().await.is_some() {}
            debug!("Sync listener stopped");
        })
    }

    /// Publish locally originated store changes as they happen
    pub fn spawn_observer(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = self.event_bus.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                let result = match event {
                    Ok(MemoriesEvent::MemoryChanged {
                        memory_id,
                        origin: ChangeOrigin::Local,
                        ..
                    }) => self.publish_update(&memory_id).await,
                    Ok(MemoriesEvent::MemoryDeleted {
                        memory_id,
                        origin: ChangeOrigin::Local,
                        ..
                    }) => self.publish_delete(&memory_id).await,
                    Ok(_) => Ok(()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sync observer lagged behind event bus, republishing");
                        self.republish_unsynced().await.map(|_| ())
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Err(e) = result {
                    warn!(error = %e, "Failed to publish local change");
                }
            }
            debug!("Sync observer stopped");
        })
    }
}
