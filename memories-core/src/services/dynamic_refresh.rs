//! Dynamic memory refresh
//!
//! Dynamic Memories are recomputed on an interval and whenever a user token
//! is acquired (a refresh deferred for lack of credentials can then run).
//! Newly admitted tracks are merged into the stored Memory; existing items
//! are never duplicated or removed.

use super::aggregation::AggregationEngine;
use crate::db::MemoryStore;
use crate::utils::KeyedLocks;
use memories_common::events::{ChangeOrigin, EventBus, MemoriesEvent, TokenKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct DynamicRefresher {
    store: Arc<dyn MemoryStore>,
    engine: Arc<AggregationEngine>,
    event_bus: EventBus,
    locks: Arc<KeyedLocks>,
}

impl DynamicRefresher {
    /// `locks` must be the same instance the sync path uses so both
    /// serialize on the memory id
    pub fn new(
        store: Arc<dyn MemoryStore>,
        engine: Arc<AggregationEngine>,
        event_bus: EventBus,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            engine,
            event_bus,
            locks,
        }
    }

    /// Recompute one Memory, returning how many items were added
    ///
    /// Returns `Ok(None)` when the Memory is absent or not dynamic.
    pub async fn refresh_memory(&self, memory_id: &str) -> anyhow::Result<Option<usize>> {
        let _guard = self.locks.lock(memory_id).await;

        let Some(mut memory) = self.store.get(memory_id).await? else {
            debug!(memory_id, "Memory vanished before refresh");
            return Ok(None);
        };
        if !memory.is_dynamic {
            return Ok(None);
        }

        let items = self
            .engine
            .compute(&memory.update_settings, memory.date_range())
            .await;
        let added = memory.merge_items(items);

        if added > 0 {
            self.store.save(&memory).await?;
            self.event_bus.emit_lossy(MemoriesEvent::MemoryChanged {
                memory_id: memory.id.clone(),
                origin: ChangeOrigin::Local,
                timestamp: chrono::Utc::now(),
            });
        }

        self.event_bus.emit_lossy(MemoriesEvent::AggregationCompleted {
            memory_id: memory.id.clone(),
            item_count: added,
            timestamp: chrono::Utc::now(),
        });

        info!(memory_id, added, total = memory.items.len(), "Dynamic memory refreshed");
        Ok(Some(added))
    }

    /// Recompute every dynamic Memory; one failure does not stop the rest
    pub async fn refresh_all(&self) -> anyhow::Result<usize> {
        let memories = self.store.list_dynamic().await?;
        let mut refreshed = 0;
        for memory in memories {
            match self.refresh_memory(&memory.id).await {
                Ok(Some(_)) => refreshed += 1,
                Ok(None) => {}
                Err(e) => warn!(memory_id = %memory.id, error = %e, "Dynamic refresh failed"),
            }
        }
        Ok(refreshed)
    }

    /// Run the scheduler until `shutdown` is cancelled
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = self.event_bus.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            debug!(interval_secs = interval.as_secs(), "Dynamic refresh scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.run_scheduled("interval").await,
                    event = events.recv() => match event {
                        Ok(MemoriesEvent::TokenAcquired { kind: TokenKind::User, .. }) => {
                            self.run_scheduled("token acquired").await
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Refresh scheduler lagged behind event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            debug!("Dynamic refresh scheduler stopped");
        })
    }

    async fn run_scheduled(&self, trigger: &str) {
        match self.refresh_all().await {
            Ok(count) => debug!(trigger, count, "Scheduled refresh complete"),
            Err(e) => warn!(trigger, error = %e, "Scheduled refresh failed"),
        }
    }
}
