//! memories-core - Memory curation and companion sync
//!
//! Credentials, music service requests, track aggregation and companion
//! device reconciliation. Host platforms supply the media library, the media
//! authorization flow and the message channel; everything else is built here
//! and wired together by [`AppContext`].

pub mod auth;
pub mod config;
pub mod db;
pub mod services;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod test_support;

use auth::{MediaAuthorization, TokenAuthority};
use db::{MemoryStore, SqliteMemoryStore};
use memories_common::config::TomlConfig;
use memories_common::events::EventBus;
use services::{AggregationEngine, DynamicRefresher, LibraryQuery, MusicApiClient};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use sync::{MessageChannel, SyncCoordinator};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use utils::KeyedLocks;

/// Platform-provided collaborators
#[derive(Clone)]
pub struct Collaborators {
    pub library: Arc<dyn LibraryQuery>,
    pub authorization: Arc<dyn MediaAuthorization>,
    pub channel: Arc<dyn MessageChannel>,
}

/// Process-wide context, constructed at start and torn down at exit
#[derive(Clone)]
pub struct AppContext {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub tokens: Arc<TokenAuthority>,
    pub music_api: Arc<MusicApiClient>,
    pub aggregation: Arc<AggregationEngine>,
    pub store: Arc<dyn MemoryStore>,
    pub sync: Arc<SyncCoordinator>,
    pub refresher: Arc<DynamicRefresher>,
    pub config: TomlConfig,
    /// Cancels every background task started by [`start_background`](Self::start_background)
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Open the database under the configured root folder and build the context
    pub async fn initialize(config: TomlConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        let db_path = config.database_path();
        info!("Database: {}", db_path.display());
        let db = memories_common::db::init_database(&db_path).await?;
        Self::with_pool(db, config, collaborators).await
    }

    /// Build the context over an already prepared pool
    pub async fn with_pool(db: SqlitePool, config: TomlConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        let event_bus = EventBus::new(config.sync.event_capacity);

        let token_endpoint = crate::config::resolve_token_endpoint(&db, &config).await?;
        let tokens = Arc::new(TokenAuthority::new(
            db.clone(),
            token_endpoint,
            collaborators.authorization,
            event_bus.clone(),
            Duration::from_secs(config.service.request_timeout_secs),
        )?);

        let music_api = Arc::new(MusicApiClient::new(&config.service, Arc::clone(&tokens))?);
        let aggregation = Arc::new(AggregationEngine::new(
            collaborators.library,
            music_api.clone(),
            config.aggregation.clone(),
            event_bus.clone(),
        ));

        let store: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::new(db.clone()));
        let locks = Arc::new(KeyedLocks::new());
        let sync = Arc::new(SyncCoordinator::new(
            Arc::clone(&store),
            collaborators.channel,
            event_bus.clone(),
            Arc::clone(&locks),
        ));
        let refresher = Arc::new(DynamicRefresher::new(
            Arc::clone(&store),
            Arc::clone(&aggregation),
            event_bus.clone(),
            locks,
        ));

        info!("Memories core initialized");

        Ok(Self {
            db,
            event_bus,
            tokens,
            music_api,
            aggregation,
            store,
            sync,
            refresher,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Start the sync observer, the inbound listener and (when enabled) the
    /// dynamic refresh scheduler
    pub fn start_background(&self, inbound: mpsc::Receiver<Vec<u8>>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            Arc::clone(&self.sync).spawn_observer(self.shutdown.clone()),
            Arc::clone(&self.sync).spawn_listener(inbound, self.shutdown.clone()),
        ];

        if self.config.scheduler.enabled {
            let interval = Duration::from_secs(self.config.scheduler.refresh_interval_secs.max(1));
            handles.push(Arc::clone(&self.refresher).spawn(interval, self.shutdown.clone()));
        }

        info!(tasks = handles.len(), "Background tasks started");
        handles
    }

    /// Stop background tasks
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
