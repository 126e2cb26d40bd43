//! Test helpers shared by memories-core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memories_common::config::TomlConfig;
use memories_common::db::init_in_memory_database;
use memories_common::models::{LibraryTrack, TrackItem};
use memories_core::auth::{AuthorizationStatus, MediaAuthorization};
use memories_core::services::{LibraryQuery, Query, RequestError, Source, StaticLibrary, TrackSource};
use memories_core::sync::MessageChannel;
use memories_core::{AppContext, Collaborators};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Authorization that is always granted and exchanges to a fixed token
pub struct GrantedAuthorization;

#[async_trait]
impl MediaAuthorization for GrantedAuthorization {
    async fn status(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    async fn request_authorization(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    async fn request_user_token(&self, _service_token: &str) -> anyhow::Result<String> {
        Ok("user-token".to_string())
    }
}

/// Remote source answering from a fixed map
#[derive(Default)]
pub struct FixedSource {
    pub items: HashMap<Source, Vec<TrackItem>>,
}

#[async_trait]
impl TrackSource for FixedSource {
    async fn execute(&self, query: &Query) -> Result<Vec<TrackItem>, RequestError> {
        Ok(self.items.get(&query.source).cloned().unwrap_or_default())
    }
}

pub fn track(title: &str, album: &str, play_count: u32, added: DateTime<Utc>) -> LibraryTrack {
    LibraryTrack {
        persistent_id: format!("{}/{}", album, title),
        title: title.to_string(),
        album: Some(album.to_string()),
        artist: Some("Artist".to_string()),
        play_count,
        date_added: added,
        release_date: None,
    }
}

/// Context over a private in-memory database with the scheduler off
pub async fn device(channel: Arc<dyn MessageChannel>, library: StaticLibrary) -> AppContext {
    let mut config = TomlConfig::default();
    config.scheduler.enabled = false;
    let library: Arc<dyn LibraryQuery> = Arc::new(library);
    let collaborators = Collaborators {
        library,
        authorization: Arc::new(GrantedAuthorization),
        channel,
    };
    let db = init_in_memory_database().await.unwrap();
    AppContext::with_pool(db, config, collaborators).await.unwrap()
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
