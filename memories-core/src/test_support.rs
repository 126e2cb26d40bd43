//! Fakes shared by unit tests

use crate::auth::{AuthorizationStatus, MediaAuthorization};
use crate::services::{Query, RequestError, Source, TrackSource};
use crate::sync::{ChannelError, MessageChannel, SyncMessage};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;
use chrono::{DateTime, Utc};
use memories_common::models::{LibraryTrack, ResourceKind, TrackItem};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Request as seen by a [`TestBackend`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub user_token: Option<String>,
}

#[derive(Clone)]
struct BackendState {
    status: StatusCode,
    body: Arc<String>,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// HTTP server answering every path with a fixed status and body
pub struct TestBackend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestBackend {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Token endpoint URL
    pub fn url(&self) -> String {
        format!("http://{}/token", self.addr)
    }

    pub fn last_request(&self) -> RecordedRequest {
        self.requests.lock().unwrap().last().cloned().expect("no request recorded")
    }
}

async fn respond(State(state): State<BackendState>, uri: Uri, headers: HeaderMap) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        authorization: header("authorization"),
        user_token: header("music-user-token"),
    });
    (state.status, state.body.as_ref().clone())
}

pub async fn spawn_backend(status: u16, body: &str) -> TestBackend {
    let state = BackendState {
        status: StatusCode::from_u16(status).unwrap(),
        body: Arc::new(body.to_string()),
        hits: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let hits = Arc::clone(&state.hits);
    let requests = Arc::clone(&state.requests);

    let app = Router::new().fallback(respond).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestBackend { addr, hits, requests }
}

pub async fn spawn_token_backend(token: &str) -> TestBackend {
    spawn_backend(200, token).await
}

/// Media authorization with a scripted prompt outcome
pub struct ScriptedAuthorization {
    status: Mutex<AuthorizationStatus>,
    after_prompt: AuthorizationStatus,
    token: String,
    failing_exchanges: AtomicUsize,
    pub prompts: AtomicUsize,
    pub exchanges: AtomicUsize,
}

impl ScriptedAuthorization {
    fn with(status: AuthorizationStatus, after_prompt: AuthorizationStatus, token: &str) -> Self {
        Self {
            status: Mutex::new(status),
            after_prompt,
            token: token.to_string(),
            failing_exchanges: AtomicUsize::new(0),
            prompts: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
        }
    }

    pub fn authorized(token: &str) -> Self {
        Self::with(AuthorizationStatus::Authorized, AuthorizationStatus::Authorized, token)
    }

    /// Not determined until prompted; the prompt yields `after_prompt`
    pub fn undetermined(after_prompt: AuthorizationStatus, token: &str) -> Self {
        Self::with(AuthorizationStatus::NotDetermined, after_prompt, token)
    }

    pub fn fixed(status: AuthorizationStatus) -> Self {
        Self::with(status, status, "")
    }

    /// The first `n` exchanges fail
    pub fn failing_exchanges(self, n: usize) -> Self {
        self.failing_exchanges.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl MediaAuthorization for ScriptedAuthorization {
    async fn status(&self) -> AuthorizationStatus {
        *self.status.lock().unwrap()
    }

    async fn request_authorization(&self) -> AuthorizationStatus {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let mut status = self.status.lock().unwrap();
        *status = self.after_prompt;
        *status
    }

    async fn request_user_token(&self, _service_token: &str) -> anyhow::Result<String> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_exchanges.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_exchanges.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("exchange rejected");
        }
        Ok(self.token.clone())
    }
}

/// Track source answering each [`Source`] from a fixed script
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<HashMap<Source, Result<Vec<TrackItem>, u16>>>,
    pub calls: Mutex<Vec<Source>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(self, source: Source, items: Vec<TrackItem>) -> Self {
        self.responses.lock().unwrap().insert(source, Ok(items));
        self
    }

    /// `source` fails with a transport error carrying `status`
    pub fn with_failure(self, source: Source, status: u16) -> Self {
        self.responses.lock().unwrap().insert(source, Err(status));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TrackSource for ScriptedSource {
    async fn execute(&self, query: &Query) -> Result<Vec<TrackItem>, RequestError> {
        self.calls.lock().unwrap().push(query.source);
        let response = self.responses.lock().unwrap().get(&query.source).cloned();
        match response {
            Some(Ok(items)) => Ok(items),
            Some(Err(status)) => Err(RequestError::Transport {
                status: Some(status),
                message: "scripted failure".to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

pub fn song_item(id: &str, title: &str, album: &str, artist: &str) -> TrackItem {
    TrackItem {
        id: id.to_string(),
        kind: ResourceKind::Song,
        name: title.to_string(),
        artist_name: Some(artist.to_string()),
        album_name: Some(album.to_string()),
        artwork: None,
        url: None,
    }
}

pub fn album_item(id: &str, title: &str, artist: &str) -> TrackItem {
    TrackItem {
        id: id.to_string(),
        kind: ResourceKind::Album,
        name: title.to_string(),
        artist_name: Some(artist.to_string()),
        album_name: None,
        artwork: None,
        url: None,
    }
}

/// Library track added (and released) at `added`
pub fn library_track(title: &str, album: &str, play_count: u32, added: DateTime<Utc>) -> LibraryTrack {
    LibraryTrack {
        persistent_id: format!("p-{}-{}", album, title),
        title: title.to_string(),
        album: Some(album.to_string()),
        artist: Some("Artist".to_string()),
        play_count,
        date_added: added,
        release_date: Some(added),
    }
}

/// Message channel that records what was sent
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<SyncMessage>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<SyncMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every send fail with `Closed`
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn enqueue(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        self.record(message)
    }

    async fn send_transient(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        self.record(message)
    }

    async fn transfer(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        self.record(message)
    }
}
