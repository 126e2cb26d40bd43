//! Music service request pipeline
//!
//! Builds one parameterized GET per query, injects both credentials, and
//! maps the response into [`TrackItem`]s. Requests are throttled to the
//! configured budget; failures are returned to the caller without retry.

use super::response_parser::parse_envelope;
use crate::auth::{AuthError, TokenAuthority};
use crate::utils::retry::{retry_transient, INITIAL_BACKOFF_MS, TOKEN_FETCH_RETRIES};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use memories_common::config::ServiceConfig;
use memories_common::models::TrackItem;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("memories/", env!("CARGO_PKG_VERSION"));

/// Header carrying the per-user token
pub const USER_TOKEN_HEADER: &str = "Music-User-Token";

/// Request pipeline errors
#[derive(Debug, Error)]
pub enum RequestError {
    /// A credential was missing, expired or denied
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network failure (`status` is None) or non-2xx response
    #[error("Transport error (status {status:?}): {message}")]
    Transport { status: Option<u16>, message: String },

    /// 2xx response whose body matched no known envelope
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The query lacks a parameter its source needs
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl RequestError {
    /// Whether the user should be asked to re-authorize
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Transport { status: Some(code), .. } => *code == 401 || *code == 403,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<AuthError> for RequestError {
    fn from(err: AuthError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

/// Enumerated request sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    HeavyRotation,
    RecentlyPlayed,
    TopCharts,
    LibrarySearch,
    LibraryFetchByIds,
    CatalogFetchById,
}

impl Source {
    pub fn name(self) -> &'static str {
        match self {
            Self::HeavyRotation => "heavy-rotation",
            Self::RecentlyPlayed => "recently-played",
            Self::TopCharts => "top-charts",
            Self::LibrarySearch => "library-search",
            Self::LibraryFetchByIds => "library-fetch-by-ids",
            Self::CatalogFetchById => "catalog-fetch-by-id",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One request's parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub source: Source,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
    pub term: Option<String>,
    pub ids: Vec<String>,
    pub genre: Option<String>,
}

impl Query {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            offset: None,
            limit: None,
            term: None,
            ids: Vec::new(),
            genre: None,
        }
    }

    pub fn page(mut self, offset: u32, limit: u32) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    /// Path and query parameters for this request
    pub fn to_request_parts(&self, storefront: &str) -> Result<(String, Vec<(&'static str, String)>), RequestError> {
        let mut params: Vec<(&'static str, String)> = Vec::new();
        if let Some(offset) = self.offset {
            params.push(("offset", offset.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }

        let path = match self.source {
            Source::HeavyRotation => "/v1/me/history/heavy-rotation".to_string(),
            Source::RecentlyPlayed => "/v1/me/recent/played/tracks".to_string(),
            Source::TopCharts => {
                params.push(("types", "songs".to_string()));
                if let Some(genre) = &self.genre {
                    params.push(("genre", genre.clone()));
                }
                format!("/v1/catalog/{}/charts", storefront)
            }
            Source::LibrarySearch => {
                let term = self
                    .term
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| RequestError::InvalidQuery("library search needs a term".to_string()))?;
                params.push(("term", term.to_string()));
                params.push(("types", "library-songs".to_string()));
                "/v1/me/library/search".to_string()
            }
            Source::LibraryFetchByIds => {
                if self.ids.is_empty() {
                    return Err(RequestError::InvalidQuery("library fetch needs ids".to_string()));
                }
                params.push(("ids", self.ids.join(",")));
                "/v1/me/library/songs".to_string()
            }
            Source::CatalogFetchById => {
                let id = self
                    .ids
                    .first()
                    .ok_or_else(|| RequestError::InvalidQuery("catalog fetch needs an id".to_string()))?;
                format!("/v1/catalog/{}/songs/{}", storefront, id)
            }
        };

        Ok((path, params))
    }
}

/// Anything that can answer a [`Query`] with track items
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn execute(&self, query: &Query) -> Result<Vec<TrackItem>, RequestError>;
}

/// Music service API client
pub struct MusicApiClient {
    http_client: reqwest::Client,
    base_url: String,
    storefront: String,
    tokens: Arc<TokenAuthority>,
    rate_limiter: DefaultDirectRateLimiter,
}

impl MusicApiClient {
    pub fn new(config: &ServiceConfig, tokens: Arc<TokenAuthority>) -> Result<Self, RequestError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RequestError::Transport {
                status: None,
                message: e.to_string(),
            })?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            storefront: config.storefront.clone(),
            tokens,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Both credentials; only the service-token fetch is retried
    async fn credentials(&self) -> Result<(String, String), RequestError> {
        let service_token = retry_transient(
            "service token fetch",
            TOKEN_FETCH_RETRIES,
            Duration::from_millis(INITIAL_BACKOFF_MS),
            AuthError::is_transient,
            || self.tokens.service_token(),
        )
        .await?;
        let user_token = self.tokens.user_token(false).await?;
        Ok((service_token, user_token))
    }
}

#[async_trait]
impl TrackSource for MusicApiClient {
    async fn execute(&self, query: &Query) -> Result<Vec<TrackItem>, RequestError> {
        let (path, params) = query.to_request_parts(&self.storefront)?;
        let (service_token, user_token) = self.credentials().await?;

        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(source = %query.source, url = %url, "Querying music service");

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .bearer_auth(&service_token)
            .header(USER_TOKEN_HEADER, &user_token)
            .send()
            .await
            .map_err(|e| RequestError::Transport {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                tracing::warn!(source = %query.source, "Credentials rejected, invalidating cached tokens");
                if let Err(e) = self.tokens.invalidate().await {
                    tracing::warn!(error = %e, "Failed to invalidate tokens");
                }
            }
            return Err(RequestError::Transport {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let body = response.bytes().await.map_err(|e| RequestError::Transport {
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        let items = parse_envelope(&body).ok_or_else(|| {
            RequestError::Malformed(format!("{} response matched no known envelope", query.source))
        })?;

        tracing::info!(source = %query.source, count = items.len(), "Music service query complete");
        Ok(items)
    }
}
