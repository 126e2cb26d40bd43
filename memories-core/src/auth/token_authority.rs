//! Service and user token acquisition, caching and invalidation
//!
//! Tokens are cached in memory and in the durable `settings` table. Each
//! token has its own async mutex held across acquisition, so concurrent first
//! callers wait for the in-flight attempt instead of starting a second fetch
//! or a second authorization prompt.

use super::authorization::{AuthorizationStatus, MediaAuthorization};
use memories_common::db::settings;
use memories_common::events::{EventBus, MemoriesEvent, TokenKind};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Extra passes through the user-token flow after the authorization status
/// moves from not-determined to authorized mid-flow. Some platform prompts
/// re-trigger indefinitely without a cap.
pub const USER_TOKEN_RETRY_LIMIT: u32 = 2;

/// Credential errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// No endpoint configured, or the endpoint answered without a token
    #[error("Service token not configured: {0}")]
    NotConfigured(String),

    /// Endpoint could not be reached; the only transient credential failure
    #[error("Service token endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    #[error("Media library access denied")]
    Denied,

    #[error("User token unavailable: {0}")]
    Unavailable(String),

    #[error("Credential storage error: {0}")]
    Storage(#[from] memories_common::Error),
}

impl AuthError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EndpointUnreachable(_))
    }
}

/// Owner of the service token and the user token
pub struct TokenAuthority {
    db: SqlitePool,
    http_client: reqwest::Client,
    token_endpoint: Option<String>,
    authorization: Arc<dyn MediaAuthorization>,
    event_bus: EventBus,
    service_token: Mutex<Option<String>>,
    user_token: Mutex<Option<String>>,
}

impl TokenAuthority {
    pub fn new(
        db: SqlitePool,
        token_endpoint: Option<String>,
        authorization: Arc<dyn MediaAuthorization>,
        event_bus: EventBus,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            db,
            http_client,
            token_endpoint,
            authorization,
            event_bus,
            service_token: Mutex::new(None),
            user_token: Mutex::new(None),
        })
    }

    /// Service token, fetched from the backend on first use
    ///
    /// **Algorithm:**
    /// 1. Return the in-memory or durable cached token if present
    /// 2. Otherwise GET the configured endpoint once (no retry here)
    /// 3. Cache a non-empty body and publish `TokenAcquired`
    pub async fn service_token(&self) -> Result<String, AuthError> {
        let mut cached = self.service_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        if let Some(token) = settings::get_service_token(&self.db).await? {
            debug!("Service token loaded from durable cache");
            *cached = Some(token.clone());
            return Ok(token);
        }

        let endpoint = self
            .token_endpoint
            .as_deref()
            .ok_or_else(|| AuthError::NotConfigured("no token endpoint configured".to_string()))?;

        debug!(endpoint = %endpoint, "Fetching service token");

        let response = self
            .http_client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| AuthError::EndpointUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::NotConfigured(format!(
                "token endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::EndpointUnreachable(e.to_string()))?;
        let token = body.trim().to_string();
        if token.is_empty() {
            return Err(AuthError::NotConfigured("token endpoint returned no body".to_string()));
        }

        settings::set_service_token(&self.db, &token).await?;
        *cached = Some(token.clone());

        info!("Service token acquired");
        self.publish_acquired(TokenKind::Service);
        Ok(token)
    }

    /// User token, running the authorization flow when nothing is cached
    ///
    /// With `interactive = false` the user is never prompted; an undetermined
    /// authorization status then yields `Unavailable`.
    pub async fn user_token(&self, interactive: bool) -> Result<String, AuthError> {
        let mut cached = self.user_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        if let Some(token) = settings::get_user_token(&self.db).await? {
            debug!("User token loaded from durable cache");
            *cached = Some(token.clone());
            return Ok(token);
        }

        let max_attempts = USER_TOKEN_RETRY_LIMIT + 1;
        let mut prompts = 0u32;
        let mut exchanges = 0u32;

        loop {
            let status = self.authorization.status().await;
            debug!(prompts, exchanges, ?status, "User token flow");

            match status {
                AuthorizationStatus::Authorized => {
                    let service_token = self
                        .service_token()
                        .await
                        .map_err(|e| AuthError::Unavailable(format!("service token: {}", e)))?;

                    exchanges += 1;
                    match self.authorization.request_user_token(&service_token).await {
                        Ok(token) if !token.trim().is_empty() => {
                            let token = token.trim().to_string();
                            settings::set_user_token(&self.db, &token).await?;
                            *cached = Some(token.clone());

                            info!(exchanges, "User token acquired");
                            self.publish_acquired(TokenKind::User);
                            return Ok(token);
                        }
                        Ok(_) => warn!(exchanges, "User token exchange returned an empty token"),
                        Err(e) => warn!(exchanges, error = %e, "User token exchange failed"),
                    }

                    // Only a grant obtained during this flow earns further passes
                    if prompts == 0 || exchanges >= max_attempts {
                        return Err(AuthError::Unavailable(format!(
                            "user token exchange failed after {} attempt(s)",
                            exchanges
                        )));
                    }
                }
                AuthorizationStatus::NotDetermined => {
                    if !interactive {
                        return Err(AuthError::Unavailable(
                            "media library access not yet granted".to_string(),
                        ));
                    }
                    if prompts >= max_attempts {
                        warn!(prompts, "Authorization prompt did not resolve");
                        return Err(AuthError::Unavailable(format!(
                            "authorization undetermined after {} prompts",
                            prompts
                        )));
                    }
                    prompts += 1;
                    if self.authorization.request_authorization().await.is_refused() {
                        return Err(AuthError::Denied);
                    }
                }
                AuthorizationStatus::Denied | AuthorizationStatus::Restricted => {
                    return Err(AuthError::Denied);
                }
            }
        }
    }

    /// Drop both tokens from memory and durable storage
    pub async fn invalidate(&self) -> Result<(), AuthError> {
        // Same order as user_token(), which holds the user lock while fetching
        // the service token
        let mut user = self.user_token.lock().await;
        let mut service = self.service_token.lock().await;
        *service = None;
        *user = None;
        settings::clear_tokens(&self.db).await?;

        info!("Credentials invalidated");
        self.event_bus.emit_lossy(MemoriesEvent::TokensInvalidated {
            timestamp: memories_common::time::now(),
        });
        Ok(())
    }

    fn publish_acquired(&self, kind: TokenKind) {
        self.event_bus.emit_lossy(MemoriesEvent::TokenAcquired {
            kind,
            timestamp: memories_common::time::now(),
        });
    }
}
