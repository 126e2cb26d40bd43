//! Host platform media-permission collaborator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Media library authorization status reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    NotDetermined,
    Denied,
    Restricted,
    Authorized,
}

impl AuthorizationStatus {
    /// Denied and restricted are final until the user changes system settings
    pub fn is_refused(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

/// Platform media-permission system
#[async_trait]
pub trait MediaAuthorization: Send + Sync {
    /// Current status without prompting
    async fn status(&self) -> AuthorizationStatus;

    /// Prompt the user; returns the status after the prompt closes
    async fn request_authorization(&self) -> AuthorizationStatus;

    /// Exchange the service token for a user token
    async fn request_user_token(&self, service_token: &str) -> anyhow::Result<String>;
}
