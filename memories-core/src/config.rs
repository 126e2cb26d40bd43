//! Configuration resolution for memories-core
//!
//! Provides multi-tier resolution of the service token endpoint with
//! Database → ENV → TOML priority.

use memories_common::config::{write_toml_config, TomlConfig};
use memories_common::db::settings;
use memories_common::Result;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable naming the service token endpoint
pub const TOKEN_ENDPOINT_ENV: &str = "MEMORIES_TOKEN_ENDPOINT";

/// Settings key for the service token endpoint
pub const TOKEN_ENDPOINT_KEY: &str = "token_endpoint";

/// Resolve the service token endpoint from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
///
/// `Ok(None)` when no tier has a usable value; token acquisition then
/// reports the service token as not configured.
pub async fn resolve_token_endpoint(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Option<String>> {
    let db_value = settings::get_setting::<String>(db, TOKEN_ENDPOINT_KEY)
        .await?
        .filter(|v| is_valid_endpoint(v));
    let env_value = std::env::var(TOKEN_ENDPOINT_ENV)
        .ok()
        .filter(|v| is_valid_endpoint(v));
    let toml_value = toml_config
        .service
        .token_endpoint
        .clone()
        .filter(|v| is_valid_endpoint(v));

    let sources: Vec<&str> = [
        ("database", db_value.is_some()),
        ("environment", env_value.is_some()),
        ("TOML", toml_value.is_some()),
    ]
    .iter()
    .filter(|(_, present)| *present)
    .map(|(name, _)| *name)
    .collect();

    if sources.len() > 1 {
        warn!(
            "Token endpoint found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    let resolved = db_value.or(env_value).or(toml_value);
    match (&resolved, sources.first()) {
        (Some(endpoint), Some(source)) => info!(source, endpoint = %endpoint, "Token endpoint resolved"),
        _ => warn!("Token endpoint not configured; service token requests will fail"),
    }
    Ok(resolved)
}

/// Non-empty http(s) URL
pub fn is_valid_endpoint(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("https://") || value.starts_with("http://")
}

/// Store the endpoint in the database and write it back to the TOML file
pub async fn persist_token_endpoint(
    db: &Pool<Sqlite>,
    endpoint: &str,
    toml_config: &TomlConfig,
    toml_path: &Path,
) -> Result<()> {
    settings::set_setting(db, TOKEN_ENDPOINT_KEY, endpoint).await?;

    let mut config = toml_config.clone();
    config.service.token_endpoint = Some(endpoint.to_string());
    if let Err(e) = write_toml_config(&config, toml_path) {
        // Database copy is authoritative
        warn!(error = %e, path = %toml_path.display(), "TOML write-back failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memories_common::db::init_in_memory_database;
    use serial_test::serial;

    fn toml_with(endpoint: Option<&str>) -> TomlConfig {
        let mut config = TomlConfig::default();
        config.service.token_endpoint = endpoint.map(str::to_string);
        config
    }

    #[tokio::test]
    #[serial]
    async fn test_database_wins() {
        let db = init_in_memory_database().await.unwrap();
        settings::set_setting(&db, TOKEN_ENDPOINT_KEY, "https://db.example/token").await.unwrap();
        std::env::set_var(TOKEN_ENDPOINT_ENV, "https://env.example/token");

        let resolved = resolve_token_endpoint(&db, &toml_with(Some("https://toml.example/token")))
            .await
            .unwrap();
        std::env::remove_var(TOKEN_ENDPOINT_ENV);

        assert_eq!(resolved.as_deref(), Some("https://db.example/token"));
    }

    #[tokio::test]
    #[serial]
    async fn test_env_before_toml() {
        let db = init_in_memory_database().await.unwrap();
        std::env::set_var(TOKEN_ENDPOINT_ENV, "https://env.example/token");

        let resolved = resolve_token_endpoint(&db, &toml_with(Some("https://toml.example/token")))
            .await
            .unwrap();
        std::env::remove_var(TOKEN_ENDPOINT_ENV);

        assert_eq!(resolved.as_deref(), Some("https://env.example/token"));
    }

    #[tokio::test]
    #[serial]
    async fn test_invalid_values_skipped() {
        let db = init_in_memory_database().await.unwrap();
        std::env::set_var(TOKEN_ENDPOINT_ENV, "   ");

        let resolved = resolve_token_endpoint(&db, &toml_with(Some("https://toml.example/token")))
            .await
            .unwrap();
        std::env::remove_var(TOKEN_ENDPOINT_ENV);
        assert_eq!(resolved.as_deref(), Some("https://toml.example/token"));

        let none = resolve_token_endpoint(&db, &toml_with(Some("not a url"))).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_persist_writes_both_tiers() {
        let db = init_in_memory_database().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        persist_token_endpoint(&db, "https://saved.example/token", &TomlConfig::default(), &path)
            .await
            .unwrap();

        let written = TomlConfig::from_file(&path).unwrap();
        assert_eq!(written.service.token_endpoint.as_deref(), Some("https://saved.example/token"));
        let resolved = resolve_token_endpoint(&db, &TomlConfig::default()).await.unwrap();
        assert_eq!(resolved.as_deref(), Some("https://saved.example/token"));
    }
}
