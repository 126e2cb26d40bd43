//! Settings database operations
//!
//! Provides get/set accessors for the settings table following the
//! key-value pattern. Cached credentials live here.

use crate::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Key holding the cached service token
pub const SERVICE_TOKEN_KEY: &str = "service_token";

/// Key holding the cached user token
pub const USER_TOKEN_KEY: &str = "user_token";

/// Get cached service token
pub async fn get_service_token(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, SERVICE_TOKEN_KEY).await
}

/// Cache service token
pub async fn set_service_token(db: &Pool<Sqlite>, token: &str) -> Result<()> {
    set_setting(db, SERVICE_TOKEN_KEY, token).await
}

/// Get cached user token
pub async fn get_user_token(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, USER_TOKEN_KEY).await
}

/// Cache user token
pub async fn set_user_token(db: &Pool<Sqlite>, token: &str) -> Result<()> {
    set_setting(db, USER_TOKEN_KEY, token).await
}

/// Drop both cached credentials
pub async fn clear_tokens(db: &Pool<Sqlite>) -> Result<()> {
    delete_setting(db, SERVICE_TOKEN_KEY).await?;
    delete_setting(db, USER_TOKEN_KEY).await
}

/// Generic setting getter
///
/// NULL and missing rows both read as `None`.
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as(
        "SELECT value FROM settings WHERE key = ?"
    )
    .bind(key)
    .fetch_optional(db)
    .await
    .map_err(Error::Database)?;

    match row {
        Some((Some(value),)) => {
            let parsed = value.parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP"
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

/// Remove a setting; absent keys are not an error
pub async fn delete_setting(db: &Pool<Sqlite>, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(db)
        .await
        .map_err(Error::Database)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory_database;

    #[tokio::test]
    async fn test_token_roundtrip_and_clear() {
        let db = init_in_memory_database().await.unwrap();

        assert_eq!(get_service_token(&db).await.unwrap(), None);

        set_service_token(&db, "svc").await.unwrap();
        set_user_token(&db, "usr").await.unwrap();
        assert_eq!(get_service_token(&db).await.unwrap().as_deref(), Some("svc"));
        assert_eq!(get_user_token(&db).await.unwrap().as_deref(), Some("usr"));

        clear_tokens(&db).await.unwrap();
        assert_eq!(get_service_token(&db).await.unwrap(), None);
        assert_eq!(get_user_token(&db).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let db = init_in_memory_database().await.unwrap();
        set_setting(&db, "refresh_count", 1).await.unwrap();
        set_setting(&db, "refresh_count", 2).await.unwrap();
        assert_eq!(get_setting::<u32>(&db, "refresh_count").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_parse_failure_is_config_error() {
        let db = init_in_memory_database().await.unwrap();
        set_setting(&db, "refresh_count", "many").await.unwrap();
        let result = get_setting::<u32>(&db, "refresh_count").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
