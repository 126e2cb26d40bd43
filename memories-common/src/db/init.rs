//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to date.
//! Every statement is idempotent, so opening an existing database is safe.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database at `db_path`
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers alongside the single writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    prepare(&pool).await?;
    Ok(pool)
}

/// Open a private in-memory database
///
/// Limited to one connection: every SQLite in-memory connection is its own
/// database.
pub async fn init_in_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    prepare(&pool).await?;
    Ok(pool)
}

async fn prepare(pool: &SqlitePool) -> Result<()> {
    // Foreign keys are per-connection; the cascade from memories relies on it
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_settings_table(pool).await?;
    create_memories_table(pool).await?;
    create_memory_items_table(pool).await?;
    create_memory_images_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores key-value pairs, including cached credentials.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_memories_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            start_date TEXT,
            end_date TEXT,
            is_dynamic INTEGER NOT NULL DEFAULT 0,
            update_settings TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_dynamic ON memories(is_dynamic)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_memory_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memory_items (
            memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            item_id TEXT NOT NULL,
            track_key TEXT NOT NULL,
            title TEXT NOT NULL,
            album TEXT,
            artist TEXT,
            persistent_id TEXT,
            play_count INTEGER NOT NULL DEFAULT 0,
            position INTEGER NOT NULL,
            PRIMARY KEY (memory_id, track_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_memory_images_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memory_images (
            memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
            image_id TEXT NOT NULL,
            data BLOB NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (memory_id, image_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
