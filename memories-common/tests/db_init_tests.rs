//! Database initialization against a real file

use memories_common::db::{init_database, settings};
use tempfile::TempDir;

#[tokio::test]
async fn test_init_creates_file_and_parent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("data").join("memories.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    settings::set_setting(&pool, "probe", 7).await.unwrap();
    assert_eq!(settings::get_setting::<i64>(&pool, "probe").await.unwrap(), Some(7));
}

#[tokio::test]
async fn test_reopen_keeps_cached_tokens() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("memories.db");

    {
        let pool = init_database(&db_path).await.unwrap();
        settings::set_service_token(&pool, "svc").await.unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    assert_eq!(settings::get_service_token(&pool).await.unwrap().as_deref(), Some("svc"));
}

#[tokio::test]
async fn test_foreign_keys_enforced() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("memories.db")).await.unwrap();

    let orphan = sqlx::query(
        "INSERT INTO memory_items (memory_id, item_id, track_key, title, position) VALUES ('nope', 'i', 'k', 't', 0)",
    )
    .execute(&pool)
    .await;
    assert!(orphan.is_err());
}
