//! Memory persistence
//!
//! The LocalStore contract the sync and refresh paths rely on, and its SQLite
//! implementation. Items and images live in child tables keyed by memory id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memories_common::{Error, Image, Memory, MemoryItem, Result, TrackRef, UpdateSettings};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Durable CRUD keyed by Memory identifier
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Existence check without loading items or images
    async fn contains(&self, id: &str) -> Result<bool>;

    async fn get(&self, id: &str) -> Result<Option<Memory>>;

    /// Insert unless a Memory with the same id exists; returns whether it was inserted
    async fn insert_if_absent(&self, memory: &Memory) -> Result<bool>;

    /// Insert or replace the Memory row and its items; images are only added
    async fn save(&self, memory: &Memory) -> Result<()>;

    /// Delete with cascade; returns whether a Memory existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Attach images not yet present; returns how many were added.
    ///
    /// Fails with [`Error::NotFound`] when the Memory does not exist.
    async fn attach_images(&self, id: &str, images: &[Image]) -> Result<usize>;

    /// All Memories flagged dynamic
    async fn list_dynamic(&self) -> Result<Vec<Memory>>;

    /// Ids of every stored Memory, oldest first
    async fn list_ids(&self) -> Result<Vec<String>>;
}

/// [`MemoryStore`] over the shared SQLite pool
#[derive(Clone)]
pub struct SqliteMemoryStore {
    db: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn contains(&self, id: &str) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM memories WHERE id = ?)")
            .bind(id)
            .fetch_one(&self.db)
            .await?;
        Ok(exists != 0)
    }

    async fn get(&self, id: &str) -> Result<Option<Memory>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, start_date, end_date, is_dynamic,
                   update_settings, created_at, updated_at
            FROM memories
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn insert_if_absent(&self, memory: &Memory) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO memories (
                id, title, description, start_date, end_date, is_dynamic,
                update_settings, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&memory.id)
        .bind(&memory.title)
        .bind(&memory.description)
        .bind(memory.start_date)
        .bind(memory.end_date)
        .bind(memory.is_dynamic)
        .bind(serde_json::to_string(&memory.update_settings)?)
        .bind(memory.created_at)
        .bind(memory.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            debug!(memory_id = %memory.id, "Memory already present, insert skipped");
            return Ok(false);
        }

        write_items(&mut tx, &memory.id, &memory.items).await?;
        write_images(&mut tx, &memory.id, &memory.images).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn save(&self, memory: &Memory) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO memories (
                id, title, description, start_date, end_date, is_dynamic,
                update_settings, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                is_dynamic = excluded.is_dynamic,
                update_settings = excluded.update_settings,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&memory.id)
        .bind(&memory.title)
        .bind(&memory.description)
        .bind(memory.start_date)
        .bind(memory.end_date)
        .bind(memory.is_dynamic)
        .bind(serde_json::to_string(&memory.update_settings)?)
        .bind(memory.created_at)
        .bind(memory.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM memory_items WHERE memory_id = ?")
            .bind(&memory.id)
            .execute(&mut *tx)
            .await?;
        write_items(&mut tx, &memory.id, &memory.items).await?;
        write_images(&mut tx, &memory.id, &memory.images).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        for table in ["memory_items", "memory_images"] {
            sqlx::query(&format!("DELETE FROM {} WHERE memory_id = ?", table))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        let deleted = sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn attach_images(&self, id: &str, images: &[Image]) -> Result<usize> {
        let mut tx = self.db.begin().await?;

        let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM memories WHERE id = ?)")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            tx.rollback().await?;
            return Err(Error::NotFound(format!("memory {}", id)));
        }

        let added = write_images(&mut tx, id, images).await?;
        tx.commit().await?;
        Ok(added)
    }

    async fn list_dynamic(&self) -> Result<Vec<Memory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, start_date, end_date, is_dynamic,
                   update_settings, created_at, updated_at
            FROM memories
            WHERE is_dynamic = 1
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut memories = Vec::with_capacity(rows.len());
        for row in &rows {
            memories.push(self.hydrate(row).await?);
        }
        Ok(memories)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM memories ORDER BY created_at, id")
            .fetch_all(&self.db)
            .await?;
        Ok(ids)
    }
}

impl SqliteMemoryStore {
    /// Build a Memory from its row plus child tables
    async fn hydrate(&self, row: &SqliteRow) -> Result<Memory> {
        let id: String = row.try_get("id")?;
        let settings_json: String = row.try_get("update_settings")?;
        let update_settings: UpdateSettings = serde_json::from_str(&settings_json)?;

        Ok(Memory {
            items: self.load_items(&id).await?,
            images: self.load_images(&id).await?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            start_date: row.try_get::<Option<DateTime<Utc>>, _>("start_date")?,
            end_date: row.try_get::<Option<DateTime<Utc>>, _>("end_date")?,
            is_dynamic: row.try_get("is_dynamic")?,
            update_settings,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            id,
        })
    }

    async fn load_items(&self, memory_id: &str) -> Result<Vec<MemoryItem>> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, title, album, artist, persistent_id, play_count
            FROM memory_items
            WHERE memory_id = ?
            ORDER BY position
            "#,
        )
        .bind(memory_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let item_id: String = row.try_get("item_id")?;
                let play_count: i64 = row.try_get("play_count")?;
                Ok(MemoryItem {
                    id: parse_uuid(&item_id)?,
                    track: TrackRef {
                        title: row.try_get("title")?,
                        album: row.try_get("album")?,
                        artist: row.try_get("artist")?,
                        persistent_id: row.try_get("persistent_id")?,
                    },
                    play_count: u32::try_from(play_count).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn load_images(&self, memory_id: &str) -> Result<Vec<Image>> {
        let rows = sqlx::query(
            "SELECT image_id, data FROM memory_images WHERE memory_id = ? ORDER BY position",
        )
        .bind(memory_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let image_id: String = row.try_get("image_id")?;
                Ok(Image {
                    id: parse_uuid(&image_id)?,
                    data: row.try_get("data")?,
                })
            })
            .collect()
    }
}

async fn write_items(tx: &mut Transaction<'_, Sqlite>, memory_id: &str, items: &[MemoryItem]) -> Result<()> {
    for (position, item) in items.iter().enumerate() {
        // Duplicate tracks never reach the table
        sqlx::query(
            r#"
            INSERT INTO memory_items (
                memory_id, item_id, track_key, title, album, artist,
                persistent_id, play_count, position
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(memory_id, track_key) DO NOTHING
            "#,
        )
        .bind(memory_id)
        .bind(item.id.to_string())
        .bind(item.track.key())
        .bind(&item.track.title)
        .bind(&item.track.album)
        .bind(&item.track.artist)
        .bind(&item.track.persistent_id)
        .bind(i64::from(item.play_count))
        .bind(position as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn write_images(tx: &mut Transaction<'_, Sqlite>, memory_id: &str, images: &[Image]) -> Result<usize> {
    let mut added = 0;
    for image in images {
        let result = sqlx::query(
            r#"
            INSERT INTO memory_images (memory_id, image_id, data, position)
            VALUES (?, ?, ?, (SELECT COUNT(*) FROM memory_images WHERE memory_id = ?))
            ON CONFLICT(memory_id, image_id) DO NOTHING
            "#,
        )
        .bind(memory_id)
        .bind(image.id.to_string())
        .bind(&image.data)
        .bind(memory_id)
        .execute(&mut **tx)
        .await?;
        added += result.rows_affected() as usize;
    }
    Ok(added)
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::InvalidInput(format!("stored uuid {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memories_common::db::init_in_memory_database;

    async fn store() -> SqliteMemoryStore {
        SqliteMemoryStore::new(init_in_memory_database().await.unwrap())
    }

    fn memory_with_items(title: &str) -> Memory {
        let mut memory = Memory::new(title);
        memory.description = "Road trip".to_string();
        memory.start_date = Some(Utc::now() - chrono::Duration::days(10));
        memory.end_date = Some(Utc::now());
        memory.add_item(MemoryItem::for_track(
            TrackRef::new("Song", Some("Album".to_string()), Some("Artist".to_string())),
            12,
        ));
        memory.add_item(MemoryItem::for_track(TrackRef::new("Other", None, None), 3));
        memory
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let store = store().await;
        let mut memory = memory_with_items("Summer");
        memory.images.push(Image::new(vec![9, 8, 7]));

        assert!(store.insert_if_absent(&memory).await.unwrap());
        assert!(store.contains(&memory.id).await.unwrap());

        let loaded = store.get(&memory.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Summer");
        assert_eq!(loaded.items, memory.items);
        assert_eq!(loaded.images, memory.images);
        assert_eq!(loaded.update_settings, memory.update_settings);
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first_writer() {
        let store = store().await;
        let first = memory_with_items("First");
        let mut second = first.clone();
        second.title = "Second".to_string();
        second.items.clear();

        assert!(store.insert_if_absent(&first).await.unwrap());
        assert!(!store.insert_if_absent(&second).await.unwrap());

        let loaded = store.get(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "First");
        assert_eq!(loaded.items.len(), 2);
    }

    #[tokio::test]
    async fn test_save_replaces_items() {
        let store = store().await;
        let mut memory = memory_with_items("Summer");
        store.save(&memory).await.unwrap();

        memory.items.truncate(1);
        memory.title = "Summer '24".to_string();
        store.save(&memory).await.unwrap();

        let loaded = store.get(&memory.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Summer '24");
        assert_eq!(loaded.items.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = store().await;
        let memory = memory_with_items("Gone");
        store.save(&memory).await.unwrap();

        assert!(store.delete(&memory.id).await.unwrap());
        assert!(!store.delete(&memory.id).await.unwrap());
        assert!(!store.contains(&memory.id).await.unwrap());
        assert!(store.get(&memory.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attach_images_is_idempotent() {
        let store = store().await;
        let memory = memory_with_items("Photos");
        store.save(&memory).await.unwrap();
        let images = vec![Image::new(vec![1]), Image::new(vec![2])];

        assert_eq!(store.attach_images(&memory.id, &images).await.unwrap(), 2);
        assert_eq!(store.attach_images(&memory.id, &images).await.unwrap(), 0);

        let loaded = store.get(&memory.id).await.unwrap().unwrap();
        assert_eq!(loaded.images, images);
    }

    #[tokio::test]
    async fn test_attach_images_to_missing_memory() {
        let store = store().await;
        let result = store.attach_images("missing", &[Image::new(vec![1])]).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_dynamic() {
        let store = store().await;
        let mut dynamic = Memory::new("Heavy rotation");
        dynamic.is_dynamic = true;
        store.save(&dynamic).await.unwrap();
        store.save(&Memory::new("Fixed")).await.unwrap();

        let listed = store.list_dynamic().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, dynamic.id);
    }

    #[tokio::test]
    async fn test_list_ids_tracks_deletes() {
        let store = store().await;
        let kept = Memory::new("Kept");
        let removed = Memory::new("Removed");
        store.save(&kept).await.unwrap();
        store.save(&removed).await.unwrap();
        store.delete(&removed.id).await.unwrap();

        assert_eq!(store.list_ids().await.unwrap(), vec![kept.id]);
    }
}
