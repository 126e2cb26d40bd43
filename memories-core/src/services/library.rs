//! Local media library seam
//!
//! The on-device library is owned by the host platform. Aggregation reads it
//! through this trait so tests and other hosts can supply their own.

use async_trait::async_trait;
use memories_common::models::{CollectionKind, LibraryCollection, LibraryTrack};
use memories_common::DateRange;

#[async_trait]
pub trait LibraryQuery: Send + Sync {
    /// Tracks whose date-added falls inside `range`
    async fn tracks_added_between(&self, range: DateRange) -> anyhow::Result<Vec<LibraryTrack>>;

    /// Tracks whose release date falls inside `range`
    async fn tracks_released_between(&self, range: DateRange) -> anyhow::Result<Vec<LibraryTrack>>;

    /// All collections of one kind
    async fn collections(&self, kind: CollectionKind) -> anyhow::Result<Vec<LibraryCollection>>;
}

/// In-memory library backed by a fixed track list
///
/// Albums are derived by grouping tracks on album title and artist.
#[derive(Debug, Clone, Default)]
pub struct StaticLibrary {
    tracks: Vec<LibraryTrack>,
}

impl StaticLibrary {
    pub fn new(tracks: Vec<LibraryTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[LibraryTrack] {
        &self.tracks
    }

    fn albums(&self) -> Vec<LibraryCollection> {
        let mut albums: Vec<LibraryCollection> = Vec::new();
        for track in &self.tracks {
            let Some(album) = track.album.as_deref() else {
                continue;
            };
            let existing = albums
                .iter_mut()
                .find(|c| c.title == album && c.artist.as_deref() == track.artist.as_deref());
            match existing {
                Some(collection) => collection.tracks.push(track.clone()),
                None => albums.push(LibraryCollection {
                    persistent_id: format!("album-{}", albums.len()),
                    kind: CollectionKind::Album,
                    title: album.to_string(),
                    artist: track.artist.clone(),
                    tracks: vec![track.clone()],
                }),
            }
        }
        albums
    }
}

#[async_trait]
impl LibraryQuery for StaticLibrary {
    async fn tracks_added_between(&self, range: DateRange) -> anyhow::Result<Vec<LibraryTrack>> {
        Ok(self
            .tracks
            .iter()
            .filter(|t| range.contains(t.date_added))
            .cloned()
            .collect())
    }

    async fn tracks_released_between(&self, range: DateRange) -> anyhow::Result<Vec<LibraryTrack>> {
        Ok(self
            .tracks
            .iter()
            .filter(|t| t.release_date.is_some_and(|d| range.contains(d)))
            .cloned()
            .collect())
    }

    async fn collections(&self, kind: CollectionKind) -> anyhow::Result<Vec<LibraryCollection>> {
        Ok(match kind {
            CollectionKind::Album => self.albums(),
            _ => Vec::new(),
        })
    }
}
