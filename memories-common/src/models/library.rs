//! On-device media library metadata

use super::memory::{normalize, TrackRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Track metadata from the local library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryTrack {
    /// Locally-unique persistent identifier
    pub persistent_id: String,
    pub title: String,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub play_count: u32,
    pub date_added: DateTime<Utc>,
    pub release_date: Option<DateTime<Utc>>,
}

impl LibraryTrack {
    pub fn to_track_ref(&self) -> TrackRef {
        TrackRef {
            title: self.title.clone(),
            album: self.album.clone(),
            artist: self.artist.clone(),
            persistent_id: Some(self.persistent_id.clone()),
        }
    }
}

/// Grouping kind for `fetch_collections`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Album,
    Playlist,
    Artist,
}

/// A group of library tracks (album, playlist, artist)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryCollection {
    pub persistent_id: String,
    pub kind: CollectionKind,
    pub title: String,
    pub artist: Option<String>,
    pub tracks: Vec<LibraryTrack>,
}

impl LibraryCollection {
    /// Match by normalised title, and by artist when both sides know it
    pub fn matches(&self, title: &str, artist: Option<&str>) -> bool {
        if normalize(&self.title) != normalize(title) {
            return false;
        }
        match (self.artist.as_deref(), artist) {
            (Some(mine), Some(theirs)) => normalize(mine) == normalize(theirs),
            _ => true,
        }
    }
}
