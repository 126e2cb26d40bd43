//! Uniform item representation of remote music service resources

use serde::{Deserialize, Serialize};

/// Resource kind reported in the `type` field of a response element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Song,
    LibrarySong,
    Album,
    LibraryAlbum,
    Playlist,
    LibraryPlaylist,
    Station,
    Other(String),
}

impl ResourceKind {
    /// Map the wire `type` string
    pub fn from_type(value: &str) -> Self {
        match value {
            "songs" => Self::Song,
            "library-songs" => Self::LibrarySong,
            "albums" => Self::Album,
            "library-albums" => Self::LibraryAlbum,
            "playlists" => Self::Playlist,
            "library-playlists" => Self::LibraryPlaylist,
            "stations" => Self::Station,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_track(&self) -> bool {
        matches!(self, Self::Song | Self::LibrarySong)
    }

    pub fn is_album(&self) -> bool {
        matches!(self, Self::Album | Self::LibraryAlbum)
    }

    /// Track and album kinds must carry an artist name
    pub fn requires_artist(&self) -> bool {
        self.is_track() || self.is_album()
    }
}

/// Artwork template as returned by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    /// URL containing `{w}`, `{h}` and optionally `{f}` placeholders
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Artwork {
    /// Substitute the size and format placeholders
    pub fn url_for(&self, width: u32, height: u32, format: &str) -> String {
        self.url
            .replace("{w}", &width.to_string())
            .replace("{h}", &height.to_string())
            .replace("{f}", format)
    }

    /// URL at the artwork's native size (falls back to 600x600 jpg)
    pub fn full_size_url(&self) -> String {
        self.url_for(
            self.width.unwrap_or(600),
            self.height.unwrap_or(600),
            "jpg",
        )
    }
}

/// One parsed resource from the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackItem {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub artwork: Option<Artwork>,
    /// Playable URL (songs only)
    pub url: Option<String>,
}
