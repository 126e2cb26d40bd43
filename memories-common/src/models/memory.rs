//! Memory, MemoryItem, Image and per-run update settings

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Namespace for deterministic MemoryItem identifiers
const MEMORY_ITEM_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6d, 0x65, 0x6d, 0x6f, 0x72, 0x79, 0x2d, 0x69, 0x74, 0x65, 0x6d, 0x2d, 0x6e, 0x73, 0x00, 0x01,
]);

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInput(format!(
                "date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Parameters for one aggregation run
///
/// Passed per call; a Memory that wants reproducible refreshes keeps its own
/// copy in [`Memory::update_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Pull from the remote heavy-rotation source
    pub heavy_rotation: bool,
    /// Pull from the remote recently-played source
    pub recently_played: bool,
    /// Play-count threshold chosen by the user
    ///
    /// Stored with the memory and shown by the host. Aggregation does not
    /// filter on it; narrowing uses `AggregationConfig::narrow_min_plays`.
    pub min_play_count: u32,
    /// Upper bound on tracks admitted from one album in a single run
    pub max_adds_per_album: usize,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            heavy_rotation: false,
            recently_played: false,
            min_play_count: 10,
            max_adds_per_album: 3,
        }
    }
}

/// Metadata reference to a library track
///
/// Tracks are matched by title/album/artist rather than by a device-local
/// identifier, so the same reference resolves on either device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub title: String,
    pub album: Option<String>,
    pub artist: Option<String>,
    /// Device-local library identifier, when resolved on this device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
}

impl TrackRef {
    pub fn new(title: impl Into<String>, album: Option<String>, artist: Option<String>) -> Self {
        Self {
            title: title.into(),
            album,
            artist,
            persistent_id: None,
        }
    }

    /// Identity key: normalised title, album and artist
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            normalize(&self.title),
            self.album.as_deref().map(normalize).unwrap_or_default(),
            self.artist.as_deref().map(normalize).unwrap_or_default()
        )
    }

    /// Normalised album and artist, empty when the album is unknown
    ///
    /// Same-titled albums by different artists are different albums.
    pub fn album_key(&self) -> String {
        match self.album.as_deref() {
            Some(album) => format!(
                "{}|{}",
                normalize(album),
                self.artist.as_deref().map(normalize).unwrap_or_default()
            ),
            None => String::new(),
        }
    }

    /// Loose metadata match: titles must agree, album and artist only when
    /// both sides know them
    pub fn matches(&self, other: &TrackRef) -> bool {
        fn agree(a: Option<&str>, b: Option<&str>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => normalize(a) == normalize(b),
                _ => true,
            }
        }
        normalize(&self.title) == normalize(&other.title)
            && agree(self.album.as_deref(), other.album.as_deref())
            && agree(self.artist.as_deref(), other.artist.as_deref())
    }
}

/// Case- and whitespace-insensitive form used for metadata matching
pub(crate) fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// A Memory's reference to one library track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub track: TrackRef,
    /// Play count observed when the item was admitted
    pub play_count: u32,
}

impl MemoryItem {
    /// Wrap a track; the id is derived from the track key so the same track
    /// always yields the same item id.
    pub fn for_track(track: TrackRef, play_count: u32) -> Self {
        Self {
            id: Uuid::new_v5(&MEMORY_ITEM_NAMESPACE, track.key().as_bytes()),
            track,
            play_count,
        }
    }
}

/// Image attached to a Memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    #[serde(serialize_with = "encode_base64", deserialize_with = "decode_base64")]
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
        }
    }
}

fn encode_base64<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn decode_base64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// A named, dated collection of tracks and images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Assigned once at creation; the sync identity key
    pub id: String,
    pub title: String,
    pub description: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Recomputed periodically rather than fixed after creation
    pub is_dynamic: bool,
    pub update_settings: UpdateSettings,
    /// Ordered by relevance
    pub items: Vec<MemoryItem>,
    #[serde(default)]
    pub images: Vec<Image>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Create a new Memory with a freshly assigned identifier
    pub fn new(title: impl Into<String>) -> Self {
        let now = crate::time::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            start_date: None,
            end_date: None,
            is_dynamic: false,
            update_settings: UpdateSettings::default(),
            items: Vec::new(),
            images: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Date range, when both ends are set and ordered
    pub fn date_range(&self) -> Option<DateRange> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => DateRange::new(start, end).ok(),
            _ => None,
        }
    }

    pub fn contains_track(&self, track: &TrackRef) -> bool {
        let key = track.key();
        self.items.iter().any(|item| item.track.key() == key)
    }

    /// Append an item unless the same track is already present
    pub fn add_item(&mut self, item: MemoryItem) -> bool {
        if self.contains_track(&item.track) {
            return false;
        }
        self.items.push(item);
        self.updated_at = crate::time::now();
        true
    }

    /// Append every item whose track is not yet present, returning the count added
    pub fn merge_items(&mut self, items: impl IntoIterator<Item = MemoryItem>) -> usize {
        let mut added = 0;
        for item in items {
            if self.add_item(item) {
                added += 1;
            }
        }
        added
    }

    /// Remove the item for a track, returning whether one was removed
    pub fn remove_track(&mut self, track: &TrackRef) -> bool {
        let key = track.key();
        let before = self.items.len();
        self.items.retain(|item| item.track.key() != key);
        let removed = self.items.len() != before;
        if removed {
            self.updated_at = crate::time::now();
        }
        removed
    }

    /// Copy without image payloads, as sent in update messages
    pub fn snapshot(&self) -> Memory {
        Memory {
            images: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn track(title: &str, album: &str) -> TrackRef {
        TrackRef::new(title, Some(album.to_string()), Some("Artist".to_string()))
    }

    #[test]
    fn test_track_key_ignores_case_and_whitespace() {
        let a = track("Song", "Album");
        let b = TrackRef::new(" song ", Some("ALBUM".to_string()), Some("artist".to_string()));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_matches_tolerates_unknown_fields() {
        let library = track("Song", "Album");
        assert!(library.matches(&TrackRef::new("song", None, Some("ARTIST".to_string()))));
        assert!(!library.matches(&TrackRef::new("Song", Some("Other".to_string()), None)));
        assert!(!library.matches(&TrackRef::new("Other", None, None)));
    }

    #[test]
    fn test_item_id_is_deterministic() {
        let a = MemoryItem::for_track(track("Song", "Album"), 3);
        let b = MemoryItem::for_track(track("SONG", "album"), 9);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, MemoryItem::for_track(track("Other", "Album"), 3).id);
    }

    #[test]
    fn test_add_item_rejects_duplicate_track() {
        let mut memory = Memory::new("Summer");
        assert!(memory.add_item(MemoryItem::for_track(track("Song", "Album"), 1)));
        assert!(!memory.add_item(MemoryItem::for_track(track("song", "Album"), 5)));
        assert_eq!(memory.items.len(), 1);
    }

    #[test]
    fn test_remove_track_matches_by_key() {
        let mut memory = Memory::new("Summer");
        memory.add_item(MemoryItem::for_track(track("Song", "Album"), 1));
        memory.add_item(MemoryItem::for_track(track("Other", "Album"), 2));

        assert!(memory.remove_track(&track("SONG", "album")));
        assert!(!memory.remove_track(&track("Song", "Album")));
        assert_eq!(memory.items.len(), 1);
        assert_eq!(memory.items[0].track.title, "Other");
    }

    #[test]
    fn test_album_key_includes_artist() {
        let x = TrackRef::new("A", Some("Greatest Hits".to_string()), Some("X".to_string()));
        let y = TrackRef::new("B", Some("greatest hits".to_string()), Some("Y".to_string()));
        assert_ne!(x.album_key(), y.album_key());
        assert_eq!(TrackRef::new("C", None, Some("X".to_string())).album_key(), "");
    }

    #[test]
    fn test_merge_items_counts_only_new() {
        let mut memory = Memory::new("Summer");
        memory.add_item(MemoryItem::for_track(track("One", "A"), 1));
        let added = memory.merge_items(vec![
            MemoryItem::for_track(track("One", "A"), 1),
            MemoryItem::for_track(track("Two", "A"), 1),
        ]);
        assert_eq!(added, 1);
        assert_eq!(memory.items.len(), 2);
    }

    #[test]
    fn test_date_range_requires_ordered_ends() {
        let mut memory = Memory::new("Trip");
        memory.start_date = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        memory.end_date = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert!(memory.date_range().is_none());

        memory.end_date = Some(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
        let range = memory.date_range().unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_image_serializes_as_base64() {
        let image = Image::new(vec![1, 2, 3]);
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["data"], "AQID");
        let back: Image = serde_json::from_value(json).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn test_snapshot_drops_images() {
        let mut memory = Memory::new("Trip");
        memory.images.push(Image::new(vec![0; 16]));
        let snapshot = memory.snapshot();
        assert!(snapshot.images.is_empty());
        assert_eq!(snapshot.id, memory.id);
    }
}
