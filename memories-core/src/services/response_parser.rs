//! Music service response envelopes
//!
//! The service nests library-search results under `results.songs.data`
//! while every other source returns a flat `data` array. Decoding tries the
//! candidate envelope shapes in order and only reports `Malformed` when none
//! of them match.

use memories_common::models::{Artwork, ResourceKind, TrackItem};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct NestedEnvelope {
    results: NestedResults,
}

#[derive(Debug, Deserialize)]
struct NestedResults {
    /// Absent when a search matched nothing
    #[serde(default, alias = "library-songs")]
    songs: Option<ResourcePage>,
}

#[derive(Debug, Deserialize)]
struct ResourcePage {
    data: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct FlatEnvelope {
    data: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    attributes: Option<RawAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttributes {
    name: Option<String>,
    artist_name: Option<String>,
    album_name: Option<String>,
    artwork: Option<RawArtwork>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawArtwork {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

type Decoder = fn(&[u8]) -> Option<Vec<RawResource>>;

/// Candidate envelope shapes, in the order they are tried
const DECODERS: [(&str, Decoder); 2] = [("nested", decode_nested), ("flat", decode_flat)];

fn decode_nested(body: &[u8]) -> Option<Vec<RawResource>> {
    let envelope: NestedEnvelope = serde_json::from_slice(body).ok()?;
    Some(envelope.results.songs.map(|page| page.data).unwrap_or_default())
}

fn decode_flat(body: &[u8]) -> Option<Vec<RawResource>> {
    let envelope: FlatEnvelope = serde_json::from_slice(body).ok()?;
    Some(envelope.data)
}

/// Parse a response body into track items
///
/// Returns `None` when the body matches no known envelope. Elements missing
/// a field their kind requires are skipped.
pub fn parse_envelope(body: &[u8]) -> Option<Vec<TrackItem>> {
    for (shape, decode) in DECODERS {
        if let Some(resources) = decode(body) {
            debug!(shape, count = resources.len(), "Decoded response envelope");
            return Some(resources.into_iter().filter_map(into_track_item).collect());
        }
    }
    None
}

fn into_track_item(raw: RawResource) -> Option<TrackItem> {
    let kind = ResourceKind::from_type(&raw.kind);

    let Some(attributes) = raw.attributes else {
        debug!(id = %raw.id, "Skipping resource without attributes");
        return None;
    };

    let Some(name) = attributes.name else {
        debug!(id = %raw.id, "Skipping resource without name");
        return None;
    };

    if kind.requires_artist() && attributes.artist_name.is_none() {
        debug!(id = %raw.id, ?kind, "Skipping resource without artist name");
        return None;
    }

    Some(TrackItem {
        id: raw.id,
        url: if kind.is_track() { attributes.url } else { None },
        kind,
        name,
        artist_name: attributes.artist_name,
        album_name: attributes.album_name,
        artwork: attributes.artwork.map(|a| Artwork {
            url: a.url,
            width: a.width,
            height: a.height,
        }),
    })
}
