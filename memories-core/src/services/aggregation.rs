//! Candidate track aggregation
//!
//! Merges the local library's date-range sources and the remote listening
//! history into the track set attached to a Memory.
//!
//! **Algorithm:**
//! 1. Fetch every enabled source concurrently; each is best-effort
//! 2. Narrow large library sets by play count (kept only if enough survive)
//! 3. Union in discovery order: added, released, heavy rotation, recently played
//! 4. Single-threaded reduction: stable sort by play count, per-album cap, overall cap

use super::library::LibraryQuery;
use super::music_api::{Query, Source, TrackSource};
use memories_common::config::AggregationConfig;
use memories_common::events::{EventBus, MemoriesEvent};
use memories_common::models::{CollectionKind, LibraryCollection, LibraryTrack, TrackItem};
use memories_common::{DateRange, MemoryItem, TrackRef, UpdateSettings};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page size for listening-history requests
const HISTORY_PAGE_LIMIT: u32 = 30;

/// A track considered for admission
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    track: TrackRef,
    play_count: u32,
}

impl From<&LibraryTrack> for Candidate {
    fn from(track: &LibraryTrack) -> Self {
        Self {
            track: track.to_track_ref(),
            play_count: track.play_count,
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    pub items: Vec<MemoryItem>,
    /// Names of sources that failed and were skipped
    pub failed_sources: Vec<String>,
}

pub struct AggregationEngine {
    library: Arc<dyn LibraryQuery>,
    remote: Arc<dyn TrackSource>,
    config: AggregationConfig,
    event_bus: EventBus,
}

impl AggregationEngine {
    pub fn new(
        library: Arc<dyn LibraryQuery>,
        remote: Arc<dyn TrackSource>,
        config: AggregationConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            library,
            remote,
            config,
            event_bus,
        }
    }

    /// Compute the admitted track set for `criteria`
    pub async fn compute(&self, criteria: &UpdateSettings, range: Option<DateRange>) -> Vec<MemoryItem> {
        self.compute_with_report(criteria, range).await.items
    }

    /// Like [`compute`](Self::compute), also naming the sources that failed
    pub async fn compute_with_report(
        &self,
        criteria: &UpdateSettings,
        range: Option<DateRange>,
    ) -> AggregationReport {
        let mut failed_sources = Vec::new();

        let (added, released, heavy, recent) = tokio::join!(
            self.added_tracks(range),
            self.released_tracks(range),
            self.history(Source::HeavyRotation, criteria.heavy_rotation),
            self.history(Source::RecentlyPlayed, criteria.recently_played),
        );

        let mut library_set = |name: &str, result: anyhow::Result<Vec<LibraryTrack>>| -> Vec<Candidate> {
            match result {
                Ok(tracks) => self.narrow(tracks.iter().map(Candidate::from).collect()),
                Err(e) => {
                    self.report_failure(name, &e.to_string());
                    failed_sources.push(name.to_string());
                    Vec::new()
                }
            }
        };
        let added = library_set("library-added", added);
        let released = library_set("library-released", released);

        let mut remote_items = Vec::new();
        for (source, result) in [(Source::HeavyRotation, heavy), (Source::RecentlyPlayed, recent)] {
            match result {
                Ok(items) => remote_items.push(items),
                Err(reason) => {
                    self.report_failure(source.name(), &reason);
                    failed_sources.push(source.name().to_string());
                    remote_items.push(Vec::new());
                }
            }
        }

        let albums = if remote_items.iter().any(|items| !items.is_empty()) {
            match self.library.collections(CollectionKind::Album).await {
                Ok(albums) => albums,
                Err(e) => {
                    self.report_failure("library-albums", &e.to_string());
                    failed_sources.push("library-albums".to_string());
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut merged = Vec::new();
        let mut seen = HashSet::new();
        union_into(&mut merged, &mut seen, added);
        union_into(&mut merged, &mut seen, released);
        for items in remote_items {
            union_into(&mut merged, &mut seen, resolve_remote(&items, &albums));
        }

        let admitted = self.reduce(merged, criteria.max_adds_per_album);
        let items: Vec<MemoryItem> = admitted
            .into_iter()
            .map(|c| MemoryItem::for_track(c.track, c.play_count))
            .collect();

        info!(
            items = items.len(),
            failed_sources = failed_sources.len(),
            "Aggregation run complete"
        );

        AggregationReport { items, failed_sources }
    }

    async fn added_tracks(&self, range: Option<DateRange>) -> anyhow::Result<Vec<LibraryTrack>> {
        let Some(range) = range else {
            return Ok(Vec::new());
        };
        let lead_in = DateRange {
            start: memories_common::time::days_before(range.start, self.config.added_lead_in_days),
            end: range.end,
        };
        self.library.tracks_added_between(lead_in).await
    }

    async fn released_tracks(&self, range: Option<DateRange>) -> anyhow::Result<Vec<LibraryTrack>> {
        match range {
            Some(range) => self.library.tracks_released_between(range).await,
            None => Ok(Vec::new()),
        }
    }

    async fn history(&self, source: Source, enabled: bool) -> Result<Vec<TrackItem>, String> {
        if !enabled {
            return Ok(Vec::new());
        }
        self.remote
            .execute(&Query::new(source).page(0, HISTORY_PAGE_LIMIT))
            .await
            .map_err(|e| e.to_string())
    }

    /// Keep only tracks played more than `narrow_min_plays` times, but only
    /// when the set is large and the narrowed set is not too small
    fn narrow(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        if candidates.len() <= self.config.narrow_above {
            return candidates;
        }
        let narrowed: Vec<Candidate> = candidates
            .iter()
            .filter(|c| c.play_count > self.config.narrow_min_plays)
            .cloned()
            .collect();
        if narrowed.len() > self.config.narrow_keep_min {
            debug!(before = candidates.len(), after = narrowed.len(), "Narrowed candidate set");
            narrowed
        } else {
            debug!(
                before = candidates.len(),
                narrowed = narrowed.len(),
                "Narrowed set too small, keeping original"
            );
            candidates
        }
    }

    /// Stable sort by play count, per-album cap, then overall cap
    fn reduce(&self, mut merged: Vec<Candidate>, max_per_album: usize) -> Vec<Candidate> {
        merged.sort_by(|a, b| b.play_count.cmp(&a.play_count));

        let mut per_album: HashMap<String, usize> = HashMap::new();
        let mut admitted = Vec::new();
        for candidate in merged {
            let album = candidate.track.album_key();
            if !album.is_empty() {
                let count = per_album.entry(album).or_insert(0);
                if *count >= max_per_album {
                    continue;
                }
                *count += 1;
            }
            admitted.push(candidate);
        }

        admitted.truncate(self.config.max_tracks);
        admitted
    }

    fn report_failure(&self, source: &str, reason: &str) {
        warn!(source, reason, "Aggregation source failed, continuing without it");
        self.event_bus.emit_lossy(MemoriesEvent::SourceFailed {
            source: source.to_string(),
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }
}

fn union_into(merged: &mut Vec<Candidate>, seen: &mut HashSet<String>, candidates: Vec<Candidate>) {
    for candidate in candidates {
        if seen.insert(candidate.track.key()) {
            merged.push(candidate);
        }
    }
}

/// Map remote items onto library tracks
///
/// Songs resolve by metadata (unresolved songs keep a zero play count),
/// albums expand to the matching library album, other kinds are skipped.
fn resolve_remote(items: &[TrackItem], albums: &[LibraryCollection]) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for item in items {
        if item.kind.is_track() {
            let wanted = TrackRef::new(item.name.clone(), item.album_name.clone(), item.artist_name.clone());
            let resolved = albums
                .iter()
                .flat_map(|album| album.tracks.iter())
                .find(|track| track.to_track_ref().matches(&wanted));
            candidates.push(match resolved {
                Some(track) => Candidate::from(track),
                None => Candidate {
                    track: wanted,
                    play_count: 0,
                },
            });
        } else if item.kind.is_album() {
            match albums
                .iter()
                .find(|album| album.matches(&item.name, item.artist_name.as_deref()))
            {
                Some(album) => candidates.extend(album.tracks.iter().map(Candidate::from)),
                None => debug!(album = %item.name, "Remote album not in library"),
            }
        } else {
            debug!(id = %item.id, kind = ?item.kind, "Skipping non-track remote item");
        }
    }
    candidates
}
