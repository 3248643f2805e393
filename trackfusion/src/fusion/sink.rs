//! Downstream persistence of canonical tracks.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;

use crate::observation::{CanonicalTrack, EntityType, TrackKey};

/// Errors a track sink can report.
///
/// Workers never match on these variants; failures are classified from
/// their messages and cause chain.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The store refused the write.
    #[error("store rejected write for {key}: {message}")]
    Rejected { key: String, message: String },

    /// The store could not be reached.
    #[error("store unavailable for {key}")]
    Unavailable {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode track: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for canonical tracks.
///
/// Writes are upserts keyed by [`TrackKey`]: re-emitting a window replaces
/// the earlier record.
pub trait TrackSink: Send + Sync {
    fn upsert(&self, track: &CanonicalTrack) -> Result<(), SinkError>;
}

/// In-memory upsert store.
#[derive(Default)]
pub struct MemoryTrackStore {
    tracks: DashMap<TrackKey, CanonicalTrack>,
    writes: AtomicU64,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TrackKey) -> Option<CanonicalTrack> {
        self.tracks.get(key).map(|entry| entry.value().clone())
    }

    /// All windows stored for one object, oldest first.
    pub fn history(&self, entity_type: EntityType, identity: &str) -> Vec<CanonicalTrack> {
        let mut tracks: Vec<CanonicalTrack> = self
            .tracks
            .iter()
            .filter(|entry| entry.key().entity_type == entity_type && entry.key().identity == identity)
            .map(|entry| entry.value().clone())
            .collect();
        tracks.sort_by_key(|t| t.window_start);
        tracks
    }

    /// Every stored track, ordered by key.
    pub fn all(&self) -> Vec<CanonicalTrack> {
        let mut tracks: Vec<CanonicalTrack> =
            self.tracks.iter().map(|entry| entry.value().clone()).collect();
        tracks.sort_by_key(|t| t.key());
        tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Upserts accepted, including replacements.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl TrackSink for MemoryTrackStore {
    fn upsert(&self, track: &CanonicalTrack) -> Result<(), SinkError> {
        let replaced = self.tracks.insert(track.key(), track.clone()).is_some();
        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key = %track.key(), replaced, "Track upserted");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTrackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTrackStore")
            .field("tracks", &self.tracks.len())
            .field("writes", &self.write_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Attributes, SafetyFlags};
    use chrono::{TimeZone, Utc};

    fn track(identity: &str, lat: f64, window_secs: i64) -> CanonicalTrack {
        let start = Utc.timestamp_opt(1_700_000_010 + window_secs, 0).unwrap();
        CanonicalTrack {
            entity_type: EntityType::Vessel,
            identity: identity.into(),
            latitude: lat,
            longitude: 107.0,
            attributes: Attributes::default(),
            primary_provider: "marinetraffic".into(),
            contributing_providers: Default::default(),
            fused_quality: 0.9,
            safety: SafetyFlags::default(),
            window_start: start,
            window_end: start + chrono::Duration::seconds(30),
            position_disputed: false,
            low_confidence: false,
            safety_only: false,
        }
    }

    #[test]
    fn test_upsert_replaces_same_window() {
        let store = MemoryTrackStore::new();
        store.upsert(&track("574123456", 10.0, 0)).unwrap();
        store.upsert(&track("574123456", 10.5, 0)).unwrap();
        store.upsert(&track("574123456", 11.0, 30)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.write_count(), 3);
        let history = store.history(EntityType::Vessel, "574123456");
        assert_eq!(history[0].latitude, 10.5);
        assert_eq!(history[1].latitude, 11.0);
    }

    #[test]
    fn test_sink_error_chain() {
        let err = SinkError::Unavailable {
            key: "vessel:1@0".into(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(std::error::Error::source(&err).is_some());
    }
}
