//! Per-worker window bookkeeping.
//!
//! Open windows collect candidates until their end passes. Sealed windows
//! keep their candidate set for the late-retention period so a late record
//! can be merged and the window re-emitted under the same key.
//!
//! ```text
//!   admit ──► open ──seal_due──► (worker emits) ──retain──► sealed ──evict──► gone
//!               ▲                                            │
//!               └──────────── late record merges ────────────┘
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::scoring::{window_end, window_start};
use crate::bus::Delivery;
use crate::observation::{RawObservation, TrackKey};

/// Where a candidate came from. Unique per bus record.
pub type Coordinates = (Arc<str>, u32, u64);

/// Something that can be buffered as a fusion candidate.
pub trait Candidate {
    fn observation(&self) -> &Arc<RawObservation>;
    fn coordinates(&self) -> Coordinates;
}

impl Candidate for Delivery<RawObservation> {
    fn observation(&self) -> &Arc<RawObservation> {
        &self.value
    }

    fn coordinates(&self) -> Coordinates {
        Delivery::coordinates(self)
    }
}

/// Result of offering a candidate to the buffer.
#[derive(Debug)]
pub enum Admission<C> {
    /// Added to an open window.
    Buffered,
    /// Same record already waiting in an open window; drop this copy.
    Duplicate(C),
    /// Same record already folded into an emitted track.
    AlreadyEmitted(C),
    /// Belongs to a sealed window; re-fuse with `candidates`, which already
    /// include this record, then call [`WindowBuffer::retain`] on success.
    Late {
        key: TrackKey,
        candidates: Vec<Arc<RawObservation>>,
        item: C,
    },
    /// Window ended longer ago than the late-retention period.
    TooLate(C),
}

/// A window whose end has passed and is ready to fuse.
#[derive(Debug)]
pub struct ReadyWindow<C> {
    pub key: TrackKey,
    pub candidates: Vec<C>,
}

impl<C: Candidate> ReadyWindow<C> {
    pub fn observations(&self) -> Vec<Arc<RawObservation>> {
        self.candidates
            .iter()
            .map(|c| Arc::clone(c.observation()))
            .collect()
    }
}

struct OpenWindow<C> {
    end: DateTime<Utc>,
    candidates: Vec<C>,
    seen: HashSet<Coordinates>,
}

struct SealedWindow {
    end: DateTime<Utc>,
    candidates: Vec<Arc<RawObservation>>,
    seen: HashSet<Coordinates>,
}

/// Open and recently sealed windows of one worker.
pub struct WindowBuffer<C> {
    window_ms: i64,
    late_retention: ChronoDuration,
    open: BTreeMap<TrackKey, OpenWindow<C>>,
    sealed: HashMap<TrackKey, SealedWindow>,
}

impl<C: Candidate> WindowBuffer<C> {
    pub fn new(window: Duration, late_retention: Duration) -> Self {
        Self {
            window_ms: (window.as_millis() as i64).max(1),
            late_retention: ChronoDuration::from_std(late_retention)
                .unwrap_or(ChronoDuration::MAX),
            open: BTreeMap::new(),
            sealed: HashMap::new(),
        }
    }

    /// Key of the window a candidate falls into.
    pub fn key_for(&self, observation: &RawObservation) -> TrackKey {
        TrackKey {
            entity_type: observation.entity_type,
            identity: observation.identity.trim().to_string(),
            window_start: window_start(observation.received_at, self.window_ms),
        }
    }

    /// Offer a candidate.
    pub fn admit(&mut self, item: C, now: DateTime<Utc>) -> Admission<C> {
        let key = self.key_for(item.observation());
        let coordinates = item.coordinates();

        if let Some(window) = self.open.get_mut(&key) {
            if !window.seen.insert(coordinates) {
                return Admission::Duplicate(item);
            }
            window.candidates.push(item);
            return Admission::Buffered;
        }

        if let Some(sealed) = self.sealed.get(&key) {
            if sealed.seen.contains(&coordinates) {
                return Admission::AlreadyEmitted(item);
            }
            let mut candidates = sealed.candidates.clone();
            candidates.push(Arc::clone(item.observation()));
            return Admission::Late {
                key,
                candidates,
                item,
            };
        }

        let end = window_end(key.window_start, self.window_ms);
        if end + self.late_retention < now {
            return Admission::TooLate(item);
        }

        let mut seen = HashSet::new();
        seen.insert(coordinates);
        self.open.insert(
            key,
            OpenWindow {
                end,
                candidates: vec![item],
                seen,
            },
        );
        Admission::Buffered
    }

    /// Remove and return every open window that ended at or before `now`.
    pub fn seal_due(&mut self, now: DateTime<Utc>) -> Vec<ReadyWindow<C>> {
        let due: Vec<TrackKey> = self
            .open
            .iter()
            .filter(|(_, window)| window.end <= now)
            .map(|(key, _)| key.clone())
            .collect();
        due.into_iter()
            .filter_map(|key| self.take_open(key))
            .collect()
    }

    /// Remove and return every open window regardless of its end.
    pub fn drain_all(&mut self) -> Vec<ReadyWindow<C>> {
        let keys: Vec<TrackKey> = self.open.keys().cloned().collect();
        keys.into_iter()
            .filter_map(|key| self.take_open(key))
            .collect()
    }

    fn take_open(&mut self, key: TrackKey) -> Option<ReadyWindow<C>> {
        let window = self.open.remove(&key)?;
        Some(ReadyWindow {
            key,
            candidates: window.candidates,
        })
    }

    /// Keep emitted candidates for late merges.
    pub fn retain<'a, I>(&mut self, key: &TrackKey, emitted: I)
    where
        I: IntoIterator<Item = &'a C>,
        C: 'a,
    {
        let end = window_end(key.window_start, self.window_ms);
        let sealed = self.sealed.entry(key.clone()).or_insert_with(|| SealedWindow {
            end,
            candidates: Vec::new(),
            seen: HashSet::new(),
        });
        for item in emitted {
            if sealed.seen.insert(item.coordinates()) {
                sealed.candidates.push(Arc::clone(item.observation()));
            }
        }
    }

    /// Drop sealed windows past the late-retention period.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.sealed.len();
        let retention = self.late_retention;
        self.sealed.retain(|_, window| window.end + retention >= now);
        before - self.sealed.len()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn retained_count(&self) -> usize {
        self.sealed.len()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.open.values().map(|w| w.candidates.len()).sum()
    }
}

impl<C> std::fmt::Debug for WindowBuffer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowBuffer")
            .field("window_ms", &self.window_ms)
            .field("open", &self.open.len())
            .field("sealed", &self.sealed.len())
            .finish()
    }
}
