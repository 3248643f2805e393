//! JSON-lines replay feed.
//!
//! Each non-blank line of a capture file is one [`RawObservation`] in its
//! wire shape. Lines starting with `#` are comments. A capture may mix
//! providers; [`ReplayFeed::load_all`] splits it into one feed per provider.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;

use super::feed::{FeedError, ObservationFeed};
use crate::observation::{EntityType, RawObservation};

/// Default number of observations returned per fetch.
pub const DEFAULT_REPLAY_BATCH: usize = 50;

/// Replays recorded observations for one provider.
#[derive(Debug)]
pub struct ReplayFeed {
    provider: String,
    entity_type: EntityType,
    records: Vec<RawObservation>,
    cursor: AtomicUsize,
    batch_size: usize,
    preserve_timestamps: bool,
    looping: bool,
}

impl ReplayFeed {
    /// Build a feed from already-decoded observations.
    ///
    /// Every record must belong to `provider`; others are ignored.
    pub fn new(
        provider: impl Into<String>,
        entity_type: EntityType,
        records: Vec<RawObservation>,
    ) -> Self {
        let provider = provider.into().trim().to_lowercase();
        let records = records
            .into_iter()
            .filter(|r| r.provider.trim().eq_ignore_ascii_case(&provider))
            .collect();
        Self {
            provider,
            entity_type,
            records,
            cursor: AtomicUsize::new(0),
            batch_size: DEFAULT_REPLAY_BATCH,
            preserve_timestamps: false,
            looping: false,
        }
    }

    /// Sets the maximum records returned per fetch (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Keep recorded `receivedAt` values instead of stamping fetch time.
    pub fn with_preserved_timestamps(mut self, preserve: bool) -> Self {
        self.preserve_timestamps = preserve;
        self
    }

    /// Restart from the first record once the capture is exhausted.
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Parse a capture and return one feed per `(provider, entity type)`.
    pub fn load_all(path: &Path) -> Result<Vec<ReplayFeed>, FeedError> {
        let content = std::fs::read_to_string(path)?;
        let records = parse_lines(&content)?;

        let mut grouped: BTreeMap<(String, EntityType), Vec<RawObservation>> = BTreeMap::new();
        for record in records {
            let key = (record.provider.trim().to_lowercase(), record.entity_type);
            grouped.entry(key).or_default().push(record);
        }

        tracing::info!(
            path = %path.display(),
            providers = grouped.len(),
            "Loaded replay capture"
        );

        Ok(grouped
            .into_iter()
            .map(|((provider, entity_type), records)| {
                ReplayFeed::new(provider, entity_type, records)
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records not yet served in the current pass.
    pub fn remaining(&self) -> usize {
        self.records
            .len()
            .saturating_sub(self.cursor.load(Ordering::Relaxed))
    }

    pub fn is_exhausted(&self) -> bool {
        !self.looping && self.remaining() == 0
    }

    fn next_batch(&self) -> Vec<RawObservation> {
        if self.records.is_empty() {
            return Vec::new();
        }
        let len = self.records.len();
        let mut start = self.cursor.fetch_add(self.batch_size, Ordering::Relaxed);
        if start >= len {
            if !self.looping {
                self.cursor.store(len, Ordering::Relaxed);
                return Vec::new();
            }
            start = 0;
            self.cursor.store(self.batch_size, Ordering::Relaxed);
        }
        let end = (start + self.batch_size).min(len);

        let now = Utc::now();
        self.records[start..end]
            .iter()
            .cloned()
            .map(|mut record| {
                if !self.preserve_timestamps {
                    record.received_at = now;
                }
                record
            })
            .collect()
    }
}

impl ObservationFeed for ReplayFeed {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    async fn fetch(&self) -> Result<Vec<RawObservation>, FeedError> {
        Ok(self.next_batch())
    }
}

/// Decode a JSON-lines capture.
pub fn parse_lines(content: &str) -> Result<Vec<RawObservation>, FeedError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| FeedError::Parse {
                line: index + 1,
                message: e.to_string(),
            })
        })
        .collect()
}
