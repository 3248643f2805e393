//! Raw data lifecycle.
//!
//! Raw observations are archived to a history store alongside live fusion.
//! Archiving runs through three stages:
//!
//! | Stage | Type | Effect |
//! |-------|------|--------|
//! | Filter | [`SmartFilter`] | drops records that barely changed |
//! | Compress | [`PayloadCompressor`] | gzips large payloads |
//! | Retain | [`RetentionManager`] | deletes records past their tier age |
//!
//! None of this affects what the fusion workers see.

mod compression;
mod filter;
mod retention;

pub use compression::{
    decompress, is_compressed, CompressionConfig, CompressionError, CompressionStats,
    PayloadCompressor, COMPRESSED_PREFIX, DEFAULT_COMPRESSION_THRESHOLD, GZIP_ALGORITHM,
};
pub use filter::{
    FilterConfig, FilterDecision, FilterStats, SmartFilter, DEFAULT_CACHE_TTL,
    DEFAULT_MIN_ALTITUDE_CHANGE_FT, DEFAULT_MIN_COURSE_CHANGE_DEG, DEFAULT_MIN_DISTANCE_CHANGE_M,
    DEFAULT_MIN_QUALITY_CHANGE, DEFAULT_MIN_SPEED_CHANGE_KN, DEFAULT_SAMPLING_INTERVAL,
};
pub use retention::{
    CleanupPreview, CleanupReport, MemoryHistoryStore, RawHistoryStore, RawRecord,
    RetentionDaemon, RetentionManager, RetentionPolicy, RetentionStats, RetentionTier, TierCounts,
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_EMERGENCY_RETENTION_DAYS,
    DEFAULT_HIGH_QUALITY_RETENTION_DAYS, DEFAULT_HIGH_QUALITY_THRESHOLD, DEFAULT_RETENTION_DAYS,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::observation::RawObservation;

/// Lifecycle settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub filter: FilterConfig,
    pub compression: CompressionConfig,
    pub retention: RetentionPolicy,
    pub cleanup_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            compression: CompressionConfig::default(),
            retention: RetentionPolicy::default(),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

/// Errors from archiving one observation.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to encode observation: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// What happened to one archived observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Stored { id: u64, compressed: bool },
    Filtered,
}

/// Combined lifecycle statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStats {
    pub filter: FilterStats,
    pub compression: CompressionStats,
    pub retention: RetentionStats,
}

/// Filter, compress and store raw observations.
#[derive(Debug)]
pub struct RawHistoryArchiver {
    filter: Arc<SmartFilter>,
    compressor: PayloadCompressor,
    retention: Arc<RetentionManager>,
    cleanup_interval: Duration,
}

impl RawHistoryArchiver {
    pub fn new(config: LifecycleConfig, store: Arc<dyn RawHistoryStore>) -> Self {
        let filter = Arc::new(SmartFilter::new(config.filter));
        let retention =
            RetentionManager::new(store, config.retention).with_filter(Arc::clone(&filter));
        Self {
            filter,
            compressor: PayloadCompressor::new(config.compression),
            retention: Arc::new(retention),
            cleanup_interval: config.cleanup_interval,
        }
    }

    /// Archiver over a fresh in-memory store.
    pub fn in_memory(config: LifecycleConfig) -> Self {
        Self::new(config, Arc::new(MemoryHistoryStore::new()))
    }

    pub fn archive(&self, observation: &RawObservation) -> Result<ArchiveOutcome, ArchiveError> {
        if !self.filter.evaluate(observation).should_store() {
            return Ok(ArchiveOutcome::Filtered);
        }

        let json = serde_json::to_string(observation)?;
        let payload = self.compressor.compress(&json)?;
        let compressed = is_compressed(&payload);

        let id = self.retention.store().insert(RawRecord {
            entity_type: observation.entity_type,
            provider: observation.provider.clone(),
            identity: observation.identity.clone(),
            received_at: observation.received_at,
            quality: observation.quality,
            safety_flagged: observation.flags().any(),
            payload,
            stored_at: Utc::now(),
        });
        Ok(ArchiveOutcome::Stored { id, compressed })
    }

    /// Read back a stored observation.
    pub fn load(&self, id: u64) -> Result<Option<RawObservation>, ArchiveError> {
        let Some(record) = self.retention.store().get(id) else {
            return Ok(None);
        };
        let json = self.compressor.decompress(&record.payload)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    pub fn filter(&self) -> &SmartFilter {
        &self.filter
    }

    pub fn compressor(&self) -> &PayloadCompressor {
        &self.compressor
    }

    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    /// A retention daemon bound to this archiver's store.
    pub fn retention_daemon(&self) -> RetentionDaemon {
        RetentionDaemon::new(Arc::clone(&self.retention)).with_interval(self.cleanup_interval)
    }

    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            filter: self.filter.stats(),
            compression: self.compressor.stats(),
            retention: self.retention.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Attributes, EntityType, Position};

    fn vessel(lat: f64, name_len: usize) -> RawObservation {
        RawObservation::new(
            EntityType::Vessel,
            "marinetraffic",
            "574123456",
            Position::new(lat, 106.7),
            0.7,
            Utc::now(),
        )
        .with_attributes(Attributes {
            name: Some("X".repeat(name_len)),
            ..Default::default()
        })
    }

    #[test]
    fn test_archive_stores_then_filters() {
        let archiver = RawHistoryArchiver::in_memory(LifecycleConfig::default());
        let first = archiver.archive(&vessel(10.0, 4)).unwrap();
        assert!(matches!(first, ArchiveOutcome::Stored { compressed: false, .. }));
        assert_eq!(archiver.archive(&vessel(10.0, 4)).unwrap(), ArchiveOutcome::Filtered);
        assert_eq!(archiver.retention().store().len(), 1);
    }

    #[test]
    fn test_large_payload_is_compressed_and_loadable() {
        let archiver = RawHistoryArchiver::in_memory(LifecycleConfig::default());
        let original = vessel(10.0, 4_000);
        let ArchiveOutcome::Stored { id, compressed } = archiver.archive(&original).unwrap() else {
            panic!("expected the first observation to be stored");
        };
        assert!(compressed);
        assert_eq!(archiver.load(id).unwrap(), Some(original));
        assert_eq!(archiver.stats().compression.payloads_compressed, 1);
    }

    #[test]
    fn test_stats_combine_stages() {
        let archiver = RawHistoryArchiver::in_memory(LifecycleConfig::default());
        archiver.archive(&vessel(10.0, 4)).unwrap();
        archiver.archive(&vessel(10.0, 4)).unwrap();
        let stats = archiver.stats();
        assert_eq!(stats.filter.stored, 1);
        assert_eq!(stats.filter.filtered, 1);
        assert_eq!(stats.retention.stored_records, 1);
    }

    #[test]
    fn test_retention_pass_evicts_stale_filter_cache() {
        let archiver = RawHistoryArchiver::in_memory(LifecycleConfig::default());
        let three_days_ago = Utc::now() - chrono::Duration::days(3);
        for i in 0..200 {
            let mut observation = vessel(10.0, 4);
            observation.identity = format!("57400{:04}", i);
            observation.received_at = three_days_ago;
            archiver.archive(&observation).unwrap();
        }
        archiver.archive(&vessel(10.0, 4)).unwrap();
        assert_eq!(archiver.stats().filter.cached_identities, 201);

        let report = archiver.retention().run_cleanup(Utc::now());

        assert_eq!(report.cache_evicted, 200);
        assert_eq!(report.deleted.total(), 0);
        let stats = archiver.stats();
        assert_eq!(stats.filter.cached_identities, 1);
        assert_eq!(stats.filter.evicted, 200);
        assert_eq!(stats.retention.stored_records, 201);
    }
}
