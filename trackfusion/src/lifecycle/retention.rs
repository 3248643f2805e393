//! Tiered retention for raw history.
//!
//! Every stored record falls into one retention tier:
//!
//! | Tier | Rule | Default |
//! |------|------|---------|
//! | Emergency | any safety flag set | 30 days |
//! | High quality | quality ≥ 0.8 | 14 days |
//! | Default | everything else | 7 days |
//!
//! Age is measured on `received_at`. [`RetentionDaemon`] runs a cleanup
//! pass on a fixed interval until cancelled.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::filter::SmartFilter;
use crate::observation::EntityType;

/// Default retention for ordinary records.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Default retention for records carrying a safety flag.
pub const DEFAULT_EMERGENCY_RETENTION_DAYS: u32 = 30;

/// Default retention for high quality records.
pub const DEFAULT_HIGH_QUALITY_RETENTION_DAYS: u32 = 14;

/// Quality at or above which a record is retained as high quality.
pub const DEFAULT_HIGH_QUALITY_THRESHOLD: f64 = 0.8;

/// Default interval between scheduled cleanup passes (1 hour).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// One persisted raw observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub entity_type: EntityType,
    pub provider: String,
    pub identity: String,
    pub received_at: DateTime<Utc>,
    pub quality: f64,
    pub safety_flagged: bool,
    /// JSON payload, possibly compressed.
    pub payload: String,
    pub stored_at: DateTime<Utc>,
}

/// Raw history persistence.
pub trait RawHistoryStore: Send + Sync {
    /// Store a record and return its id.
    fn insert(&self, record: RawRecord) -> u64;

    fn get(&self, id: u64) -> Option<RawRecord>;

    /// Delete every record matching the predicate. Returns the number removed.
    fn delete_where(&self, predicate: &dyn Fn(&RawRecord) -> bool) -> usize;

    fn count_where(&self, predicate: &dyn Fn(&RawRecord) -> bool) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory raw history keyed by insertion id.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<BTreeMap<u64, RawRecord>>,
    next_id: AtomicU64,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records for one provider, oldest id first.
    pub fn by_provider(&self, provider: &str) -> Vec<RawRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| r.provider == provider)
            .cloned()
            .collect()
    }
}

impl RawHistoryStore for MemoryHistoryStore {
    fn insert(&self, record: RawRecord) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.records.lock().insert(id, record);
        id
    }

    fn get(&self, id: u64) -> Option<RawRecord> {
        self.records.lock().get(&id).cloned()
    }

    fn delete_where(&self, predicate: &dyn Fn(&RawRecord) -> bool) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| !predicate(record));
        before - records.len()
    }

    fn count_where(&self, predicate: &dyn Fn(&RawRecord) -> bool) -> usize {
        self.records.lock().values().filter(|r| predicate(r)).count()
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }
}

/// Retention tier of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionTier {
    Emergency,
    HighQuality,
    Default,
}

/// Retention ages per tier.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub default_days: u32,
    pub emergency_days: u32,
    pub high_quality_days: u32,
    pub high_quality_threshold: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            default_days: DEFAULT_RETENTION_DAYS,
            emergency_days: DEFAULT_EMERGENCY_RETENTION_DAYS,
            high_quality_days: DEFAULT_HIGH_QUALITY_RETENTION_DAYS,
            high_quality_threshold: DEFAULT_HIGH_QUALITY_THRESHOLD,
        }
    }
}

impl RetentionPolicy {
    /// Safety flags take precedence over quality.
    pub fn tier(&self, record: &RawRecord) -> RetentionTier {
        if record.safety_flagged {
            RetentionTier::Emergency
        } else if record.quality >= self.high_quality_threshold {
            RetentionTier::HighQuality
        } else {
            RetentionTier::Default
        }
    }

    pub fn days(&self, tier: RetentionTier) -> u32 {
        match tier {
            RetentionTier::Emergency => self.emergency_days,
            RetentionTier::HighQuality => self.high_quality_days,
            RetentionTier::Default => self.default_days,
        }
    }

    /// Whether the record has outlived its tier at `now`.
    pub fn is_expired(&self, record: &RawRecord, now: DateTime<Utc>) -> bool {
        let days = self.days(self.tier(record));
        now - record.received_at > ChronoDuration::days(i64::from(days))
    }
}

/// Expired record counts by tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCounts {
    pub default: usize,
    pub emergency: usize,
    pub high_quality: usize,
}

impl TierCounts {
    pub fn total(&self) -> usize {
        self.default + self.emergency + self.high_quality
    }

    fn add(&mut self, tier: RetentionTier, n: usize) {
        match tier {
            RetentionTier::Emergency => self.emergency += n,
            RetentionTier::HighQuality => self.high_quality += n,
            RetentionTier::Default => self.default += n,
        }
    }
}

/// Result of one cleanup pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted: TierCounts,
    pub remaining: usize,
    /// Stale smart filter cache entries evicted in the same pass.
    pub cache_evicted: usize,
    pub duration_ms: u64,
    pub ran_at: DateTime<Utc>,
}

/// What a cleanup pass would delete, without deleting anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPreview {
    pub expired: TierCounts,
    pub total_records: usize,
    pub as_of: DateTime<Utc>,
}

/// Cumulative retention statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionStats {
    pub total_deleted: u64,
    pub runs: u64,
    pub forced_cleanups: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_duration_ms: u64,
    pub stored_records: usize,
}

#[derive(Debug, Default)]
struct StatsState {
    total_deleted: u64,
    runs: u64,
    forced_cleanups: u64,
    last_run_at: Option<DateTime<Utc>>,
    last_duration_ms: u64,
}

/// Applies a [`RetentionPolicy`] to a [`RawHistoryStore`].
///
/// When bound to a [`SmartFilter`], each cleanup pass also evicts the
/// filter's stale per-identity cache entries.
pub struct RetentionManager {
    store: Arc<dyn RawHistoryStore>,
    policy: RetentionPolicy,
    filter: Option<Arc<SmartFilter>>,
    state: Mutex<StatsState>,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn RawHistoryStore>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            policy,
            filter: None,
            state: Mutex::new(StatsState::default()),
        }
    }

    /// Evict stale entries from `filter` on every cleanup pass.
    pub fn with_filter(mut self, filter: Arc<SmartFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn RawHistoryStore> {
        &self.store
    }

    /// Delete every expired record.
    pub fn run_cleanup(&self, now: DateTime<Utc>) -> CleanupReport {
        let started = Instant::now();
        let mut deleted = TierCounts::default();

        for tier in [
            RetentionTier::Default,
            RetentionTier::HighQuality,
            RetentionTier::Emergency,
        ] {
            let policy = &self.policy;
            let n = self.store.delete_where(&|record| {
                policy.tier(record) == tier && policy.is_expired(record, now)
            });
            deleted.add(tier, n);
        }
        let cache_evicted = self
            .filter
            .as_ref()
            .map_or(0, |filter| filter.evict_stale(now));

        let duration_ms = started.elapsed().as_millis() as u64;
        {
            let mut state = self.state.lock();
            state.total_deleted += deleted.total() as u64;
            state.runs += 1;
            state.last_run_at = Some(now);
            state.last_duration_ms = duration_ms;
        }

        let report = CleanupReport {
            deleted,
            remaining: self.store.len(),
            cache_evicted,
            duration_ms,
            ran_at: now,
        };
        info!(
            deleted = deleted.total(),
            default = deleted.default,
            high_quality = deleted.high_quality,
            emergency = deleted.emergency,
            remaining = report.remaining,
            cache_evicted,
            duration_ms,
            "Raw history retention pass complete"
        );
        report
    }

    /// Count what [`RetentionManager::run_cleanup`] would delete at `now`.
    pub fn preview(&self, now: DateTime<Utc>) -> CleanupPreview {
        let mut expired = TierCounts::default();
        for tier in [
            RetentionTier::Default,
            RetentionTier::HighQuality,
            RetentionTier::Emergency,
        ] {
            let policy = &self.policy;
            let n = self.store.count_where(&|record| {
                policy.tier(record) == tier && policy.is_expired(record, now)
            });
            expired.add(tier, n);
        }
        CleanupPreview {
            expired,
            total_records: self.store.len(),
            as_of: now,
        }
    }

    /// Delete one provider's records older than `days`, ignoring tiers.
    pub fn force_cleanup(&self, provider: &str, days: u32, now: DateTime<Utc>) -> usize {
        let cutoff = now - ChronoDuration::days(i64::from(days));
        let deleted = self
            .store
            .delete_where(&|record| record.provider == provider && record.received_at < cutoff);

        {
            let mut state = self.state.lock();
            state.total_deleted += deleted as u64;
            state.forced_cleanups += 1;
        }
        warn!(provider, days, deleted, "Forced raw history cleanup");
        deleted
    }

    pub fn stats(&self) -> RetentionStats {
        let state = self.state.lock();
        RetentionStats {
            total_deleted: state.total_deleted,
            runs: state.runs,
            forced_cleanups: state.forced_cleanups,
            last_run_at: state.last_run_at,
            last_duration_ms: state.last_duration_ms,
            stored_records: self.store.len(),
        }
    }

    pub fn reset_stats(&self) {
        *self.state.lock() = StatsState::default();
        info!("Retention statistics reset");
    }
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("policy", &self.policy)
            .field("stored", &self.store.len())
            .finish_non_exhaustive()
    }
}

/// Background daemon that runs retention passes on an interval.
pub struct RetentionDaemon {
    manager: Arc<RetentionManager>,
    interval: Duration,
}

impl RetentionDaemon {
    pub fn new(manager: Arc<RetentionManager>) -> Self {
        Self {
            manager,
            interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }

    /// Sets a custom cleanup interval. Zero is raised to one second.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_secs(1));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            default_days = self.manager.policy().default_days,
            emergency_days = self.manager.policy().emergency_days,
            high_quality_days = self.manager.policy().high_quality_days,
            "Retention daemon starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Retention daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let report = self.manager.run_cleanup(Utc::now());
                    debug!(remaining = report.remaining, "Scheduled retention pass finished");
                }
            }
        }
    }
}
