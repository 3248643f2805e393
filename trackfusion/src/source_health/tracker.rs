//! Per-provider health counters and circuit-breaker state.
//!
//! The ingestion path reports every fetch outcome here; the fusion engine
//! only reads. All counters are atomics so provider workers never contend.
//!
//! # State Machine
//!
//! ```text
//! Closed --[consecutive_failures >= threshold]--> Open
//! Open   --[record_success]--------------------> Closed
//! ```
//!
//! There is no timed half-open probe: the provider keeps being polled while
//! open, and the first successful fetch closes the circuit.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;

use super::priority::PriorityTable;
use super::status::{ProviderHealth, SourceStatus};
use super::SourceHealthView;
use crate::observation::EntityType;

/// Default consecutive failures before the circuit opens.
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// Default staleness threshold for aircraft providers.
pub const DEFAULT_AIRCRAFT_STALENESS: Duration = Duration::from_secs(60);

/// Default staleness threshold for vessel providers.
pub const DEFAULT_VESSEL_STALENESS: Duration = Duration::from_secs(120);

/// Configuration for the source health tracker.
#[derive(Debug, Clone)]
pub struct SourceHealthConfig {
    /// Consecutive failures that open the circuit (default: 5).
    pub circuit_breaker_threshold: u32,
    /// No success for this long marks an aircraft provider degraded (default: 60s).
    pub aircraft_staleness: Duration,
    /// No success for this long marks a vessel provider degraded (default: 120s).
    pub vessel_staleness: Duration,
    /// Static trust ordering.
    pub priorities: PriorityTable,
}

impl Default for SourceHealthConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            aircraft_staleness: DEFAULT_AIRCRAFT_STALENESS,
            vessel_staleness: DEFAULT_VESSEL_STALENESS,
            priorities: PriorityTable::default(),
        }
    }
}

impl SourceHealthConfig {
    /// Staleness threshold for an entity type.
    pub fn staleness_for(&self, entity_type: EntityType) -> Duration {
        match entity_type {
            EntityType::Aircraft => self.aircraft_staleness,
            EntityType::Vessel => self.vessel_staleness,
        }
    }
}

/// Atomic counters for one provider.
#[derive(Debug, Default)]
struct SourceCounters {
    entity_type: OnceLock<EntityType>,
    consecutive_failures: AtomicU32,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_ms: AtomicU64,
    /// Epoch millis of the last success, 0 when never.
    last_success_millis: AtomicI64,
}

/// Thread-safe provider health tracker.
///
/// Providers are keyed by lowercase name and created on first use.
pub struct SourceHealthTracker {
    config: SourceHealthConfig,
    sources: DashMap<String, Arc<SourceCounters>>,
}

impl SourceHealthTracker {
    pub fn new(config: SourceHealthConfig) -> Self {
        Self {
            config,
            sources: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SourceHealthConfig {
        &self.config
    }

    /// Register a provider ahead of its first poll so it shows up in reports.
    pub fn register(&self, provider: &str, entity_type: EntityType) {
        let counters = self.counters(provider);
        let _ = counters.entity_type.set(entity_type);
    }

    /// Record a successful fetch.
    ///
    /// Resets the consecutive failure count, closing the circuit if open.
    ///
    /// # Arguments
    ///
    /// * `provider` - Provider name
    /// * `response_time_ms` - Wall-clock duration of the fetch
    pub fn record_success(&self, provider: &str, response_time_ms: u64) {
        let counters = self.counters(provider);
        counters.total_requests.fetch_add(1, Ordering::Relaxed);
        counters.successful_requests.fetch_add(1, Ordering::Relaxed);
        counters
            .total_response_ms
            .fetch_add(response_time_ms, Ordering::Relaxed);
        counters
            .last_success_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

        let previous = counters.consecutive_failures.swap(0, Ordering::Relaxed);
        if previous >= self.config.circuit_breaker_threshold {
            tracing::info!(
                provider,
                previous_failures = previous,
                "Provider circuit closed after successful fetch"
            );
        }
    }

    /// Record a failed fetch.
    pub fn record_failure(&self, provider: &str) {
        let counters = self.counters(provider);
        counters.total_requests.fetch_add(1, Ordering::Relaxed);
        counters.failed_requests.fetch_add(1, Ordering::Relaxed);

        let failures = counters.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.config.circuit_breaker_threshold {
            tracing::warn!(
                provider,
                consecutive_failures = failures,
                threshold = self.config.circuit_breaker_threshold,
                "Provider circuit opened, excluded from primary selection"
            );
        } else {
            tracing::debug!(provider, consecutive_failures = failures, "Provider fetch failed");
        }
    }

    /// True while `consecutive_failures < circuit_breaker_threshold`.
    ///
    /// Providers never seen are available.
    pub fn is_available(&self, provider: &str) -> bool {
        self.consecutive_failures(provider) < self.config.circuit_breaker_threshold
    }

    pub fn consecutive_failures(&self, provider: &str) -> u32 {
        self.sources
            .get(&provider.to_lowercase())
            .map(|c| c.consecutive_failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn priority_rank(&self, provider: &str) -> u32 {
        self.config.priorities.rank(provider)
    }

    /// Status as of now.
    pub fn status(&self, provider: &str) -> SourceStatus {
        self.status_at(provider, Utc::now())
    }

    /// Status as of `now`.
    pub fn status_at(&self, provider: &str, now: DateTime<Utc>) -> SourceStatus {
        match self.sources.get(&provider.to_lowercase()) {
            Some(counters) => self.derive_status(&counters, now),
            None => SourceStatus::Unknown,
        }
    }

    /// Snapshot of one provider, if it has been seen.
    pub fn snapshot(&self, provider: &str) -> Option<ProviderHealth> {
        let name = provider.to_lowercase();
        let counters = self.sources.get(&name)?.clone();
        Some(self.build_snapshot(name, &counters, Utc::now()))
    }

    /// Snapshots of every known provider, sorted by priority then name.
    pub fn snapshot_all(&self) -> Vec<ProviderHealth> {
        let now = Utc::now();
        let mut all: Vec<ProviderHealth> = self
            .sources
            .iter()
            .map(|entry| self.build_snapshot(entry.key().clone(), entry.value(), now))
            .collect();
        all.sort_by(|a, b| {
            a.priority_rank
                .cmp(&b.priority_rank)
                .then_with(|| a.provider.cmp(&b.provider))
        });
        all
    }

    fn counters(&self, provider: &str) -> Arc<SourceCounters> {
        self.sources
            .entry(provider.to_lowercase())
            .or_default()
            .clone()
    }

    fn staleness(&self, counters: &SourceCounters) -> Duration {
        match counters.entity_type.get() {
            Some(entity_type) => self.config.staleness_for(*entity_type),
            None => self.config.aircraft_staleness.max(self.config.vessel_staleness),
        }
    }

    fn derive_status(&self, counters: &SourceCounters, now: DateTime<Utc>) -> SourceStatus {
        let failures = counters.consecutive_failures.load(Ordering::Relaxed);
        if failures >= self.config.circuit_breaker_threshold {
            return SourceStatus::CircuitOpen;
        }
        if counters.total_requests.load(Ordering::Relaxed) == 0 {
            return SourceStatus::Unknown;
        }

        let last = counters.last_success_millis.load(Ordering::Relaxed);
        if last == 0 {
            return SourceStatus::Degraded;
        }
        let age_ms = now.timestamp_millis().saturating_sub(last).max(0) as u128;
        if age_ms > self.staleness(counters).as_millis() {
            SourceStatus::Degraded
        } else {
            SourceStatus::Healthy
        }
    }

    fn build_snapshot(
        &self,
        provider: String,
        counters: &SourceCounters,
        now: DateTime<Utc>,
    ) -> ProviderHealth {
        let consecutive_failures = counters.consecutive_failures.load(Ordering::Relaxed);
        let total_requests = counters.total_requests.load(Ordering::Relaxed);
        let successful_requests = counters.successful_requests.load(Ordering::Relaxed);
        let failed_requests = counters.failed_requests.load(Ordering::Relaxed);
        let total_response_ms = counters.total_response_ms.load(Ordering::Relaxed);
        let last = counters.last_success_millis.load(Ordering::Relaxed);

        let average_response_time_ms = if successful_requests > 0 {
            total_response_ms as f64 / successful_requests as f64
        } else {
            0.0
        };
        let success_rate = if total_requests > 0 {
            successful_requests as f64 / total_requests as f64
        } else {
            1.0
        };
        let last_success_time = if last > 0 {
            Utc.timestamp_millis_opt(last).single()
        } else {
            None
        };

        ProviderHealth {
            priority_rank: self.config.priorities.rank(&provider),
            entity_type: counters.entity_type.get().copied(),
            provider,
            consecutive_failures,
            circuit_breaker_threshold: self.config.circuit_breaker_threshold,
            circuit_open: consecutive_failures >= self.config.circuit_breaker_threshold,
            last_success_time,
            total_requests,
            successful_requests,
            failed_requests,
            average_response_time_ms,
            success_rate,
            status: self.derive_status(counters, now),
        }
    }
}

impl SourceHealthView for SourceHealthTracker {
    fn is_available(&self, provider: &str) -> bool {
        SourceHealthTracker::is_available(self, provider)
    }

    fn priority_rank(&self, provider: &str) -> u32 {
        SourceHealthTracker::priority_rank(self, provider)
    }
}

impl std::fmt::Debug for SourceHealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHealthTracker")
            .field("config", &self.config)
            .field("providers", &self.sources.len())
            .finish_non_exhaustive()
    }
}
