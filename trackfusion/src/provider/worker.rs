//! Provider ingestion worker.
//!
//! One worker per provider polls its [`ObservationFeed`] on an interval,
//! reports every fetch to the [`SourceHealthTracker`], publishes results to
//! the [`ObservationBus`] and offers them to the raw history archiver.
//!
//! Consecutive fetch failures back off exponentially (2^n seconds, capped
//! at 5 minutes) before the next attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::feed::{FeedError, ObservationFeed};
use crate::bus::{BusError, ObservationBus};
use crate::lifecycle::{ArchiveOutcome, RawHistoryArchiver};
use crate::observation::validate;
use crate::source_health::SourceHealthTracker;

/// Maximum backoff duration (5 minutes).
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Result of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub fetched: usize,
    pub published: usize,
    pub invalid: usize,
    pub archived: usize,
    pub filtered: usize,
}

/// Cumulative per-worker counters.
#[derive(Debug, Default)]
pub struct IngestionCounters {
    polls: AtomicU64,
    failures: AtomicU64,
    published: AtomicU64,
    invalid: AtomicU64,
}

/// Snapshot of [`IngestionCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStats {
    pub polls: u64,
    pub failures: u64,
    pub published: u64,
    pub invalid: u64,
}

impl IngestionCounters {
    pub fn snapshot(&self) -> IngestionStats {
        IngestionStats {
            polls: self.polls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
        }
    }
}

/// Poll loop for one provider.
pub struct IngestionWorker<F: ObservationFeed> {
    feed: F,
    bus: Arc<ObservationBus>,
    health: Arc<SourceHealthTracker>,
    archiver: Option<Arc<RawHistoryArchiver>>,
    poll_interval: Duration,
    counters: Arc<IngestionCounters>,
}

impl<F: ObservationFeed + 'static> IngestionWorker<F> {
    pub fn new(
        feed: F,
        bus: Arc<ObservationBus>,
        health: Arc<SourceHealthTracker>,
        poll_interval: Duration,
    ) -> Self {
        health.register(feed.provider(), feed.entity_type());
        bus.ensure_raw_topic(feed.entity_type(), feed.provider());
        Self {
            feed,
            bus,
            health,
            archiver: None,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            counters: Arc::new(IngestionCounters::default()),
        }
    }

    /// Also archive every fetched observation to raw history.
    pub fn with_archiver(mut self, archiver: Arc<RawHistoryArchiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    pub fn provider(&self) -> &str {
        self.feed.provider()
    }

    pub fn counters(&self) -> Arc<IngestionCounters> {
        Arc::clone(&self.counters)
    }

    /// Start the poll loop as an async task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run the poll loop until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            provider = self.feed.provider(),
            entity_type = %self.feed.entity_type(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Provider ingestion worker started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if consecutive_errors > 0 {
                let backoff = calculate_backoff(consecutive_errors);
                tracing::debug!(
                    provider = self.feed.provider(),
                    backoff_secs = backoff.as_secs(),
                    consecutive_errors,
                    "Backing off after fetch errors"
                );
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            match self.poll_once().await {
                Ok(_) => consecutive_errors = 0,
                Err(_) => consecutive_errors = consecutive_errors.saturating_add(1),
            }
        }

        tracing::info!(provider = self.feed.provider(), "Provider ingestion worker stopped");
    }

    /// Fetch once and route the results.
    pub async fn poll_once(&self) -> Result<PollSummary, FeedError> {
        let provider = self.feed.provider();
        self.counters.polls.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let observations = match self.feed.fetch().await {
            Ok(observations) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.health.record_success(provider, elapsed_ms);
                observations
            }
            Err(e) => {
                self.health.record_failure(provider);
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(provider, error = %e, "Provider fetch failed");
                return Err(e);
            }
        };

        let mut summary = PollSummary {
            fetched: observations.len(),
            ..Default::default()
        };

        for observation in observations {
            if let Some(archiver) = self
                .archiver
                .as_ref()
                .filter(|_| validate(&observation).is_ok())
            {
                match archiver.archive(&observation) {
                    Ok(ArchiveOutcome::Stored { .. }) => summary.archived += 1,
                    Ok(ArchiveOutcome::Filtered) => summary.filtered += 1,
                    Err(e) => {
                        tracing::warn!(provider, error = %e, "Failed to archive raw observation")
                    }
                }
            }

            match self.bus.publish(observation) {
                Ok(_) => summary.published += 1,
                Err(BusError::Invalid { source, .. }) => {
                    summary.invalid += 1;
                    tracing::debug!(provider, reason = %source, "Dropped invalid observation");
                }
                Err(BusError::Closed) => {
                    tracing::debug!(provider, "Bus closed, dropping remaining observations");
                    break;
                }
            }
        }

        self.counters
            .published
            .fetch_add(summary.published as u64, Ordering::Relaxed);
        self.counters
            .invalid
            .fetch_add(summary.invalid as u64, Ordering::Relaxed);

        tracing::debug!(
            provider,
            fetched = summary.fetched,
            published = summary.published,
            invalid = summary.invalid,
            archived = summary.archived,
            "Provider poll complete"
        );
        Ok(summary)
    }
}

/// Calculate exponential backoff: 2^n seconds, capped at [`MAX_BACKOFF`].
pub fn calculate_backoff(consecutive_errors: u32) -> Duration {
    let secs = 2u64.saturating_pow(consecutive_errors.min(20));
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::lifecycle::LifecycleConfig;
    use crate::observation::{EntityType, Position, RawObservation};
    use crate::source_health::{SourceHealthConfig, SourceStatus};
    use chrono::Utc;
    use std::collections::VecDeque;

    /// Feed returning scripted results, then empty batches.
    struct ScriptedFeed {
        script: parking_lot::Mutex<VecDeque<Result<Vec<RawObservation>, FeedError>>>,
    }

    impl ScriptedFeed {
        fn new(script: Vec<Result<Vec<RawObservation>, FeedError>>) -> Self {
            Self {
                script: parking_lot::Mutex::new(script.into()),
            }
        }
    }

    impl ObservationFeed for ScriptedFeed {
        fn provider(&self) -> &str {
            "flightradar24"
        }

        fn entity_type(&self) -> EntityType {
            EntityType::Aircraft
        }

        async fn fetch(&self) -> Result<Vec<RawObservation>, FeedError> {
            self.script.lock().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn obs(identity: &str, lat: f64) -> RawObservation {
        RawObservation::new(
            EntityType::Aircraft,
            "flightradar24",
            identity,
            Position::new(lat, 106.0),
            0.9,
            Utc::now(),
        )
    }

    fn timeout() -> FeedError {
        FeedError::Timeout {
            provider: "flightradar24".to_string(),
            after: Duration::from_secs(5),
        }
    }

    fn fixture(
        script: Vec<Result<Vec<RawObservation>, FeedError>>,
    ) -> (
        IngestionWorker<ScriptedFeed>,
        Arc<ObservationBus>,
        Arc<SourceHealthTracker>,
    ) {
        let bus = Arc::new(ObservationBus::new(BusConfig::default()));
        let health = Arc::new(SourceHealthTracker::new(SourceHealthConfig::default()));
        let worker = IngestionWorker::new(
            ScriptedFeed::new(script),
            Arc::clone(&bus),
            Arc::clone(&health),
            Duration::from_secs(30),
        );
        (worker, bus, health)
    }

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3), Duration::from_secs(8));
        assert_eq!(calculate_backoff(8), Duration::from_secs(256));
        assert_eq!(calculate_backoff(9), MAX_BACKOFF);
        assert_eq!(calculate_backoff(u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_poll_publishes_and_drops_invalid() {
        let (worker, bus, health) = fixture(vec![Ok(vec![obs("ABC123", 10.0), obs("BAD", 95.0)])]);

        let summary = worker.poll_once().await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.published, 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(bus.invalid_count("flightradar24"), 1);
        assert_eq!(health.consecutive_failures("flightradar24"), 0);
        assert_eq!(worker.counters().snapshot().published, 1);
    }

    #[tokio::test]
    async fn test_failures_open_the_circuit() {
        let script = (0..5).map(|_| Err(timeout())).collect();
        let (worker, _bus, health) = fixture(script);

        for _ in 0..5 {
            assert!(worker.poll_once().await.is_err());
        }
        assert_eq!(health.status("flightradar24"), SourceStatus::CircuitOpen);

        worker.poll_once().await.unwrap();
        assert!(health.is_available("flightradar24"));
    }

    #[tokio::test]
    async fn test_poll_archives_raw_history() {
        let (worker, _bus, _health) = fixture(vec![Ok(vec![obs("ABC123", 10.0)]), Ok(vec![obs("ABC123", 10.0)])]);
        let archiver = Arc::new(RawHistoryArchiver::in_memory(LifecycleConfig::default()));
        let worker = worker.with_archiver(Arc::clone(&archiver));

        assert_eq!(worker.poll_once().await.unwrap().archived, 1);
        let second = worker.poll_once().await.unwrap();
        assert_eq!(second.archived, 0);
        assert_eq!(second.filtered, 1);
        assert_eq!(second.published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (worker, bus, _health) = fixture(vec![Ok(vec![obs("ABC123", 10.0)])]);
        let shutdown = CancellationToken::new();
        let handle = worker.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(bus.stats().published, 1);
    }
}
