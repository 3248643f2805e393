//! The `TrackingPipeline` facade.
//!
//! Owns every long-lived component and the tasks that drive them:
//!
//! ```text
//!  feeds ─► IngestionWorker ─► ObservationBus ─► FusionWorker × N ─► TrackSink
//!                 │                                    │
//!                 └─► RawHistoryArchiver               └─► ErrorHandler ─► dead-letter
//!                          └─► RetentionDaemon
//! ```
//!
//! Shutdown runs in dependency order: the bus stops accepting, ingestion
//! stops, fusion workers drain and emit their open windows, then the
//! retention daemon stops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::status::PipelineStatus;
use crate::bus::{BusStats, ObservationBus};
use crate::fusion::{
    FusionContext, FusionCounters, FusionEngine, FusionStats, FusionWorker, FusionWorkerHandle,
    MemoryTrackStore, TrackSink,
};
use crate::lifecycle::{
    CleanupPreview, CleanupReport, LifecycleStats, MemoryHistoryStore, RawHistoryArchiver,
    RawHistoryStore,
};
use crate::observation::EntityType;
use crate::provider::{IngestionCounters, IngestionWorker, ObservationFeed};
use crate::resilience::{DeadLetterPublisher, ErrorHandler, ErrorReport, ResilienceStats};
use crate::source_health::{ProviderHealth, SourceHealthTracker};

/// A running ingestion worker.
struct IngestionTask {
    provider: String,
    counters: Arc<IngestionCounters>,
    join: JoinHandle<()>,
}

/// Builder for [`TrackingPipeline`].
pub struct TrackingPipelineBuilder {
    config: PipelineConfig,
    sink: Option<Arc<dyn TrackSink>>,
    history: Option<Arc<dyn RawHistoryStore>>,
    retention_daemon: bool,
}

impl TrackingPipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            sink: None,
            history: None,
            retention_daemon: true,
        }
    }

    /// Where fused tracks are upserted. Defaults to a [`MemoryTrackStore`].
    pub fn with_sink(mut self, sink: Arc<dyn TrackSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Raw history backend. Defaults to a [`MemoryHistoryStore`].
    pub fn with_history_store(mut self, store: Arc<dyn RawHistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// Disable the scheduled retention pass. Manual passes still work.
    pub fn without_retention_daemon(mut self) -> Self {
        self.retention_daemon = false;
        self
    }

    /// Build every component and spawn the fusion workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> TrackingPipeline {
        let config = self.config;

        let bus = Arc::new(ObservationBus::new(config.bus.clone()));
        let health = Arc::new(SourceHealthTracker::new(config.health.clone()));
        for schedule in &config.providers {
            health.register(schedule.kind.name(), schedule.kind.entity_type());
        }

        let publisher: Arc<dyn DeadLetterPublisher> = bus.dead_letter_topic().clone();
        let errors = Arc::new(ErrorHandler::new(publisher));
        let engine = Arc::new(FusionEngine::new(config.fusion.clone(), health.clone()));
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(MemoryTrackStore::new()) as Arc<dyn TrackSink>);
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(MemoryHistoryStore::new()) as Arc<dyn RawHistoryStore>);
        let archiver = Arc::new(RawHistoryArchiver::new(config.lifecycle.clone(), history));
        let fusion_stats = Arc::new(FusionCounters::new());

        let ctx = FusionContext {
            bus: Arc::clone(&bus),
            engine,
            sink,
            errors: Arc::clone(&errors),
            stats: Arc::clone(&fusion_stats),
        };

        let fusion_shutdown = CancellationToken::new();
        let worker_count = config.fusion.worker_count(config.bus.partitions);
        let mut fusion_workers = Vec::new();
        for entity_type in EntityType::ALL {
            for index in 0..worker_count {
                let worker = FusionWorker::new(entity_type, index, worker_count, ctx.clone());
                fusion_workers.push(worker.spawn(fusion_shutdown.clone()));
            }
        }

        let retention_shutdown = CancellationToken::new();
        let retention_task = self.retention_daemon.then(|| {
            let daemon = archiver.retention_daemon();
            tokio::spawn(daemon.run(retention_shutdown.clone()))
        });

        info!(
            partitions = config.bus.partitions,
            workers_per_entity = worker_count,
            window_ms = config.fusion.window.as_millis() as u64,
            providers = config.providers.len(),
            "Tracking pipeline started"
        );

        TrackingPipeline {
            config,
            started_at: Utc::now(),
            bus,
            health,
            errors,
            archiver,
            fusion_stats,
            ingestion_shutdown: CancellationToken::new(),
            fusion_shutdown,
            retention_shutdown,
            ingestion: Mutex::new(Vec::new()),
            fusion_workers: tokio::sync::Mutex::new(fusion_workers),
            retention_task: Mutex::new(retention_task),
            stopped: AtomicBool::new(false),
        }
    }
}

/// Multi-source tracking pipeline.
pub struct TrackingPipeline {
    config: PipelineConfig,
    started_at: DateTime<Utc>,
    bus: Arc<ObservationBus>,
    health: Arc<SourceHealthTracker>,
    errors: Arc<ErrorHandler>,
    archiver: Arc<RawHistoryArchiver>,
    fusion_stats: Arc<FusionCounters>,
    ingestion_shutdown: CancellationToken,
    fusion_shutdown: CancellationToken,
    retention_shutdown: CancellationToken,
    ingestion: Mutex<Vec<IngestionTask>>,
    fusion_workers: tokio::sync::Mutex<Vec<FusionWorkerHandle>>,
    retention_task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl TrackingPipeline {
    pub fn builder(config: PipelineConfig) -> TrackingPipelineBuilder {
        TrackingPipelineBuilder::new(config)
    }

    /// Start with default sink and history store.
    pub fn start(config: PipelineConfig) -> Self {
        TrackingPipelineBuilder::new(config).start()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<ObservationBus> {
        &self.bus
    }

    pub fn health(&self) -> &Arc<SourceHealthTracker> {
        &self.health
    }

    pub fn archiver(&self) -> &Arc<RawHistoryArchiver> {
        &self.archiver
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Spawn an ingestion worker polling `feed`.
    ///
    /// The poll interval comes from the provider schedule.
    pub fn add_feed<F: ObservationFeed + 'static>(&self, feed: F) -> Result<(), PipelineError> {
        if !self.is_running() {
            return Err(PipelineError::ShutDown);
        }
        let provider = feed.provider().to_string();
        if !self.config.is_enabled(&provider) {
            return Err(PipelineError::ProviderDisabled(provider));
        }

        let mut ingestion = self.ingestion.lock();
        if ingestion.iter().any(|t| t.provider == provider) {
            return Err(PipelineError::DuplicateProvider(provider));
        }

        let worker = IngestionWorker::new(
            feed,
            Arc::clone(&self.bus),
            Arc::clone(&self.health),
            self.config.poll_interval(&provider),
        )
        .with_archiver(Arc::clone(&self.archiver));
        let counters = worker.counters();
        let join = worker.spawn(self.ingestion_shutdown.child_token());

        debug!(provider = %provider, "Ingestion worker registered");
        ingestion.push(IngestionTask {
            provider,
            counters,
            join,
        });
        Ok(())
    }

    /// Providers with a running ingestion worker.
    pub fn feeds(&self) -> Vec<String> {
        self.ingestion
            .lock()
            .iter()
            .map(|t| t.provider.clone())
            .collect()
    }

    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.health.snapshot_all()
    }

    pub fn fusion_stats(&self) -> FusionStats {
        self.fusion_stats.snapshot()
    }

    pub fn lifecycle_stats(&self) -> LifecycleStats {
        self.archiver.stats()
    }

    pub fn error_report(&self) -> ErrorReport {
        self.errors.report()
    }

    pub fn resilience_stats(&self) -> ResilienceStats {
        self.errors.stats()
    }

    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    /// Full status snapshot.
    pub fn status(&self) -> PipelineStatus {
        let ingestion = self
            .ingestion
            .lock()
            .iter()
            .map(|t| (t.provider.clone(), t.counters.snapshot()))
            .collect::<BTreeMap<_, _>>();

        PipelineStatus {
            started_at: self.started_at,
            captured_at: Utc::now(),
            providers: self.provider_health(),
            ingestion,
            bus: self.bus_stats(),
            fusion: self.fusion_stats(),
            lifecycle: self.lifecycle_stats(),
            resilience: self.resilience_stats(),
            errors: self.error_report(),
        }
    }

    /// Emit every open window now, without waiting for it to elapse.
    ///
    /// Returns the number of windows emitted across all workers.
    pub async fn trigger_fusion_pass(&self) -> usize {
        let workers = self.fusion_workers.lock().await;
        let mut emitted = 0;
        for handle in workers.iter() {
            match handle.flush_all().await {
                Some(n) => emitted += n,
                None => warn!(
                    entity_type = %handle.entity_type,
                    worker = handle.index,
                    "Fusion worker not running, skipped manual pass"
                ),
            }
        }
        self.fusion_stats.record_manual_pass();
        info!(windows = emitted, "Manual fusion pass finished");
        emitted
    }

    /// Run a retention pass now.
    pub fn trigger_retention(&self) -> CleanupReport {
        self.archiver.retention().run_cleanup(Utc::now())
    }

    /// Count what a retention pass would delete now.
    pub fn preview_retention(&self) -> CleanupPreview {
        self.archiver.retention().preview(Utc::now())
    }

    /// Delete a provider's raw history older than `days`.
    pub fn force_cleanup(&self, provider: &str, days: u32) -> usize {
        self.archiver
            .retention()
            .force_cleanup(provider, days, Utc::now())
    }

    /// Zero the error monitor and resilience counters.
    pub fn reset_error_metrics(&self) {
        self.errors.reset();
        info!("Error metrics reset");
    }

    /// Stop ingestion, drain fusion, and stop the retention daemon.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Tracking pipeline shutting down");

        self.bus.close();
        self.ingestion_shutdown.cancel();
        let tasks = std::mem::take(&mut *self.ingestion.lock());
        let (providers, joins): (Vec<_>, Vec<_>) =
            tasks.into_iter().map(|t| (t.provider, t.join)).unzip();
        for (provider, result) in providers.iter().zip(join_all(joins).await) {
            if let Err(e) = result {
                warn!(provider = %provider, error = %e, "Ingestion task failed");
            }
        }

        self.fusion_shutdown.cancel();
        let workers = std::mem::take(&mut *self.fusion_workers.lock().await);
        join_all(workers.into_iter().map(FusionWorkerHandle::join)).await;

        self.retention_shutdown.cancel();
        let retention = self.retention_task.lock().take();
        if let Some(join) = retention {
            if let Err(e) = join.await {
                warn!(error = %e, "Retention daemon task failed");
            }
        }

        let stats = self.fusion_stats.snapshot();
        info!(
            tracks_emitted = stats.tracks_emitted,
            observations = stats.observations_received,
            dead_lettered = self.errors.stats().dead_lettered,
            "Tracking pipeline stopped"
        );
    }
}

impl Drop for TrackingPipeline {
    fn drop(&mut self) {
        self.ingestion_shutdown.cancel();
        self.fusion_shutdown.cancel();
        self.retention_shutdown.cancel();
    }
}
