//! Partition-owning fusion workers.
//!
//! Worker *i* of an entity type consumes partition *p* of every raw topic
//! of that type where `p % worker_count == i`. Because every raw topic
//! hashes keys the same way, each identity is fused by exactly one worker.
//!
//! ```text
//!  raw-flightradar24-data p1 ─┐
//!  raw-adsbexchange-data  p1 ─┼─► mpsc ─► FusionWorker 1 ─► sink + fused topic
//!  raw-<new provider>     p1 ─┘   (topic watcher subscribes new topics)
//! ```
//!
//! Records are acknowledged only after the window they belong to has been
//! emitted, found to be a duplicate write, or dead-lettered.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::FusionEngine;
use super::sink::{SinkError, TrackSink};
use super::stats::FusionCounters;
use super::window::{Admission, ReadyWindow, WindowBuffer};
use crate::bus::{Delivery, ObservationBus};
use crate::observation::{CanonicalTrack, EntityType, RawObservation, TrackKey};
use crate::resilience::{ErrorHandler, FailedMessage, FailureOutcome};

/// Capacity of each worker's control channel.
const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// Lower bound on the flush ticker period.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Commands accepted by a running worker.
#[derive(Debug)]
pub enum FusionCommand {
    /// Emit every open window now, replying with the number emitted.
    FlushAll { reply: oneshot::Sender<usize> },
}

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct FusionContext {
    pub bus: Arc<ObservationBus>,
    pub engine: Arc<FusionEngine>,
    pub sink: Arc<dyn TrackSink>,
    pub errors: Arc<ErrorHandler>,
    pub stats: Arc<FusionCounters>,
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct FusionWorkerHandle {
    pub entity_type: EntityType,
    pub index: u32,
    control: mpsc::Sender<FusionCommand>,
    join: JoinHandle<()>,
}

impl FusionWorkerHandle {
    /// Ask the worker to emit all open windows. `None` if it has stopped.
    pub async fn flush_all(&self) -> Option<usize> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(FusionCommand::FlushAll { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Wait for the worker to finish draining.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!(
                entity_type = %self.entity_type,
                worker = self.index,
                error = %e,
                "Fusion worker task failed"
            );
        }
    }
}

/// One fusion worker.
pub struct FusionWorker {
    entity_type: EntityType,
    index: u32,
    worker_count: u32,
    ctx: FusionContext,
    windows: WindowBuffer<Delivery<RawObservation>>,
    subscribed: HashSet<String>,
    consumers: Vec<JoinHandle<()>>,
}

impl FusionWorker {
    pub fn new(entity_type: EntityType, index: u32, worker_count: u32, ctx: FusionContext) -> Self {
        let config = ctx.engine.config();
        let windows = WindowBuffer::new(config.window, config.late_retention);
        Self {
            entity_type,
            index,
            worker_count: worker_count.max(1),
            ctx,
            windows,
            subscribed: HashSet::new(),
            consumers: Vec::new(),
        }
    }

    /// Spawn the worker as an async task.
    pub fn spawn(self, shutdown: CancellationToken) -> FusionWorkerHandle {
        let (control, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let entity_type = self.entity_type;
        let index = self.index;
        let join = tokio::spawn(self.run(control_rx, shutdown));
        FusionWorkerHandle {
            entity_type,
            index,
            control,
            join,
        }
    }

    /// Run until cancelled, then drain and flush every open window.
    pub async fn run(
        mut self,
        mut control: mpsc::Receiver<FusionCommand>,
        shutdown: CancellationToken,
    ) {
        let capacity = self.ctx.bus.config().channel_capacity.max(1);
        let (tx, mut rx) = mpsc::channel::<Delivery<RawObservation>>(capacity);
        let consumer_token = shutdown.child_token();
        let mut topics = self.ctx.bus.watch_topics();
        self.subscribe_new_topics(&tx, &consumer_token);

        let period = self.ctx.engine.config().flush_interval.max(MIN_FLUSH_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            entity_type = %self.entity_type,
            worker = self.index,
            workers = self.worker_count,
            "Fusion worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(command) = control.recv() => self.handle_command(command),

                Ok(()) = topics.changed() => {
                    self.subscribe_new_topics(&tx, &consumer_token);
                }

                Some(delivery) = rx.recv() => self.admit(delivery),

                _ = ticker.tick() => {
                    self.flush_due();
                }
            }
        }

        // Pick up topics created just before the bus closed, then let every
        // consumer drain its partition to the end offset. The channel closes
        // once the last consumer has finished.
        self.subscribe_new_topics(&tx, &consumer_token);
        consumer_token.cancel();
        drop(tx);
        let mut drained = 0usize;
        while let Some(delivery) = rx.recv().await {
            self.admit(delivery);
            drained += 1;
        }
        for handle in self.consumers.drain(..) {
            let _ = handle.await;
        }
        let flushed = self.flush_all();

        tracing::info!(
            entity_type = %self.entity_type,
            worker = self.index,
            drained,
            flushed,
            "Fusion worker stopped"
        );
    }

    fn owns_partition(&self, partition: u32) -> bool {
        partition % self.worker_count == self.index
    }

    fn subscribe_new_topics(
        &mut self,
        tx: &mpsc::Sender<Delivery<RawObservation>>,
        token: &CancellationToken,
    ) {
        for raw in self.ctx.bus.raw_topics(self.entity_type) {
            if !self.subscribed.insert(raw.topic.name().to_string()) {
                continue;
            }
            let owned: Vec<u32> = (0..raw.topic.partition_count())
                .filter(|p| self.owns_partition(*p))
                .collect();
            for partition in &owned {
                if let Some(consumer) = raw.topic.consumer(*partition) {
                    self.consumers.push(consumer.start(tx.clone(), token.clone()));
                }
            }
            tracing::debug!(
                topic = raw.topic.name(),
                worker = self.index,
                partitions = ?owned,
                "Subscribed to raw topic"
            );
        }
    }

    fn handle_command(&mut self, command: FusionCommand) {
        match command {
            FusionCommand::FlushAll { reply } => {
                let emitted = self.flush_all();
                let _ = reply.send(emitted);
            }
        }
    }

    fn admit(&mut self, delivery: Delivery<RawObservation>) {
        self.ctx.stats.record_received();
        let opened_before = self.windows.open_count();

        match self.windows.admit(delivery, Utc::now()) {
            Admission::Buffered => {
                let opened = self.windows.open_count().saturating_sub(opened_before);
                self.ctx.stats.windows_opened(opened);
            }
            Admission::Duplicate(_) => {
                // The buffered copy carries the acknowledgement
                self.ctx.stats.record_duplicate();
            }
            Admission::AlreadyEmitted(delivery) => {
                self.ctx.stats.record_duplicate();
                delivery.ack();
            }
            Admission::Late {
                key,
                candidates,
                item,
            } => {
                self.ctx.stats.record_late_merge();
                tracing::debug!(
                    key = %key,
                    provider = %item.value.provider,
                    candidates = candidates.len(),
                    "Late observation, re-emitting window"
                );
                let result = self.emit(&key, &candidates);
                self.settle(&key, vec![item], result);
            }
            Admission::TooLate(delivery) => {
                self.ctx.stats.record_late_dropped();
                let flags = delivery.value.flags();
                if flags.any() {
                    tracing::warn!(
                        key = %delivery.key,
                        provider = %delivery.value.provider,
                        received_at = %delivery.value.received_at,
                        emergency = flags.emergency,
                        dangerous_cargo = flags.dangerous_cargo,
                        security_alert = flags.security_alert,
                        "Dropped late observation carrying a safety flag"
                    );
                } else {
                    tracing::trace!(key = %delivery.key, "Dropped late observation");
                }
                delivery.ack();
            }
        }
    }

    /// Seal and emit windows that have ended; evict expired retained sets.
    fn flush_due(&mut self) -> usize {
        let now = Utc::now();
        let ready = self.windows.seal_due(now);
        let emitted = self.emit_ready(ready);
        let evicted = self.windows.evict_expired(now);
        if emitted > 0 || evicted > 0 {
            tracing::debug!(
                entity_type = %self.entity_type,
                worker = self.index,
                emitted,
                evicted,
                open = self.windows.open_count(),
                retained = self.windows.retained_count(),
                "Fusion flush"
            );
        }
        emitted
    }

    /// Emit every open window immediately.
    fn flush_all(&mut self) -> usize {
        let ready = self.windows.drain_all();
        self.emit_ready(ready)
    }

    fn emit_ready(&mut self, ready: Vec<ReadyWindow<Delivery<RawObservation>>>) -> usize {
        self.ctx.stats.windows_closed(ready.len());
        let count = ready.len();
        for window in ready {
            let observations = window.observations();
            let result = self.emit(&window.key, &observations);
            self.settle(&window.key, window.candidates, result);
        }
        count
    }

    /// Fuse a candidate set and write the result downstream.
    fn emit(
        &self,
        key: &TrackKey,
        candidates: &[Arc<RawObservation>],
    ) -> Result<Option<CanonicalTrack>, SinkError> {
        let Some(track) = self.ctx.engine.fuse(key, candidates) else {
            self.ctx.stats.record_suppressed();
            return Ok(None);
        };

        self.ctx.sink.upsert(&track)?;
        self.ctx.stats.record_emitted(
            track.safety_only,
            track.position_disputed,
            track.low_confidence,
        );
        tracing::debug!(
            key = %key,
            primary = %track.primary_provider,
            providers = track.contributing_providers.len(),
            quality = track.fused_quality,
            disputed = track.position_disputed,
            "Track emitted"
        );
        self.ctx.bus.publish_track(track.clone());
        Ok(Some(track))
    }

    /// Acknowledge, redeliver or quarantine the deliveries behind a window.
    fn settle(
        &mut self,
        key: &TrackKey,
        deliveries: Vec<Delivery<RawObservation>>,
        result: Result<Option<CanonicalTrack>, SinkError>,
    ) {
        let error = match result {
            Ok(_) => {
                self.windows.retain(key, &deliveries);
                deliveries.iter().for_each(Delivery::ack);
                return;
            }
            Err(e) => e,
        };

        self.ctx.stats.record_sink_failure();
        let Some((first, rest)) = deliveries.split_first() else {
            return;
        };

        match self.ctx.errors.handle(&failed_message(first), &error) {
            FailureOutcome::Redeliver => {
                deliveries.iter().for_each(Delivery::nack);
            }
            FailureOutcome::Duplicate(_) => {
                self.windows.retain(key, &deliveries);
                deliveries.iter().for_each(Delivery::ack);
            }
            FailureOutcome::DeadLettered | FailureOutcome::DeadLetterFailed => {
                for delivery in rest {
                    self.ctx.errors.handle(&failed_message(delivery), &error);
                }
                deliveries.iter().for_each(Delivery::ack);
            }
        }
    }
}

impl std::fmt::Debug for FusionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionWorker")
            .field("entity_type", &self.entity_type)
            .field("index", &self.index)
            .field("worker_count", &self.worker_count)
            .field("windows", &self.windows)
            .finish_non_exhaustive()
    }
}

/// Dead-letter context for one delivery.
fn failed_message(delivery: &Delivery<RawObservation>) -> FailedMessage {
    FailedMessage {
        topic: delivery.topic.to_string(),
        partition: delivery.partition,
        offset: delivery.offset,
        key: Some(delivery.key.clone()),
        value: serde_json::to_string(delivery.value.as_ref()).ok(),
        attempts: delivery.attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use crate::fusion::{FusionConfig, MemoryTrackStore};
    use crate::observation::{Position, SafetyFlags};
    use crate::source_health::{SourceHealthConfig, SourceHealthTracker};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySink {
        failures_left: AtomicU32,
        message: &'static str,
        inner: MemoryTrackStore,
    }

    impl TrackSink for FlakySink {
        fn upsert(&self, track: &CanonicalTrack) -> Result<(), SinkError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(SinkError::Rejected {
                    key: track.key().to_string(),
                    message: self.message.to_string(),
                });
            }
            self.inner.upsert(track)
        }
    }

    struct Fixture {
        bus: Arc<ObservationBus>,
        ctx: FusionContext,
    }

    fn fixture(sink: Arc<dyn TrackSink>) -> Fixture {
        let bus = Arc::new(ObservationBus::new(BusConfig {
            partitions: 2,
            ..Default::default()
        }));
        let health = Arc::new(SourceHealthTracker::new(SourceHealthConfig::default()));
        let config = FusionConfig {
            // Long windows keep the ticker from sealing anything mid-test
            window: Duration::from_secs(3600),
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let ctx = FusionContext {
            bus: Arc::clone(&bus),
            engine: Arc::new(FusionEngine::new(config, health)),
            sink,
            errors: Arc::new(ErrorHandler::new(bus.dead_letter_topic().clone())),
            stats: Arc::new(FusionCounters::new()),
        };
        Fixture { bus, ctx }
    }

    /// One second into the current hour-long window.
    fn anchor() -> chrono::DateTime<Utc> {
        crate::fusion::window_start(Utc::now(), 3_600_000) + chrono::Duration::seconds(1)
    }

    fn observation(provider: &str, lat: f64, flags: SafetyFlags) -> RawObservation {
        RawObservation::new(
            EntityType::Aircraft,
            provider,
            "ABC123",
            Position::new(lat, 106.0),
            0.9,
            anchor(),
        )
        .with_flags(flags)
    }

    async fn settle_deliveries() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn spawn_all(fx: &Fixture, shutdown: &CancellationToken) -> Vec<FusionWorkerHandle> {
        (0..2)
            .map(|i| {
                FusionWorker::new(EntityType::Aircraft, i, 2, fx.ctx.clone()).spawn(shutdown.clone())
            })
            .collect()
    }

    #[tokio::test]
    async fn test_flush_emits_one_track_and_commits() {
        let store = Arc::new(MemoryTrackStore::new());
        let fx = fixture(store.clone());
        let shutdown = CancellationToken::new();
        let workers = spawn_all(&fx, &shutdown);

        fx.bus
            .publish(observation("flightradar24", 10.0, SafetyFlags::default()))
            .unwrap();
        fx.bus
            .publish(observation("adsbexchange", 10.01, SafetyFlags::EMERGENCY))
            .unwrap();
        settle_deliveries().await;

        let mut emitted = 0;
        for worker in &workers {
            emitted += worker.flush_all().await.unwrap();
        }
        assert_eq!(emitted, 1);
        assert_eq!(store.len(), 1);
        let track = &store.all()[0];
        assert_eq!(track.primary_provider, "flightradar24");
        assert!(track.safety.emergency);
        assert_eq!(fx.bus.raw_lag(), 0, "all deliveries acknowledged");
        assert_eq!(fx.bus.stats().fused_published, 1);

        shutdown.cancel();
        for worker in workers {
            worker.join().await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_open_windows() {
        let store = Arc::new(MemoryTrackStore::new());
        let fx = fixture(store.clone());
        let shutdown = CancellationToken::new();
        let workers = spawn_all(&fx, &shutdown);

        fx.bus
            .publish(observation("flightradar24", 10.0, SafetyFlags::default()))
            .unwrap();
        settle_deliveries().await;

        fx.bus.close();
        shutdown.cancel();
        for worker in workers {
            worker.join().await;
        }
        assert_eq!(store.len(), 1);
        assert_eq!(fx.bus.raw_lag(), 0);
    }

    #[tokio::test]
    async fn test_late_record_reemits_same_key() {
        let store = Arc::new(MemoryTrackStore::new());
        let fx = fixture(store.clone());
        let shutdown = CancellationToken::new();
        let workers = spawn_all(&fx, &shutdown);

        fx.bus
            .publish(observation("adsbexchange", 10.0, SafetyFlags::default()))
            .unwrap();
        settle_deliveries().await;
        for worker in &workers {
            worker.flush_all().await;
        }
        assert_eq!(store.all()[0].primary_provider, "adsbexchange");

        fx.bus
            .publish(observation("flightradar24", 10.0, SafetyFlags::default()))
            .unwrap();
        settle_deliveries().await;

        assert_eq!(store.len(), 1, "same window key is upserted");
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.all()[0].primary_provider, "flightradar24");
        assert_eq!(fx.ctx.stats.snapshot().late_merges, 1);

        shutdown.cancel();
        for worker in workers {
            worker.join().await;
        }
    }

    #[tokio::test]
    async fn test_duplicate_write_is_acked_without_dead_letter() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU32::new(1),
            message: "duplicate key value violates unique constraint \"aircraft_hexident_key\"",
            inner: MemoryTrackStore::new(),
        });
        let fx = fixture(sink);
        let shutdown = CancellationToken::new();
        let workers = spawn_all(&fx, &shutdown);

        fx.bus
            .publish(observation("flightradar24", 10.0, SafetyFlags::default()))
            .unwrap();
        settle_deliveries().await;
        for worker in &workers {
            worker.flush_all().await;
        }

        assert!(fx.bus.dead_letter_topic().is_empty());
        assert_eq!(fx.ctx.errors.stats().duplicates_ignored, 1);
        assert_eq!(fx.bus.raw_lag(), 0);

        shutdown.cancel();
        for worker in workers {
            worker.join().await;
        }
    }

    #[tokio::test]
    async fn test_unclassified_failure_is_dead_lettered_and_acked() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU32::new(1),
            message: "value too long for column \"callsign\"",
            inner: MemoryTrackStore::new(),
        });
        let fx = fixture(sink);
        let shutdown = CancellationToken::new();
        let workers = spawn_all(&fx, &shutdown);

        fx.bus
            .publish(observation("flightradar24", 10.0, SafetyFlags::default()))
            .unwrap();
        settle_deliveries().await;
        for worker in &workers {
            worker.flush_all().await;
        }

        assert_eq!(fx.bus.dead_letter_topic().len(), 1);
        let (_, record) = &fx.bus.dead_letter_topic().records()[0];
        assert_eq!(record.value.original_topic, "raw-flightradar24-data");
        assert_eq!(record.value.error_type, "UNCLASSIFIED");
        assert_eq!(fx.bus.raw_lag(), 0);

        shutdown.cancel();
        for worker in workers {
            worker.join().await;
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_redelivered() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU32::new(1),
            message: "connection refused",
            inner: MemoryTrackStore::new(),
        });
        let fx = fixture(sink.clone());
        let shutdown = CancellationToken::new();
        let workers = spawn_all(&fx, &shutdown);

        fx.bus
            .publish(observation("flightradar24", 10.0, SafetyFlags::default()))
            .unwrap();
        settle_deliveries().await;
        for worker in &workers {
            worker.flush_all().await;
        }
        assert_eq!(fx.bus.raw_lag(), 1, "left uncommitted");

        // Redelivered record lands in a fresh window
        settle_deliveries().await;
        for worker in &workers {
            worker.flush_all().await;
        }
        assert_eq!(sink.inner.len(), 1);
        assert_eq!(fx.bus.raw_lag(), 0);
        assert!(fx.bus.dead_letter_topic().is_empty());

        shutdown.cancel();
        for worker in workers {
            worker.join().await;
        }
    }

    #[tokio::test]
    async fn test_failed_message_carries_payload() {
        let topic = Arc::new(crate::bus::Topic::new("raw-flightradar24-data", 1));
        topic.publish(
            "aircraft:ABC123",
            observation("flightradar24", 10.0, SafetyFlags::default()),
        );
        let (tx, mut rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let handle = topic.consumer(0).unwrap().start(tx, token.clone());
        let delivery = rx.recv().await.unwrap();
        token.cancel();
        handle.await.unwrap();

        let message = failed_message(&delivery);
        assert_eq!(message.key.as_deref(), Some("aircraft:ABC123"));
        assert!(message.value.unwrap().contains("\"provider\":\"flightradar24\""));
        assert_eq!(message.attempts, 1);
    }
}
