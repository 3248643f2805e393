//! Integration tests for the end-to-end tracking pipeline.
//!
//! These tests verify the complete flow including:
//! - Replay feeds through ingestion, the bus and fusion workers
//! - Raw history archiving alongside fusion
//! - Duplicate write suppression vs dead-letter routing
//! - Graceful shutdown

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use trackfusion::fusion::{MemoryTrackStore, SinkError, TrackSink};
use trackfusion::observation::{CanonicalTrack, EntityType, Position, RawObservation};
use trackfusion::pipeline::{PipelineConfig, TrackingPipeline};
use trackfusion::provider::ReplayFeed;

// =============================================================================
// Test Helpers
// =============================================================================

const CAPTURE: &str = r#"# recorded provider traffic
{"entityType":"aircraft","provider":"flightradar24","identity":"ABC123","latitude":10.0,"longitude":106.0,"quality":0.9,"receivedAt":"2024-06-01T12:00:00Z"}
{"entityType":"aircraft","provider":"adsbexchange","identity":"ABC123","latitude":10.01,"longitude":106.02,"quality":0.8,"receivedAt":"2024-06-01T12:00:01Z","attributes":{"emergency":true}}
{"entityType":"vessel","provider":"marinetraffic","identity":"574123456","latitude":22.3,"longitude":114.1,"quality":0.7,"receivedAt":"2024-06-01T12:00:02Z"}
"#;

/// Long windows so only manual passes and shutdown emit tracks.
fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.bus.partitions = 2;
    config.fusion.window = Duration::from_secs(600);
    config.fusion.flush_interval = Duration::from_millis(20);
    config
}

fn write_capture(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn observation(identity: &str) -> RawObservation {
    RawObservation::new(
        EntityType::Aircraft,
        "flightradar24",
        identity,
        Position::new(51.47, -0.45),
        0.9,
        Utc::now(),
    )
}

/// Poll `check` after manual fusion passes until it holds or attempts run out.
async fn eventually<F: Fn() -> bool>(pipeline: &TrackingPipeline, check: F) -> bool {
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipeline.trigger_fusion_pass().await;
        if check() {
            return true;
        }
    }
    false
}

/// Sink that rejects every write with a fixed message.
struct RejectingSink {
    message: &'static str,
    attempts: AtomicU64,
}

impl RejectingSink {
    fn new(message: &'static str) -> Self {
        Self {
            message,
            attempts: AtomicU64::new(0),
        }
    }
}

impl TrackSink for RejectingSink {
    fn upsert(&self, track: &CanonicalTrack) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Rejected {
            key: track.key().to_string(),
            message: self.message.to_string(),
        })
    }
}

// =============================================================================
// Replay
// =============================================================================

#[tokio::test]
async fn test_replay_capture_produces_fused_tracks() {
    let capture = write_capture(CAPTURE);
    let store = Arc::new(MemoryTrackStore::new());
    let pipeline = TrackingPipeline::builder(test_config())
        .with_sink(store.clone())
        .without_retention_daemon()
        .start();

    let feeds = ReplayFeed::load_all(capture.path()).unwrap();
    assert_eq!(feeds.len(), 3);
    for feed in feeds {
        pipeline.add_feed(feed).unwrap();
    }

    let fused = eventually(&pipeline, || {
        let aircraft = store.history(EntityType::Aircraft, "ABC123");
        let vessels = store.history(EntityType::Vessel, "574123456");
        aircraft
            .last()
            .is_some_and(|t| t.contributing_providers.len() == 2)
            && !vessels.is_empty()
    })
    .await;
    assert!(fused, "tracks were not fused in time");

    let track = store
        .history(EntityType::Aircraft, "ABC123")
        .pop()
        .unwrap();
    assert_eq!(track.primary_provider, "flightradar24");
    assert_eq!(track.latitude, 10.0);
    assert!(track.safety.emergency);
    assert!(track.position_disputed);

    let status = pipeline.status();
    assert_eq!(status.ingestion.len(), 3);
    assert_eq!(status.ingestion["flightradar24"].published, 1);
    assert_eq!(status.bus.invalid_total, 0);
    assert_eq!(status.lifecycle.filter.stored, 3);
    assert_eq!(status.lifecycle.retention.stored_records, 3);

    let fr24 = status
        .providers
        .iter()
        .find(|p| p.provider == "flightradar24")
        .unwrap();
    assert!(fr24.successful_requests >= 1);
    assert!(!fr24.circuit_open);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_invalid_replay_records_are_counted_not_fused() {
    let capture = write_capture(
        r#"{"entityType":"aircraft","provider":"flightradar24","identity":"BAD1","latitude":95.0,"longitude":106.0,"quality":0.9,"receivedAt":"2024-06-01T12:00:00Z"}
{"entityType":"aircraft","provider":"flightradar24","identity":"GOOD1","latitude":10.0,"longitude":106.0,"quality":0.9,"receivedAt":"2024-06-01T12:00:00Z"}
"#,
    );
    let store = Arc::new(MemoryTrackStore::new());
    let pipeline = TrackingPipeline::builder(test_config())
        .with_sink(store.clone())
        .without_retention_daemon()
        .start();

    for feed in ReplayFeed::load_all(capture.path()).unwrap() {
        pipeline.add_feed(feed).unwrap();
    }

    assert!(eventually(&pipeline, || !store.is_empty()).await);

    assert!(store.history(EntityType::Aircraft, "BAD1").is_empty());
    assert_eq!(pipeline.bus().invalid_count("flightradar24"), 1);
    assert_eq!(pipeline.lifecycle_stats().retention.stored_records, 1);

    pipeline.shutdown().await;
}

// =============================================================================
// Error routing
// =============================================================================

#[tokio::test]
async fn test_duplicate_write_is_acknowledged_without_dead_letter() {
    let sink = Arc::new(RejectingSink::new(
        r#"duplicate key value violates unique constraint "aircraft_tracks_pkey""#,
    ));
    let pipeline = TrackingPipeline::builder(test_config())
        .with_sink(sink.clone())
        .without_retention_daemon()
        .start();

    pipeline.bus().publish(observation("DUP001")).unwrap();

    let handled = eventually(&pipeline, || pipeline.resilience_stats().duplicates_ignored >= 1).await;
    assert!(handled);

    let stats = pipeline.resilience_stats();
    assert_eq!(stats.dead_lettered, 0);
    assert!(pipeline.bus().dead_letter_topic().is_empty());
    assert_eq!(pipeline.error_report().health.dead_letter_count, 0);
    assert!(sink.attempts.load(Ordering::SeqCst) >= 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_unclassified_failure_is_dead_lettered_and_acknowledged() {
    let sink = Arc::new(RejectingSink::new("column heading_deg has unexpected type"));
    let pipeline = TrackingPipeline::builder(test_config())
        .with_sink(sink)
        .without_retention_daemon()
        .start();

    pipeline.bus().publish(observation("DLQ001")).unwrap();

    let routed = eventually(&pipeline, || pipeline.resilience_stats().dead_lettered >= 1).await;
    assert!(routed);

    let letters = pipeline.bus().dead_letter_topic().records();
    assert_eq!(letters.len(), 1);
    let envelope = &letters[0].1.value;
    assert_eq!(envelope.error_type, "UNCLASSIFIED");
    assert!(envelope.original_topic.starts_with("raw-flightradar24"));
    assert!(envelope.error_message.contains("unexpected type"));

    let report = pipeline.error_report();
    assert!(report.total_errors >= 1);
    assert_eq!(
        report.most_common_error_type.as_ref().map(|(t, _)| t.as_str()),
        Some("UNCLASSIFIED")
    );
    assert!(eventually(&pipeline, || pipeline.bus().raw_lag() == 0).await);

    pipeline.reset_error_metrics();
    assert_eq!(pipeline.error_report().total_errors, 0);

    pipeline.shutdown().await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_emits_open_windows_once() {
    let store = Arc::new(MemoryTrackStore::new());
    let pipeline = TrackingPipeline::builder(test_config())
        .with_sink(store.clone())
        .without_retention_daemon()
        .start();

    pipeline.bus().publish(observation("SHUT01")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.is_empty());

    pipeline.shutdown().await;

    assert_eq!(store.history(EntityType::Aircraft, "SHUT01").len(), 1);
    assert!(!pipeline.bus().is_accepting());
    assert_eq!(pipeline.fusion_stats().tracks_emitted, 1);
}

#[tokio::test]
async fn test_shutdown_fuses_unread_backlog() {
    const BACKLOG: usize = 2000;

    let mut config = test_config();
    config.bus.channel_capacity = 16;
    let store = Arc::new(MemoryTrackStore::new());
    let pipeline = TrackingPipeline::builder(config)
        .with_sink(store.clone())
        .without_retention_daemon()
        .start();

    for i in 0..BACKLOG {
        pipeline
            .bus()
            .publish(observation(&format!("BKL{:04}", i)))
            .unwrap();
    }

    // No settling time: most of the backlog is still in the partition logs
    pipeline.shutdown().await;

    assert_eq!(pipeline.bus().raw_lag(), 0);
    assert_eq!(pipeline.fusion_stats().tracks_emitted, BACKLOG as u64);
    for i in 0..BACKLOG {
        let identity = format!("BKL{:04}", i);
        assert_eq!(
            store.history(EntityType::Aircraft, &identity).len(),
            1,
            "missing track for {}",
            identity
        );
    }
}
