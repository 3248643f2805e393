//! Integration tests for fusion decisions against live source health.
//!
//! These tests drive `FusionEngine` with a real `SourceHealthTracker` and
//! verify:
//! - The multi-provider aircraft scenario (priority, safety union, dispute)
//! - Safety-only emission for circuit-open vessel providers
//! - Circuit exclusion and recovery
//! - Order independence of the candidate set

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use trackfusion::fusion::{FusionConfig, FusionEngine};
use trackfusion::observation::{EntityType, Position, RawObservation, SafetyFlags};
use trackfusion::source_health::{SourceHealthConfig, SourceHealthTracker, SourceStatus};

// =============================================================================
// Test Helpers
// =============================================================================

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 5).unwrap()
}

fn setup() -> (Arc<SourceHealthTracker>, FusionEngine) {
    let health = Arc::new(SourceHealthTracker::new(SourceHealthConfig::default()));
    let engine = FusionEngine::new(FusionConfig::default(), health.clone());
    (health, engine)
}

fn aircraft(provider: &str, lat: f64, lon: f64, quality: f64) -> Arc<RawObservation> {
    Arc::new(RawObservation::new(
        EntityType::Aircraft,
        provider,
        "ABC123",
        Position::new(lat, lon),
        quality,
        at(),
    ))
}

fn vessel(provider: &str, flags: SafetyFlags) -> Arc<RawObservation> {
    Arc::new(
        RawObservation::new(
            EntityType::Vessel,
            provider,
            "574123456",
            Position::new(22.3, 114.1),
            0.7,
            at(),
        )
        .with_flags(flags),
    )
}

fn abc123_candidates() -> Vec<Arc<RawObservation>> {
    let fr24 = aircraft("flightradar24", 10.0, 106.0, 0.9);
    let mut adsbx = (*aircraft("adsbexchange", 10.01, 106.02, 0.8)).clone();
    adsbx.attributes.flags = SafetyFlags::EMERGENCY;
    vec![fr24, Arc::new(adsbx)]
}

fn open_circuit(health: &SourceHealthTracker, provider: &str) {
    let threshold = health.config().circuit_breaker_threshold;
    for _ in 0..threshold {
        health.record_failure(provider);
    }
    assert!(!health.is_available(provider));
}

// =============================================================================
// Aircraft scenario
// =============================================================================

#[test]
fn test_abc123_priority_safety_and_dispute() {
    let (_health, engine) = setup();
    let candidates = abc123_candidates();
    let key = engine.window_key(&candidates[0]);

    let track = engine.fuse(&key, &candidates).expect("track emitted");

    assert_eq!(track.identity, "ABC123");
    assert_eq!(track.latitude, 10.0);
    assert_eq!(track.longitude, 106.0);
    assert_eq!(track.primary_provider, "flightradar24");
    assert!(track.safety.emergency);
    assert!(track.position_disputed);
    assert!(!track.safety_only);
    assert_eq!(track.contributing_providers.len(), 2);
    assert!((track.fused_quality - 1.0).abs() < 1e-9);
    assert_eq!(track.window_start, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
    assert_eq!(track.window_end, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 30).unwrap());
}

#[test]
fn test_priority_beats_quality() {
    let (_health, engine) = setup();
    let candidates = vec![
        aircraft("adsbexchange", 10.0, 106.0, 0.99),
        aircraft("flightradar24", 10.0, 106.0, 0.9),
    ];
    let key = engine.window_key(&candidates[0]);

    let track = engine.fuse(&key, &candidates).unwrap();
    assert_eq!(track.primary_provider, "flightradar24");
    assert!(!track.position_disputed);
}

#[test]
fn test_candidate_order_does_not_change_track() {
    let (_health, engine) = setup();
    let forward = abc123_candidates();
    let mut reversed = forward.clone();
    reversed.reverse();
    let key = engine.window_key(&forward[0]);

    assert_eq!(engine.fuse(&key, &forward), engine.fuse(&key, &reversed));
}

// =============================================================================
// Circuit breaker
// =============================================================================

#[test]
fn test_open_circuit_excludes_provider_until_success() {
    let (health, engine) = setup();
    let candidates = abc123_candidates();
    let key = engine.window_key(&candidates[0]);

    open_circuit(&health, "flightradar24");
    assert_eq!(health.status("flightradar24"), SourceStatus::CircuitOpen);

    let track = engine.fuse(&key, &candidates).unwrap();
    assert_eq!(track.primary_provider, "adsbexchange");
    assert_eq!(track.latitude, 10.01);
    assert!(track.safety.emergency);

    health.record_success("flightradar24", 120);
    let track = engine.fuse(&key, &candidates).unwrap();
    assert_eq!(track.primary_provider, "flightradar24");
}

#[test]
fn test_excluded_provider_still_contributes_safety_flag() {
    let (health, engine) = setup();
    let candidates = abc123_candidates();
    let key = engine.window_key(&candidates[0]);

    open_circuit(&health, "adsbexchange");

    let track = engine.fuse(&key, &candidates).unwrap();
    assert_eq!(track.primary_provider, "flightradar24");
    assert!(track.safety.emergency);
    assert!(!track.position_disputed);
}

// =============================================================================
// Vessel safety-only scenario
// =============================================================================

#[test]
fn test_mmsi_from_open_circuit_provider_without_flags_is_dropped() {
    let (health, engine) = setup();
    open_circuit(&health, "marinetraffic");

    let candidates = vec![vessel("marinetraffic", SafetyFlags::default())];
    let key = engine.window_key(&candidates[0]);

    assert!(engine.fuse(&key, &candidates).is_none());
}

#[test]
fn test_mmsi_from_open_circuit_provider_with_flag_is_safety_only() {
    let (health, engine) = setup();
    open_circuit(&health, "marinetraffic");

    let flags = SafetyFlags {
        dangerous_cargo: true,
        ..SafetyFlags::default()
    };
    let candidates = vec![vessel("marinetraffic", flags)];
    let key = engine.window_key(&candidates[0]);

    let track = engine.fuse(&key, &candidates).expect("safety-only track");
    assert_eq!(track.identity, "574123456");
    assert_eq!(track.entity_type, EntityType::Vessel);
    assert!(track.safety_only);
    assert!(track.safety.dangerous_cargo);
    assert!(!track.safety.emergency);
}

#[test]
fn test_safety_only_emission_can_be_disabled() {
    let health = Arc::new(SourceHealthTracker::new(SourceHealthConfig::default()));
    let config = FusionConfig {
        emit_safety_only: false,
        ..FusionConfig::default()
    };
    let engine = FusionEngine::new(config, health.clone());
    open_circuit(&health, "marinetraffic");

    let candidates = vec![vessel("marinetraffic", SafetyFlags::EMERGENCY)];
    let key = engine.window_key(&candidates[0]);

    assert!(engine.fuse(&key, &candidates).is_none());
}

#[test]
fn test_single_low_quality_candidate_is_low_confidence() {
    let (_health, engine) = setup();
    let candidates = vec![aircraft("adsbexchange", 10.0, 106.0, 0.3)];
    let key = engine.window_key(&candidates[0]);

    let track = engine.fuse(&key, &candidates).unwrap();
    assert!(track.low_confidence);
    assert!((track.fused_quality - 0.3).abs() < 1e-9);
}
