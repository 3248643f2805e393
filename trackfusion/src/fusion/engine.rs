//! The merge step: one candidate set in, at most one canonical track out.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use super::config::{
    FusionConfig, AGREEMENT_BONUS_PER_SOURCE, MAX_AGREEMENT_BONUS, STALENESS_PENALTY,
};
use super::scoring::{rank, window_end, window_start, Ranked};
use crate::observation::{CanonicalTrack, RawObservation, SafetyFlags, TrackKey};
use crate::source_health::SourceHealthView;

/// Merges candidate observations into canonical tracks.
///
/// Pure with respect to its inputs and the health view: the same candidate
/// set under the same provider states yields the same track in any order.
pub struct FusionEngine {
    config: FusionConfig,
    health: Arc<dyn SourceHealthView>,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, health: Arc<dyn SourceHealthView>) -> Self {
        Self { config, health }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Upsert key of the window an observation falls into.
    pub fn window_key(&self, observation: &RawObservation) -> TrackKey {
        TrackKey {
            entity_type: observation.entity_type,
            identity: observation.identity.trim().to_string(),
            window_start: window_start(observation.received_at, self.config.window_ms()),
        }
    }

    /// Fuse one window's candidates.
    ///
    /// Returns `None` when no eligible candidate exists and no safety flag
    /// was raised by an excluded one.
    pub fn fuse<C: AsRef<RawObservation>>(
        &self,
        key: &TrackKey,
        candidates: &[C],
    ) -> Option<CanonicalTrack> {
        let candidates: Vec<&RawObservation> = candidates
            .iter()
            .map(AsRef::as_ref)
            .filter(|obs| obs.entity_type == key.entity_type)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // Provider state is read once so every candidate of a provider is
        // judged against the same snapshot.
        let mut states: HashMap<&str, (bool, u32)> = HashMap::new();
        for obs in &candidates {
            states.entry(obs.provider.as_str()).or_insert_with(|| {
                (
                    self.health.is_available(&obs.provider),
                    self.health.priority_rank(&obs.provider),
                )
            });
        }

        let safety = candidates
            .iter()
            .fold(SafetyFlags::default(), |acc, obs| acc.union(obs.flags()));

        let mut eligible: Vec<Ranked<'_>> = Vec::with_capacity(candidates.len());
        let mut excluded: Vec<Ranked<'_>> = Vec::new();
        for obs in &candidates {
            let (available, priority) = states[obs.provider.as_str()];
            let ranked = Ranked {
                observation: obs,
                priority,
            };
            if available {
                eligible.push(ranked);
            } else {
                excluded.push(ranked);
            }
        }

        if eligible.is_empty() {
            return self.safety_only(key, excluded, safety);
        }

        rank(&mut eligible);
        let primary = eligible[0].observation;
        let primary_position = primary.position();

        let position_disputed = eligible[1..].iter().any(|other| {
            primary_position.distance_m(&other.observation.position())
                > self.config.position_tolerance_m
        });
        if position_disputed {
            tracing::debug!(
                key = %key,
                primary = %primary.provider,
                "Position disputed, keeping primary"
            );
        }

        let mut attributes = primary.attributes.clone();
        for other in &eligible[1..] {
            attributes.fill_missing_from(&other.observation.attributes);
        }
        attributes.flags = safety;

        let contributing_providers: BTreeSet<String> = candidates
            .iter()
            .map(|obs| obs.provider.clone())
            .collect();

        let low_confidence =
            eligible.len() == 1 && primary.quality < self.config.quality_threshold;
        let window_end = window_end(key.window_start, self.config.window_ms());

        let track = CanonicalTrack {
            entity_type: key.entity_type,
            identity: key.identity.clone(),
            latitude: primary.latitude,
            longitude: primary.longitude,
            attributes,
            primary_provider: primary.provider.clone(),
            contributing_providers,
            fused_quality: self.fused_quality(primary, eligible.len(), window_end),
            safety,
            window_start: key.window_start,
            window_end,
            position_disputed,
            low_confidence,
            safety_only: false,
        };

        tracing::trace!(
            key = %key,
            primary = %track.primary_provider,
            candidates = candidates.len(),
            eligible = eligible.len(),
            quality = track.fused_quality,
            "Window fused"
        );
        Some(track)
    }

    /// Track built only from circuit-open providers because one of them
    /// raised a safety flag.
    fn safety_only(
        &self,
        key: &TrackKey,
        mut excluded: Vec<Ranked<'_>>,
        safety: SafetyFlags,
    ) -> Option<CanonicalTrack> {
        if !safety.any() || !self.config.emit_safety_only {
            tracing::trace!(key = %key, "No eligible candidates, window suppressed");
            return None;
        }

        rank(&mut excluded);
        let primary = excluded.first()?.observation;
        let mut attributes = primary.attributes.clone();
        for other in &excluded[1..] {
            attributes.fill_missing_from(&other.observation.attributes);
        }
        attributes.flags = safety;

        tracing::warn!(
            key = %key,
            provider = %primary.provider,
            emergency = safety.emergency,
            dangerous_cargo = safety.dangerous_cargo,
            security_alert = safety.security_alert,
            "Emitting safety-only track from circuit-open provider"
        );

        Some(CanonicalTrack {
            entity_type: key.entity_type,
            identity: key.identity.clone(),
            latitude: primary.latitude,
            longitude: primary.longitude,
            attributes,
            primary_provider: primary.provider.clone(),
            contributing_providers: excluded
                .iter()
                .map(|r| r.observation.provider.clone())
                .collect(),
            fused_quality: primary.quality,
            safety,
            window_start: key.window_start,
            window_end: window_end(key.window_start, self.config.window_ms()),
            position_disputed: false,
            low_confidence: true,
            safety_only: true,
        })
    }

    fn fused_quality(
        &self,
        primary: &RawObservation,
        eligible: usize,
        window_end: chrono::DateTime<chrono::Utc>,
    ) -> f64 {
        let mut quality = primary.quality;
        if eligible > 1 {
            let bonus = (eligible as f64 * AGREEMENT_BONUS_PER_SOURCE).min(MAX_AGREEMENT_BONUS);
            quality = (quality + bonus).min(1.0);
        }

        let staleness = self.config.staleness_for(primary.entity_type);
        let age = window_end - primary.received_at;
        if age > ChronoDuration::from_std(staleness).unwrap_or(ChronoDuration::MAX) {
            quality *= STALENESS_PENALTY;
        }
        quality
    }
}

impl std::fmt::Debug for FusionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Attributes, EntityType, Position};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// Fixed provider states for deterministic tests.
    struct FixedHealth {
        open: HashSet<String>,
    }

    impl FixedHealth {
        fn all_closed() -> Arc<Self> {
            Arc::new(Self {
                open: HashSet::new(),
            })
        }

        fn with_open(providers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                open: providers.iter().map(|p| p.to_string()).collect(),
            })
        }
    }

    impl SourceHealthView for FixedHealth {
        fn is_available(&self, provider: &str) -> bool {
            !self.open.contains(provider)
        }

        fn priority_rank(&self, provider: &str) -> u32 {
            match provider {
                "flightradar24" | "marinetraffic" => 1,
                "adsbexchange" | "vesselfinder" => 2,
                "marinetrafficv2" => 3,
                "chinaports" => 4,
                _ => 999,
            }
        }
    }

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_010 + secs, 0).unwrap()
    }

    fn aircraft(provider: &str, q: f64, lat: f64, lon: f64) -> Arc<RawObservation> {
        Arc::new(RawObservation::new(
            EntityType::Aircraft,
            provider,
            "ABC123",
            Position::new(lat, lon),
            q,
            at(5),
        ))
    }

    fn engine(health: Arc<dyn SourceHealthView>) -> FusionEngine {
        FusionEngine::new(FusionConfig::default(), health)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Primary selection
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_abc123_scenario() {
        let engine = engine(FixedHealth::all_closed());
        let fr24 = aircraft("flightradar24", 0.9, 10.0, 106.0);
        let adsb = Arc::new(
            RawObservation::clone(&aircraft("adsbexchange", 0.8, 10.01, 106.02))
                .with_flags(SafetyFlags::EMERGENCY),
        );
        let key = engine.window_key(&fr24);

        let track = engine.fuse(&key, &[fr24, adsb]).unwrap();
        assert_eq!((track.latitude, track.longitude), (10.0, 106.0));
        assert_eq!(track.primary_provider, "flightradar24");
        assert!(track.safety.emergency);
        assert!(track.attributes.flags.emergency);
        assert!(track.position_disputed);
        assert_eq!(track.contributing_providers.len(), 2);
        assert!(!track.low_confidence);
    }

    #[test]
    fn test_zero_candidates_emit_nothing() {
        let engine = engine(FixedHealth::all_closed());
        let obs = aircraft("flightradar24", 0.9, 10.0, 106.0);
        let key = engine.window_key(&obs);
        let none: [Arc<RawObservation>; 0] = [];
        assert!(engine.fuse(&key, &none).is_none());
    }

    #[test]
    fn test_single_low_quality_candidate_is_low_confidence() {
        let engine = engine(FixedHealth::all_closed());
        let obs = aircraft("adsbexchange", 0.3, 10.0, 106.0);
        let key = engine.window_key(&obs);
        let track = engine.fuse(&key, &[obs]).unwrap();
        assert!(track.low_confidence);
        assert_eq!(track.fused_quality, 0.3);
    }

    #[test]
    fn test_close_candidates_are_not_disputed() {
        let engine = engine(FixedHealth::all_closed());
        let a = aircraft("flightradar24", 0.9, 10.0, 106.0);
        let b = aircraft("adsbexchange", 0.8, 10.0005, 106.0);
        let key = engine.window_key(&a);
        assert!(!engine.fuse(&key, &[a, b]).unwrap().position_disputed);
    }

    #[test]
    fn test_gap_fill_from_lower_ranked() {
        let engine = engine(FixedHealth::all_closed());
        let a = aircraft("flightradar24", 0.9, 10.0, 106.0);
        let b = Arc::new(
            RawObservation::clone(&aircraft("adsbexchange", 0.8, 10.0, 106.0)).with_attributes(
                Attributes {
                    callsign: Some("VJC123".into()),
                    altitude_ft: Some(35_000.0),
                    ..Default::default()
                },
            ),
        );
        let key = engine.window_key(&a);
        let track = engine.fuse(&key, &[a, b]).unwrap();
        assert_eq!(track.attributes.callsign.as_deref(), Some("VJC123"));
        assert_eq!(track.attributes.altitude_ft, Some(35_000.0));
    }

    #[test]
    fn test_agreement_bonus_is_capped() {
        let engine = engine(FixedHealth::all_closed());
        let a = aircraft("flightradar24", 0.7, 10.0, 106.0);
        let b = aircraft("adsbexchange", 0.6, 10.0, 106.0);
        let key = engine.window_key(&a);
        let track = engine.fuse(&key, &[a.clone(), b]).unwrap();
        assert!((track.fused_quality - 0.8).abs() < 1e-9);

        let many: Vec<Arc<RawObservation>> = (0..6)
            .map(|i| aircraft(&format!("p{}", i), 0.95, 10.0, 106.0))
            .collect();
        let track = engine.fuse(&key, &many).unwrap();
        assert_eq!(track.fused_quality, 1.0);
    }

    #[test]
    fn test_stale_primary_is_penalised() {
        let engine = engine(FixedHealth::all_closed());
        let mut obs = RawObservation::clone(&aircraft("flightradar24", 0.9, 10.0, 106.0));
        let key = engine.window_key(&obs);
        // Keep the key but age the observation past the aircraft threshold
        obs.received_at = key.window_start - ChronoDuration::seconds(90);
        let track = engine.fuse(&key, &[Arc::new(obs)]).unwrap();
        assert!((track.fused_quality - 0.72).abs() < 1e-9);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Circuit state
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_circuit_open_provider_is_excluded_but_flags_survive() {
        let engine = engine(FixedHealth::with_open(&["flightradar24"]));
        let fr24 = Arc::new(
            RawObservation::clone(&aircraft("flightradar24", 0.99, 11.0, 107.0))
                .with_flags(SafetyFlags::EMERGENCY),
        );
        let adsb = aircraft("adsbexchange", 0.8, 10.0, 106.0);
        let key = engine.window_key(&adsb);

        let track = engine.fuse(&key, &[fr24, adsb]).unwrap();
        assert_eq!(track.primary_provider, "adsbexchange");
        assert!(track.safety.emergency);
        assert!(!track.position_disputed, "excluded candidates do not dispute");
        assert!(!track.safety_only);
    }

    #[test]
    fn test_mmsi_scenario_without_flags_is_suppressed() {
        let engine = engine(FixedHealth::with_open(&["marinetraffic"]));
        let vessel = Arc::new(RawObservation::new(
            EntityType::Vessel,
            "marinetraffic",
            "574123456",
            Position::new(10.3, 107.1),
            0.9,
            at(1),
        ));
        let key = engine.window_key(&vessel);
        assert!(engine.fuse(&key, &[vessel]).is_none());
    }

    #[test]
    fn test_mmsi_scenario_with_flag_is_safety_only() {
        let engine = engine(FixedHealth::with_open(&["marinetraffic"]));
        let vessel = Arc::new(
            RawObservation::new(
                EntityType::Vessel,
                "marinetraffic",
                "574123456",
                Position::new(10.3, 107.1),
                0.9,
                at(1),
            )
            .with_flags(SafetyFlags {
                dangerous_cargo: true,
                ..Default::default()
            }),
        );
        let key = engine.window_key(&vessel);
        let track = engine.fuse(&key, &[vessel]).unwrap();
        assert!(track.safety_only);
        assert!(track.safety.dangerous_cargo);
        assert_eq!(track.primary_provider, "marinetraffic");
    }

    #[test]
    fn test_safety_only_can_be_disabled() {
        let config = FusionConfig {
            emit_safety_only: false,
            ..Default::default()
        };
        let engine = FusionEngine::new(config, FixedHealth::with_open(&["flightradar24"]));
        let obs = Arc::new(
            RawObservation::clone(&aircraft("flightradar24", 0.9, 10.0, 106.0))
                .with_flags(SafetyFlags::EMERGENCY),
        );
        let key = engine.window_key(&obs);
        assert!(engine.fuse(&key, &[obs]).is_none());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Properties
    // ─────────────────────────────────────────────────────────────────────────

    fn candidate_strategy() -> impl Strategy<Value = RawObservation> {
        (
            prop::sample::select(vec![
                "flightradar24",
                "adsbexchange",
                "custom-a",
                "custom-b",
            ]),
            0.0f64..=1.0,
            9.9f64..10.1,
            105.9f64..106.1,
            0i64..30,
            any::<bool>(),
            prop::option::of(0.0f64..500.0),
        )
            .prop_map(|(provider, q, lat, lon, secs, emergency, speed)| {
                RawObservation::new(
                    EntityType::Aircraft,
                    provider,
                    "ABC123",
                    Position::new(lat, lon),
                    q,
                    Utc.timestamp_opt(1_700_000_010 + secs, 0).unwrap(),
                )
                .with_attributes(Attributes {
                    speed_kn: speed,
                    ..Default::default()
                })
                .with_flags(SafetyFlags {
                    emergency,
                    ..Default::default()
                })
            })
    }

    proptest! {
        #[test]
        fn prop_fusion_is_order_independent(
            candidates in prop::collection::vec(candidate_strategy(), 1..8),
            seed in any::<u64>(),
        ) {
            let engine = engine(FixedHealth::with_open(&["custom-b"]));
            let key = engine.window_key(&candidates[0]);
            let forward: Vec<Arc<RawObservation>> =
                candidates.iter().cloned().map(Arc::new).collect();

            let mut shuffled = forward.clone();
            let len = shuffled.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                shuffled.swap(i, (state >> 33) as usize % (i + 1));
            }

            prop_assert_eq!(engine.fuse(&key, &forward), engine.fuse(&key, &shuffled));
        }

        #[test]
        fn prop_any_emergency_propagates(
            candidates in prop::collection::vec(candidate_strategy(), 1..8),
        ) {
            let engine = engine(FixedHealth::with_open(&["custom-b"]));
            let key = engine.window_key(&candidates[0]);
            let any_emergency = candidates.iter().any(|c| c.flags().emergency);
            let arcs: Vec<Arc<RawObservation>> = candidates.into_iter().map(Arc::new).collect();

            match engine.fuse(&key, &arcs) {
                Some(track) => prop_assert_eq!(track.safety.emergency, any_emergency),
                // Only an all-open candidate set without flags may be suppressed
                None => prop_assert!(!any_emergency),
            }
        }
    }
}
