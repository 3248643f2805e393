//! Smart filter for raw history.
//!
//! Decides whether an observation is worth persisting to raw history by
//! comparing it with the last observation persisted for the same identity.
//! Live fusion input never passes through here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::geo;
use crate::observation::RawObservation;

/// Default minimum position change worth storing.
pub const DEFAULT_MIN_DISTANCE_CHANGE_M: f64 = 500.0;

/// Default minimum altitude change worth storing.
pub const DEFAULT_MIN_ALTITUDE_CHANGE_FT: f64 = 500.0;

/// Default minimum speed change worth storing.
pub const DEFAULT_MIN_SPEED_CHANGE_KN: f64 = 10.0;

/// Default minimum course change worth storing.
pub const DEFAULT_MIN_COURSE_CHANGE_DEG: f64 = 30.0;

/// Default minimum quality change worth storing.
pub const DEFAULT_MIN_QUALITY_CHANGE: f64 = 0.1;

/// Default age after which an unchanged object is stored anyway.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(300);

/// Default age after which a cache entry is evicted.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Smart filter thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub enabled: bool,
    pub min_distance_change_m: f64,
    pub min_altitude_change_ft: f64,
    pub min_speed_change_kn: f64,
    pub min_course_change_deg: f64,
    pub min_quality_change: f64,
    pub sampling_interval: Duration,
    pub cache_ttl: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_distance_change_m: DEFAULT_MIN_DISTANCE_CHANGE_M,
            min_altitude_change_ft: DEFAULT_MIN_ALTITUDE_CHANGE_FT,
            min_speed_change_kn: DEFAULT_MIN_SPEED_CHANGE_KN,
            min_course_change_deg: DEFAULT_MIN_COURSE_CHANGE_DEG,
            min_quality_change: DEFAULT_MIN_QUALITY_CHANGE,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Why an observation was or was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Filtering is off.
    Disabled,
    /// Nothing cached for this identity yet.
    First,
    /// A safety flag is set.
    Safety,
    /// A kinematic or quality delta crossed its threshold.
    Changed(&'static str),
    /// Unchanged, but the last stored record is older than the sampling interval.
    SamplingDue,
    /// Unchanged and recent: skip.
    Unchanged,
}

impl FilterDecision {
    pub fn should_store(&self) -> bool {
        !matches!(self, FilterDecision::Unchanged)
    }
}

/// Filter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub enabled: bool,
    pub stored: u64,
    pub filtered: u64,
    pub cached_identities: usize,
    /// Cache entries dropped for exceeding the TTL.
    pub evicted: u64,
}

/// Per-identity change filter.
pub struct SmartFilter {
    config: FilterConfig,
    last_stored: DashMap<String, Arc<RawObservation>>,
    stored: AtomicU64,
    filtered: AtomicU64,
    evicted: AtomicU64,
}

impl SmartFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            last_stored: DashMap::new(),
            stored: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Decide for one observation and update the cache when it is stored.
    pub fn evaluate(&self, observation: &RawObservation) -> FilterDecision {
        let decision = self.decide(observation);
        if decision.should_store() {
            self.stored.fetch_add(1, Ordering::Relaxed);
            if self.config.enabled {
                self.last_stored.insert(
                    observation.scoped_identity(),
                    Arc::new(observation.clone()),
                );
            }
        } else {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                identity = %observation.scoped_identity(),
                provider = %observation.provider,
                "Raw observation filtered"
            );
        }
        decision
    }

    fn decide(&self, current: &RawObservation) -> FilterDecision {
        if !self.config.enabled {
            return FilterDecision::Disabled;
        }
        let Some(previous) = self
            .last_stored
            .get(&current.scoped_identity())
            .map(|entry| Arc::clone(entry.value()))
        else {
            return FilterDecision::First;
        };

        if current.flags().any() {
            return FilterDecision::Safety;
        }
        if let Some(reason) = self.significant_change(&previous, current) {
            return FilterDecision::Changed(reason);
        }

        let sampling = ChronoDuration::from_std(self.config.sampling_interval)
            .unwrap_or(ChronoDuration::MAX);
        if current.received_at - previous.received_at >= sampling {
            return FilterDecision::SamplingDue;
        }
        FilterDecision::Unchanged
    }

    fn significant_change(
        &self,
        previous: &RawObservation,
        current: &RawObservation,
    ) -> Option<&'static str> {
        let config = &self.config;
        let (prev, cur) = (&previous.attributes, &current.attributes);

        if previous.position().distance_m(&current.position()) > config.min_distance_change_m {
            return Some("position");
        }
        if exceeds(prev.altitude_ft, cur.altitude_ft, config.min_altitude_change_ft, |a, b| {
            (a - b).abs()
        }) {
            return Some("altitude");
        }
        if exceeds(prev.speed_kn, cur.speed_kn, config.min_speed_change_kn, |a, b| {
            (a - b).abs()
        }) {
            return Some("speed");
        }
        if exceeds(
            prev.heading_deg,
            cur.heading_deg,
            config.min_course_change_deg,
            geo::heading_delta,
        ) {
            return Some("course");
        }
        if (previous.quality - current.quality).abs() > config.min_quality_change {
            return Some("quality");
        }
        None
    }

    /// Drop cache entries older than the configured TTL.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let ttl = ChronoDuration::from_std(self.config.cache_ttl).unwrap_or(ChronoDuration::MAX);
        let before = self.last_stored.len();
        self.last_stored
            .retain(|_, obs| now - obs.received_at <= ttl);
        let evicted = before.saturating_sub(self.last_stored.len());
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!(evicted, "Evicted stale filter cache entries");
        }
        evicted
    }

    pub fn clear(&self) {
        self.last_stored.clear();
        tracing::info!("Raw data filter cache cleared");
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            enabled: self.config.enabled,
            stored: self.stored.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            cached_identities: self.last_stored.len(),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SmartFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartFilter")
            .field("config", &self.config)
            .field("cached", &self.last_stored.len())
            .finish_non_exhaustive()
    }
}

/// A value appearing or disappearing counts as a change.
fn exceeds(
    previous: Option<f64>,
    current: Option<f64>,
    threshold: f64,
    delta: impl Fn(f64, f64) -> f64,
) -> bool {
    match (previous, current) {
        (Some(a), Some(b)) => delta(a, b) > threshold,
        (None, None) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Attributes, EntityType, Position, SafetyFlags};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn aircraft(lat: f64, altitude: f64, secs: i64) -> RawObservation {
        RawObservation::new(
            EntityType::Aircraft,
            "flightradar24",
            "ABC123",
            Position::new(lat, 106.0),
            0.9,
            at(secs),
        )
        .with_attributes(Attributes {
            altitude_ft: Some(altitude),
            heading_deg: Some(350.0),
            ..Default::default()
        })
    }

    #[test]
    fn test_first_observation_is_stored() {
        let filter = SmartFilter::new(FilterConfig::default());
        assert_eq!(filter.evaluate(&aircraft(10.0, 35_000.0, 0)), FilterDecision::First);
    }

    #[test]
    fn test_unchanged_recent_observation_is_filtered() {
        let filter = SmartFilter::new(FilterConfig::default());
        filter.evaluate(&aircraft(10.0, 35_000.0, 0));
        let decision = filter.evaluate(&aircraft(10.001, 35_100.0, 30));
        assert_eq!(decision, FilterDecision::Unchanged);
        assert_eq!(filter.stats().filtered, 1);
    }

    #[test]
    fn test_significant_changes() {
        let filter = SmartFilter::new(FilterConfig::default());
        filter.evaluate(&aircraft(10.0, 35_000.0, 0));
        assert_eq!(
            filter.evaluate(&aircraft(10.01, 35_000.0, 30)),
            FilterDecision::Changed("position")
        );
        assert_eq!(
            filter.evaluate(&aircraft(10.01, 34_000.0, 60)),
            FilterDecision::Changed("altitude")
        );
    }

    #[test]
    fn test_course_change_wraps() {
        let filter = SmartFilter::new(FilterConfig::default());
        filter.evaluate(&aircraft(10.0, 35_000.0, 0));
        let mut turned = aircraft(10.0, 35_000.0, 30);
        turned.attributes.heading_deg = Some(10.0);
        assert_eq!(filter.evaluate(&turned), FilterDecision::Unchanged);
        turned.attributes.heading_deg = Some(40.0);
        assert_eq!(filter.evaluate(&turned), FilterDecision::Changed("course"));
    }

    #[test]
    fn test_safety_flags_always_store() {
        let filter = SmartFilter::new(FilterConfig::default());
        filter.evaluate(&aircraft(10.0, 35_000.0, 0));
        let flagged = aircraft(10.0, 35_000.0, 10).with_flags(SafetyFlags::EMERGENCY);
        assert_eq!(filter.evaluate(&flagged), FilterDecision::Safety);
    }

    #[test]
    fn test_sampling_interval_forces_store() {
        let filter = SmartFilter::new(FilterConfig::default());
        filter.evaluate(&aircraft(10.0, 35_000.0, 0));
        assert_eq!(
            filter.evaluate(&aircraft(10.0, 35_000.0, 301)),
            FilterDecision::SamplingDue
        );
    }

    #[test]
    fn test_disabled_stores_everything() {
        let filter = SmartFilter::new(FilterConfig {
            enabled: false,
            ..Default::default()
        });
        filter.evaluate(&aircraft(10.0, 35_000.0, 0));
        assert!(filter.evaluate(&aircraft(10.0, 35_000.0, 1)).should_store());
        assert_eq!(filter.stats().cached_identities, 0);
    }

    #[test]
    fn test_evict_stale_entries() {
        let filter = SmartFilter::new(FilterConfig::default());
        filter.evaluate(&aircraft(10.0, 35_000.0, 0));
        assert_eq!(filter.evict_stale(at(60)), 0);
        assert_eq!(filter.evict_stale(at(3_601)), 1);
        assert_eq!(filter.stats().cached_identities, 0);
    }
}
