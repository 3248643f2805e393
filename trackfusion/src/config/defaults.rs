//! Default values and constants for all configuration settings.
//!
//! Contains the range limits, the clamp helpers applied while parsing,
//! and the `ConfigFile::default()` implementation.

use std::collections::BTreeMap;

use super::settings::*;
use crate::bus::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_PARTITIONS};
use crate::fusion::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_LATE_RETENTION, DEFAULT_POSITION_TOLERANCE_M,
    DEFAULT_QUALITY_THRESHOLD, DEFAULT_WINDOW,
};
use crate::lifecycle::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_EMERGENCY_RETENTION_DAYS,
    DEFAULT_HIGH_QUALITY_RETENTION_DAYS, DEFAULT_HIGH_QUALITY_THRESHOLD,
    DEFAULT_MIN_ALTITUDE_CHANGE_FT, DEFAULT_MIN_COURSE_CHANGE_DEG, DEFAULT_MIN_DISTANCE_CHANGE_M,
    DEFAULT_MIN_QUALITY_CHANGE, DEFAULT_MIN_SPEED_CHANGE_KN, DEFAULT_RETENTION_DAYS,
    DEFAULT_SAMPLING_INTERVAL,
};
use crate::provider::ProviderKind;
use crate::source_health::{
    DEFAULT_AIRCRAFT_STALENESS, DEFAULT_CIRCUIT_BREAKER_THRESHOLD, DEFAULT_VESSEL_STALENESS,
};

// =============================================================================
// Fusion limits
// =============================================================================

/// Narrowest accepted fusion window.
pub const MIN_WINDOW_MS: u64 = 1_000;

/// Widest accepted fusion window (10 minutes).
pub const MAX_WINDOW_MS: u64 = 600_000;

/// Fastest accepted window flush check.
pub const MIN_FLUSH_INTERVAL_MS: u64 = 10;

// =============================================================================
// Bus limits
// =============================================================================

/// Minimum partitions per raw topic.
pub const MIN_PARTITIONS: u32 = 1;

/// Maximum partitions per raw topic.
pub const MAX_PARTITIONS: u32 = 64;

/// Minimum delivery channel capacity.
pub const MIN_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// Provider limits
// =============================================================================

/// Fastest accepted provider poll interval.
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "trackfusion.log";

// =============================================================================
// Clamp helpers
// =============================================================================

/// Clamps an integer setting into `[min, max]`, logging a warning if clamped.
pub(super) fn clamp_u64(key: &str, value: u64, min: u64, max: u64) -> u64 {
    if value < min {
        tracing::warn!(key, requested = value, min, "Value below minimum, clamping to {}", min);
        min
    } else if value > max {
        tracing::warn!(key, requested = value, max, "Value above maximum, clamping to {}", max);
        max
    } else {
        value
    }
}

/// Clamps a ratio setting into `[0.0, 1.0]`, logging a warning if clamped.
pub(super) fn clamp_ratio(key: &str, value: f64) -> f64 {
    if !(0.0..=1.0).contains(&value) {
        let clamped = value.clamp(0.0, 1.0);
        tracing::warn!(key, requested = value, "Ratio outside [0, 1], clamping to {}", clamped);
        clamped
    } else {
        value
    }
}

pub(super) fn clamp_window_ms(value: u64) -> u64 {
    clamp_u64("fusion.window_ms", value, MIN_WINDOW_MS, MAX_WINDOW_MS)
}

pub(super) fn clamp_partitions(value: u32) -> u32 {
    clamp_u64(
        "bus.partitions",
        u64::from(value),
        u64::from(MIN_PARTITIONS),
        u64::from(MAX_PARTITIONS),
    ) as u32
}

// =============================================================================
// Default impls
// =============================================================================

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW.as_millis() as u64,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            position_tolerance_m: DEFAULT_POSITION_TOLERANCE_M,
            workers_per_entity: 0,
            late_retention_ms: DEFAULT_LATE_RETENTION.as_millis() as u64,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            emit_safety_only: true,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            aircraft_staleness_secs: DEFAULT_AIRCRAFT_STALENESS.as_secs(),
            vessel_staleness_secs: DEFAULT_VESSEL_STALENESS.as_secs(),
        }
    }
}

impl Default for ProvidersSettings {
    fn default() -> Self {
        Self {
            enabled: ProviderKind::ALL.to_vec(),
            poll_intervals_ms: BTreeMap::new(),
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            filter_enabled: true,
            min_distance_change_m: DEFAULT_MIN_DISTANCE_CHANGE_M,
            min_altitude_change_ft: DEFAULT_MIN_ALTITUDE_CHANGE_FT,
            min_speed_change_kn: DEFAULT_MIN_SPEED_CHANGE_KN,
            min_course_change_deg: DEFAULT_MIN_COURSE_CHANGE_DEG,
            min_quality_change: DEFAULT_MIN_QUALITY_CHANGE,
            sampling_interval_secs: DEFAULT_SAMPLING_INTERVAL.as_secs(),
            compression_enabled: true,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            default_days: DEFAULT_RETENTION_DAYS,
            emergency_days: DEFAULT_EMERGENCY_RETENTION_DAYS,
            high_quality_days: DEFAULT_HIGH_QUALITY_RETENTION_DAYS,
            high_quality_threshold: DEFAULT_HIGH_QUALITY_THRESHOLD,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: super::file::config_directory().join("logs"),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            fusion: FusionSettings::default(),
            health: HealthSettings::default(),
            priority: PrioritySettings::default(),
            providers: ProvidersSettings::default(),
            bus: BusSettings::default(),
            lifecycle: LifecycleSettings::default(),
            retention: RetentionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
