//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::provider::ProviderKind;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Windowing and merge settings
    pub fusion: FusionSettings,
    /// Circuit breaker and staleness settings
    pub health: HealthSettings,
    /// Provider priority overrides
    pub priority: PrioritySettings,
    /// Which providers run and how often
    pub providers: ProvidersSettings,
    /// Raw observation bus sizing
    pub bus: BusSettings,
    /// Raw history filter and compression
    pub lifecycle: LifecycleSettings,
    /// Raw history retention
    pub retention: RetentionSettings,
    /// Log file location
    pub logging: LoggingSettings,
}

/// Fusion configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionSettings {
    /// Window width in milliseconds.
    pub window_ms: u64,
    /// Quality below which a single-source track is low-confidence.
    pub quality_threshold: f64,
    /// Distance in meters beyond which a position is disputed.
    pub position_tolerance_m: f64,
    /// Fusion workers per entity type; 0 means one per partition.
    pub workers_per_entity: u32,
    /// How long emitted windows accept late observations.
    pub late_retention_ms: u64,
    /// How often workers check for elapsed windows.
    pub flush_interval_ms: u64,
    /// Emit flagged tracks reported only by circuit-open providers.
    pub emit_safety_only: bool,
}

/// Source health configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSettings {
    pub circuit_breaker_threshold: u32,
    pub aircraft_staleness_secs: u64,
    pub vessel_staleness_secs: u64,
}

/// Provider rank overrides, `<provider> = <rank>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrioritySettings {
    pub ranks: BTreeMap<String, u32>,
}

/// Provider ingestion configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvidersSettings {
    /// Providers to poll.
    pub enabled: Vec<ProviderKind>,
    /// Poll interval overrides in milliseconds, keyed by provider name.
    pub poll_intervals_ms: BTreeMap<String, u64>,
}

/// Observation bus configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BusSettings {
    pub partitions: u32,
    pub channel_capacity: usize,
}

/// Raw history filter and compression configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    pub filter_enabled: bool,
    pub min_distance_change_m: f64,
    pub min_altitude_change_ft: f64,
    pub min_speed_change_kn: f64,
    pub min_course_change_deg: f64,
    pub min_quality_change: f64,
    pub sampling_interval_secs: u64,
    pub compression_enabled: bool,
    pub compression_threshold_bytes: usize,
}

/// Raw history retention configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionSettings {
    pub default_days: u32,
    pub emergency_days: u32,
    pub high_quality_days: u32,
    pub high_quality_threshold: f64,
    pub cleanup_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory for the log file.
    pub directory: PathBuf,
    /// Log file name.
    pub file: String,
}
