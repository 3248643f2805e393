//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::fmt::Write;
use std::path::Path;

use super::parser::POLL_INTERVAL_SUFFIX;
use super::settings::ConfigFile;
use crate::provider::ProviderKind;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let enabled = if config.providers.enabled.len() == ProviderKind::ALL.len() {
        "all".to_string()
    } else {
        config
            .providers
            .enabled
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut priority = String::new();
    for (provider, rank) in &config.priority.ranks {
        let _ = writeln!(priority, "{} = {}", provider, rank);
    }

    let mut poll_intervals = String::new();
    for (provider, ms) in &config.providers.poll_intervals_ms {
        let _ = writeln!(poll_intervals, "{}{} = {}", provider, POLL_INTERVAL_SUFFIX, ms);
    }

    format!(
        r#"[fusion]
; Fusion window width in milliseconds (default: 30000, range 1000-600000)
; Windows are aligned to the Unix epoch so replays produce identical keys
window_ms = {}
; Single-source tracks below this quality are marked low-confidence (default: 0.5)
quality_threshold = {}
; Distance in meters beyond which another source disputes the primary position (default: 100)
position_tolerance_m = {}
; Fusion workers per entity type; 0 = one per bus partition (default: 0)
workers_per_entity = {}
; How long an emitted window accepts late observations, in milliseconds (default: 120000)
late_retention_ms = {}
; How often workers check for elapsed windows, in milliseconds (default: 1000)
flush_interval_ms = {}
; Emit flagged tracks reported only by circuit-open providers (default: true)
emit_safety_only = {}

[health]
; Consecutive fetch failures before a provider's circuit opens (default: 5)
circuit_breaker_threshold = {}
; No successful fetch for this long marks a provider degraded
aircraft_staleness_secs = {}
vessel_staleness_secs = {}

[priority]
; Provider trust overrides, lower rank is more trusted.
; Built-in ranks: flightradar24 = 1, adsbexchange = 2, marinetraffic = 1,
;                 vesselfinder = 2, marinetrafficv2 = 3, chinaports = 4
{}
[providers]
; Providers to poll: "all" or a comma-separated list of
;   flightradar24, adsbexchange, marinetraffic, vesselfinder, chinaports, marinetrafficv2
enabled = {}
; Per-provider poll interval overrides: <provider>_poll_interval_ms = <ms>
{}
[bus]
; Partitions per raw topic (default: 4, range 1-64)
partitions = {}
; Capacity of each fusion worker's delivery channel (default: 1024)
channel_capacity = {}

[lifecycle]
; Skip storing raw observations that barely changed (default: true)
filter_enabled = {}
min_distance_change_m = {}
min_altitude_change_ft = {}
min_speed_change_kn = {}
min_course_change_deg = {}
min_quality_change = {}
; Store an unchanged object anyway after this many seconds (default: 300)
sampling_interval_secs = {}
; Gzip raw payloads larger than the threshold (default: true, 1024 bytes)
compression_enabled = {}
compression_threshold_bytes = {}

[retention]
; Raw history retention in days by tier
default_days = {}
emergency_days = {}
high_quality_days = {}
; Quality at or above which a record is kept as high quality (default: 0.8)
high_quality_threshold = {}
; Seconds between scheduled cleanup passes (default: 3600)
cleanup_interval_secs = {}

[logging]
; Directory and file name for the log file
directory = {}
file = {}
"#,
        config.fusion.window_ms,
        config.fusion.quality_threshold,
        config.fusion.position_tolerance_m,
        config.fusion.workers_per_entity,
        config.fusion.late_retention_ms,
        config.fusion.flush_interval_ms,
        config.fusion.emit_safety_only,
        config.health.circuit_breaker_threshold,
        config.health.aircraft_staleness_secs,
        config.health.vessel_staleness_secs,
        priority,
        enabled,
        poll_intervals,
        config.bus.partitions,
        config.bus.channel_capacity,
        config.lifecycle.filter_enabled,
        config.lifecycle.min_distance_change_m,
        config.lifecycle.min_altitude_change_ft,
        config.lifecycle.min_speed_change_kn,
        config.lifecycle.min_course_change_deg,
        config.lifecycle.min_quality_change,
        config.lifecycle.sampling_interval_secs,
        config.lifecycle.compression_enabled,
        config.lifecycle.compression_threshold_bytes,
        config.retention.default_days,
        config.retention.emergency_days,
        config.retention.high_quality_days,
        config.retention.high_quality_threshold,
        config.retention.cleanup_interval_secs,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
