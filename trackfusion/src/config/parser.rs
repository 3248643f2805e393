//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};
use std::path::PathBuf;
use std::str::FromStr;

use super::defaults::{
    clamp_partitions, clamp_ratio, clamp_u64, clamp_window_ms, MIN_CHANNEL_CAPACITY,
    MIN_FLUSH_INTERVAL_MS, MIN_POLL_INTERVAL_MS,
};
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::provider::ProviderKind;

/// Suffix of per-provider poll interval keys in `[providers]`.
pub(super) const POLL_INTERVAL_SUFFIX: &str = "_poll_interval_ms";

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [fusion] section
    if let Some(section) = ini.section(Some("fusion")) {
        let s = Section::new("fusion", section);
        if let Some(v) = s.parse::<u64>("window_ms", "must be a positive integer (milliseconds)")? {
            config.fusion.window_ms = clamp_window_ms(v);
        }
        if let Some(v) = s.parse::<f64>("quality_threshold", "must be a number between 0 and 1")? {
            config.fusion.quality_threshold = clamp_ratio("fusion.quality_threshold", v);
        }
        if let Some(v) = s.parse_positive_f64("position_tolerance_m")? {
            config.fusion.position_tolerance_m = v;
        }
        if let Some(v) = s.parse::<u32>("workers_per_entity", "must be a non-negative integer")? {
            config.fusion.workers_per_entity = v;
        }
        if let Some(v) = s.parse::<u64>("late_retention_ms", "must be a non-negative integer (milliseconds)")? {
            config.fusion.late_retention_ms = v;
        }
        if let Some(v) = s.parse::<u64>("flush_interval_ms", "must be a positive integer (milliseconds)")? {
            config.fusion.flush_interval_ms =
                clamp_u64("fusion.flush_interval_ms", v, MIN_FLUSH_INTERVAL_MS, u64::MAX);
        }
        if let Some(v) = s.get("emit_safety_only") {
            config.fusion.emit_safety_only = parse_bool(v);
        }
    }

    // [health] section
    if let Some(section) = ini.section(Some("health")) {
        let s = Section::new("health", section);
        if let Some(v) = s.parse::<u32>("circuit_breaker_threshold", "must be a positive integer")? {
            if v == 0 {
                return Err(s.invalid("circuit_breaker_threshold", "0", "must be at least 1"));
            }
            config.health.circuit_breaker_threshold = v;
        }
        if let Some(v) = s.parse::<u64>("aircraft_staleness_secs", "must be a positive integer (seconds)")? {
            config.health.aircraft_staleness_secs = v;
        }
        if let Some(v) = s.parse::<u64>("vessel_staleness_secs", "must be a positive integer (seconds)")? {
            config.health.vessel_staleness_secs = v;
        }
    }

    // [priority] section: <provider> = <rank>
    if let Some(section) = ini.section(Some("priority")) {
        let s = Section::new("priority", section);
        for (key, _) in section.iter() {
            let provider = key.trim().to_lowercase();
            if provider.is_empty() {
                continue;
            }
            if let Some(rank) = s.parse::<u32>(key, "must be a non-negative integer rank")? {
                config.priority.ranks.insert(provider, rank);
            }
        }
    }

    // [providers] section
    if let Some(section) = ini.section(Some("providers")) {
        let s = Section::new("providers", section);
        if let Some(v) = s.get("enabled") {
            config.providers.enabled = parse_provider_list(v)
                .map_err(|reason| s.invalid("enabled", v, &reason))?;
        }
        for (key, _) in section.iter() {
            let Some(provider) = key.strip_suffix(POLL_INTERVAL_SUFFIX) else {
                continue;
            };
            let kind: ProviderKind = provider
                .parse()
                .map_err(|reason: String| s.invalid(key, provider, &reason))?;
            if let Some(ms) = s.parse::<u64>(key, "must be a positive integer (milliseconds)")? {
                let ms = clamp_u64(key, ms, MIN_POLL_INTERVAL_MS, u64::MAX);
                config
                    .providers
                    .poll_intervals_ms
                    .insert(kind.name().to_string(), ms);
            }
        }
    }

    // [bus] section
    if let Some(section) = ini.section(Some("bus")) {
        let s = Section::new("bus", section);
        if let Some(v) = s.parse::<u32>("partitions", "must be a positive integer")? {
            config.bus.partitions = clamp_partitions(v);
        }
        if let Some(v) = s.parse::<usize>("channel_capacity", "must be a positive integer")? {
            config.bus.channel_capacity = clamp_u64(
                "bus.channel_capacity",
                v as u64,
                MIN_CHANNEL_CAPACITY as u64,
                u64::MAX,
            ) as usize;
        }
    }

    // [lifecycle] section
    if let Some(section) = ini.section(Some("lifecycle")) {
        let s = Section::new("lifecycle", section);
        if let Some(v) = s.get("filter_enabled") {
            config.lifecycle.filter_enabled = parse_bool(v);
        }
        if let Some(v) = s.parse_positive_f64("min_distance_change_m")? {
            config.lifecycle.min_distance_change_m = v;
        }
        if let Some(v) = s.parse_positive_f64("min_altitude_change_ft")? {
            config.lifecycle.min_altitude_change_ft = v;
        }
        if let Some(v) = s.parse_positive_f64("min_speed_change_kn")? {
            config.lifecycle.min_speed_change_kn = v;
        }
        if let Some(v) = s.parse_positive_f64("min_course_change_deg")? {
            config.lifecycle.min_course_change_deg = v.min(180.0);
        }
        if let Some(v) = s.parse::<f64>("min_quality_change", "must be a number between 0 and 1")? {
            config.lifecycle.min_quality_change = clamp_ratio("lifecycle.min_quality_change", v);
        }
        if let Some(v) = s.parse::<u64>("sampling_interval_secs", "must be a positive integer (seconds)")? {
            config.lifecycle.sampling_interval_secs = v;
        }
        if let Some(v) = s.get("compression_enabled") {
            config.lifecycle.compression_enabled = parse_bool(v);
        }
        if let Some(v) = s.parse::<usize>("compression_threshold_bytes", "must be a non-negative integer (bytes)")? {
            config.lifecycle.compression_threshold_bytes = v;
        }
    }

    // [retention] section
    if let Some(section) = ini.section(Some("retention")) {
        let s = Section::new("retention", section);
        if let Some(v) = s.parse::<u32>("default_days", "must be a positive integer (days)")? {
            config.retention.default_days = v;
        }
        if let Some(v) = s.parse::<u32>("emergency_days", "must be a positive integer (days)")? {
            config.retention.emergency_days = v;
        }
        if let Some(v) = s.parse::<u32>("high_quality_days", "must be a positive integer (days)")? {
            config.retention.high_quality_days = v;
        }
        if let Some(v) = s.parse::<f64>("high_quality_threshold", "must be a number between 0 and 1")? {
            config.retention.high_quality_threshold =
                clamp_ratio("retention.high_quality_threshold", v);
        }
        if let Some(v) = s.parse::<u64>("cleanup_interval_secs", "must be a positive integer (seconds)")? {
            config.retention.cleanup_interval_secs =
                clamp_u64("retention.cleanup_interval_secs", v, 1, u64::MAX);
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

/// One INI section plus its name, for error reporting.
struct Section<'a> {
    name: &'static str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, props: &'a Properties) -> Self {
        Self { name, props }
    }

    /// Trimmed, non-empty value for a key.
    fn get(&self, key: &str) -> Option<&'a str> {
        self.props
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, v, reason)),
        }
    }

    fn parse_positive_f64(&self, key: &str) -> Result<Option<f64>, ConfigFileError> {
        const REASON: &str = "must be a positive number";
        match self.parse::<f64>(key, REASON)? {
            Some(v) if !(v.is_finite() && v > 0.0) => Err(self.invalid(key, &v.to_string(), REASON)),
            other => Ok(other),
        }
    }

    fn invalid(&self, key: &str, value: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Parse a comma-separated provider list. `all` enables every provider.
pub(super) fn parse_provider_list(value: &str) -> Result<Vec<ProviderKind>, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("all") {
        return Ok(ProviderKind::ALL.to_vec());
    }

    let mut kinds = Vec::new();
    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let kind: ProviderKind = name.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// Parse a boolean value from a string.
///
/// Accepts: true/false, yes/no, 1/0, on/off (case-insensitive)
pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(content).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_fusion_section() {
        let config = parse(
            r#"
[fusion]
window_ms = 15000
quality_threshold = 0.6
position_tolerance_m = 250
workers_per_entity = 2
emit_safety_only = no
"#,
        )
        .unwrap();

        assert_eq!(config.fusion.window_ms, 15_000);
        assert_eq!(config.fusion.quality_threshold, 0.6);
        assert_eq!(config.fusion.position_tolerance_m, 250.0);
        assert_eq!(config.fusion.workers_per_entity, 2);
        assert!(!config.fusion.emit_safety_only);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config = parse(
            r#"
[fusion]
window_ms = 10
quality_threshold = 1.7

[bus]
partitions = 500
"#,
        )
        .unwrap();

        assert_eq!(config.fusion.window_ms, 1_000);
        assert_eq!(config.fusion.quality_threshold, 1.0);
        assert_eq!(config.bus.partitions, 64);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = parse("[fusion]\nwindow_ms = soon\n").unwrap_err();
        assert!(matches!(
            &err,
            ConfigFileError::InvalidValue { section, key, .. } if section == "fusion" && key == "window_ms"
        ));
        assert!(err.to_string().contains("fusion.window_ms = 'soon'"));
    }

    #[test]
    fn test_negative_tolerance_is_rejected() {
        assert!(parse("[fusion]\nposition_tolerance_m = -5\n").is_err());
        assert!(parse("[health]\ncircuit_breaker_threshold = 0\n").is_err());
    }

    #[test]
    fn test_priority_and_providers() {
        let config = parse(
            r#"
[priority]
VesselFinder = 1
customfeed = 7

[providers]
enabled = marinetraffic, vesselfinder
vesselfinder_poll_interval_ms = 20000
marinetraffic_poll_interval_ms = 10
"#,
        )
        .unwrap();

        assert_eq!(config.priority.ranks.get("vesselfinder"), Some(&1));
        assert_eq!(config.priority.ranks.get("customfeed"), Some(&7));
        assert_eq!(
            config.providers.enabled,
            vec![ProviderKind::MarineTraffic, ProviderKind::VesselFinder]
        );
        assert_eq!(config.providers.poll_intervals_ms.get("vesselfinder"), Some(&20_000));
        assert_eq!(
            config.providers.poll_intervals_ms.get("marinetraffic"),
            Some(&MIN_POLL_INTERVAL_MS)
        );
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let err = parse("[providers]\nenabled = flightradar24, radarbox\n").unwrap_err();
        assert!(err.to_string().contains("radarbox"));
        assert!(parse("[providers]\nradarbox_poll_interval_ms = 1000\n").is_err());
    }

    #[test]
    fn test_lifecycle_and_retention() {
        let config = parse(
            r#"
[lifecycle]
filter_enabled = off
min_course_change_deg = 270
compression_threshold_bytes = 4096

[retention]
default_days = 3
high_quality_threshold = 0.9
cleanup_interval_secs = 0
"#,
        )
        .unwrap();

        assert!(!config.lifecycle.filter_enabled);
        assert_eq!(config.lifecycle.min_course_change_deg, 180.0);
        assert_eq!(config.lifecycle.compression_threshold_bytes, 4096);
        assert_eq!(config.retention.default_days, 3);
        assert_eq!(config.retention.high_quality_threshold, 0.9);
        assert_eq!(config.retention.cleanup_interval_secs, 1);
        assert_eq!(
            Duration::from_secs(config.retention.cleanup_interval_secs),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_parse_bool_values() {
        for v in ["true", "YES", " 1 ", "on"] {
            assert!(parse_bool(v), "{v} should be true");
        }
        for v in ["false", "no", "0", "off", "maybe"] {
            assert!(!parse_bool(v), "{v} should be false");
        }
    }

    #[test]
    fn test_parse_provider_list_all() {
        assert_eq!(parse_provider_list("all").unwrap().len(), 6);
        assert_eq!(parse_provider_list("").unwrap(), Vec::new());
    }
}
