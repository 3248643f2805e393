//! Runtime configuration for a tracking pipeline.
//!
//! `PipelineConfig` is the typed form of `ConfigFile`: durations instead of
//! raw integers and one config struct per component.

use std::time::Duration;

use crate::bus::BusConfig;
use crate::config::ConfigFile;
use crate::fusion::FusionConfig;
use crate::lifecycle::{CompressionConfig, FilterConfig, LifecycleConfig, RetentionPolicy};
use crate::provider::ProviderKind;
use crate::source_health::{PriorityTable, SourceHealthConfig};

/// Poll interval for providers that are not in the catalogue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// When one provider is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSchedule {
    pub kind: ProviderKind,
    pub poll_interval: Duration,
}

/// Configuration for every pipeline component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub bus: BusConfig,
    pub health: SourceHealthConfig,
    pub fusion: FusionConfig,
    pub lifecycle: LifecycleConfig,
    /// Enabled providers with their poll intervals.
    pub providers: Vec<ProviderSchedule>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            health: SourceHealthConfig::default(),
            fusion: FusionConfig::default(),
            lifecycle: LifecycleConfig::default(),
            providers: ProviderKind::ALL
                .iter()
                .map(|&kind| ProviderSchedule {
                    kind,
                    poll_interval: kind.default_poll_interval(),
                })
                .collect(),
        }
    }
}

impl PipelineConfig {
    /// Build the runtime configuration from the loaded config file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        let mut priorities = PriorityTable::default();
        for (provider, rank) in &config.priority.ranks {
            priorities.set_rank(provider, *rank);
        }

        let aircraft_staleness = Duration::from_secs(config.health.aircraft_staleness_secs);
        let vessel_staleness = Duration::from_secs(config.health.vessel_staleness_secs);

        let health = SourceHealthConfig {
            circuit_breaker_threshold: config.health.circuit_breaker_threshold,
            aircraft_staleness,
            vessel_staleness,
            priorities,
        };

        let fusion = FusionConfig {
            window: Duration::from_millis(config.fusion.window_ms),
            quality_threshold: config.fusion.quality_threshold,
            position_tolerance_m: config.fusion.position_tolerance_m,
            workers_per_entity: config.fusion.workers_per_entity,
            late_retention: Duration::from_millis(config.fusion.late_retention_ms),
            flush_interval: Duration::from_millis(config.fusion.flush_interval_ms),
            aircraft_staleness,
            vessel_staleness,
            emit_safety_only: config.fusion.emit_safety_only,
        };

        let bus = BusConfig {
            partitions: config.bus.partitions,
            channel_capacity: config.bus.channel_capacity,
            ..BusConfig::default()
        };

        let lifecycle = LifecycleConfig {
            filter: FilterConfig {
                enabled: config.lifecycle.filter_enabled,
                min_distance_change_m: config.lifecycle.min_distance_change_m,
                min_altitude_change_ft: config.lifecycle.min_altitude_change_ft,
                min_speed_change_kn: config.lifecycle.min_speed_change_kn,
                min_course_change_deg: config.lifecycle.min_course_change_deg,
                min_quality_change: config.lifecycle.min_quality_change,
                sampling_interval: Duration::from_secs(config.lifecycle.sampling_interval_secs),
                ..FilterConfig::default()
            },
            compression: CompressionConfig {
                enabled: config.lifecycle.compression_enabled,
                threshold_bytes: config.lifecycle.compression_threshold_bytes,
            },
            retention: RetentionPolicy {
                default_days: config.retention.default_days,
                emergency_days: config.retention.emergency_days,
                high_quality_days: config.retention.high_quality_days,
                high_quality_threshold: config.retention.high_quality_threshold,
            },
            cleanup_interval: Duration::from_secs(config.retention.cleanup_interval_secs),
        };

        let providers = config
            .providers
            .enabled
            .iter()
            .map(|&kind| ProviderSchedule {
                kind,
                poll_interval: config
                    .providers
                    .poll_intervals_ms
                    .get(kind.name())
                    .map(|ms| Duration::from_millis(*ms))
                    .unwrap_or_else(|| kind.default_poll_interval()),
            })
            .collect();

        Self {
            bus,
            health,
            fusion,
            lifecycle,
            providers,
        }
    }

    /// Schedule for a catalogue provider, if it is enabled.
    pub fn schedule(&self, provider: &str) -> Option<&ProviderSchedule> {
        self.providers.iter().find(|s| s.kind.name() == provider)
    }

    /// Whether observations from `provider` should be ingested.
    ///
    /// Providers outside the catalogue are always allowed; they only get
    /// the unknown-provider priority.
    pub fn is_enabled(&self, provider: &str) -> bool {
        match provider.parse::<ProviderKind>() {
            Ok(_) => self.schedule(provider).is_some(),
            Err(_) => true,
        }
    }

    /// Poll interval for `provider`.
    pub fn poll_interval(&self, provider: &str) -> Duration {
        if let Some(schedule) = self.schedule(provider) {
            return schedule.poll_interval;
        }
        provider
            .parse::<ProviderKind>()
            .map(|kind| kind.default_poll_interval())
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}
