//! Fusion tuning.

use std::time::Duration;

use crate::observation::EntityType;
use crate::source_health::{DEFAULT_AIRCRAFT_STALENESS, DEFAULT_VESSEL_STALENESS};

/// Default fusion window width.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// Candidates below this quality mark a single-candidate track low-confidence.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.5;

/// Distance beyond which another candidate disputes the primary position.
pub const DEFAULT_POSITION_TOLERANCE_M: f64 = 100.0;

/// How long a sealed window's candidates are kept for late merges.
pub const DEFAULT_LATE_RETENTION: Duration = Duration::from_secs(120);

/// How often workers seal elapsed windows.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Quality bonus per agreeing eligible source.
pub const AGREEMENT_BONUS_PER_SOURCE: f64 = 0.05;

/// Upper bound on the agreement bonus.
pub const MAX_AGREEMENT_BONUS: f64 = 0.2;

/// Multiplier applied when the primary observation is stale.
pub const STALENESS_PENALTY: f64 = 0.8;

/// Fusion engine and worker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// Window width; windows are aligned to the Unix epoch.
    pub window: Duration,
    pub quality_threshold: f64,
    pub position_tolerance_m: f64,
    /// Workers per entity type. Zero means one per bus partition.
    pub workers_per_entity: u32,
    pub late_retention: Duration,
    pub flush_interval: Duration,
    pub aircraft_staleness: Duration,
    pub vessel_staleness: Duration,
    /// Emit a safety-only track when only circuit-open providers report a
    /// flagged object.
    pub emit_safety_only: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            position_tolerance_m: DEFAULT_POSITION_TOLERANCE_M,
            workers_per_entity: 0,
            late_retention: DEFAULT_LATE_RETENTION,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            aircraft_staleness: DEFAULT_AIRCRAFT_STALENESS,
            vessel_staleness: DEFAULT_VESSEL_STALENESS,
            emit_safety_only: true,
        }
    }
}

impl FusionConfig {
    pub fn staleness_for(&self, entity_type: EntityType) -> Duration {
        match entity_type {
            EntityType::Aircraft => self.aircraft_staleness,
            EntityType::Vessel => self.vessel_staleness,
        }
    }

    /// Window width in milliseconds, at least 1.
    pub fn window_ms(&self) -> i64 {
        (self.window.as_millis() as i64).max(1)
    }

    /// Worker count for a bus with `partitions` partitions.
    pub fn worker_count(&self, partitions: u32) -> u32 {
        let partitions = partitions.max(1);
        match self.workers_per_entity {
            0 => partitions,
            n => n.min(partitions),
        }
    }
}
