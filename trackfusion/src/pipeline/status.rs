//! Operator-facing status snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bus::BusStats;
use crate::fusion::FusionStats;
use crate::lifecycle::LifecycleStats;
use crate::provider::IngestionStats;
use crate::resilience::{ErrorReport, ResilienceStats};
use crate::source_health::{ProviderHealth, SourceStatus};

/// Everything an operator sees about a running pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub started_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub providers: Vec<ProviderHealth>,
    /// Ingestion counters keyed by provider name.
    pub ingestion: BTreeMap<String, IngestionStats>,
    pub bus: BusStats,
    pub fusion: FusionStats,
    pub lifecycle: LifecycleStats,
    pub resilience: ResilienceStats,
    pub errors: ErrorReport,
}

impl PipelineStatus {
    /// Seconds between start and capture.
    pub fn uptime_secs(&self) -> i64 {
        (self.captured_at - self.started_at).num_seconds().max(0)
    }

    /// Providers whose circuit is currently open.
    pub fn open_circuits(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|p| p.status == SourceStatus::CircuitOpen)
            .map(|p| p.provider.as_str())
            .collect()
    }
}
