//! Provider health snapshot types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::observation::EntityType;

/// Operational status of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Recent success, circuit closed.
    Healthy,
    /// Circuit closed, but no success within the staleness threshold.
    Degraded,
    /// Consecutive failures reached the breaker threshold.
    CircuitOpen,
    /// Never polled.
    Unknown,
}

impl SourceStatus {
    /// Returns a string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Healthy => "healthy",
            SourceStatus::Degraded => "degraded",
            SourceStatus::CircuitOpen => "circuit_open",
            SourceStatus::Unknown => "unknown",
        }
    }

    /// True when observations from this provider may be chosen as primary.
    pub fn is_eligible(&self) -> bool {
        !matches!(self, SourceStatus::CircuitOpen)
    }
}

/// Point-in-time health of one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: String,
    pub entity_type: Option<EntityType>,
    pub priority_rank: u32,
    pub consecutive_failures: u32,
    pub circuit_breaker_threshold: u32,
    pub circuit_open: bool,
    pub last_success_time: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    /// Successful / total requests, 0.0 to 1.0 (1.0 before any request).
    pub success_rate: f64,
    pub status: SourceStatus,
}
