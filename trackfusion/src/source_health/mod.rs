//! Source health tracking.
//!
//! Maintains per-provider operational state (success/failure counters,
//! circuit-breaker state, priority). Written by the provider ingestion
//! workers, read by the fusion engine through [`SourceHealthView`].
//!
//! # Usage
//!
//! ```
//! use trackfusion::source_health::{SourceHealthConfig, SourceHealthTracker};
//!
//! let tracker = SourceHealthTracker::new(SourceHealthConfig::default());
//! tracker.record_success("flightradar24", 180);
//! assert!(tracker.is_available("flightradar24"));
//! assert_eq!(tracker.priority_rank("flightradar24"), 1);
//! ```

mod priority;
mod status;
mod tracker;

pub use priority::{PriorityTable, UNKNOWN_PROVIDER_PRIORITY};
pub use status::{ProviderHealth, SourceStatus};
pub use tracker::{
    SourceHealthConfig, SourceHealthTracker, DEFAULT_AIRCRAFT_STALENESS,
    DEFAULT_CIRCUIT_BREAKER_THRESHOLD, DEFAULT_VESSEL_STALENESS,
};

/// Read-only view of provider trust used during fusion.
///
/// Implemented by [`SourceHealthTracker`]; tests substitute fixed views.
pub trait SourceHealthView: Send + Sync {
    /// False while the provider's circuit is open.
    fn is_available(&self, provider: &str) -> bool;

    /// Static trust rank, lower is more trusted.
    fn priority_rank(&self, provider: &str) -> u32;
}
