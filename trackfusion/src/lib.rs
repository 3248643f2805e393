//! TrackFusion - Multi-source aircraft and vessel position fusion
//!
//! This library ingests position reports for the same physical objects from
//! several independent providers and fuses them, per time window, into one
//! canonical track per object.
//!
//! # High-Level API
//!
//! For most use cases, the [`pipeline`] module provides a facade that wires
//! every component together:
//!
//! ```ignore
//! use trackfusion::pipeline::{PipelineConfig, TrackingPipeline};
//! use trackfusion::provider::ReplayFeed;
//!
//! let pipeline = TrackingPipeline::start(PipelineConfig::default());
//! for feed in ReplayFeed::load_all(Path::new("capture.jsonl"))? {
//!     pipeline.add_feed(feed)?;
//! }
//!
//! let status = pipeline.status();
//! pipeline.shutdown().await;
//! ```
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`provider`] | Provider catalogue, feeds and ingestion workers |
//! | [`bus`] | Partitioned raw and fused topics with explicit acknowledgement |
//! | [`fusion`] | Windowing, candidate ranking and track emission |
//! | [`source_health`] | Per-provider circuit breaker and staleness |
//! | [`resilience`] | Error classification, dead-letter routing, error monitor |
//! | [`lifecycle`] | Raw history filter, compression and retention |

pub mod bus;
pub mod config;
pub mod fusion;
pub mod geo;
pub mod lifecycle;
pub mod logging;
pub mod observation;
pub mod pipeline;
pub mod provider;
pub mod resilience;
pub mod source_health;

/// Version of the TrackFusion library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
