//! Fusion & deduplication.
//!
//! Candidates for one `(entity type, identity)` are grouped into
//! epoch-aligned windows and merged into at most one [`CanonicalTrack`]
//! per window:
//!
//! 1. circuit-open providers are excluded, except that their safety flags
//!    still count;
//! 2. the best remaining candidate (priority rank, then quality, then
//!    recency) becomes the primary and seeds position and attributes;
//! 3. other candidates fill missing attributes and may dispute the position;
//! 4. safety flags are the union over every candidate.
//!
//! [`FusionEngine`] is the pure merge step. [`FusionWorker`] owns the
//! windows for a subset of partitions and settles acknowledgements.
//!
//! [`CanonicalTrack`]: crate::observation::CanonicalTrack

mod config;
mod engine;
mod scoring;
mod sink;
mod stats;
mod window;
mod worker;

pub use config::{
    FusionConfig, AGREEMENT_BONUS_PER_SOURCE, DEFAULT_FLUSH_INTERVAL, DEFAULT_LATE_RETENTION,
    DEFAULT_POSITION_TOLERANCE_M, DEFAULT_QUALITY_THRESHOLD, DEFAULT_WINDOW, MAX_AGREEMENT_BONUS,
    STALENESS_PENALTY,
};
pub use engine::FusionEngine;
pub use scoring::{compare, rank, window_end, window_start, Ranked};
pub use sink::{MemoryTrackStore, SinkError, TrackSink};
pub use stats::{FusionCounters, FusionStats};
pub use window::{Admission, Candidate, Coordinates, ReadyWindow, WindowBuffer};
pub use worker::{FusionCommand, FusionContext, FusionWorker, FusionWorkerHandle};
