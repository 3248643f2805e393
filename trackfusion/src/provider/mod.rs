//! Position provider ingestion.
//!
//! Each external provider is reached through an [`ObservationFeed`]. An
//! [`IngestionWorker`] polls one feed, keeps the provider's health current
//! and publishes what it fetched onto the raw observation bus.
//!
//! ```ignore
//! use trackfusion::provider::{IngestionWorker, ReplayFeed};
//!
//! for feed in ReplayFeed::load_all(path)? {
//!     let interval = poll_interval_for(feed.provider());
//!     IngestionWorker::new(feed, bus.clone(), health.clone(), interval)
//!         .with_archiver(archiver.clone())
//!         .spawn(shutdown.child_token());
//! }
//! ```

mod feed;
mod kind;
mod replay;
mod worker;

pub use feed::{FeedError, ObservationFeed};
pub use kind::ProviderKind;
pub use replay::{parse_lines, ReplayFeed, DEFAULT_REPLAY_BATCH};
pub use worker::{
    calculate_backoff, IngestionCounters, IngestionStats, IngestionWorker, PollSummary,
    MAX_BACKOFF,
};
