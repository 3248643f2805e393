//! Provider feed abstraction.

use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::observation::{EntityType, RawObservation};

/// Errors a feed can return from one fetch.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Upstream request failed.
    #[error("request to {provider} failed: {message}")]
    Request { provider: String, message: String },

    /// Upstream did not answer in time.
    #[error("request to {provider} timed out after {}ms", .after.as_millis())]
    Timeout { provider: String, after: Duration },

    /// A record could not be decoded.
    #[error("invalid record at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("feed I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Capability interface over one external position provider.
///
/// Ingestion only depends on this trait; concrete adapters live outside
/// the fusion core.
pub trait ObservationFeed: Send + Sync {
    /// Canonical lowercase provider name.
    fn provider(&self) -> &str;

    fn entity_type(&self) -> EntityType;

    /// Fetch the provider's current observations.
    fn fetch(&self) -> impl Future<Output = Result<Vec<RawObservation>, FeedError>> + Send;
}
