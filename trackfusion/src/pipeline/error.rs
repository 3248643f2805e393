//! Pipeline error types.

use thiserror::Error;

/// Errors from pipeline control operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The pipeline has been shut down and accepts no new work.
    #[error("pipeline is shut down")]
    ShutDown,

    /// An ingestion worker for this provider is already running.
    #[error("provider '{0}' already has an ingestion worker")]
    DuplicateProvider(String),

    /// The provider is not in the enabled provider list.
    #[error("provider '{0}' is disabled in configuration")]
    ProviderDisabled(String),
}
