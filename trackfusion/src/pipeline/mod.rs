//! End-to-end tracking pipeline.
//!
//! Wires provider ingestion, the observation bus, fusion workers, the error
//! handler and the raw history lifecycle into one [`TrackingPipeline`].
//!
//! # Example
//!
//! ```no_run
//! use trackfusion::config::ConfigFile;
//! use trackfusion::pipeline::{PipelineConfig, TrackingPipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_config_file(&ConfigFile::load()?);
//! let pipeline = TrackingPipeline::start(config);
//!
//! let emitted = pipeline.trigger_fusion_pass().await;
//! println!("emitted {emitted} windows");
//!
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod status;
mod tracking;

pub use config::{PipelineConfig, ProviderSchedule, DEFAULT_POLL_INTERVAL};
pub use error::PipelineError;
pub use status::PipelineStatus;
pub use tracking::{TrackingPipeline, TrackingPipelineBuilder};
