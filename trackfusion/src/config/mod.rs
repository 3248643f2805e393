//! Configuration file handling.
//!
//! User settings live in `~/.trackfusion/config.ini`, one section per
//! component. A missing file yields defaults; `TRACKFUSION_<SECTION>_<KEY>`
//! environment variables override file values.
//!
//! # Example
//!
//! ```no_run
//! use trackfusion::config::ConfigFile;
//!
//! let config = ConfigFile::load()?;
//! println!("fusion window: {}ms", config.fusion.window_ms);
//! # Ok::<(), trackfusion::config::ConfigFileError>(())
//! ```

mod defaults;
mod env;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{
    DEFAULT_LOG_FILE, MAX_PARTITIONS, MAX_WINDOW_MS, MIN_CHANNEL_CAPACITY, MIN_FLUSH_INTERVAL_MS,
    MIN_PARTITIONS, MIN_POLL_INTERVAL_MS, MIN_WINDOW_MS,
};
pub use env::ENV_PREFIX;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    BusSettings, ConfigFile, FusionSettings, HealthSettings, LifecycleSettings, LoggingSettings,
    PrioritySettings, ProvidersSettings, RetentionSettings,
};
