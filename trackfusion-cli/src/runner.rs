//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading and logging initialization so command
//! handlers start from a ready environment.

use crate::error::CliError;
use tracing::info;
use trackfusion::config::ConfigFile;
use trackfusion::logging::{init_logging, LoggingGuard};
use trackfusion::pipeline::PipelineConfig;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a new CLI runner with optional debug logging.
    ///
    /// When stdout is a TTY, stdout logging is disabled so log lines do not
    /// interleave with the status summary.
    ///
    /// # Arguments
    ///
    /// * `debug_mode` - When true, enables debug-level logging regardless of RUST_LOG
    pub fn with_debug(debug_mode: bool) -> Result<Self, CliError> {
        // Load config file (or use defaults if not present)
        let config = ConfigFile::load()?;

        let stdout_enabled = !atty::is(atty::Stream::Stdout);

        let logging_guard = init_logging(
            &config.logging.directory,
            &config.logging.file,
            stdout_enabled,
            debug_mode,
        )
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Typed pipeline configuration derived from the config file.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::from_config_file(&self.config)
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("TrackFusion v{}", trackfusion::VERSION);
        info!("TrackFusion CLI: {} command", command);
    }

    /// Create the multi-threaded runtime commands run on.
    pub fn runtime(&self) -> Result<tokio::runtime::Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("trackfusion")
            .build()
            .map_err(CliError::Runtime)
    }
}
