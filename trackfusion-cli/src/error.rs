//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;
use trackfusion::config::ConfigFileError;
use trackfusion::pipeline::PipelineError;
use trackfusion::provider::FeedError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Config file could not be read, parsed or written
    ConfigFile(ConfigFileError),
    /// Replay capture could not be loaded
    Replay { path: PathBuf, error: FeedError },
    /// Replay capture held no feed the configuration allows
    NoFeeds(PathBuf),
    /// Pipeline control error
    Pipeline(PipelineError),
    /// Failed to create Tokio runtime
    Runtime(std::io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::ConfigFile(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Check the value in the config file or the matching TRACKFUSION_* variable.");
                eprintln!("Run 'trackfusion config path' to locate the file.");
            }
            CliError::Replay { .. } => {
                eprintln!();
                eprintln!("Replay files hold one JSON observation per line, for example:");
                eprintln!(
                    r#"  {{"entityType":"aircraft","provider":"flightradar24","identity":"ABC123","latitude":10.0,"longitude":106.0,"quality":0.9,"receivedAt":"2024-06-01T12:00:00Z"}}"#
                );
            }
            CliError::NoFeeds(_) => {
                eprintln!();
                eprintln!("Enable the providers in [providers] enabled = ... or use 'all'.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Replay { path, error } => {
                write!(f, "Failed to load replay file '{}': {}", path.display(), error)
            }
            CliError::NoFeeds(path) => {
                write!(f, "No enabled provider feeds in '{}'", path.display())
            }
            CliError::Pipeline(e) => write!(f, "Pipeline error: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to create async runtime: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Replay { error, .. } => Some(error),
            CliError::Pipeline(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<PipelineError> for CliError {
    fn from(e: PipelineError) -> Self {
        CliError::Pipeline(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CliError::NoFeeds(PathBuf::from("/tmp/capture.jsonl"));
        assert_eq!(err.to_string(), "No enabled provider feeds in '/tmp/capture.jsonl'");

        let err = CliError::from(PipelineError::ShutDown);
        assert_eq!(err.to_string(), "Pipeline error: pipeline is shut down");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;

        let err = CliError::Replay {
            path: PathBuf::from("capture.jsonl"),
            error: FeedError::Parse {
                line: 3,
                message: "expected value".to_string(),
            },
        };
        assert!(err.source().is_some());
        assert!(CliError::Config("bad".into()).source().is_none());
    }
}
