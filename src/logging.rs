//! Logging setup
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! embedding application installs a subscriber. `init_logging` is a
//! convenience for applications that don't have their own.
//!
//! ```rust,ignore
//! use agent_governance::logging::{init_logging, LogConfig};
//!
//! let _guard = init_logging(&LogConfig::default().with_file("logs", "governance.log"))?;
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::core::{GovernanceError, GovernanceResult};

/// Daily rolling log file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFileConfig {
    pub directory: PathBuf,
    /// File name prefix; the date is appended
    pub file_prefix: String,
}

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `agent_governance=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Colored terminal output
    pub ansi: bool,
    /// Also write to a rolling file
    pub file: Option<LogFileConfig>,
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    pub fn with_file(mut self, directory: impl Into<PathBuf>, file_prefix: impl Into<String>) -> Self {
        self.file = Some(LogFileConfig {
            directory: directory.into(),
            file_prefix: file_prefix.into(),
        });
        self
    }

    fn env_filter(&self) -> GovernanceResult<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| GovernanceError::Logging(format!("invalid log filter '{}': {}", self.level, e)))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: true,
            file: None,
        }
    }
}

/// Install the global subscriber
///
/// Logs go to stderr and, if configured, to a daily rolling file. Keep the
/// returned guard alive for as long as file output is wanted; dropping it
/// flushes and stops the background writer.
///
/// Returns `GovernanceError::Logging` if a global subscriber is already set
/// or the log directory cannot be created.
pub fn init_logging(config: &LogConfig) -> GovernanceResult<Option<WorkerGuard>> {
    let filter = config.env_filter()?;

    let stderr_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(config.ansi)
            .boxed()
    };

    let (file_layer, guard) = match &config.file {
        Some(file) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(file.file_prefix.as_str())
                .build(&file.directory)
                .map_err(|e| {
                    GovernanceError::Logging(format!(
                        "cannot write logs to {}: {}",
                        file.directory.display(),
                        e
                    ))
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if config.json {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .boxed()
            } else {
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|e| GovernanceError::Logging(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: LogConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert!(config.json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_with_file() {
        let config = LogConfig::default().with_file("/var/log/agent", "governance.log");
        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/agent"));
        assert_eq!(file.file_prefix, "governance.log");
    }

    #[test]
    fn test_unwritable_log_directory_is_an_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "a file, not a directory").unwrap();

        let config = LogConfig::default().with_file(blocker.join("logs"), "governance.log");
        let result = init_logging(&config);
        assert!(matches!(result, Err(GovernanceError::Logging(_))));
    }

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig::default().with_level("warn").with_ansi(false);

        // the first call may lose to another subscriber; the second never succeeds
        let _ = init_logging(&config);
        let second = init_logging(&config);
        assert!(matches!(second, Err(GovernanceError::Logging(_))));
    }
}
