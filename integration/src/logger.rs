/// Unified logger for centralized logging configuration

use site_archiver_core::errors::{ArchiverError, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Log level or filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Include thread IDs
    pub include_thread_ids: bool,

    /// Include target module paths
    pub include_targets: bool,

    /// Colored output
    pub ansi: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            include_thread_ids: false,
            include_targets: true,
            ansi: true,
        }
    }
}

impl LoggerConfig {
    pub fn with_level(level: &str) -> Self {
        Self {
            level: level.to_string(),
            ..Self::default()
        }
    }

    fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| ArchiverError::configuration(format!("Invalid log level '{}': {}", self.level, e)))
    }
}

/// Unified logger
pub struct UnifiedLogger;

impl UnifiedLogger {
    /// Initialize the global logger. Returns `false` when a global
    /// subscriber was already installed.
    pub fn init(config: LoggerConfig) -> Result<bool> {
        let filter = config.filter()?;

        let console_layer = fmt::layer()
            .with_target(config.include_targets)
            .with_thread_ids(config.include_thread_ids)
            .with_ansi(config.ansi);

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
            .is_ok();

        if installed {
            tracing::info!("Logging initialized with level: {}", config.level);
        } else {
            tracing::debug!("Logging already initialized");
        }

        Ok(installed)
    }

    /// Initialize with default configuration
    pub fn init_default() -> Result<bool> {
        Self::init(LoggerConfig::default())
    }
}
