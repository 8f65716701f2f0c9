//! Logging initialization shared by the Visor binaries.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted for a log-filter override.
pub const LOG_ENV_VAR: &str = "VISOR_LOG";

/// Logging configuration resolved at program entry.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    to_stderr: bool,
}

impl LogConfig {
    /// Build a config from the environment, falling back to `default_level`
    /// when `VISOR_LOG` is unset.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| default_level.to_string());
        Self {
            level,
            to_stderr: false,
        }
    }

    /// Override the level regardless of the environment.
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    /// Send log output to stderr, keeping stdout free for streamed build
    /// logs.
    pub fn with_stderr(mut self) -> Self {
        self.to_stderr = true;
        self
    }

    /// The effective filter directive.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global tracing subscriber.
///
/// Safe to call once per process; a second call returns an error from the
/// subscriber registry, which callers may ignore in tests.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(false);

    if config.to_stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}
