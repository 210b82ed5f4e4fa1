//! Explicit logging setup
//!
//! Nothing here runs on module load; binaries call [`init`] once with the
//! configuration they were given. `RUST_LOG` overrides the configured filter.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `seeder_orchestration=debug`
    pub filter: String,
    /// Include module targets in each line
    pub with_target: bool,
    /// Write to stderr so stdout stays machine-readable
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            with_target: false,
            stderr: true,
        }
    }
}

impl LogConfig {
    pub fn verbose() -> Self {
        Self {
            filter: "debug".to_string(),
            with_target: true,
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init(config: &LogConfig) -> bool {
    let builder = fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.with_target);

    let result = if config.stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}
