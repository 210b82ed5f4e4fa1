//! Seeder configuration (versioned YAML)
//!
//! ```yaml
//! version: 1
//! environment: staging
//! allowed_environments: [staging]
//! checkpoint_dir: .seed-progress
//! auto_confirm: false
//! resume_command: "seed-orders --resume {batch_id}"
//! log_filter: info
//! ingestion:
//!   timeout_secs: 120
//!   poll_interval_ms: 2000
//!   allow_partial_success: false
//! grouping:
//!   region: us-east
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogConfig;
use crate::poller::PollerOptions;

const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Errors raised while loading or validating seeder configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("seeder config has no 'version' key (expected 'version: 1')")]
    MissingVersion,

    #[error("seeder config version {found} is not supported (known: {supported:?})")]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Custom(String),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IngestionConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub allow_partial_success: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 2_000,
            allow_partial_success: false,
        }
    }
}

impl IngestionConfig {
    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            allow_partial_success: self.allow_partial_success,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupingConfig {
    pub region: String,
}

/// Validated engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeederConfig {
    /// Target environment name; also the checkpoint subdirectory
    pub environment: String,
    /// Environments the seeder may write to
    pub allowed_environments: Vec<String>,
    pub checkpoint_dir: PathBuf,
    /// Skip the between-stage confirmation prompt
    pub auto_confirm: bool,
    /// Resume invocation shown to operators; `{batch_id}` is substituted
    pub resume_command: String,
    pub log_filter: String,
    pub ingestion: IngestionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingConfig>,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            environment: "staging".to_string(),
            allowed_environments: vec!["staging".to_string()],
            checkpoint_dir: PathBuf::from(".seed-progress"),
            auto_confirm: false,
            resume_command: "seed-orders --resume {batch_id}".to_string(),
            log_filter: "info".to_string(),
            ingestion: IngestionConfig::default(),
            grouping: None,
        }
    }
}

impl SeederConfig {
    /// Load from YAML file (v1 schema)
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(content)?;
        let mapping = value
            .as_mapping_mut()
            .ok_or_else(|| ConfigError::Custom("configuration must be a YAML mapping".into()))?;

        // Version check
        let version = mapping
            .remove("version")
            .ok_or(ConfigError::MissingVersion)?;
        let version: u32 = serde_yaml::from_value(version)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let config: SeederConfig = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !seeder_storage::domain::is_safe_key(&self.environment) {
            return Err(ConfigError::invalid(
                "environment",
                "use ASCII letters, digits, '-', '_' or '.'",
            ));
        }
        if self.allowed_environments.is_empty() {
            return Err(ConfigError::invalid(
                "allowed_environments",
                "at least one environment must be allowed",
            ));
        }
        if !self.resume_command.contains("{batch_id}") {
            return Err(ConfigError::invalid(
                "resume_command",
                "must contain the {batch_id} placeholder",
            ));
        }
        if self.ingestion.timeout_secs == 0 {
            return Err(ConfigError::invalid("ingestion.timeout_secs", "must be > 0"));
        }
        if self.ingestion.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "ingestion.poll_interval_ms",
                "must be > 0",
            ));
        }
        if let Some(grouping) = &self.grouping {
            if grouping.region.trim().is_empty() {
                return Err(ConfigError::invalid("grouping.region", "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn guard(&self) -> EnvironmentGuard {
        EnvironmentGuard::new(self.environment.clone(), self.allowed_environments.clone())
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            filter: self.log_filter.clone(),
            ..LogConfig::default()
        }
    }
}

/// Safety guardrail: refuse to seed anything but an allowed environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentGuard {
    target: String,
    allowed: Vec<String>,
}

impl EnvironmentGuard {
    pub fn new(target: impl Into<String>, allowed: Vec<String>) -> Self {
        Self {
            target: target.into(),
            allowed,
        }
    }

    /// Only `staging` allowed.
    pub fn staging_only(target: impl Into<String>) -> Self {
        Self::new(target, vec!["staging".to_string()])
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn check(&self) -> std::result::Result<(), String> {
        if self
            .allowed
            .iter()
            .any(|env| env.eq_ignore_ascii_case(&self.target))
        {
            Ok(())
        } else {
            Err(format!(
                "target environment '{}' is not in the allowed list [{}]",
                self.target,
                self.allowed.join(", ")
            ))
        }
    }
}
