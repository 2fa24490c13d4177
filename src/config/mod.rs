//! # Configuration Management
//!
//! Layered configuration for the scheduler and logging:
//!
//! 1. `recal.yaml` in the configuration directory
//! 2. `recal.<environment>.yaml` overrides, when present
//! 3. `RECAL__*` environment variables, `__` separating nested keys
//!    (e.g. `RECAL__SCHEDULER__MAX_CONCURRENT_JOBS=4`)
//!
//! ```rust,no_run
//! use recal_core::config::ConfigManager;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_directory_with_env(Some("config".into()), "test")?;
//! println!("max jobs: {}", manager.config().scheduler.max_concurrent_jobs);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::system;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Job scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on physical executions running at once, process-wide.
    ///
    /// Every node of a layer is launched together, but a layer wider than this
    /// bound only invokes `max_concurrent_jobs` procedures at a time; the rest
    /// wait for a permit (deadlines and cancellation still apply while waiting).
    /// Raise it to at least the widest layer for fully parallel layers.
    pub max_concurrent_jobs: usize,
    /// Per-invocation timeout when the caller supplies no tighter deadline; 0 disables it
    pub default_job_timeout_ms: u64,
    pub event_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: system::DEFAULT_MAX_CONCURRENT_JOBS,
            default_job_timeout_ms: system::DEFAULT_JOB_TIMEOUT_MS,
            event_channel_capacity: system::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn default_job_timeout(&self) -> Option<Duration> {
        (self.default_job_timeout_ms > 0).then(|| Duration::from_millis(self.default_job_timeout_ms))
    }
}

/// Structured logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
    pub ansi: bool,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: true,
            with_target: true,
        }
    }
}

impl RecalConfig {
    /// Validate the configuration for consistency
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.max_concurrent_jobs == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_concurrent_jobs",
                "0",
                "at least one job must be allowed to run",
            ));
        }

        if self.scheduler.event_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.event_channel_capacity",
                "0",
                "event channel capacity must be greater than 0",
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "logging.level",
                "",
                "log level must not be empty",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RecalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.default_job_timeout(), None);
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let mut config = RecalConfig::default();
        config.scheduler.max_concurrent_jobs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { field, .. }) if field == "scheduler.max_concurrent_jobs"
        ));

        let mut config = RecalConfig::default();
        config.scheduler.event_channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_conversion() {
        let scheduler = SchedulerConfig {
            default_job_timeout_ms: 1500,
            ..SchedulerConfig::default()
        };
        assert_eq!(
            scheduler.default_job_timeout(),
            Some(Duration::from_millis(1500))
        );
    }
}
