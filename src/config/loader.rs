//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles file discovery, environment
//! detection and layering through the `config` crate.

use super::error::{ConfigResult, ConfigurationError};
use super::RecalConfig;
use crate::constants::system;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: RecalConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let base = Self::find_config_file(&config_directory)?;
        let override_path =
            config_directory.join(format!("{}.{environment}.yaml", system::CONFIG_FILE_STEM));

        let config = Self::build(&base, &override_path)?;
        config.validate()?;

        info!(
            environment = environment,
            max_concurrent_jobs = config.scheduler.max_concurrent_jobs,
            default_job_timeout_ms = config.scheduler.default_job_timeout_ms,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Configuration built from defaults and environment variables only
    pub fn from_environment() -> ConfigResult<RecalConfig> {
        let config: RecalConfig = Config::builder()
            .add_source(Self::environment_source())
            .build()
            .map_err(|e| ConfigurationError::source_error("environment", e))?
            .try_deserialize()
            .map_err(|e| ConfigurationError::DeserializationError {
                error: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &RecalConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("RECAL_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| system::DEFAULT_ENVIRONMENT.to_string())
            .to_lowercase()
    }

    fn environment_source() -> Environment {
        Environment::with_prefix(system::ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    /// Find the base configuration file
    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for extension in ["yaml", "yml"] {
            let config_path =
                config_directory.join(format!("{}.{extension}", system::CONFIG_FILE_STEM));
            if config_path.is_file() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
            searched_paths.push(config_path);
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    fn build(base: &Path, environment_override: &Path) -> ConfigResult<RecalConfig> {
        if environment_override.is_file() {
            debug!(
                "Applying environment-specific overrides from: {}",
                environment_override.display()
            );
        }

        Config::builder()
            .add_source(File::from(base).format(FileFormat::Yaml))
            .add_source(
                File::from(environment_override)
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(Self::environment_source())
            .build()
            .map_err(|e| ConfigurationError::source_error(base.display().to_string(), e))?
            .try_deserialize()
            .map_err(|e| ConfigurationError::DeserializationError {
                error: e.to_string(),
            })
    }
}
