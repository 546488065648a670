//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, HalldyllError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Overrides the project region.
pub const REGION_VAR: &str = "HALLDYLL_REGION";

/// Overrides the artifact bucket.
pub const ARTIFACT_BUCKET_VAR: &str = "HALLDYLL_ARTIFACT_BUCKET";

/// Overrides the artifact key prefix.
pub const ARTIFACT_PREFIX_VAR: &str = "HALLDYLL_ARTIFACT_PREFIX";

/// Overrides the inline template size limit.
pub const INLINE_LIMIT_VAR: &str = "HALLDYLL_INLINE_TEMPLATE_LIMIT";

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(HalldyllError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            HalldyllError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            HalldyllError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration for {} with {} stack(s)",
            config.project.app,
            config.stacks.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// override has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        apply_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Directory that template paths are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        self.base_path.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.base_dir().join(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                HalldyllError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Applies `HALLDYLL_*` overrides read through `lookup`.
///
/// # Errors
///
/// Returns a parse error if the inline limit is not a number.
pub fn apply_overrides<F>(config: &mut DeployConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(region) = lookup(REGION_VAR) {
        debug!("Overriding project.region from environment");
        config.project.region = Some(region);
    }

    if let Some(bucket) = lookup(ARTIFACT_BUCKET_VAR) {
        debug!("Overriding artifacts.bucket from environment");
        config.artifacts.bucket = Some(bucket);
    }

    if let Some(prefix) = lookup(ARTIFACT_PREFIX_VAR) {
        debug!("Overriding artifacts.prefix from environment");
        config.artifacts.prefix = prefix;
    }

    if let Some(limit) = lookup(INLINE_LIMIT_VAR) {
        debug!("Overriding artifacts.inline_template_limit from environment");
        config.artifacts.inline_template_limit = limit.trim().parse().map_err(|e| {
            HalldyllError::Config(ConfigError::ParseError {
                message: format!("invalid {INLINE_LIMIT_VAR} value '{limit}': {e}"),
                location: None,
            })
        })?;
    }

    Ok(())
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["halldyll.stacks.yaml", "halldyll.stacks.yml"];

/// Finds the configuration file in the current directory or parent directories,
/// falling back to the user configuration directory.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    let user_config = dirs::config_dir()
        .map(|d| d.join("halldyll").join("stacks.yaml"))
        .filter(|p| p.exists());
    if let Some(user_config) = user_config {
        info!("Using user configuration file: {}", user_config.display());
        return Ok(user_config);
    }

    Err(HalldyllError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
