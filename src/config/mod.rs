//! Configuration module for the stack deployer.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `halldyll.stacks.yaml`
//! - Environment variable overrides
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{
    ARTIFACT_BUCKET_VAR, ARTIFACT_PREFIX_VAR, ConfigParser, DEFAULT_CONFIG_FILES, INLINE_LIMIT_VAR,
    REGION_VAR, apply_overrides, find_config_file,
};
pub use spec::{
    APPLICATION_TAG, AddonsConfig, DeployConfig, ENVIRONMENT_TAG, ProjectConfig, StackConfig,
    WORKLOAD_TAG,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
