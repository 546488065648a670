//! Configuration validation for stack deployment files.
//!
//! This module validates a [`DeployConfig`] before anything is sent to the
//! provider, collecting every problem rather than stopping at the first.

use crate::deploy::packager::DEFAULT_INLINE_TEMPLATE_LIMIT;
use crate::error::{ConfigError, HalldyllError, Result};
use crate::stack::validate_stack_name;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::spec::{DeployConfig, ProjectConfig, StackConfig};

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// When set, template paths are checked against this directory.
    base_dir: Option<PathBuf>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a validator that does not touch the filesystem.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_dir: None }
    }

    /// Also checks that templates exist relative to `base_dir`.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(HalldyllError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        self.validate_stacks(config, &mut result);
        Self::validate_artifacts(config, &mut result);
        Self::validate_engine(config, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.app.is_empty() {
            result.error("project.app", "Application name cannot be empty");
        } else if !is_valid_name(&project.app) {
            result.error(
                "project.app",
                format!(
                    "Application name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.app
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        } else if !is_valid_name(&project.environment) {
            result.error(
                "project.environment",
                format!(
                    "Environment '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.environment
                ),
            );
        }

        if project.region.is_none() {
            result
                .warnings
                .push(String::from("project.region: not set, using the SDK default region"));
        }
    }

    fn validate_stacks(&self, config: &DeployConfig, result: &mut ValidationResult) {
        if config.stacks.is_empty() {
            result.warnings.push(String::from("No stacks defined in configuration"));
            return;
        }

        let mut seen_entries = HashSet::new();
        let mut seen_stacks = HashSet::new();

        for (i, stack) in config.stacks.iter().enumerate() {
            let prefix = format!("stacks[{i}]");

            if !seen_entries.insert(stack.name.as_str()) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate stack entry: {}", stack.name),
                );
            }

            if stack.stack_name.is_none() && !is_valid_name(&stack.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Stack entry name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        stack.name
                    ),
                );
            }

            let stack_name = stack.stack_name(&config.project);
            if let Err(e) = validate_stack_name(&stack_name) {
                result.error(format!("{prefix}.stack_name"), e.to_string());
            }
            if !seen_stacks.insert(stack_name.clone()) {
                result.error(
                    format!("{prefix}.stack_name"),
                    format!("Two entries deploy the same stack: {stack_name}"),
                );
            }

            self.validate_templates(stack, &prefix, result);
        }
    }

    fn validate_templates(&self, stack: &StackConfig, prefix: &str, result: &mut ValidationResult) {
        if let Some(addons) = &stack.addons {
            if stack.parameters.contains_key(&addons.url_parameter) {
                result.error(
                    format!("{prefix}.parameters"),
                    format!(
                        "Parameter {} is reserved for the addons template URL",
                        addons.url_parameter
                    ),
                );
            }
            for key in addons.parameters.keys() {
                if stack.parameters.contains_key(key) {
                    result.error(
                        format!("{prefix}.addons.parameters"),
                        format!("Parameter {key} is declared by both the stack and its addons"),
                    );
                }
            }
        }

        let Some(base_dir) = &self.base_dir else {
            return;
        };

        check_template(base_dir, &stack.template, &format!("{prefix}.template"), result);
        if let Some(addons) = &stack.addons {
            check_template(
                base_dir,
                &addons.template,
                &format!("{prefix}.addons.template"),
                result,
            );
        }
    }

    fn validate_artifacts(config: &DeployConfig, result: &mut ValidationResult) {
        let artifacts = &config.artifacts;
        let has_bucket = artifacts.bucket.as_ref().is_some_and(|b| !b.is_empty());

        if !has_bucket {
            if config.stacks.iter().any(|s| s.addons.is_some()) {
                result.error(
                    "artifacts.bucket",
                    "An artifact bucket is required when a stack has addons",
                );
            } else {
                result.warnings.push(format!(
                    "artifacts.bucket: not set, templates over {} bytes will fail to deploy",
                    artifacts.inline_template_limit
                ));
            }
        }

        if artifacts.inline_template_limit == 0 {
            result.error(
                "artifacts.inline_template_limit",
                "Inline template limit must be at least 1 byte",
            );
        } else if artifacts.inline_template_limit > DEFAULT_INLINE_TEMPLATE_LIMIT {
            result.warnings.push(format!(
                "artifacts.inline_template_limit: {} exceeds the provider limit of {DEFAULT_INLINE_TEMPLATE_LIMIT} bytes",
                artifacts.inline_template_limit
            ));
        }
    }

    fn validate_engine(config: &DeployConfig, result: &mut ValidationResult) {
        let engine = &config.engine;
        let intervals = [
            ("engine.change_set_poll_interval_secs", engine.change_set_poll_interval_secs),
            ("engine.change_set_timeout_secs", engine.change_set_timeout_secs),
            ("engine.stack_poll_interval_secs", engine.stack_poll_interval_secs),
            ("engine.event_poll_interval_secs", engine.event_poll_interval_secs),
            ("engine.stack_timeout_secs", engine.stack_timeout_secs),
        ];

        for (field, value) in intervals {
            if value == 0 {
                result.error(field, "Must be at least 1 second");
            }
        }

        if engine.retry.max_attempts == 0 {
            result.error("engine.retry.max_attempts", "At least one attempt is required");
        }
    }
}

fn check_template(base_dir: &Path, template: &Path, field: &str, result: &mut ValidationResult) {
    let path = base_dir.join(template);
    if !path.is_file() {
        result.error(field, format!("Template not found: {}", path.display()));
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    // First character must be a letter
    if !chars.next().is_some_and(|first| first.is_ascii_lowercase()) {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
