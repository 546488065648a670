//! Configuration specification types for the stack deployer.
//!
//! This module defines all the structs that map to the `halldyll.stacks.yaml`
//! file. Each entry under `stacks` points at an already-rendered template on
//! disk plus the parameters and tags to deploy it with.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::deploy::{ArtifactSettings, EngineSettings};
use crate::error::{ConfigError, HalldyllError, Result};
use crate::stack::{
    DEFAULT_ADDONS_URL_PARAMETER, NestedStackReference, ParameterSet, RenderedStack,
    StackIdentity, StackKind, Template,
};

/// Tag carrying the application name on every stack.
pub const APPLICATION_TAG: &str = "halldyll-application";

/// Tag carrying the environment name on environment-scoped stacks.
pub const ENVIRONMENT_TAG: &str = "halldyll-environment";

/// Tag carrying the workload or pipeline name.
pub const WORKLOAD_TAG: &str = "halldyll-workload";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Where oversized and nested templates are uploaded.
    #[serde(default)]
    pub artifacts: ArtifactSettings,
    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineSettings,
    /// Stacks to deploy.
    #[serde(default)]
    pub stacks: Vec<StackConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Application name.
    pub app: String,
    /// Environment (e.g., "test", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Region (uses the SDK default chain if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Account id, used to key concurrent deployments.
    #[serde(default)]
    pub account: Option<String>,
    /// Tags applied to every stack.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Configuration for a single stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackConfig {
    /// Workload, environment or pipeline name.
    pub name: String,
    /// Kind of stack.
    #[serde(default)]
    pub kind: StackKind,
    /// Path to the rendered template, relative to the config file.
    pub template: PathBuf,
    /// Explicit stack name, overriding the derived one.
    #[serde(default)]
    pub stack_name: Option<String>,
    /// Template parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Stack tags (merged over project tags).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Optional addons stack.
    #[serde(default)]
    pub addons: Option<AddonsConfig>,
}

/// Addons (nested) stack configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddonsConfig {
    /// Path to the rendered addons template.
    pub template: PathBuf,
    /// Parameters passed through the parent.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Parent parameter receiving the addons template URL.
    #[serde(default = "default_url_parameter")]
    pub url_parameter: String,
}

fn default_environment() -> String {
    String::from("test")
}

fn default_url_parameter() -> String {
    String::from(DEFAULT_ADDONS_URL_PARAMETER)
}

impl DeployConfig {
    /// Returns the stack entry with the given name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownStack`] if no entry matches.
    pub fn stack(&self, name: &str) -> Result<&StackConfig> {
        self.stacks
            .iter()
            .find(|s| s.name == name || s.stack_name(&self.project) == name)
            .ok_or_else(|| {
                HalldyllError::Config(ConfigError::UnknownStack {
                    name: name.to_string(),
                })
            })
    }

    /// Returns the selected stacks: one by name, or all of them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownStack`] if the name matches nothing.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&StackConfig>> {
        match name {
            Some(name) => Ok(vec![self.stack(name)?]),
            None => Ok(self.stacks.iter().collect()),
        }
    }

    /// Gets all stack entry names.
    #[must_use]
    pub fn stack_names(&self) -> Vec<&str> {
        self.stacks.iter().map(|s| s.name.as_str()).collect()
    }

    /// Region to deploy to, if configured.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.project.region.as_deref()
    }
}

impl StackConfig {
    /// Provider stack name for this entry.
    #[must_use]
    pub fn stack_name(&self, project: &ProjectConfig) -> String {
        if let Some(name) = &self.stack_name {
            return name.clone();
        }
        match self.kind {
            StackKind::Environment => format!("{}-{}", project.app, project.environment),
            StackKind::Pipeline => format!("pipeline-{}-{}", project.app, self.name),
            StackKind::LoadBalancedService | StackKind::BackendService | StackKind::ScheduledJob => {
                format!("{}-{}-{}", project.app, project.environment, self.name)
            }
        }
    }

    /// Identity of this stack in `region`.
    ///
    /// # Errors
    ///
    /// Returns an error if the derived name is invalid.
    pub fn identity(&self, project: &ProjectConfig, region: &str) -> Result<StackIdentity> {
        let account = project.account.as_deref().unwrap_or_default();
        if self.stack_name.is_some() {
            return StackIdentity::new(&self.stack_name(project), region, account);
        }
        match self.kind {
            StackKind::Environment => {
                StackIdentity::environment(&project.app, &project.environment, region, account)
            }
            StackKind::Pipeline => StackIdentity::pipeline(&project.app, &self.name, region, account),
            StackKind::LoadBalancedService | StackKind::BackendService | StackKind::ScheduledJob => {
                StackIdentity::workload(&project.app, &project.environment, &self.name, region, account)
            }
        }
    }

    /// Stack tags: project tags, the standard tags, then stack tags.
    #[must_use]
    pub fn tags(&self, project: &ProjectConfig) -> HashMap<String, String> {
        let mut tags: HashMap<String, String> = project.tags.clone().into_iter().collect();
        tags.insert(APPLICATION_TAG.to_string(), project.app.clone());
        match self.kind {
            StackKind::Environment => {
                tags.insert(ENVIRONMENT_TAG.to_string(), project.environment.clone());
            }
            StackKind::Pipeline => {
                tags.insert(WORKLOAD_TAG.to_string(), self.name.clone());
            }
            StackKind::LoadBalancedService | StackKind::BackendService | StackKind::ScheduledJob => {
                tags.insert(ENVIRONMENT_TAG.to_string(), project.environment.clone());
                tags.insert(WORKLOAD_TAG.to_string(), self.name.clone());
            }
        }
        tags.extend(self.tags.clone());
        tags
    }

    /// Reads the templates from disk, relative to `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if a template cannot be read.
    pub fn render(&self, project: &ProjectConfig, base_dir: &Path) -> Result<RenderedStack> {
        let template = read_template(base_dir, &self.template)?;
        let addons = match &self.addons {
            Some(addons) => Some(NestedStackReference {
                template: read_template(base_dir, &addons.template)?,
                parameters: to_parameter_set(&addons.parameters),
                url_parameter: addons.url_parameter.clone(),
            }),
            None => None,
        };

        Ok(RenderedStack {
            name: self.stack_name(project),
            kind: self.kind,
            template,
            parameters: to_parameter_set(&self.parameters),
            tags: self.tags(project),
            addons,
        })
    }
}

fn to_parameter_set(parameters: &BTreeMap<String, String>) -> ParameterSet {
    parameters
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn read_template(base_dir: &Path, path: &Path) -> Result<Template> {
    let full = base_dir.join(path);
    let body = std::fs::read(&full).map_err(|e| {
        HalldyllError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read template {}: {e}", full.display()),
        ))
    })?;
    Ok(Template::new(body))
}
