//! Stack configurations produced by template-generation collaborators.
//!
//! The engine consumes every kind of stack (environments, services, jobs,
//! pipelines) uniformly through [`StackConfiguration`]. Kind-specific logic
//! lives in whatever renders the template, never in the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;

use super::identity::StackIdentity;
use super::params::ParameterSet;
use super::template::Template;

/// Parent parameter that receives the addons template URL by default.
pub const DEFAULT_ADDONS_URL_PARAMETER: &str = "AddonsTemplateURL";

/// Kind of stack being deployed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StackKind {
    /// Application environment (network, cluster).
    Environment,
    /// Load-balanced web service.
    #[default]
    LoadBalancedService,
    /// Backend service without a public load balancer.
    BackendService,
    /// Scheduled job.
    ScheduledJob,
    /// Release pipeline.
    Pipeline,
}

/// Capability interface of anything the engine can deploy.
pub trait StackConfiguration: Send + Sync {
    /// Stack name.
    fn stack_name(&self) -> &str;

    /// Kind of stack.
    fn kind(&self) -> StackKind;

    /// Rendered template.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be produced.
    fn template(&self) -> Result<Template>;

    /// Parameters for the template.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be produced.
    fn parameters(&self) -> Result<ParameterSet>;

    /// Tags applied to the stack.
    fn tags(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Optional addons stack nested in this one.
    fn addons(&self) -> Option<NestedStackReference> {
        None
    }
}

/// Pointer from a parent template to a child (addons) template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedStackReference {
    /// Child template.
    pub template: Template,
    /// Parameters passed through the parent to the child.
    pub parameters: ParameterSet,
    /// Parent parameter that receives the child template URL.
    pub url_parameter: String,
}

impl NestedStackReference {
    /// Creates a reference using the default URL parameter.
    #[must_use]
    pub fn new(template: Template, parameters: ParameterSet) -> Self {
        Self {
            template,
            parameters,
            url_parameter: String::from(DEFAULT_ADDONS_URL_PARAMETER),
        }
    }
}

/// An already-rendered stack: template text plus parameters.
#[derive(Debug, Clone)]
pub struct RenderedStack {
    /// Stack name.
    pub name: String,
    /// Stack kind.
    pub kind: StackKind,
    /// Rendered template.
    pub template: Template,
    /// Parameters.
    pub parameters: ParameterSet,
    /// Tags.
    pub tags: HashMap<String, String>,
    /// Optional addons stack.
    pub addons: Option<NestedStackReference>,
}

impl StackConfiguration for RenderedStack {
    fn stack_name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StackKind {
        self.kind
    }

    fn template(&self) -> Result<Template> {
        Ok(self.template.clone())
    }

    fn parameters(&self) -> Result<ParameterSet> {
        Ok(self.parameters.clone())
    }

    fn tags(&self) -> HashMap<String, String> {
        self.tags.clone()
    }

    fn addons(&self) -> Option<NestedStackReference> {
        self.addons.clone()
    }
}

/// Everything the engine needs to deploy one stack.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Target stack.
    pub identity: StackIdentity,
    /// Template to apply.
    pub template: Template,
    /// Parameters to apply.
    pub parameters: ParameterSet,
    /// Stack tags.
    pub tags: HashMap<String, String>,
    /// Optional addons stack.
    pub addons: Option<NestedStackReference>,
}

impl DeployRequest {
    /// Creates a request with no tags and no addons.
    #[must_use]
    pub fn new(identity: StackIdentity, template: Template, parameters: ParameterSet) -> Self {
        Self {
            identity,
            template,
            parameters,
            tags: HashMap::new(),
            addons: None,
        }
    }

    /// Builds a request from a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or rendering fails.
    pub fn from_configuration(
        config: &dyn StackConfiguration,
        region: &str,
        account: &str,
    ) -> Result<Self> {
        Ok(Self {
            identity: StackIdentity::new(config.stack_name(), region, account)?,
            template: config.template()?,
            parameters: config.parameters()?,
            tags: config.tags(),
            addons: config.addons(),
        })
    }

    /// Attaches an addons stack.
    #[must_use]
    pub fn with_addons(mut self, addons: NestedStackReference) -> Self {
        self.addons = Some(addons);
        self
    }

    /// Attaches tags.
    #[must_use]
    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Environment => "environment",
            Self::LoadBalancedService => "load-balanced-service",
            Self::BackendService => "backend-service",
            Self::ScheduledJob => "scheduled-job",
            Self::Pipeline => "pipeline",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_rendered_stack() {
        let stack = RenderedStack {
            name: String::from("app-test-api"),
            kind: StackKind::LoadBalancedService,
            template: Template::from("Resources: {}"),
            parameters: ParameterSet::new().with("AppName", "app"),
            tags: HashMap::from([(String::from("copilot-application"), String::from("app"))]),
            addons: Some(NestedStackReference::new(
                Template::from("Resources: {Table: {}}"),
                ParameterSet::new(),
            )),
        };

        let request = DeployRequest::from_configuration(&stack, "us-west-2", "")
            .expect("valid request");
        assert_eq!(request.identity.name, "app-test-api");
        assert_eq!(request.parameters.get("AppName"), Some("app"));
        assert_eq!(request.tags.len(), 1);
        let addons = request.addons.expect("addons carried over");
        assert_eq!(addons.url_parameter, DEFAULT_ADDONS_URL_PARAMETER);
    }

    #[test]
    fn test_request_rejects_invalid_name() {
        let stack = RenderedStack {
            name: String::from("bad name"),
            kind: StackKind::ScheduledJob,
            template: Template::from("{}"),
            parameters: ParameterSet::new(),
            tags: HashMap::new(),
            addons: None,
        };
        assert!(DeployRequest::from_configuration(&stack, "us-west-2", "").is_err());
    }
}
