//! Stack identities and deterministic stack naming.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConfigError, HalldyllError, Result};

/// Maximum stack name length accepted by the provider.
const MAX_STACK_NAME_LEN: usize = 128;

/// Identity of a deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackIdentity {
    /// Stack name, unique per region and account.
    pub name: String,
    /// Provider region.
    pub region: String,
    /// Account the stack lives in (may be empty when implied by credentials).
    #[serde(default)]
    pub account: String,
}

impl StackIdentity {
    /// Creates an identity from an explicit stack name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name violates provider naming rules.
    pub fn new(name: &str, region: &str, account: &str) -> Result<Self> {
        validate_stack_name(name)?;
        Ok(Self {
            name: name.to_string(),
            region: region.to_string(),
            account: account.to_string(),
        })
    }

    /// Identity of a workload stack (`{app}-{env}-{workload}`).
    ///
    /// # Errors
    ///
    /// Returns an error if the derived name is invalid.
    pub fn workload(app: &str, env: &str, workload: &str, region: &str, account: &str) -> Result<Self> {
        Self::new(&format!("{app}-{env}-{workload}"), region, account)
    }

    /// Identity of an environment stack (`{app}-{env}`).
    ///
    /// # Errors
    ///
    /// Returns an error if the derived name is invalid.
    pub fn environment(app: &str, env: &str, region: &str, account: &str) -> Result<Self> {
        Self::new(&format!("{app}-{env}"), region, account)
    }

    /// Identity of a release pipeline stack (`pipeline-{app}-{pipeline}`).
    ///
    /// # Errors
    ///
    /// Returns an error if the derived name is invalid.
    pub fn pipeline(app: &str, pipeline: &str, region: &str, account: &str) -> Result<Self> {
        Self::new(&format!("pipeline-{app}-{pipeline}"), region, account)
    }

    /// Key used to serialize deployments of this stack.
    #[must_use]
    pub fn guard_key(&self) -> String {
        format!("{}/{}/{}", self.account, self.region, self.name)
    }
}

impl fmt::Display for StackIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.region)
    }
}

/// Validates a stack name against provider rules.
///
/// # Errors
///
/// Returns an error describing the first violated rule.
pub fn validate_stack_name(name: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(HalldyllError::Config(ConfigError::InvalidStackName {
            name: name.to_string(),
            reason: reason.to_string(),
        }))
    };

    if name.is_empty() {
        return reject("name cannot be empty");
    }
    if name.len() > MAX_STACK_NAME_LEN {
        return reject("name must be at most 128 characters");
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return reject("name must start with a letter");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return reject("name may only contain letters, digits and hyphens");
    }
    Ok(())
}
