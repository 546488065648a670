//! Addons (nested) stack resolution.
//!
//! A nested stack is referenced from its parent by URL, so the child template
//! is always uploaded, whatever its size. The URL and the child's parameters
//! are folded into the parent's parameter set before the parent change set is
//! computed.

use tracing::debug;

use super::packager::Packager;
use crate::error::Result;
use crate::provider::ObjectStore;
use crate::stack::{DEFAULT_ADDONS_URL_PARAMETER, NestedStackReference, ParameterSet};

/// Folds an optional addons stack into its parent's parameters.
#[derive(Debug)]
pub struct NestedStackResolver<O: ?Sized> {
    packager: Packager<O>,
    always_set_url: bool,
}

impl<O: ?Sized> Clone for NestedStackResolver<O> {
    fn clone(&self) -> Self {
        Self {
            packager: self.packager.clone(),
            always_set_url: self.always_set_url,
        }
    }
}

impl<O: ObjectStore + ?Sized> NestedStackResolver<O> {
    /// Creates a resolver.
    ///
    /// With `always_set_url`, a parent without addons still receives the URL
    /// parameter, set to the empty string.
    #[must_use]
    pub const fn new(packager: Packager<O>, always_set_url: bool) -> Self {
        Self {
            packager,
            always_set_url,
        }
    }

    /// Returns the parent parameters with the addons stack resolved.
    ///
    /// # Errors
    ///
    /// Returns a packaging error if the child upload fails or if the child
    /// parameters conflict with the parent's.
    pub async fn resolve(
        &self,
        stack: &str,
        parameters: &ParameterSet,
        addons: Option<&NestedStackReference>,
    ) -> Result<ParameterSet> {
        let mut resolved = parameters.clone();

        match addons {
            Some(child) => {
                let url = self
                    .packager
                    .upload(&format!("{stack}/addons"), &child.template)
                    .await?;
                resolved.merge(&child.parameters)?;
                debug!(stack, parameter = %child.url_parameter, "Resolved addons stack");
                resolved.set(child.url_parameter.clone(), url);
            }
            None if self.always_set_url && !resolved.contains(DEFAULT_ADDONS_URL_PARAMETER) => {
                resolved.set(DEFAULT_ADDONS_URL_PARAMETER, "");
            }
            None => {}
        }

        Ok(resolved)
    }
}
