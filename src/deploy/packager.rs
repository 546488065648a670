//! Template packaging: inline bodies versus object-store uploads.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{HalldyllError, PackagingError, Result};
use crate::provider::{ObjectStore, TemplateSource};
use crate::stack::{ParameterDiff, ParameterSet, Template};

/// Largest template body the provider accepts inline, in bytes.
pub const DEFAULT_INLINE_TEMPLATE_LIMIT: usize = 51_200;

/// Where and when templates are uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// Bucket receiving uploaded templates.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Key prefix inside the bucket.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Templates larger than this are uploaded.
    #[serde(default = "default_inline_limit")]
    pub inline_template_limit: usize,
}

fn default_prefix() -> String {
    String::from("templates")
}

const fn default_inline_limit() -> usize {
    DEFAULT_INLINE_TEMPLATE_LIMIT
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: default_prefix(),
            inline_template_limit: DEFAULT_INLINE_TEMPLATE_LIMIT,
        }
    }
}

/// A template ready to be referenced by a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedTemplate {
    /// Inline body or uploaded URL.
    pub source: TemplateSource,
    /// Content fingerprint of the template.
    pub fingerprint: String,
    /// Body size in bytes.
    pub size: usize,
}

impl PackagedTemplate {
    /// Returns true if the template was uploaded.
    #[must_use]
    pub const fn is_uploaded(&self) -> bool {
        matches!(self.source, TemplateSource::Url(_))
    }
}

/// Encodes templates for the provider.
#[derive(Debug)]
pub struct Packager<O: ?Sized> {
    store: Arc<O>,
    settings: ArtifactSettings,
}

impl<O: ?Sized> Clone for Packager<O> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
        }
    }
}

impl<O: ObjectStore + ?Sized> Packager<O> {
    /// Creates a packager writing to `store`.
    #[must_use]
    pub const fn new(store: Arc<O>, settings: ArtifactSettings) -> Self {
        Self { store, settings }
    }

    /// Returns the artifact settings.
    #[must_use]
    pub const fn settings(&self) -> &ArtifactSettings {
        &self.settings
    }

    /// Content-addressed key of `template` for `stack`.
    #[must_use]
    pub fn object_key(&self, stack: &str, template: &Template) -> String {
        let prefix = self.settings.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{stack}/{}.yml", template.fingerprint())
        } else {
            format!("{prefix}/{stack}/{}.yml", template.fingerprint())
        }
    }

    /// Packages `template`, uploading it when it exceeds the inline limit or
    /// is not valid UTF-8. Uploads carry the exact bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`PackagingError`] if an upload is needed and fails, or if no
    /// bucket is configured for it.
    pub async fn package(&self, stack: &str, template: &Template) -> Result<PackagedTemplate> {
        if template.size() <= self.settings.inline_template_limit {
            if let Some(body) = template.as_utf8() {
                debug!(stack, size = template.size(), "Passing template inline");
                return Ok(PackagedTemplate {
                    source: TemplateSource::Inline(body.to_string()),
                    fingerprint: template.fingerprint().to_string(),
                    size: template.size(),
                });
            }
            debug!(stack, "Template is not valid UTF-8, uploading it unchanged");
        }

        let url = self.upload(stack, template).await?;
        Ok(PackagedTemplate {
            source: TemplateSource::Url(url),
            fingerprint: template.fingerprint().to_string(),
            size: template.size(),
        })
    }

    /// Uploads `template` unconditionally and returns its URL.
    ///
    /// # Errors
    ///
    /// Returns a [`PackagingError`] if no bucket is configured or the write fails.
    pub async fn upload(&self, stack: &str, template: &Template) -> Result<String> {
        let Some(bucket) = self.settings.bucket.as_deref().filter(|b| !b.is_empty()) else {
            return Err(HalldyllError::Packaging(PackagingError::NoArtifactBucket {
                stack: stack.to_string(),
                size: template.size(),
                limit: self.settings.inline_template_limit,
            }));
        };

        let key = self.object_key(stack, template);
        let url = self
            .store
            .put_object(bucket, &key, template.body().to_vec())
            .await
            .map_err(|e| match e {
                HalldyllError::Packaging(_) => e,
                other => HalldyllError::Packaging(PackagingError::UploadFailed {
                    bucket: bucket.to_string(),
                    key: key.clone(),
                    message: other.to_string(),
                }),
            })?;

        info!(stack, size = template.size(), url = %url, "Uploaded template");
        Ok(url)
    }
}

/// Compares the live parameters of a stack with the desired ones.
///
/// The result is advisory and never used to skip a change set.
#[must_use]
pub fn diff_parameters(live: &ParameterSet, desired: &ParameterSet) -> ParameterDiff {
    desired.diff_from(live)
}
