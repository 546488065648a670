//! Request and response shapes shared by provider implementations.

use std::collections::HashMap;

use crate::stack::{ChangeSetMode, ParameterSet, StackEvent};

/// How a template is handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Template body sent inline with the request.
    Inline(String),
    /// URL of the template in object storage.
    Url(String),
}

/// Parameters of a `CreatePreview` call.
#[derive(Debug, Clone)]
pub struct ChangeSetRequest {
    /// Stack name.
    pub stack_name: String,
    /// Change set name, unique per attempt and reused on retries.
    pub change_set_name: String,
    /// Create or update.
    pub mode: ChangeSetMode,
    /// Template location.
    pub template: TemplateSource,
    /// Parameters.
    pub parameters: ParameterSet,
    /// Stack tags.
    pub tags: HashMap<String, String>,
    /// Human-readable description.
    pub description: String,
}

/// One page of stack events, newest first.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    /// Events on this page, newest first.
    pub events: Vec<StackEvent>,
    /// Token for the next (older) page.
    pub next_token: Option<String>,
}
