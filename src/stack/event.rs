//! Stack progress events.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single progress event emitted by the provider for a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackEvent {
    /// Provider-unique event identifier.
    pub event_id: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Logical ID of the resource in the template.
    pub logical_id: String,
    /// Resource type (e.g. `AWS::ECS::Service`).
    pub resource_type: String,
    /// Resource status (e.g. `CREATE_FAILED`).
    pub status: String,
    /// Provider explanation of the status.
    pub status_reason: Option<String>,
}

impl StackEvent {
    /// Returns true if this event reports a failed resource operation.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.ends_with("_FAILED")
    }
}
