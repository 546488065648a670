//! Change sets: provider-computed previews of a stack delta.

use serde::Serialize;
use std::fmt;

/// Provider reasons that mean "nothing to change" rather than a failure.
const NO_CHANGE_REASONS: &[&str] = &[
    "The submitted information didn't contain changes",
    "No updates are to be performed",
];

/// Whether a change set creates a new stack or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeSetMode {
    /// The stack does not exist yet.
    Create,
    /// The stack exists and is updatable.
    Update,
}

/// Status of a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeSetStatus {
    /// The provider is still computing the delta.
    Pending,
    /// There is a concrete delta to apply.
    Ready,
    /// The provider found no resource-level delta.
    Empty,
    /// The change set failed for a substantive reason.
    Failed,
}

/// A single resource-level change proposed by a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    /// Action (`Add`, `Modify`, `Remove`, ...).
    pub action: String,
    /// Logical ID of the resource.
    pub logical_id: String,
    /// Resource type.
    pub resource_type: String,
    /// Whether the change replaces the resource (`True`, `False`, `Conditional`).
    pub replacement: Option<String>,
}

/// A provider-side change set.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet {
    /// Provider identity (ARN) of the change set.
    pub id: String,
    /// Name the engine gave the change set.
    pub name: String,
    /// Current status.
    pub status: ChangeSetStatus,
    /// Provider reason when `Failed` or `Empty`.
    pub reason: Option<String>,
    /// Proposed resource changes.
    pub changes: Vec<ResourceChange>,
}

impl ChangeSetStatus {
    /// Reclassifies provider failures that only mean "no changes".
    #[must_use]
    pub fn classify(self, reason: Option<&str>) -> Self {
        match (self, reason) {
            (Self::Failed, Some(reason)) if is_no_change_reason(reason) => Self::Empty,
            (status, _) => status,
        }
    }

    /// Returns true once the provider is done computing.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Returns true if the provider reason means the change set has no changes.
#[must_use]
pub fn is_no_change_reason(reason: &str) -> bool {
    NO_CHANGE_REASONS.iter().any(|r| reason.contains(r))
}

impl fmt::Display for ChangeSetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
        }
    }
}

impl fmt::Display for ChangeSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Empty => "EMPTY",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_change_failures_are_empty() {
        let reason = "The submitted information didn't contain changes. Submit different information to create a change set.";
        assert_eq!(ChangeSetStatus::Failed.classify(Some(reason)), ChangeSetStatus::Empty);
        assert_eq!(
            ChangeSetStatus::Failed.classify(Some("No updates are to be performed.")),
            ChangeSetStatus::Empty
        );
    }

    #[test]
    fn test_substantive_failures_stay_failed() {
        assert_eq!(
            ChangeSetStatus::Failed.classify(Some("Template format error: unsupported structure.")),
            ChangeSetStatus::Failed
        );
        assert_eq!(ChangeSetStatus::Failed.classify(None), ChangeSetStatus::Failed);
        assert_eq!(ChangeSetStatus::Ready.classify(None), ChangeSetStatus::Ready);
    }
}
