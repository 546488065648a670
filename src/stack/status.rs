//! Live stack states as reported by the provider.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use super::params::ParameterSet;

/// Provider-reported condition of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StackState {
    /// The stack does not exist (or was deleted).
    Absent,
    /// The stack only holds an unexecuted create change set.
    ReviewInProgress,
    /// Creation in progress.
    CreateInProgress,
    /// Creation finished.
    CreateComplete,
    /// Update in progress.
    UpdateInProgress,
    /// Update finished.
    UpdateComplete,
    /// A failed update is being rolled back.
    UpdateRollbackInProgress,
    /// A failed update was rolled back; the stack is usable.
    UpdateRollbackComplete,
    /// A failed creation is being rolled back.
    RollbackInProgress,
    /// A failed creation was rolled back; the stack must be deleted.
    RollbackComplete,
    /// Deletion in progress.
    DeleteInProgress,
    /// Any other in-progress state (cleanup, import, ...).
    OtherInProgress(String),
    /// Any `*_FAILED` state.
    Failed(String),
}

impl StackState {
    /// Parses a provider status string.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "DELETE_COMPLETE" => Self::Absent,
            "REVIEW_IN_PROGRESS" => Self::ReviewInProgress,
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "UPDATE_IN_PROGRESS" => Self::UpdateInProgress,
            "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => Self::UpdateComplete,
            "UPDATE_ROLLBACK_IN_PROGRESS" => Self::UpdateRollbackInProgress,
            "UPDATE_ROLLBACK_COMPLETE" | "IMPORT_ROLLBACK_COMPLETE" => Self::UpdateRollbackComplete,
            "ROLLBACK_IN_PROGRESS" => Self::RollbackInProgress,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            other if other.ends_with("_FAILED") => Self::Failed(other.to_string()),
            other => Self::OtherInProgress(other.to_string()),
        }
    }

    /// Returns true while the provider is still working on the stack.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::CreateInProgress
                | Self::UpdateInProgress
                | Self::UpdateRollbackInProgress
                | Self::RollbackInProgress
                | Self::DeleteInProgress
                | Self::OtherInProgress(_)
        )
    }

    /// Returns true for stable states that accept an update change set.
    #[must_use]
    pub const fn is_updatable(&self) -> bool {
        matches!(
            self,
            Self::CreateComplete | Self::UpdateComplete | Self::UpdateRollbackComplete
        )
    }

    /// Returns true for states that accept a create change set.
    #[must_use]
    pub const fn is_creatable(&self) -> bool {
        matches!(self, Self::Absent | Self::ReviewInProgress)
    }

    /// Returns the provider spelling of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Absent => "ABSENT",
            Self::ReviewInProgress => "REVIEW_IN_PROGRESS",
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            Self::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::OtherInProgress(s) | Self::Failed(s) => s.as_str(),
        }
    }
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a live stack.
#[derive(Debug, Clone, Serialize)]
pub struct StackDescription {
    /// Current state.
    pub state: StackState,
    /// Provider reason for the current state, if any.
    pub status_reason: Option<String>,
    /// Parameters the stack was last deployed with.
    pub parameters: ParameterSet,
    /// Stack outputs.
    pub outputs: HashMap<String, String>,
}

impl StackDescription {
    /// Description of a stack that does not exist.
    #[must_use]
    pub fn absent() -> Self {
        Self {
            state: StackState::Absent,
            status_reason: None,
            parameters: ParameterSet::new(),
            outputs: HashMap::new(),
        }
    }

    /// Description of a stack in the given state with no metadata.
    #[must_use]
    pub fn in_state(state: StackState) -> Self {
        Self {
            state,
            ..Self::absent()
        }
    }
}
