//! The stack deployment engine.
//!
//! [`StackDeployer`] drives one stack through the provider's
//! preview/apply/poll/rollback lifecycle to a terminal state:
//!
//! - [`packager`] decides whether a template travels inline or by URL
//! - [`nested`] uploads the addons template and wires its URL into the parent
//! - [`changeset`] creates, polls, classifies and discards change sets
//! - [`machine`] executes change sets and recovers from failed creations
//! - [`events`] streams new stack events to a [`ProgressSink`]
//! - [`guard`] keeps deployments of one stack from overlapping
//! - [`wait`] provides cancellable, bounded polling

pub mod changeset;
pub mod events;
pub mod guard;
pub mod machine;
pub mod nested;
pub mod packager;
pub mod progress;
pub mod wait;

pub use changeset::{ChangePreviewer, ChangeSetOutcome};
pub use events::EventStream;
pub use guard::{ConcurrencyPolicy, StackGuard};
pub use machine::{DeployOutcome, Preview, StackDeployer};
pub use packager::{ArtifactSettings, PackagedTemplate, Packager};
pub use progress::{ChannelSink, NoopSink, Progress, ProgressSink, StackStatusUpdate, TracingSink};
pub use wait::{CancelHandle, Cancellation};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::provider::RetryPolicy;

/// Tuning knobs of the deployment engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Seconds between change set status checks.
    #[serde(default = "default_change_set_poll_interval")]
    pub change_set_poll_interval_secs: u64,
    /// Maximum seconds to wait for a change set to compute.
    #[serde(default = "default_change_set_timeout")]
    pub change_set_timeout_secs: u64,
    /// Seconds between stack status checks.
    #[serde(default = "default_stack_poll_interval")]
    pub stack_poll_interval_secs: u64,
    /// Seconds between stack event reads.
    #[serde(default = "default_event_poll_interval")]
    pub event_poll_interval_secs: u64,
    /// Maximum seconds to wait for one stack operation.
    #[serde(default = "default_stack_timeout")]
    pub stack_timeout_secs: u64,
    /// How many times a rolled-back creation is deleted and retried.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    /// Behavior when a stack is already being deployed.
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    /// Set the addons URL parameter to "" for stacks without addons.
    #[serde(default)]
    pub addons_url_parameter_always: bool,
    /// Retry policy for provider calls.
    #[serde(default)]
    pub retry: RetryPolicy,
}

const fn default_change_set_poll_interval() -> u64 {
    3
}

const fn default_change_set_timeout() -> u64 {
    600
}

const fn default_stack_poll_interval() -> u64 {
    5
}

const fn default_event_poll_interval() -> u64 {
    3
}

const fn default_stack_timeout() -> u64 {
    3600
}

const fn default_max_recovery_attempts() -> u32 {
    1
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            change_set_poll_interval_secs: default_change_set_poll_interval(),
            change_set_timeout_secs: default_change_set_timeout(),
            stack_poll_interval_secs: default_stack_poll_interval(),
            event_poll_interval_secs: default_event_poll_interval(),
            stack_timeout_secs: default_stack_timeout(),
            max_recovery_attempts: default_max_recovery_attempts(),
            concurrency: ConcurrencyPolicy::default(),
            addons_url_parameter_always: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineSettings {
    /// Interval between change set status checks.
    #[must_use]
    pub const fn change_set_poll_interval(&self) -> Duration {
        Duration::from_secs(self.change_set_poll_interval_secs)
    }

    /// Bound on change set computation.
    #[must_use]
    pub const fn change_set_timeout(&self) -> Duration {
        Duration::from_secs(self.change_set_timeout_secs)
    }

    /// Interval between stack status checks.
    #[must_use]
    pub const fn stack_poll_interval(&self) -> Duration {
        Duration::from_secs(self.stack_poll_interval_secs)
    }

    /// Interval between event reads.
    #[must_use]
    pub const fn event_poll_interval(&self) -> Duration {
        Duration::from_secs(self.event_poll_interval_secs)
    }

    /// Bound on one stack operation.
    #[must_use]
    pub const fn stack_timeout(&self) -> Duration {
        Duration::from_secs(self.stack_timeout_secs)
    }
}
