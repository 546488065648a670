//! Change set lifecycle: create, poll, classify, discard.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::packager::PackagedTemplate;
use super::wait::{Cancellation, Poller};
use crate::error::{HalldyllError, ProviderErrorKind, Result};
use crate::provider::{ChangeSetRequest, StackProvider};
use crate::stack::{ChangeSet, ChangeSetMode, ChangeSetStatus, ParameterSet};

/// Prefix of every change set this engine creates.
pub const CHANGE_SET_PREFIX: &str = "halldyll";

/// Result of computing a change set.
#[derive(Debug, Clone)]
pub enum ChangeSetOutcome {
    /// The change set has changes and can be executed.
    Ready(ChangeSet),
    /// The stack is already up to date. The change set was discarded.
    Empty(ChangeSet),
}

/// What to apply to a stack.
#[derive(Debug, Clone, Copy)]
pub struct ChangeSetInput<'a> {
    /// Stack name.
    pub stack: &'a str,
    /// Create or update.
    pub mode: ChangeSetMode,
    /// Packaged template.
    pub template: &'a PackagedTemplate,
    /// Parameters.
    pub parameters: &'a ParameterSet,
    /// Stack tags.
    pub tags: &'a HashMap<String, String>,
}

/// Creates and tracks change sets against a provider.
#[derive(Debug)]
pub struct ChangePreviewer<P: ?Sized> {
    provider: Arc<P>,
    poll_interval: Duration,
    timeout: Duration,
}

impl<P: ?Sized> Clone for ChangePreviewer<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        }
    }
}

/// Generates a change set name unique to one attempt.
#[must_use]
pub fn change_set_name() -> String {
    format!("{CHANGE_SET_PREFIX}-{}", Uuid::new_v4())
}

impl<P: StackProvider + ?Sized> ChangePreviewer<P> {
    /// Creates a previewer polling every `poll_interval` for at most `timeout`.
    #[must_use]
    pub const fn new(provider: Arc<P>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            provider,
            poll_interval,
            timeout,
        }
    }

    /// Creates a change set and waits until it is ready or empty.
    ///
    /// Empty and failed change sets are discarded. So is a pending one when
    /// the wait is cancelled or times out.
    ///
    /// # Errors
    ///
    /// Returns [`HalldyllError::ChangeSet`] if the provider rejects the
    /// change set, [`HalldyllError::Timeout`] or [`HalldyllError::Cancelled`].
    pub async fn create(
        &self,
        input: ChangeSetInput<'_>,
        cancel: &Cancellation,
    ) -> Result<ChangeSetOutcome> {
        let request = ChangeSetRequest {
            stack_name: input.stack.to_string(),
            change_set_name: change_set_name(),
            mode: input.mode,
            template: input.template.source.clone(),
            parameters: input.parameters.clone(),
            tags: input.tags.clone(),
            description: format!(
                "{} {} (template {})",
                input.mode,
                input.stack,
                input.template.fingerprint.get(..12).unwrap_or(&input.template.fingerprint)
            ),
        };

        let id = self.submit(&request).await?;
        info!(stack = input.stack, change_set = %request.change_set_name, mode = %input.mode, "Created change set");

        let change_set = match self.wait(input.stack, &id, cancel).await {
            Ok(change_set) => change_set,
            Err(e) => {
                self.discard(input.stack, &id).await;
                return Err(e);
            }
        };

        match change_set.status {
            ChangeSetStatus::Ready => Ok(ChangeSetOutcome::Ready(change_set)),
            ChangeSetStatus::Empty => {
                info!(stack = input.stack, "No changes to apply");
                self.discard(input.stack, &id).await;
                Ok(ChangeSetOutcome::Empty(change_set))
            }
            ChangeSetStatus::Failed | ChangeSetStatus::Pending => {
                self.discard(input.stack, &id).await;
                Err(HalldyllError::ChangeSet {
                    stack: input.stack.to_string(),
                    reason: change_set
                        .reason
                        .unwrap_or_else(|| String::from("no reason given")),
                    transient: false,
                })
            }
        }
    }

    /// Computes the change set and discards it without executing.
    ///
    /// # Errors
    ///
    /// Same as [`ChangePreviewer::create`].
    pub async fn preview(
        &self,
        input: ChangeSetInput<'_>,
        cancel: &Cancellation,
    ) -> Result<ChangeSet> {
        match self.create(input, cancel).await? {
            ChangeSetOutcome::Ready(change_set) => {
                self.discard(input.stack, &change_set.id).await;
                Ok(change_set)
            }
            ChangeSetOutcome::Empty(change_set) => Ok(change_set),
        }
    }

    /// Submits a change set request, adopting one left by an earlier attempt
    /// with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`HalldyllError::ChangeSet`] if the provider rejects the request.
    pub async fn submit(&self, request: &ChangeSetRequest) -> Result<String> {
        match self.provider.create_change_set(request).await {
            Ok(id) => Ok(id),
            Err(HalldyllError::Provider(e)) if e.kind == ProviderErrorKind::AlreadyExists => {
                let existing = self
                    .provider
                    .describe_change_set(&request.stack_name, &request.change_set_name)
                    .await;
                match existing {
                    Ok(change_set) => {
                        debug!(stack = %request.stack_name, change_set = %request.change_set_name, "Adopting existing change set");
                        Ok(change_set.id)
                    }
                    Err(_) => Err(change_set_error(&request.stack_name, HalldyllError::Provider(e))),
                }
            }
            Err(e) => Err(change_set_error(&request.stack_name, e)),
        }
    }

    /// Executes a ready change set.
    ///
    /// An "already in progress" answer means an earlier attempt of this call
    /// went through, so it counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider refuses the execution.
    pub async fn execute(&self, stack: &str, change_set: &ChangeSet) -> Result<()> {
        match self.provider.execute_change_set(stack, &change_set.id).await {
            Ok(()) => {}
            Err(HalldyllError::Provider(e))
                if matches!(e.kind, ProviderErrorKind::InProgress | ProviderErrorKind::AlreadyExists) =>
            {
                debug!(stack, change_set = %change_set.name, "Execution already in progress");
            }
            Err(e) => return Err(change_set_error(stack, e)),
        }
        info!(stack, change_set = %change_set.name, changes = change_set.changes.len(), "Executing change set");
        Ok(())
    }

    async fn wait(&self, stack: &str, id: &str, cancel: &Cancellation) -> Result<ChangeSet> {
        let poller = Poller::new(stack, "change set", self.poll_interval).timeout(self.timeout);
        let provider = &self.provider;

        poller
            .until(cancel, move || async move {
                let change_set = provider
                    .describe_change_set(stack, id)
                    .await
                    .map_err(|e| change_set_error(stack, e))?;
                let status = change_set.status.classify(change_set.reason.as_deref());
                if status.is_terminal() {
                    Ok(Some(ChangeSet { status, ..change_set }))
                } else {
                    Ok(None)
                }
            })
            .await
    }

    /// Deletes a change set, logging and ignoring failures.
    pub async fn discard(&self, stack: &str, id: &str) {
        if let Err(e) = self.provider.delete_change_set(stack, id).await {
            warn!(stack, change_set = id, error = %e, "Failed to delete change set");
        }
    }
}

/// Files provider failures in change-set steps under the change-set category.
fn change_set_error(stack: &str, error: HalldyllError) -> HalldyllError {
    match error {
        HalldyllError::Provider(e)
            if e.is_transient() || e.kind == ProviderErrorKind::Validation =>
        {
            HalldyllError::ChangeSet {
                stack: stack.to_string(),
                reason: e.message.clone(),
                transient: e.is_transient(),
            }
        }
        other => other,
    }
}
