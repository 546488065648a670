//! Deployment state machine.
//!
//! A deployment reads the live stack state and moves the stack towards the
//! requested template:
//!
//! ```text
//! ABSENT ──create──▶ CREATE_IN_PROGRESS ──▶ CREATE_COMPLETE
//! *_COMPLETE ──update──▶ UPDATE_IN_PROGRESS ──▶ UPDATE_COMPLETE
//! ROLLBACK_COMPLETE ──delete──▶ ABSENT ──create──▶ …
//! *_IN_PROGRESS ──attach──▶ terminal state, then re-evaluate
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::changeset::{ChangePreviewer, ChangeSetInput, ChangeSetOutcome};
use super::events::EventStream;
use super::guard::StackGuard;
use super::nested::NestedStackResolver;
use super::packager::{self, ArtifactSettings, PackagedTemplate, Packager};
use super::progress::{ProgressSink, StackStatusUpdate};
use super::wait::{Cancellation, cancellable};
use super::EngineSettings;
use crate::error::{HalldyllError, ProviderErrorKind, Result};
use crate::provider::{ObjectStore, StackProvider};
use crate::stack::{
    ChangeSetMode, DeployRequest, ParameterDiff, ParameterSet, ResourceChange, StackDescription,
    StackEvent, StackIdentity, StackState,
};

/// How a successful deployment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOutcome {
    /// The stack did not exist and was created.
    Created,
    /// The stack was updated.
    Updated,
    /// The stack already matched the request.
    NoOpUpToDate,
    /// A rolled-back creation was deleted and created again.
    RecreatedAfterRollback,
}

impl fmt::Display for DeployOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::NoOpUpToDate => "up to date",
            Self::RecreatedAfterRollback => "recreated after rollback",
        };
        write!(f, "{s}")
    }
}

/// What a deployment would do, computed without executing anything.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    /// Stack name.
    pub stack: String,
    /// Live state of the stack.
    pub state: StackState,
    /// Change set mode used, if one could be computed.
    pub mode: Option<ChangeSetMode>,
    /// Resource changes.
    pub changes: Vec<ResourceChange>,
    /// Parameter changes against the live stack.
    pub parameter_diff: ParameterDiff,
    /// Why no change set was computed.
    pub note: Option<String>,
}

impl Preview {
    /// Returns true if deploying would change nothing.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.mode.is_some() && self.changes.is_empty()
    }
}

/// Deploys stacks through a provider.
///
/// Clones share the guard registry, so concurrent deployments of one stack
/// through any clone are serialized or rejected.
#[derive(Debug)]
pub struct StackDeployer<P: ?Sized, O: ?Sized> {
    provider: Arc<P>,
    packager: Packager<O>,
    previewer: ChangePreviewer<P>,
    resolver: NestedStackResolver<O>,
    guard: StackGuard,
    settings: EngineSettings,
}

impl<P: ?Sized, O: ?Sized> Clone for StackDeployer<P, O> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            packager: self.packager.clone(),
            previewer: self.previewer.clone(),
            resolver: self.resolver.clone(),
            guard: self.guard.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<P, O> StackDeployer<P, O>
where
    P: StackProvider + ?Sized,
    O: ObjectStore + ?Sized,
{
    /// Creates a deployer.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        store: Arc<O>,
        artifacts: ArtifactSettings,
        settings: EngineSettings,
    ) -> Self {
        let packager = Packager::new(store, artifacts);
        Self {
            previewer: ChangePreviewer::new(
                Arc::clone(&provider),
                settings.change_set_poll_interval(),
                settings.change_set_timeout(),
            ),
            resolver: NestedStackResolver::new(packager.clone(), settings.addons_url_parameter_always),
            guard: StackGuard::new(settings.concurrency),
            provider,
            packager,
            settings,
        }
    }

    /// Returns the engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Returns the guard registry.
    #[must_use]
    pub const fn guard(&self) -> &StackGuard {
        &self.guard
    }

    /// Reads the live description of a stack.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the stack cannot be described.
    pub async fn describe(&self, identity: &StackIdentity) -> Result<StackDescription> {
        self.provider
            .describe_stack(&identity.name)
            .await
            .map_err(|e| e.context(format!("describe stack {}", identity.name)))
    }

    /// Deploys `request` and waits for the stack to settle.
    ///
    /// The sink receives every new stack event, oldest first, and one
    /// terminal update.
    ///
    /// # Errors
    ///
    /// Returns the categorized error of the failing step.
    pub async fn deploy(
        &self,
        request: &DeployRequest,
        sink: &dyn ProgressSink,
        cancel: &Cancellation,
    ) -> Result<DeployOutcome> {
        let stack = request.identity.name.as_str();
        info!(stack, region = %request.identity.region, provider = self.provider.provider_name(), "Deploying stack");

        let result = self.deploy_guarded(request, sink, cancel).await;

        sink.on_complete(&StackStatusUpdate {
            stack: stack.to_string(),
            outcome: result.as_ref().ok().copied(),
            error: result.as_ref().err().map(ToString::to_string),
        });

        result.map_err(|e| e.context(format!("deploy stack {stack}")))
    }

    /// Computes what deploying `request` would change.
    ///
    /// # Errors
    ///
    /// Returns the categorized error of the failing step.
    pub async fn preview(&self, request: &DeployRequest, cancel: &Cancellation) -> Result<Preview> {
        let stack = request.identity.name.as_str();
        let _permit = self.guard.acquire(&request.identity, cancel).await?;

        let live = self.describe(&request.identity).await?;
        let parameters = self
            .resolver
            .resolve(stack, &request.parameters, request.addons.as_ref())
            .await?;
        let parameter_diff = packager::diff_parameters(&live.parameters, &parameters);

        let mode = if live.state.is_creatable() {
            ChangeSetMode::Create
        } else if live.state.is_updatable() {
            ChangeSetMode::Update
        } else {
            let note = match &live.state {
                StackState::RollbackComplete => "stack will be deleted and created again",
                StackState::Failed(_) => "stack needs operator attention",
                _ => "an operation is in progress",
            };
            return Ok(Preview {
                stack: stack.to_string(),
                state: live.state,
                mode: None,
                changes: Vec::new(),
                parameter_diff,
                note: Some(note.to_string()),
            });
        };

        let template = self.packager.package(stack, &request.template).await?;
        let change_set = self
            .previewer
            .preview(
                ChangeSetInput {
                    stack,
                    mode,
                    template: &template,
                    parameters: &parameters,
                    tags: &request.tags,
                },
                cancel,
            )
            .await
            .map_err(|e| e.context(format!("preview stack {stack}")))?;

        Ok(Preview {
            stack: stack.to_string(),
            state: live.state,
            mode: Some(mode),
            changes: change_set.changes,
            parameter_diff,
            note: None,
        })
    }

    async fn deploy_guarded(
        &self,
        request: &DeployRequest,
        sink: &dyn ProgressSink,
        cancel: &Cancellation,
    ) -> Result<DeployOutcome> {
        let _permit = self.guard.acquire(&request.identity, cancel).await?;
        let stack = request.identity.name.as_str();

        let parameters = self
            .resolver
            .resolve(stack, &request.parameters, request.addons.as_ref())
            .await?;
        let template = self.packager.package(stack, &request.template).await?;

        let mut recoveries = 0u32;
        let mut deleted = false;

        loop {
            cancel.check(stack)?;
            let live = cancellable(stack, cancel, self.describe(&request.identity)).await?;
            debug!(stack, state = %live.state, "Read live stack state");

            match live.state {
                state if state.is_creatable() => {
                    let outcome = self
                        .apply(request, ChangeSetMode::Create, &template, &parameters, sink, cancel)
                        .await?;
                    return Ok(match outcome {
                        DeployOutcome::Created if recoveries > 0 => DeployOutcome::RecreatedAfterRollback,
                        other => other,
                    });
                }
                state if state.is_updatable() => {
                    let diff = packager::diff_parameters(&live.parameters, &parameters);
                    if !diff.is_empty() {
                        info!(stack, changed = diff.len(), "Parameters differ from the live stack");
                    }
                    return self
                        .apply(request, ChangeSetMode::Update, &template, &parameters, sink, cancel)
                        .await;
                }
                StackState::RollbackComplete => {
                    if recoveries >= self.settings.max_recovery_attempts {
                        return Err(HalldyllError::DeploymentFailed {
                            stack: stack.to_string(),
                            state: StackState::RollbackComplete.to_string(),
                            failures: Vec::new(),
                        });
                    }
                    recoveries += 1;
                    warn!(stack, attempt = recoveries, "Stack is in ROLLBACK_COMPLETE, deleting it before creating it again");
                    self.delete(stack, sink, cancel).await?;
                    deleted = true;
                }
                StackState::Failed(raw) => {
                    return Err(HalldyllError::DeploymentFailed {
                        stack: stack.to_string(),
                        state: raw,
                        failures: self.recent_failures(stack).await,
                    });
                }
                state => {
                    info!(stack, %state, "Another operation is in progress, waiting for it");
                    let deleting = state == StackState::DeleteInProgress;
                    let mut events = EventStream::start(&*self.provider, stack).await?;
                    let settled = self.watch(stack, &mut events, sink, cancel).await?;
                    if settled == StackState::Absent && !deleting && !deleted {
                        return Err(disappeared(stack, events.into_failures()));
                    }
                }
            }
        }
    }

    /// Runs one change set to completion.
    async fn apply(
        &self,
        request: &DeployRequest,
        mode: ChangeSetMode,
        template: &PackagedTemplate,
        parameters: &ParameterSet,
        sink: &dyn ProgressSink,
        cancel: &Cancellation,
    ) -> Result<DeployOutcome> {
        let stack = request.identity.name.as_str();

        let outcome = self
            .previewer
            .create(
                ChangeSetInput {
                    stack,
                    mode,
                    template,
                    parameters,
                    tags: &request.tags,
                },
                cancel,
            )
            .await?;

        let change_set = match outcome {
            ChangeSetOutcome::Empty(_) => return Ok(DeployOutcome::NoOpUpToDate),
            ChangeSetOutcome::Ready(change_set) => change_set,
        };

        if let Err(e) = cancel.check(stack) {
            self.previewer.discard(stack, &change_set.id).await;
            return Err(e);
        }

        let mut events = EventStream::start(&*self.provider, stack).await?;
        self.previewer.execute(stack, &change_set).await?;

        let settled = self.watch(stack, &mut events, sink, cancel).await?;
        let failures = events.into_failures();

        match (mode, settled) {
            (ChangeSetMode::Create, StackState::CreateComplete) => {
                info!(stack, "Stack created");
                Ok(DeployOutcome::Created)
            }
            (ChangeSetMode::Update, StackState::UpdateComplete) => {
                info!(stack, "Stack updated");
                Ok(DeployOutcome::Updated)
            }
            (_, StackState::Absent) => Err(disappeared(stack, failures)),
            (_, state) => Err(HalldyllError::DeploymentFailed {
                stack: stack.to_string(),
                state: state.to_string(),
                failures,
            }),
        }
    }

    /// Deletes a stack and waits until it is gone.
    async fn delete(&self, stack: &str, sink: &dyn ProgressSink, cancel: &Cancellation) -> Result<()> {
        let mut events = EventStream::start(&*self.provider, stack).await?;

        match self.provider.delete_stack(stack).await {
            Ok(()) => {}
            Err(HalldyllError::Provider(e)) if e.kind == ProviderErrorKind::InProgress => {
                debug!(stack, "Deletion already in progress");
            }
            Err(e) => return Err(e.context(format!("delete stack {stack}"))),
        }

        match self.watch(stack, &mut events, sink, cancel).await? {
            StackState::Absent => {
                info!(stack, "Stack deleted");
                Ok(())
            }
            state => Err(HalldyllError::DeploymentFailed {
                stack: stack.to_string(),
                state: state.to_string(),
                failures: events.into_failures(),
            }),
        }
    }

    /// Failure events from the newest event page, oldest first.
    async fn recent_failures(&self, stack: &str) -> Vec<StackEvent> {
        match self.provider.describe_stack_events(stack, None).await {
            Ok(page) => page.events.into_iter().rev().filter(StackEvent::is_failure).collect(),
            Err(e) => {
                warn!(stack, error = %e, "Failed to read stack events");
                Vec::new()
            }
        }
    }

    /// Polls the stack until it leaves every in-progress state, feeding new
    /// events to the sink.
    async fn watch(
        &self,
        stack: &str,
        events: &mut EventStream<'_, P>,
        sink: &dyn ProgressSink,
        cancel: &Cancellation,
    ) -> Result<StackState> {
        let started = Instant::now();
        let mut status_tick = ticker(self.settings.stack_poll_interval());
        let mut event_tick = ticker(self.settings.event_poll_interval());

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(stack, "Stopped waiting, the provider operation continues");
                    return Err(HalldyllError::Cancelled {
                        stack: stack.to_string(),
                    });
                }
                _ = status_tick.tick() => {
                    let live = cancellable(stack, cancel, self.provider.describe_stack(stack)).await?;
                    if !live.state.is_in_progress() && live.state != StackState::ReviewInProgress {
                        // last events of the operation
                        relay(stack, events, sink).await;
                        return Ok(live.state);
                    }

                    let waited = started.elapsed();
                    if waited >= self.settings.stack_timeout() {
                        return Err(HalldyllError::Timeout {
                            stack: stack.to_string(),
                            operation: format!("stack to leave {}", live.state),
                            waited_secs: waited.as_secs(),
                        });
                    }
                    debug!(stack, state = %live.state, "Stack operation in progress");
                }
                _ = event_tick.tick() => {
                    relay(stack, events, sink).await;
                }
            }
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(100)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Forwards new events to the sink. A failed read only costs progress
/// output, never the deployment.
async fn relay<P>(stack: &str, events: &mut EventStream<'_, P>, sink: &dyn ProgressSink)
where
    P: StackProvider + ?Sized,
{
    match events.poll().await {
        Ok(new) => {
            for event in &new {
                sink.on_event(stack, event);
            }
        }
        Err(e) => warn!(stack, error = %e, "Failed to read stack events"),
    }
}

fn disappeared(stack: &str, failures: Vec<StackEvent>) -> HalldyllError {
    HalldyllError::DeploymentFailed {
        stack: stack.to_string(),
        state: String::from("stack disappeared"),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::guard::ConcurrencyPolicy;
    use crate::deploy::progress::{ChannelSink, NoopSink, Progress};
    use crate::error::ErrorKind;
    use crate::provider::TemplateSource;
    use crate::provider::fake::{FakeObjectStore, FakeProvider, Step};
    use crate::stack::{NestedStackReference, Template, DEFAULT_ADDONS_URL_PARAMETER};
    use std::collections::HashSet;

    const STACK: &str = "app-test-api";

    type Deployer = StackDeployer<FakeProvider, FakeObjectStore>;

    fn artifacts() -> ArtifactSettings {
        ArtifactSettings {
            bucket: Some(String::from("stackset-artifacts")),
            ..ArtifactSettings::default()
        }
    }

    fn deployer_with(provider: &Arc<FakeProvider>, settings: EngineSettings) -> Deployer {
        StackDeployer::new(
            Arc::clone(provider),
            Arc::new(FakeObjectStore::new()),
            artifacts(),
            settings,
        )
    }

    fn deployer(provider: &Arc<FakeProvider>) -> Deployer {
        deployer_with(provider, EngineSettings::default())
    }

    fn request(image_tag: &str) -> DeployRequest {
        let identity = StackIdentity::workload("app", "test", "api", "us-west-2", "123456789012")
            .expect("valid identity");
        DeployRequest::new(
            identity,
            Template::from("Resources:\n  Service:\n    Type: AWS::ECS::Service\n"),
            ParameterSet::new()
                .with("AppName", "app")
                .with("EnvName", "test")
                .with("ImageTag", image_tag),
        )
    }

    async fn deploy(deployer: &Deployer, request: &DeployRequest) -> Result<DeployOutcome> {
        deployer.deploy(request, &NoopSink, &Cancellation::never()).await
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Progress>) -> Vec<Progress> {
        let mut received = Vec::new();
        while let Ok(progress) = rx.try_recv() {
            received.push(progress);
        }
        received
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_test_api_scenario() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);

        assert_eq!(deploy(&deployer, &request("v1")).await.ok(), Some(DeployOutcome::Created));
        assert_eq!(provider.state_of(STACK), StackState::CreateComplete);

        assert_eq!(deploy(&deployer, &request("v1")).await.ok(), Some(DeployOutcome::NoOpUpToDate));
        assert_eq!(provider.calls("ExecuteChangeSet"), 1);

        assert_eq!(deploy(&deployer, &request("v2")).await.ok(), Some(DeployOutcome::Updated));
        assert_eq!(provider.parameters_of(STACK).get("ImageTag"), Some("v2"));

        provider.force_state(STACK, StackState::RollbackComplete);
        assert_eq!(
            deploy(&deployer, &request("v2")).await.ok(),
            Some(DeployOutcome::RecreatedAfterRollback)
        );
        assert_eq!(provider.calls("DeleteStack"), 1);
        assert_eq!(provider.calls("ExecuteChangeSet"), 3);
        assert_eq!(provider.state_of(STACK), StackState::CreateComplete);
        assert_eq!(provider.live_change_sets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_identical_deploy_executes_nothing() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);

        tokio_test::assert_ok!(deploy(&deployer, &request("v1")).await);
        let executions = provider.calls("ExecuteChangeSet");

        let outcome = deploy(&deployer, &request("v1")).await;
        assert_eq!(outcome.ok(), Some(DeployOutcome::NoOpUpToDate));
        assert_eq!(provider.calls("ExecuteChangeSet"), executions);
        assert_eq!(provider.live_change_sets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_complete_is_recovered_with_ordered_events() {
        let provider = Arc::new(FakeProvider::new());
        provider.force_state(STACK, StackState::RollbackComplete);
        let deployer = deployer(&provider);
        let (sink, mut rx) = ChannelSink::new();

        let outcome = deployer
            .deploy(&request("v1"), &sink, &Cancellation::never())
            .await;
        assert_eq!(outcome.ok(), Some(DeployOutcome::RecreatedAfterRollback));

        let received = drain(&mut rx);
        let events: Vec<&StackEvent> = received
            .iter()
            .filter_map(|p| match p {
                Progress::Event(e) => Some(e),
                Progress::Complete(_) => None,
            })
            .collect();

        let unique: HashSet<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(unique.len(), events.len());
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(events.iter().any(|e| e.status == "DELETE_COMPLETE"));
        assert!(events.iter().all(|e| e.status != "ROLLBACK_COMPLETE"));
        assert!(events.iter().any(|e| e.status == "CREATE_COMPLETE"));

        assert!(matches!(
            received.last(),
            Some(Progress::Complete(update))
                if update.outcome == Some(DeployOutcome::RecreatedAfterRollback)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_reports_failed_resources() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);
        tokio_test::assert_ok!(deploy(&deployer, &request("v1")).await);

        provider.fail_next_execute("Resource handler returned message: circuit breaker triggered");
        let err = deploy(&deployer, &request("v2")).await.expect_err("update fails");

        assert_eq!(err.kind(), ErrorKind::DeploymentFailed);
        assert!(!err.is_retryable());
        assert!(matches!(
            err.root(),
            HalldyllError::DeploymentFailed { state, .. } if state == "UPDATE_ROLLBACK_COMPLETE"
        ));
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].status, "UPDATE_FAILED");
        assert!(
            failures[0]
                .status_reason
                .as_deref()
                .is_some_and(|r| r.contains("circuit breaker"))
        );
        assert_eq!(provider.parameters_of(STACK).get("ImageTag"), Some("v1"));
        assert_eq!(err.frames(), vec!["deploy stack app-test-api"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_creation_is_not_deleted() {
        let provider = Arc::new(FakeProvider::new());
        provider.fail_next_execute("Invalid request provided: image not found");
        let deployer = deployer(&provider);

        let err = deploy(&deployer, &request("v1")).await.expect_err("create fails");

        assert_eq!(err.kind(), ErrorKind::DeploymentFailed);
        assert_eq!(err.failures().len(), 1);
        assert_eq!(provider.state_of(STACK), StackState::RollbackComplete);
        assert_eq!(provider.calls("DeleteStack"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_happens_once() {
        let provider = Arc::new(FakeProvider::new());
        provider.force_state(STACK, StackState::RollbackComplete);
        provider.fail_next_execute("Invalid request provided: image not found");
        let deployer = deployer(&provider);

        let err = deploy(&deployer, &request("v1")).await.expect_err("recreation fails");

        assert_eq!(err.kind(), ErrorKind::DeploymentFailed);
        assert_eq!(provider.calls("DeleteStack"), 1);
        assert_eq!(provider.calls("ExecuteChangeSet"), 1);
        assert_eq!(provider.state_of(STACK), StackState::RollbackComplete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_deploys_are_rejected() {
        let provider = Arc::new(FakeProvider::new().with_mutation_delay(Duration::from_secs(1)));
        let deployer = deployer(&provider);
        let other = deployer.clone();

        let req = request("v1");
        let (first, second) = tokio::join!(deploy(&deployer, &req), deploy(&other, &req));

        let kinds: Vec<Option<ErrorKind>> = [&first, &second]
            .iter()
            .map(|r| r.as_ref().err().map(HalldyllError::kind))
            .collect();
        assert!(kinds.contains(&None));
        assert!(kinds.contains(&Some(ErrorKind::StackBusy)));
        assert_eq!(provider.max_active_mutations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_deploys_are_queued() {
        let provider = Arc::new(FakeProvider::new().with_mutation_delay(Duration::from_secs(1)));
        let settings = EngineSettings {
            concurrency: ConcurrencyPolicy::Queue,
            ..EngineSettings::default()
        };
        let deployer = deployer_with(&provider, settings);

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let deployer = deployer.clone();
            tasks.push(tokio::spawn(async move { deploy(&deployer, &request("v1")).await.ok() }));
        }

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.ok().flatten());
        }

        assert_eq!(outcomes.iter().filter(|o| **o == Some(DeployOutcome::Created)).count(), 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == Some(DeployOutcome::NoOpUpToDate)).count(),
            2
        );
        assert_eq!(provider.max_active_mutations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_leaves_the_operation_alone() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);
        let cancel = Cancellation::never().with_timeout(Duration::from_secs(3));

        let err = deployer
            .deploy(&request("v1"), &NoopSink, &cancel)
            .await
            .expect_err("cancelled");

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(provider.state_of(STACK), StackState::CreateInProgress);
        assert_eq!(provider.calls("DeleteStack"), 0);
        assert_eq!(provider.calls("DeleteChangeSet"), 0);

        // the creation carried on without us
        let outcome = deploy(&deployer, &request("v1")).await;
        assert_eq!(outcome.ok(), Some(DeployOutcome::NoOpUpToDate));
        assert_eq!(provider.calls("ExecuteChangeSet"), 1);
        assert_eq!(provider.state_of(STACK), StackState::CreateComplete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_before_execution_discards_change_set() {
        let provider = Arc::new(FakeProvider::new());
        provider.set_change_set_polls(10);
        let deployer = deployer(&provider);
        let cancel = Cancellation::never().with_timeout(Duration::from_secs(7));

        let err = deployer
            .deploy(&request("v1"), &NoopSink, &cancel)
            .await
            .expect_err("cancelled");

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(provider.calls("ExecuteChangeSet"), 0);
        assert_eq!(provider.live_change_sets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attaches_to_operation_in_progress() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);
        tokio_test::assert_ok!(deploy(&deployer, &request("v1")).await);

        provider.force_state(STACK, StackState::UpdateInProgress);
        provider.script(
            STACK,
            vec![
                Step::to(StackState::UpdateInProgress).with_event("Service", "UPDATE_IN_PROGRESS"),
                Step::to(StackState::UpdateComplete).with_event("Service", "UPDATE_COMPLETE"),
            ],
        );

        let outcome = deploy(&deployer, &request("v1")).await;
        assert_eq!(outcome.ok(), Some(DeployOutcome::NoOpUpToDate));
        assert_eq!(provider.calls("ExecuteChangeSet"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stack_disappearing_mid_update_fails() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);
        tokio_test::assert_ok!(deploy(&deployer, &request("v1")).await);

        provider.vanish_next_execute();
        let err = deploy(&deployer, &request("v2")).await.expect_err("vanished");

        assert_eq!(err.kind(), ErrorKind::DeploymentFailed);
        assert!(err.to_string().contains("stack disappeared"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_needs_operator() {
        let provider = Arc::new(FakeProvider::new());
        provider.force_state(STACK, StackState::Failed(String::from("DELETE_FAILED")));
        let deployer = deployer(&provider);

        let err = deploy(&deployer, &request("v1")).await.expect_err("failed state");

        assert_eq!(err.kind(), ErrorKind::DeploymentFailed);
        assert!(err.failures().iter().any(|e| e.status == "DELETE_FAILED"));
        assert_eq!(provider.calls("CreateChangeSet"), 0);
        assert_eq!(provider.calls("DeleteStack"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_operation_times_out_without_deleting() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer_with(
            &provider,
            EngineSettings {
                stack_timeout_secs: 30,
                ..EngineSettings::default()
            },
        );
        tokio_test::assert_ok!(deploy(&deployer, &request("v1")).await);
        provider.force_state(STACK, StackState::UpdateInProgress);

        let started = Instant::now();
        let err = deploy(&deployer, &request("v2")).await.expect_err("timed out");

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(provider.calls("DeleteStack"), 0);
        assert_eq!(provider.state_of(STACK), StackState::UpdateInProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_read_failure_does_not_fail_the_deploy() {
        let provider = Arc::new(FakeProvider::new());
        provider.fail_event_reads_when_settled();
        let deployer = deployer(&provider);
        let (sink, mut rx) = ChannelSink::new();

        let outcome = deployer
            .deploy(&request("v1"), &sink, &Cancellation::never())
            .await;

        assert_eq!(outcome.ok(), Some(DeployOutcome::Created));
        assert_eq!(provider.state_of(STACK), StackState::CreateComplete);
        assert!(matches!(
            drain(&mut rx).last(),
            Some(Progress::Complete(update)) if update.outcome == Some(DeployOutcome::Created)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_template_size_decides_inline_or_url() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);

        let mut small = request("v1");
        small.template = Template::new(vec![b'#'; 10_000]);
        tokio_test::assert_ok!(deploy(&deployer, &small).await);
        assert!(matches!(provider.template_of(STACK), Some(TemplateSource::Inline(_))));

        let mut large = request("v1");
        large.template = Template::new(vec![b'#'; 60_000]);
        assert_eq!(deploy(&deployer, &large).await.ok(), Some(DeployOutcome::Updated));
        assert!(matches!(
            provider.template_of(STACK),
            Some(TemplateSource::Url(url)) if url.ends_with(&format!("{}.yml", large.template.fingerprint()))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_addons_url_is_passed_to_parent() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);
        let req = request("v1").with_addons(NestedStackReference::new(
            Template::from("Resources:\n  Table:\n    Type: AWS::DynamoDB::Table\n"),
            ParameterSet::new().with("TableName", "orders"),
        ));

        assert_eq!(deploy(&deployer, &req).await.ok(), Some(DeployOutcome::Created));

        let live = provider.parameters_of(STACK);
        assert_eq!(live.get("TableName"), Some("orders"));
        assert!(
            live.get(DEFAULT_ADDONS_URL_PARAMETER)
                .is_some_and(|url| url.contains("/app-test-api/addons/"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_status_poll_is_retryable_provider_error() {
        let provider = Arc::new(FakeProvider::new());
        provider.throttle_next_describes(1);
        let deployer = deployer(&provider);

        let err = deploy(&deployer, &request("v1")).await.expect_err("throttled");

        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_does_not_execute() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);
        tokio_test::assert_ok!(deploy(&deployer, &request("v1")).await);

        let preview = deployer
            .preview(&request("v2"), &Cancellation::never())
            .await
            .expect("preview");

        assert_eq!(preview.mode, Some(ChangeSetMode::Update));
        assert_eq!(preview.parameter_diff.len(), 1);
        assert!(!preview.changes.is_empty());
        assert!(!preview.is_up_to_date());
        assert_eq!(provider.calls("ExecuteChangeSet"), 1);
        assert_eq!(provider.live_change_sets(), 0);

        let same = deployer
            .preview(&request("v1"), &Cancellation::never())
            .await
            .expect("preview");
        assert!(same.is_up_to_date());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_of_rolled_back_stack_explains_recovery() {
        let provider = Arc::new(FakeProvider::new());
        provider.force_state(STACK, StackState::RollbackComplete);
        let deployer = deployer(&provider);

        let preview = deployer
            .preview(&request("v1"), &Cancellation::never())
            .await
            .expect("preview");

        assert_eq!(preview.mode, None);
        assert!(preview.note.is_some());
        assert_eq!(provider.calls("CreateChangeSet"), 0);
    }

    #[tokio::test]
    async fn test_describe_absent_stack() {
        let provider = Arc::new(FakeProvider::new());
        let deployer = deployer(&provider);

        let description = deployer
            .describe(&request("v1").identity)
            .await
            .expect("describe");
        assert_eq!(description.state, StackState::Absent);
    }
}
