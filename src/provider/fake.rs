//! In-memory provider used by the engine tests.
//!
//! The fake mimics the observable behavior of the control plane: change sets
//! take a few polls to compute, executions and deletions advance one step per
//! `describe_stack` call, and every transition appends stack events.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{HalldyllError, PackagingError, ProviderError, ProviderErrorKind, Result};
use crate::stack::{
    ChangeSet, ChangeSetMode, ChangeSetStatus, ParameterSet, ResourceChange, StackDescription,
    StackEvent, StackState,
};

use super::store::{ObjectStore, StackProvider};
use super::types::{ChangeSetRequest, EventPage, TemplateSource};

const NO_CHANGES_REASON: &str = "The submitted information didn't contain changes. Submit different information to create a change set.";

/// Events returned per `describe_stack_events` page.
const EVENT_PAGE_SIZE: usize = 3;

/// One scripted transition applied on a `describe_stack` call.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    state: StackState,
    events: Vec<(String, String)>,
    reason: Option<String>,
}

impl Step {
    pub(crate) fn to(state: StackState) -> Self {
        Self {
            state,
            events: Vec::new(),
            reason: None,
        }
    }

    pub(crate) fn with_event(mut self, logical_id: &str, status: &str) -> Self {
        self.events.push((logical_id.to_string(), status.to_string()));
        self
    }

    fn with_failure(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct FakeStack {
    state: Option<StackState>,
    template: Option<TemplateSource>,
    parameters: ParameterSet,
    steps: VecDeque<Step>,
    pending_apply: Option<(TemplateSource, ParameterSet)>,
    failure_reason: Option<String>,
}

#[derive(Debug)]
struct FakeChangeSet {
    stack: String,
    name: String,
    mode: ChangeSetMode,
    template: TemplateSource,
    parameters: ParameterSet,
    status: ChangeSetStatus,
    reason: Option<String>,
    polls_remaining: u32,
}

#[derive(Debug, Default)]
struct FakeState {
    stacks: HashMap<String, FakeStack>,
    change_sets: HashMap<String, FakeChangeSet>,
    events: HashMap<String, Vec<StackEvent>>,
    clock: i64,
    next_event_id: u64,
    calls: Vec<String>,
    active_mutations: u32,
    max_active_mutations: u32,
    fail_next_execute: Option<String>,
    fail_next_change_set: Option<String>,
    vanish_next_execute: bool,
    change_set_polls: u32,
    transient_failures: u32,
    settled_event_failures: bool,
}

/// In-memory [`StackProvider`].
#[derive(Debug, Default)]
pub(crate) struct FakeProvider {
    state: Mutex<FakeState>,
    mutation_delay: Duration,
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

impl FakeState {
    fn push_event(&mut self, stack: &str, logical_id: &str, status: &str, reason: Option<&str>) {
        self.clock += 1;
        self.next_event_id += 1;
        let event = StackEvent {
            event_id: format!("evt-{}", self.next_event_id),
            timestamp: base_time() + ChronoDuration::seconds(self.clock),
            logical_id: logical_id.to_string(),
            resource_type: if logical_id == stack {
                String::from("AWS::CloudFormation::Stack")
            } else {
                String::from("AWS::ECS::Service")
            },
            status: status.to_string(),
            status_reason: reason.map(String::from),
        };
        self.events.entry(stack.to_string()).or_default().push(event);
    }

    fn stack_state(&self, name: &str) -> StackState {
        self.stacks
            .get(name)
            .and_then(|s| s.state.clone())
            .unwrap_or(StackState::Absent)
    }

    fn change_set_key(&self, stack: &str, id_or_name: &str) -> Option<String> {
        if self.change_sets.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.change_sets
            .iter()
            .find(|(_, cs)| cs.stack == stack && cs.name == id_or_name)
            .map(|(key, _)| key.clone())
    }

    fn begin_mutation(&mut self, call: &str) {
        self.calls.push(call.to_string());
        self.active_mutations += 1;
        self.max_active_mutations = self.max_active_mutations.max(self.active_mutations);
    }
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mutating calls hold an "active" slot for this long.
    pub(crate) fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = delay;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of calls made to the named operation.
    pub(crate) fn calls(&self, operation: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == operation).count()
    }

    /// Highest number of mutating calls observed at the same instant.
    pub(crate) fn max_active_mutations(&self) -> u32 {
        self.lock().max_active_mutations
    }

    /// Change sets created but neither executed nor deleted.
    pub(crate) fn live_change_sets(&self) -> usize {
        self.lock().change_sets.len()
    }

    /// Current state of a stack.
    pub(crate) fn state_of(&self, stack: &str) -> StackState {
        self.lock().stack_state(stack)
    }

    /// Parameters the stack is currently deployed with.
    pub(crate) fn parameters_of(&self, stack: &str) -> ParameterSet {
        self.lock()
            .stacks
            .get(stack)
            .map(|s| s.parameters.clone())
            .unwrap_or_default()
    }

    /// Template source the stack is currently deployed with.
    pub(crate) fn template_of(&self, stack: &str) -> Option<TemplateSource> {
        self.lock().stacks.get(stack).and_then(|s| s.template.clone())
    }

    /// Forces a stack into a state, as if another actor had acted on it.
    pub(crate) fn force_state(&self, stack: &str, state: StackState) {
        let mut inner = self.lock();
        let entry = inner.stacks.entry(stack.to_string()).or_default();
        entry.state = Some(state.clone());
        entry.steps.clear();
        inner.push_event(stack, stack, state.as_str(), None);
    }

    /// Queues transitions applied on subsequent `describe_stack` calls.
    pub(crate) fn script(&self, stack: &str, steps: Vec<Step>) {
        let mut inner = self.lock();
        inner
            .stacks
            .entry(stack.to_string())
            .or_default()
            .steps
            .extend(steps);
    }

    /// Makes the next executed change set fail and roll back.
    pub(crate) fn fail_next_execute(&self, reason: &str) {
        self.lock().fail_next_execute = Some(reason.to_string());
    }

    /// Makes the stack disappear while the next execution is in progress.
    pub(crate) fn vanish_next_execute(&self) {
        self.lock().vanish_next_execute = true;
    }

    /// Makes the next change set fail with the given reason.
    pub(crate) fn fail_next_change_set(&self, reason: &str) {
        self.lock().fail_next_change_set = Some(reason.to_string());
    }

    /// Number of `Pending` polls before a change set settles.
    pub(crate) fn set_change_set_polls(&self, polls: u32) {
        self.lock().change_set_polls = polls;
    }

    /// Makes the next `describe_stack` calls fail with throttling errors.
    pub(crate) fn throttle_next_describes(&self, count: u32) {
        self.lock().transient_failures = count;
    }

    /// Makes `describe_stack_events` fail once the stack reaches a
    /// successful terminal state.
    pub(crate) fn fail_event_reads_when_settled(&self) {
        self.lock().settled_event_failures = true;
    }

    async fn finish_mutation(&self) {
        if !self.mutation_delay.is_zero() {
            tokio::time::sleep(self.mutation_delay).await;
        }
        self.lock().active_mutations -= 1;
    }

    fn apply_step(inner: &mut FakeState, stack: &str) {
        let Some(step) = inner.stacks.get_mut(stack).and_then(|s| s.steps.pop_front()) else {
            return;
        };

        for (logical_id, status) in &step.events {
            let reason = if status.ends_with("_FAILED") {
                step.reason.clone()
            } else {
                None
            };
            inner.push_event(stack, logical_id, status, reason.as_deref());
        }
        let status = if step.state == StackState::Absent {
            "DELETE_COMPLETE"
        } else {
            step.state.as_str()
        };
        inner.push_event(stack, stack, status, None);

        let Some(entry) = inner.stacks.get_mut(stack) else {
            return;
        };
        match step.state {
            StackState::Absent => {
                *entry = FakeStack::default();
                entry.state = Some(StackState::Absent);
            }
            StackState::CreateComplete | StackState::UpdateComplete => {
                if let Some((template, parameters)) = entry.pending_apply.take() {
                    entry.template = Some(template);
                    entry.parameters = parameters;
                }
                entry.state = Some(step.state);
            }
            state => {
                if !state.is_in_progress() {
                    entry.pending_apply = None;
                }
                entry.failure_reason.clone_from(&step.reason);
                entry.state = Some(state);
            }
        }
    }
}

#[async_trait]
impl StackProvider for FakeProvider {
    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String> {
        let result = {
            let mut inner = self.lock();
            inner.begin_mutation("CreateChangeSet");
            Self::create_change_set_locked(&mut inner, request)
        };
        self.finish_mutation().await;
        result
    }

    async fn describe_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<ChangeSet> {
        let mut inner = self.lock();
        inner.calls.push(String::from("DescribeChangeSet"));
        let key = inner.change_set_key(stack_name, change_set_id);
        let found = match key {
            Some(k) => inner.change_sets.get_mut(&k),
            None => None,
        };
        let Some(cs) = found else {
            return Err(ProviderError::new(
                ProviderErrorKind::NotFound,
                "DescribeChangeSet",
                format!("ChangeSet [{change_set_id}] does not exist"),
            )
            .into());
        };

        let status = if cs.polls_remaining > 0 {
            cs.polls_remaining -= 1;
            ChangeSetStatus::Pending
        } else {
            cs.status
        };

        let id = format!("arn:fake:changeSet/{}/{}", cs.stack, cs.name);
        let changes = if status == ChangeSetStatus::Ready {
            vec![ResourceChange {
                action: String::from(match cs.mode {
                    ChangeSetMode::Create => "Add",
                    ChangeSetMode::Update => "Modify",
                }),
                logical_id: String::from("Service"),
                resource_type: String::from("AWS::ECS::Service"),
                replacement: Some(String::from("False")),
            }]
        } else {
            Vec::new()
        };

        Ok(ChangeSet {
            id,
            name: cs.name.clone(),
            status,
            reason: if status.is_terminal() { cs.reason.clone() } else { None },
            changes,
        })
    }

    async fn execute_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<()> {
        let result = {
            let mut inner = self.lock();
            inner.begin_mutation("ExecuteChangeSet");
            Self::execute_locked(&mut inner, stack_name, change_set_id)
        };
        self.finish_mutation().await;
        result
    }

    async fn delete_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(String::from("DeleteChangeSet"));
        if let Some(key) = inner.change_set_key(stack_name, change_set_id) {
            inner.change_sets.remove(&key);
        }
        Ok(())
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription> {
        let mut inner = self.lock();
        inner.calls.push(String::from("DescribeStacks"));
        if inner.transient_failures > 0 {
            inner.transient_failures -= 1;
            return Err(ProviderError::throttled("DescribeStacks", "Rate exceeded").into());
        }

        Self::apply_step(&mut inner, stack_name);

        let state = inner.stack_state(stack_name);
        if state == StackState::Absent {
            return Ok(StackDescription::absent());
        }

        let entry = inner.stacks.get(stack_name);
        Ok(StackDescription {
            state,
            status_reason: entry.and_then(|s| s.failure_reason.clone()),
            parameters: entry.map(|s| s.parameters.clone()).unwrap_or_default(),
            outputs: HashMap::new(),
        })
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<EventPage> {
        let mut inner = self.lock();
        inner.calls.push(String::from("DescribeStackEvents"));
        if inner.settled_event_failures
            && matches!(
                inner.stack_state(stack_name),
                StackState::CreateComplete | StackState::UpdateComplete
            )
        {
            return Err(ProviderError::throttled("DescribeStackEvents", "Rate exceeded").into());
        }
        let newest_first: Vec<StackEvent> = inner
            .events
            .get(stack_name)
            .map(|events| events.iter().rev().cloned().collect())
            .unwrap_or_default();

        let offset = next_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let end = (offset + EVENT_PAGE_SIZE).min(newest_first.len());
        let events = newest_first.get(offset..end).map(<[StackEvent]>::to_vec).unwrap_or_default();
        let next_token = (end < newest_first.len()).then(|| end.to_string());

        Ok(EventPage { events, next_token })
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.begin_mutation("DeleteStack");
            let state = inner.stack_state(stack_name);
            if state != StackState::Absent && state != StackState::DeleteInProgress {
                if let Some(entry) = inner.stacks.get_mut(stack_name) {
                    entry.state = Some(StackState::DeleteInProgress);
                    entry.steps = VecDeque::from([
                        Step::to(StackState::DeleteInProgress).with_event("Service", "DELETE_COMPLETE"),
                        Step::to(StackState::Absent),
                    ]);
                }
                inner.push_event(stack_name, stack_name, "DELETE_IN_PROGRESS", None);
            }
        }
        self.finish_mutation().await;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

impl FakeProvider {
    fn create_change_set_locked(inner: &mut FakeState, request: &ChangeSetRequest) -> Result<String> {
        let id = format!("arn:fake:changeSet/{}/{}", request.stack_name, request.change_set_name);
        if inner.change_sets.contains_key(&id) {
            return Err(ProviderError::new(
                ProviderErrorKind::AlreadyExists,
                "CreateChangeSet",
                format!("ChangeSet {} already exists", request.change_set_name),
            )
            .into());
        }

        let state = inner.stack_state(&request.stack_name);
        match request.mode {
            ChangeSetMode::Create if !state.is_creatable() => {
                return Err(ProviderError::new(
                    ProviderErrorKind::AlreadyExists,
                    "CreateChangeSet",
                    format!("Stack [{}] already exists", request.stack_name),
                )
                .into());
            }
            ChangeSetMode::Update if !state.is_updatable() => {
                return Err(ProviderError::new(
                    ProviderErrorKind::Validation,
                    "CreateChangeSet",
                    format!("Stack:{} is in {state} state and can not be updated.", request.stack_name),
                )
                .into());
            }
            _ => {}
        }

        if request.mode == ChangeSetMode::Create {
            inner
                .stacks
                .entry(request.stack_name.clone())
                .or_default()
                .state = Some(StackState::ReviewInProgress);
        }

        let (status, reason) = if let Some(reason) = inner.fail_next_change_set.take() {
            (ChangeSetStatus::Failed, Some(reason))
        } else {
            let unchanged = request.mode == ChangeSetMode::Update
                && inner.stacks.get(&request.stack_name).is_some_and(|s| {
                    s.template.as_ref() == Some(&request.template) && s.parameters == request.parameters
                });
            if unchanged {
                (ChangeSetStatus::Failed, Some(NO_CHANGES_REASON.to_string()))
            } else {
                (ChangeSetStatus::Ready, None)
            }
        };

        let polls_remaining = inner.change_set_polls;
        inner.change_sets.insert(
            id.clone(),
            FakeChangeSet {
                stack: request.stack_name.clone(),
                name: request.change_set_name.clone(),
                mode: request.mode,
                template: request.template.clone(),
                parameters: request.parameters.clone(),
                status,
                reason,
                polls_remaining,
            },
        );
        Ok(id)
    }

    fn execute_locked(inner: &mut FakeState, stack_name: &str, change_set_id: &str) -> Result<()> {
        let Some(cs) = inner.change_sets.remove(change_set_id) else {
            return Err(ProviderError::new(
                ProviderErrorKind::NotFound,
                "ExecuteChangeSet",
                format!("ChangeSet [{change_set_id}] does not exist"),
            )
            .into());
        };
        if cs.status != ChangeSetStatus::Ready || cs.stack != stack_name {
            return Err(ProviderError::new(
                ProviderErrorKind::InProgress,
                "ExecuteChangeSet",
                "ChangeSet is in an invalid status for execution",
            )
            .into());
        }

        let failure = inner.fail_next_execute.take();
        let vanish = std::mem::take(&mut inner.vanish_next_execute);
        let steps = match (cs.mode, failure.as_deref()) {
            _ if vanish => vec![
                Step::to(StackState::DeleteInProgress),
                Step::to(StackState::Absent),
            ],
            (ChangeSetMode::Create, None) => vec![
                Step::to(StackState::CreateInProgress).with_event("Service", "CREATE_IN_PROGRESS"),
                Step::to(StackState::CreateComplete).with_event("Service", "CREATE_COMPLETE"),
            ],
            (ChangeSetMode::Update, None) => vec![
                Step::to(StackState::UpdateInProgress).with_event("Service", "UPDATE_IN_PROGRESS"),
                Step::to(StackState::UpdateComplete).with_event("Service", "UPDATE_COMPLETE"),
            ],
            (ChangeSetMode::Create, Some(reason)) => vec![
                Step::to(StackState::RollbackInProgress)
                    .with_event("Service", "CREATE_FAILED")
                    .with_failure(reason),
                Step::to(StackState::RollbackComplete).with_event("Service", "DELETE_COMPLETE"),
            ],
            (ChangeSetMode::Update, Some(reason)) => vec![
                Step::to(StackState::UpdateRollbackInProgress)
                    .with_event("Service", "UPDATE_FAILED")
                    .with_failure(reason),
                Step::to(StackState::UpdateRollbackComplete).with_event("Service", "UPDATE_COMPLETE"),
            ],
        };

        let in_progress = match cs.mode {
            ChangeSetMode::Create => StackState::CreateInProgress,
            ChangeSetMode::Update => StackState::UpdateInProgress,
        };
        let entry = inner.stacks.entry(stack_name.to_string()).or_default();
        entry.state = Some(in_progress.clone());
        entry.pending_apply = Some((cs.template, cs.parameters));
        entry.steps = steps.into();
        inner.push_event(stack_name, stack_name, in_progress.as_str(), None);
        Ok(())
    }
}

/// In-memory [`ObjectStore`] that records uploads.
#[derive(Debug, Default)]
pub(crate) struct FakeObjectStore {
    uploads: Mutex<Vec<(String, String, usize)>>,
}

impl FakeObjectStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Uploaded (bucket, key, size) triples, in order.
    pub(crate) fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<String> {
        if bucket.is_empty() {
            return Err(HalldyllError::Packaging(PackagingError::UploadFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: String::from("bucket name cannot be empty"),
            }));
        }
        self.uploads
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((bucket.to_string(), key.to_string(), body.len()));
        Ok(format!("https://{bucket}.s3.amazonaws.com/{key}"))
    }
}
