//! AWS CloudFormation implementation of [`StackProvider`].

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::primitives::DateTime as SmithyDateTime;
use aws_sdk_cloudformation::types::{
    self as cfn, Capability, ChangeSetType, Parameter, StackStatus, Tag,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::error::{HalldyllError, ProviderError, ProviderErrorKind, Result};
use crate::stack::{
    ChangeSet, ChangeSetMode, ChangeSetStatus, ParameterSet, ResourceChange, StackDescription,
    StackEvent, StackState,
};

use super::retry::RetryPolicy;
use super::store::StackProvider;
use super::types::{ChangeSetRequest, EventPage, TemplateSource};

/// Error codes the service uses for throttling.
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Error codes the service uses for transient server-side failures.
const SERVER_ERROR_CODES: &[&str] = &["InternalFailure", "ServiceUnavailable"];

/// CloudFormation control-plane client.
#[derive(Debug, Clone)]
pub struct CloudFormationProvider {
    /// SDK client.
    client: Client,
    /// Retry policy for transient failures.
    retry: RetryPolicy,
}

impl CloudFormationProvider {
    /// Creates a provider from an explicit SDK configuration.
    #[must_use]
    pub fn new(sdk_config: &SdkConfig, retry: RetryPolicy) -> Self {
        Self {
            client: Client::new(sdk_config),
            retry,
        }
    }
}

#[async_trait]
impl StackProvider for CloudFormationProvider {
    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String> {
        let tags: Vec<Tag> = request
            .tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();

        let parameters: Vec<Parameter> = request
            .parameters
            .iter()
            .map(|(k, v)| Parameter::builder().parameter_key(k).parameter_value(v).build())
            .collect();

        let change_set_type = match request.mode {
            ChangeSetMode::Create => ChangeSetType::Create,
            ChangeSetMode::Update => ChangeSetType::Update,
        };

        let output = self
            .retry
            .run("CreateChangeSet", || {
                let mut builder = self
                    .client
                    .create_change_set()
                    .stack_name(&request.stack_name)
                    .change_set_name(&request.change_set_name)
                    .change_set_type(change_set_type.clone())
                    .description(&request.description)
                    .capabilities(Capability::CapabilityIam)
                    .capabilities(Capability::CapabilityNamedIam)
                    .capabilities(Capability::CapabilityAutoExpand)
                    .set_parameters(Some(parameters.clone()))
                    .set_tags(Some(tags.clone()));
                builder = match &request.template {
                    TemplateSource::Inline(body) => builder.template_body(body),
                    TemplateSource::Url(url) => builder.template_url(url),
                };
                async move {
                    builder
                        .send()
                        .await
                        .map_err(|e| HalldyllError::from(classify("CreateChangeSet", &e)))
                }
            })
            .await?;

        let id = output
            .id()
            .map_or_else(|| request.change_set_name.clone(), String::from);
        debug!("Created change set {id} for stack {}", request.stack_name);
        Ok(id)
    }

    async fn describe_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<ChangeSet> {
        let output = self
            .retry
            .run("DescribeChangeSet", move || async move {
                self.client
                    .describe_change_set()
                    .stack_name(stack_name)
                    .change_set_name(change_set_id)
                    .send()
                    .await
                    .map_err(|e| HalldyllError::from(classify("DescribeChangeSet", &e)))
            })
            .await?;

        let raw_status = output.status().map(|s| s.as_str().to_string());
        let reason = output.status_reason().map(String::from);
        let status = match raw_status.as_deref() {
            Some("CREATE_PENDING" | "CREATE_IN_PROGRESS") => ChangeSetStatus::Pending,
            Some("CREATE_COMPLETE") => ChangeSetStatus::Ready,
            _ => ChangeSetStatus::Failed,
        }
        .classify(reason.as_deref());
        trace!("Change set {change_set_id} raw status {raw_status:?} -> {status}");

        let changes = output
            .changes()
            .iter()
            .filter_map(|c| c.resource_change())
            .map(|rc| ResourceChange {
                action: rc.action().map(|a| a.as_str().to_string()).unwrap_or_default(),
                logical_id: rc.logical_resource_id().unwrap_or_default().to_string(),
                resource_type: rc.resource_type().unwrap_or_default().to_string(),
                replacement: rc.replacement().map(|r| r.as_str().to_string()),
            })
            .collect();

        Ok(ChangeSet {
            id: output
                .change_set_id()
                .map_or_else(|| change_set_id.to_string(), String::from),
            name: output.change_set_name().unwrap_or_default().to_string(),
            status,
            reason,
            changes,
        })
    }

    async fn execute_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<()> {
        self.retry
            .run("ExecuteChangeSet", move || async move {
                self.client
                    .execute_change_set()
                    .stack_name(stack_name)
                    .change_set_name(change_set_id)
                    .send()
                    .await
                    .map_err(|e| HalldyllError::from(classify("ExecuteChangeSet", &e)))
            })
            .await?;
        Ok(())
    }

    async fn delete_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<()> {
        self.retry
            .run("DeleteChangeSet", move || async move {
                self.client
                    .delete_change_set()
                    .stack_name(stack_name)
                    .change_set_name(change_set_id)
                    .send()
                    .await
                    .map_err(|e| HalldyllError::from(classify("DeleteChangeSet", &e)))
            })
            .await?;
        Ok(())
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription> {
        let result = self
            .retry
            .run("DescribeStacks", move || async move {
                self.client
                    .describe_stacks()
                    .stack_name(stack_name)
                    .send()
                    .await
                    .map_err(|e| HalldyllError::from(classify("DescribeStacks", &e)))
            })
            .await;

        let output = match result {
            Ok(output) => output,
            Err(HalldyllError::Provider(e)) if e.kind == ProviderErrorKind::NotFound => {
                return Ok(StackDescription::absent());
            }
            Err(e) => return Err(e),
        };

        let Some(stack) = output.stacks().first() else {
            return Ok(StackDescription::absent());
        };

        let parameters: ParameterSet = stack
            .parameters()
            .iter()
            .filter_map(|p| {
                Some((
                    p.parameter_key()?.to_string(),
                    p.parameter_value().unwrap_or_default().to_string(),
                ))
            })
            .collect();

        let outputs: HashMap<String, String> = stack
            .outputs()
            .iter()
            .filter_map(|o| {
                Some((
                    o.output_key()?.to_string(),
                    o.output_value().unwrap_or_default().to_string(),
                ))
            })
            .collect();

        Ok(StackDescription {
            state: stack_state(stack.stack_status())?,
            status_reason: stack.stack_status_reason().map(String::from),
            parameters,
            outputs,
        })
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<EventPage> {
        let result = self
            .retry
            .run("DescribeStackEvents", move || async move {
                self.client
                    .describe_stack_events()
                    .stack_name(stack_name)
                    .set_next_token(next_token.map(String::from))
                    .send()
                    .await
                    .map_err(|e| HalldyllError::from(classify("DescribeStackEvents", &e)))
            })
            .await;

        let output = match result {
            Ok(output) => output,
            Err(HalldyllError::Provider(e)) if e.kind == ProviderErrorKind::NotFound => {
                return Ok(EventPage::default());
            }
            Err(e) => return Err(e),
        };

        let events = output.stack_events().iter().filter_map(to_event).collect();

        Ok(EventPage {
            events,
            next_token: output.next_token().map(String::from),
        })
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        self.retry
            .run("DeleteStack", move || async move {
                self.client
                    .delete_stack()
                    .stack_name(stack_name)
                    .send()
                    .await
                    .map_err(|e| HalldyllError::from(classify("DeleteStack", &e)))
            })
            .await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "cloudformation"
    }
}

/// Maps an SDK error onto the provider error taxonomy.
fn classify<E>(operation: &str, err: &SdkError<E>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = DisplayErrorContext(err).to_string();

    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        return ProviderError::network(operation, message);
    }

    let code = err.code().unwrap_or_default();
    let service_message = err.message().unwrap_or_default();

    let kind = if THROTTLING_CODES.contains(&code) {
        ProviderErrorKind::Throttled
    } else if SERVER_ERROR_CODES.contains(&code) {
        ProviderErrorKind::Network
    } else if code == "AlreadyExistsException" {
        ProviderErrorKind::AlreadyExists
    } else if code == "ChangeSetNotFound" || service_message.contains("does not exist") {
        ProviderErrorKind::NotFound
    } else if code == "InvalidChangeSetStatus" || service_message.contains("_IN_PROGRESS state") {
        ProviderErrorKind::InProgress
    } else if code.starts_with("AccessDenied") || code == "ExpiredToken" {
        ProviderErrorKind::AccessDenied
    } else if code == "ValidationError" {
        ProviderErrorKind::Validation
    } else {
        ProviderErrorKind::Other
    };

    let text = if service_message.is_empty() {
        message
    } else {
        service_message.to_string()
    };
    ProviderError::new(kind, operation, text)
}

fn stack_state(status: Option<&StackStatus>) -> Result<StackState> {
    status.map(|s| StackState::from_provider(s.as_str())).ok_or_else(|| {
        ProviderError::new(
            ProviderErrorKind::Other,
            "DescribeStacks",
            "stack description has no status",
        )
        .into()
    })
}

/// Converts an SDK event. Events without an id or a timestamp cannot be
/// ordered or deduplicated, so they are dropped.
fn to_event(event: &cfn::StackEvent) -> Option<StackEvent> {
    let (Some(event_id), Some(timestamp)) = (event.event_id(), event.timestamp()) else {
        trace!("Skipping stack event without id or timestamp");
        return None;
    };

    Some(StackEvent {
        event_id: event_id.to_string(),
        timestamp: to_chrono(timestamp),
        logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
        resource_type: event.resource_type().unwrap_or_default().to_string(),
        status: event
            .resource_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        status_reason: event.resource_status_reason().map(String::from),
    })
}

fn to_chrono(timestamp: &SmithyDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudformation::types::ResourceStatus;

    fn sdk_event() -> aws_sdk_cloudformation::types::builders::StackEventBuilder {
        cfn::StackEvent::builder()
            .stack_name("app-test-api")
            .logical_resource_id("Service")
            .resource_type("AWS::ECS::Service")
            .resource_status(ResourceStatus::UpdateFailed)
            .resource_status_reason("circuit breaker triggered")
    }

    #[test]
    fn test_stack_status_maps_to_state() {
        let state = stack_state(Some(&StackStatus::UpdateRollbackComplete));
        assert!(matches!(state, Ok(StackState::UpdateRollbackComplete)));

        let missing = stack_state(None);
        assert!(matches!(
            missing,
            Err(HalldyllError::Provider(ref e)) if e.kind == ProviderErrorKind::Other
        ));
    }

    #[test]
    fn test_complete_event_is_converted() {
        let event = sdk_event()
            .event_id("evt-1")
            .timestamp(SmithyDateTime::from_secs(1_700_000_000))
            .build();

        let converted = to_event(&event).expect("complete event");
        assert_eq!(converted.event_id, "evt-1");
        assert_eq!(converted.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(converted.logical_id, "Service");
        assert_eq!(converted.status, "UPDATE_FAILED");
        assert!(converted.is_failure());
    }

    #[test]
    fn test_events_without_id_or_timestamp_are_skipped() {
        let no_id = sdk_event().timestamp(SmithyDateTime::from_secs(1_700_000_000)).build();
        let no_time = sdk_event().event_id("evt-2").build();

        assert!(to_event(&no_id).is_none());
        assert!(to_event(&no_time).is_none());
    }
}
