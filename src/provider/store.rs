//! Provider capability traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::stack::{ChangeSet, StackDescription};

use super::types::{ChangeSetRequest, EventPage};

/// Stack control-plane operations consumed by the engine.
#[async_trait]
pub trait StackProvider: Send + Sync {
    /// Requests a change set and returns its identity.
    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String>;

    /// Describes a change set.
    async fn describe_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<ChangeSet>;

    /// Executes a ready change set.
    async fn execute_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<()>;

    /// Deletes a change set.
    async fn delete_change_set(&self, stack_name: &str, change_set_id: &str) -> Result<()>;

    /// Describes a stack. A missing stack is reported as `StackState::Absent`.
    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription>;

    /// Fetches one page of stack events, newest first.
    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<EventPage>;

    /// Deletes a stack.
    async fn delete_stack(&self, stack_name: &str) -> Result<()>;

    /// Gets the provider name for logging.
    fn provider_name(&self) -> &'static str;
}

/// Object storage used for oversized and nested templates.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores an object and returns its URL.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<String>;
}
