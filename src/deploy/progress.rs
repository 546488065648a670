//! Progress reporting for deployments.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::machine::DeployOutcome;
use crate::stack::StackEvent;

/// Final status of one deployment, sent once after the last event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackStatusUpdate {
    /// Stack name.
    pub stack: String,
    /// Outcome when the deployment succeeded.
    pub outcome: Option<DeployOutcome>,
    /// Error message when it did not.
    pub error: Option<String>,
}

impl StackStatusUpdate {
    /// Returns true if the deployment succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Receives progress from the deployment engine.
///
/// Events arrive oldest first and each at most once. Exactly one terminal
/// update follows the last event.
pub trait ProgressSink: Send + Sync {
    /// Called for every new stack event.
    fn on_event(&self, stack: &str, event: &StackEvent);

    /// Called once when the deployment ends.
    fn on_complete(&self, update: &StackStatusUpdate);
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_event(&self, _stack: &str, _event: &StackEvent) {}

    fn on_complete(&self, _update: &StackStatusUpdate) {}
}

/// Logs progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_event(&self, stack: &str, event: &StackEvent) {
        if event.is_failure() {
            warn!(
                stack,
                resource = %event.logical_id,
                status = %event.status,
                reason = event.status_reason.as_deref().unwrap_or(""),
                "Resource failed"
            );
        } else {
            info!(
                stack,
                resource = %event.logical_id,
                resource_type = %event.resource_type,
                status = %event.status,
                "Stack event"
            );
        }
    }

    fn on_complete(&self, update: &StackStatusUpdate) {
        match (&update.outcome, &update.error) {
            (Some(outcome), _) => info!(stack = %update.stack, %outcome, "Deployment finished"),
            (None, error) => warn!(
                stack = %update.stack,
                error = error.as_deref().unwrap_or("unknown"),
                "Deployment failed"
            ),
        }
    }
}

/// A progress message delivered through a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// A new stack event.
    Event(StackEvent),
    /// The terminal update.
    Complete(StackStatusUpdate),
}

/// Forwards progress over a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Progress>,
}

impl ChannelSink {
    /// Creates a sink and the receiver it feeds.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn on_event(&self, _stack: &str, event: &StackEvent) {
        // a closed receiver means nobody is listening
        let _ = self.tx.send(Progress::Event(event.clone()));
    }

    fn on_complete(&self, update: &StackStatusUpdate) {
        let _ = self.tx.send(Progress::Complete(update.clone()));
    }
}
