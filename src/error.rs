//! Error types for the Halldyll stack deployer.
//!
//! This module provides the error hierarchy for every step of a stack
//! deployment: configuration, packaging, change-set previews, provider calls,
//! and the deployment state machine itself.
//!
//! Errors can carry an ordered list of context frames (see
//! [`HalldyllError::context`]). Callers inspect the category of the root cause
//! through [`HalldyllError::kind`] rather than matching on message text.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::stack::StackEvent;

/// The main error type for the Halldyll stack deployer.
#[derive(Debug, Error)]
pub enum HalldyllError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The template could not be packaged (object store write failed).
    #[error("Packaging error: {0}")]
    Packaging(#[from] PackagingError),

    /// The provider failed to compute a change set for a substantive reason.
    #[error("Change set for stack {stack} failed: {reason}")]
    ChangeSet {
        /// Stack name.
        stack: String,
        /// Provider reason, verbatim.
        reason: String,
        /// The failure was a transient provider error that exhausted its retries.
        transient: bool,
    },

    /// A polling loop exceeded its bound.
    #[error("Timed out after {waited_secs}s waiting for {operation} on stack {stack}")]
    Timeout {
        /// Stack name.
        stack: String,
        /// What was being waited for.
        operation: String,
        /// Seconds spent waiting.
        waited_secs: u64,
    },

    /// The stack reached a terminal failure state.
    #[error("Deployment of stack {stack} failed with status {state}{details}", details = format_failures(.failures))]
    DeploymentFailed {
        /// Stack name.
        stack: String,
        /// Terminal state reached.
        state: String,
        /// Failed resource events observed during the operation.
        failures: Vec<StackEvent>,
    },

    /// The caller cancelled the deployment or its deadline passed.
    #[error("Deployment of stack {stack} was cancelled")]
    Cancelled {
        /// Stack name.
        stack: String,
    },

    /// Another deployment of the same stack is in flight.
    #[error("Stack {stack} is already being deployed (holder: {holder}, since: {since})")]
    StackBusy {
        /// Stack name.
        stack: String,
        /// Identifier of the active deployment.
        holder: String,
        /// When the active deployment started.
        since: String,
    },

    /// Provider control-plane errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error wrapped with one frame of context.
    #[error("{frame}: {source}")]
    Context {
        /// Description of the operation that failed.
        frame: String,
        /// The wrapped error.
        #[source]
        source: Box<HalldyllError>,
    },
}

/// Category of an error, independent of its context frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration problem.
    Config,
    /// Object store write failure.
    Packaging,
    /// Change set failed.
    ChangeSet,
    /// Polling bound exceeded.
    Timeout,
    /// Terminal failed stack state.
    DeploymentFailed,
    /// Caller-initiated cancellation.
    Cancelled,
    /// Concurrent deployment rejected.
    StackBusy,
    /// Provider call failure.
    Provider,
    /// Local IO failure.
    Io,
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (stack, parameter, etc.).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// Invalid stack name.
    #[error("Invalid stack name '{name}': {reason}")]
    InvalidStackName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The requested stack is not declared in the configuration.
    #[error("Stack not found in configuration: {name}")]
    UnknownStack {
        /// Name that was looked up.
        name: String,
    },
}

/// Template packaging errors.
#[derive(Debug, Error)]
pub enum PackagingError {
    /// The object store rejected the upload.
    #[error("Failed to upload template to s3://{bucket}/{key}: {message}")]
    UploadFailed {
        /// Target bucket.
        bucket: String,
        /// Target key.
        key: String,
        /// Underlying failure.
        message: String,
    },

    /// No artifact bucket is configured but one is required.
    #[error("Template for stack {stack} is {size} bytes (limit {limit}) and no artifact bucket is configured")]
    NoArtifactBucket {
        /// Stack name.
        stack: String,
        /// Template size in bytes.
        size: usize,
        /// Inline limit in bytes.
        limit: usize,
    },

    /// Two parameter sets declare the same key with different values.
    #[error("Parameter {key} is declared by both the stack and its addons")]
    ParameterConflict {
        /// Conflicting key.
        key: String,
    },
}

/// Provider control-plane errors.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ProviderError {
    /// Classification of the failure.
    pub kind: ProviderErrorKind,
    /// Provider operation that failed.
    pub operation: String,
    /// Provider message.
    pub message: String,
}

/// Classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Request throttled by the provider.
    Throttled,
    /// Transport failure or timeout.
    Network,
    /// The resource being created already exists.
    AlreadyExists,
    /// The operation conflicts with one already in progress.
    InProgress,
    /// The target resource does not exist.
    NotFound,
    /// The request was rejected as invalid.
    Validation,
    /// Credentials were rejected.
    AccessDenied,
    /// Anything else.
    Other,
}

/// Result type alias for Halldyll operations.
pub type Result<T> = std::result::Result<T, HalldyllError>;

fn format_failures(failures: &[StackEvent]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let reasons = failures
        .iter()
        .map(|e| {
            format!(
                "{} {}: {}",
                e.logical_id,
                e.status,
                e.status_reason.as_deref().unwrap_or("no reason given")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    format!(" ({reasons})")
}

impl HalldyllError {
    /// Wraps this error with a context frame.
    #[must_use]
    pub fn context(self, frame: impl Into<String>) -> Self {
        Self::Context {
            frame: frame.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping context frames.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Returns the context frames, outermost first.
    #[must_use]
    pub fn frames(&self) -> Vec<&str> {
        let mut frames = Vec::new();
        let mut current = self;
        while let Self::Context { frame, source } = current {
            frames.push(frame.as_str());
            current = source;
        }
        frames
    }

    /// Returns the category of the root cause.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::Config(_) => ErrorKind::Config,
            Self::Packaging(_) => ErrorKind::Packaging,
            Self::ChangeSet { .. } => ErrorKind::ChangeSet,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::DeploymentFailed { .. } => ErrorKind::DeploymentFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::StackBusy { .. } => ErrorKind::StackBusy,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Io(_) => ErrorKind::Io,
            // root() never returns a context frame
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Returns the failed resource events if this is a deployment failure.
    #[must_use]
    pub fn failures(&self) -> &[StackEvent] {
        match self.root() {
            Self::DeploymentFailed { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Returns true if re-running the deployment later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Timeout { .. } | Self::StackBusy { .. } => true,
            Self::ChangeSet { transient, .. } => *transient,
            Self::Provider(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl ProviderError {
    /// Creates a provider error of the given kind.
    #[must_use]
    pub fn new(
        kind: ProviderErrorKind,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a throttling error.
    #[must_use]
    pub fn throttled(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Throttled, operation, message)
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, operation, message)
    }

    /// Returns true for throttling and transport failures.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Throttled | ProviderErrorKind::Network
        )
    }

    /// Suggested delay before the next attempt, if the error is transient.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self.kind {
            ProviderErrorKind::Throttled => Some(Duration::from_secs(2)),
            ProviderErrorKind::Network => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Throttled => "throttled",
            Self::Network => "network",
            Self::AlreadyExists => "already exists",
            Self::InProgress => "in progress",
            Self::NotFound => "not found",
            Self::Validation => "validation",
            Self::AccessDenied => "access denied",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}
