//! Stack data model.
//!
//! This module defines the provider-agnostic types the deployment engine
//! works with: stack identities, opaque templates, parameter sets, live stack
//! states, progress events, change sets, and the stack configurations supplied
//! by template-generation collaborators.

mod changeset;
mod configuration;
mod event;
mod identity;
mod params;
mod status;
mod template;

pub use changeset::{ChangeSet, ChangeSetMode, ChangeSetStatus, ResourceChange};
pub use configuration::{
    DeployRequest, NestedStackReference, RenderedStack, StackConfiguration, StackKind,
    DEFAULT_ADDONS_URL_PARAMETER,
};
pub use event::StackEvent;
pub use identity::{StackIdentity, validate_stack_name};
pub use params::{ParameterDiff, ParameterSet};
pub use status::{StackDescription, StackState};
pub use template::Template;
