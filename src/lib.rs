// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Deploy Stacks
//!
//! A safe, idempotent and recoverable deployment engine for `CloudFormation` stacks.
//!
//! ## Overview
//!
//! Given a rendered template, its parameters and tags, the engine drives the
//! stack to a terminal state:
//!
//! - Creates the stack if it does not exist, updates it if it does
//! - Treats "no changes" as success instead of an error
//! - Deletes and recreates stacks whose first creation rolled back
//! - Streams every new stack event, oldest first, while it waits
//! - Uploads oversized and nested templates to S3 and deploys them by URL
//! - Refuses (or queues) overlapping deployments of the same stack
//!
//! ## Architecture
//!
//! 1. **Stack model** ([`stack`]): identities, templates, parameters, states
//! 2. **Provider** ([`provider`]): `CloudFormation` and S3 behind two traits
//! 3. **Engine** ([`deploy`]): change sets, state machine, events, guards
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`stack`]: Provider-agnostic stack data model
//! - [`provider`]: Control-plane and object store adapters
//! - [`deploy`]: The deployment engine
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   app: shop
//!   environment: test
//!   region: us-west-2
//!
//! artifacts:
//!   bucket: shop-artifacts
//!
//! stacks:
//!   - name: test
//!     kind: environment
//!     template: infrastructure/env.yml
//!   - name: api
//!     template: infrastructure/api.yml
//!     parameters:
//!       ImageTag: v42
//!     addons:
//!       template: infrastructure/addons.yml
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod provider;
pub mod stack;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DeployConfig};
pub use deploy::{DeployOutcome, EngineSettings, ProgressSink, StackDeployer};
pub use error::{HalldyllError, Result};
pub use provider::{CloudFormationProvider, ObjectStore, S3TemplateStore, StackProvider};
pub use stack::{DeployRequest, RenderedStack, StackConfiguration, StackIdentity};
