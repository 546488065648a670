//! CLI module for the stack deployer.
//!
//! This module provides the command-line interface for validating,
//! previewing, deploying and inspecting stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::{ConsoleSink, OutputFormatter};
