//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::deploy::{Preview, ProgressSink, StackStatusUpdate};
use crate::stack::{StackDescription, StackEvent, StackState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Resource change row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Replacement")]
    replacement: String,
}

/// Stack status row for table display.
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Stack")]
    stack: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&ValidationJson::from(result))
                .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for error in &result.errors {
                    let _ = writeln!(output, "{} {error}", "✗".red());
                }
                if show_warnings {
                    for warning in &result.warnings {
                        let _ = writeln!(output, "{} {warning}", "⚠".yellow());
                    }
                }
                if result.is_valid() {
                    let _ = writeln!(
                        output,
                        "{} Configuration is valid ({} warning(s))",
                        "✓".green(),
                        result.warning_count()
                    );
                } else {
                    let _ = writeln!(
                        output,
                        "\n{} error(s), {} warning(s)",
                        result.error_count().to_string().red(),
                        result.warning_count().to_string().yellow()
                    );
                }
                output
            }
        }
    }

    /// Formats change previews for one or more stacks.
    #[must_use]
    pub fn format_previews(&self, previews: &[Preview]) -> String {
        match self.format {
            OutputFormat::Json => {
                let json: Vec<PreviewJson> = previews.iter().map(PreviewJson::from).collect();
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => previews.iter().map(Self::format_preview_text).collect(),
        }
    }

    fn format_preview_text(preview: &Preview) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "\n📋 {} ({})",
            preview.stack.bold(),
            Self::format_state(&preview.state)
        );

        if let Some(note) = &preview.note {
            let _ = writeln!(output, "   {} {note}", "⚠".yellow());
            return output;
        }

        if preview.is_up_to_date() {
            let _ = writeln!(
                output,
                "   {} No changes required - stack is up to date.",
                "✓".green()
            );
            return output;
        }

        if !preview.changes.is_empty() {
            let rows: Vec<ChangeRow> = preview
                .changes
                .iter()
                .map(|c| ChangeRow {
                    action: Self::format_action(&c.action),
                    resource: c.logical_id.clone(),
                    resource_type: c.resource_type.clone(),
                    replacement: c.replacement.clone().unwrap_or_default(),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !preview.parameter_diff.is_empty() {
            let _ = write!(output, "   Parameters:\n{}", preview.parameter_diff);
        }

        output
    }

    /// Formats the results of a deployment run.
    #[must_use]
    pub fn format_deploy(&self, updates: &[StackStatusUpdate]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(updates).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for update in updates {
                    let _ = writeln!(output, "{}", Self::format_update(update));
                }
                let failed = updates.iter().filter(|u| !u.succeeded()).count();
                let _ = writeln!(
                    output,
                    "\nDeployed: {} succeeded, {} failed",
                    (updates.len() - failed).to_string().green(),
                    failed.to_string().red()
                );
                output
            }
        }
    }

    fn format_update(update: &StackStatusUpdate) -> String {
        match (&update.outcome, &update.error) {
            (Some(outcome), _) => format!("{} {}: {outcome}", "✓".green(), update.stack),
            (None, error) => format!(
                "{} {}: {}",
                "✗".red(),
                update.stack,
                error.as_deref().unwrap_or("failed")
            ),
        }
    }

    /// Formats the live status of stacks.
    #[must_use]
    pub fn format_status(&self, stacks: &[(String, StackDescription)]) -> String {
        match self.format {
            OutputFormat::Json => {
                let json: Vec<StatusJson> = stacks
                    .iter()
                    .map(|(name, description)| StatusJson::new(name, description))
                    .collect();
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                if stacks.is_empty() {
                    return String::from("   No stacks configured.\n");
                }
                let rows: Vec<StatusRow> = stacks
                    .iter()
                    .map(|(name, description)| StatusRow {
                        stack: name.clone(),
                        status: Self::format_state(&description.state),
                        reason: Self::truncate(
                            description.status_reason.as_deref().unwrap_or(""),
                            60,
                        ),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats an error message.
    #[must_use]
    pub fn format_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    /// Formats a stack state with color.
    fn format_state(state: &StackState) -> String {
        let text = state.to_string();
        match state {
            StackState::Absent => text.dimmed().to_string(),
            StackState::CreateComplete | StackState::UpdateComplete => text.green().to_string(),
            StackState::UpdateRollbackComplete
            | StackState::RollbackComplete
            | StackState::Failed(_) => text.red().to_string(),
            _ => text.yellow().to_string(),
        }
    }

    /// Formats a change action with color.
    fn format_action(action: &str) -> String {
        match action {
            "Add" => "+add".green().to_string(),
            "Remove" => "-remove".red().to_string(),
            "Modify" => "~modify".yellow().to_string(),
            other => other.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

/// Prints stack events to stderr as they arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn on_event(&self, stack: &str, event: &StackEvent) {
        let status = if event.is_failure() {
            event.status.red().to_string()
        } else if event.status.ends_with("_COMPLETE") {
            event.status.green().to_string()
        } else {
            event.status.yellow().to_string()
        };
        let reason = event
            .status_reason
            .as_deref()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();

        eprintln!(
            "{} {stack} {} {} {status}{reason}",
            event.timestamp.format("%H:%M:%S").to_string().dimmed(),
            event.logical_id,
            event.resource_type.dimmed()
        );
    }

    fn on_complete(&self, update: &StackStatusUpdate) {
        eprintln!("{}", OutputFormatter::format_update(update));
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct ValidationJson {
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl From<&ValidationResult> for ValidationJson {
    fn from(result: &ValidationResult) -> Self {
        Self {
            valid: result.is_valid(),
            errors: result.errors.iter().map(ToString::to_string).collect(),
            warnings: result.warnings.clone(),
        }
    }
}

#[derive(serde::Serialize)]
struct PreviewJson<'a> {
    stack: &'a str,
    state: String,
    mode: Option<String>,
    up_to_date: bool,
    changes: &'a [crate::stack::ResourceChange],
    parameters: &'a crate::stack::ParameterDiff,
    note: Option<&'a str>,
}

impl<'a> From<&'a Preview> for PreviewJson<'a> {
    fn from(preview: &'a Preview) -> Self {
        Self {
            stack: &preview.stack,
            state: preview.state.to_string(),
            mode: preview.mode.map(|m| m.to_string()),
            up_to_date: preview.is_up_to_date(),
            changes: &preview.changes,
            parameters: &preview.parameter_diff,
            note: preview.note.as_deref(),
        }
    }
}

#[derive(serde::Serialize)]
struct StatusJson<'a> {
    stack: &'a str,
    status: String,
    reason: Option<&'a str>,
    outputs: BTreeMap<&'a str, &'a str>,
}

impl<'a> StatusJson<'a> {
    fn new(stack: &'a str, description: &'a StackDescription) -> Self {
        Self {
            stack,
            status: description.state.to_string(),
            reason: description.status_reason.as_deref(),
            outputs: description
                .outputs
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
        }
    }
}
