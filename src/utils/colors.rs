// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Terminal color utilities
//!
//! Provides consistent color schemes across the CLI.

use colored::{ColoredString, Colorize};

use crate::pipeline::{NodeState, RunStatus};

/// Check if colors should be disabled
pub fn should_use_colors() -> bool {
    // Respect NO_COLOR environment variable
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::env::var("TERM").map(|t| t != "dumb").unwrap_or(false)
}

/// Symbol for a node state
pub fn state_symbol(state: NodeState) -> ColoredString {
    match state {
        NodeState::Succeeded => "✓".green(),
        NodeState::Failed => "✗".red(),
        NodeState::Cancelled => "■".yellow(),
        NodeState::Skipped => "○".dimmed(),
        NodeState::Running => "→".blue(),
        NodeState::Pending | NodeState::Ready => "·".dimmed(),
    }
}

/// Styled label for a node state
pub fn state_label(state: NodeState) -> ColoredString {
    let label = state.to_string();
    match state {
        NodeState::Succeeded => label.green(),
        NodeState::Failed => label.red(),
        NodeState::Cancelled => label.yellow(),
        NodeState::Running => label.blue(),
        _ => label.dimmed(),
    }
}

/// Styled run status
pub fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Succeeded => "succeeded".green().bold(),
        RunStatus::Failed => "failed".red().bold(),
        RunStatus::Cancelled => "cancelled".yellow().bold(),
    }
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.chars().count().max(40)));
}

/// Print a styled section
pub fn print_section(title: &str) {
    println!();
    println!("{}:", title.bold());
}

/// Print a success check
pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print an error cross
pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

/// Print an info item
pub fn print_info(msg: &str) {
    println!("  {} {}", "→".blue(), msg);
}
