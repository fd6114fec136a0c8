// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Validate command - check an invocation without running it

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{load_invocation, Context};
use crate::errors::{RecoverySuggestion, EXIT_VALIDATION};
use crate::pipeline::{PipelineValidator, TriggerEvent};

/// Run the validate command; returns the process exit code
pub async fn run(invocation_path: PathBuf, strict: bool, ctx: Context) -> Result<i32> {
    println!("{}", "Validating invocation...".bold());
    println!();

    let invocation = match load_invocation(&invocation_path) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("  {} Failed to parse invocation", "✗".red());
            eprintln!();
            return Err(e);
        }
    };
    println!("  {} Invocation file is valid YAML", "✓".green());

    let registry = ctx.registry()?;
    println!(
        "  {} Loaded {} definition(s) from {}",
        "✓".green(),
        registry.len(),
        ctx.definitions_dir().display()
    );

    let trigger = TriggerEvent::manual();
    let validation = PipelineValidator::new(&registry, &trigger).validate(&invocation);

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
            if let Some(suggestion) = RecoverySuggestion::for_error(error) {
                println!("    {} {}", "→".blue(), suggestion.action.dimmed());
            }
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if ctx.verbose {
        println!();
        println!("{}:", "Invocation summary".bold());
        println!("  Name: {}", invocation.name);
        println!("  Nodes: {}", invocation.nodes.len());
        for node in &invocation.nodes {
            let needs: Vec<&str> = node.needs.iter().map(|n| n.node()).collect();
            let deps = if needs.is_empty() {
                String::new()
            } else {
                format!(" [needs: {}]", needs.join(", "))
            };
            println!("    - {} ({}){}", node.id, node.uses, deps.dimmed());
        }
    }

    println!();

    if !validation.is_valid() {
        println!("{}", "Invocation is invalid.".red().bold());
        Ok(validation.exit_code())
    } else if validation.has_warnings() && strict {
        println!("{}", "Invocation has warnings (strict mode).".yellow().bold());
        Ok(EXIT_VALIDATION)
    } else if validation.has_warnings() {
        println!("{}", "Invocation is valid but has warnings.".yellow().bold());
        Ok(validation.exit_code())
    } else {
        println!("{}", "Invocation is valid!".green().bold());
        Ok(validation.exit_code())
    }
}
