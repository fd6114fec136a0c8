// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Definitions command - inspect the registry

use colored::Colorize;
use miette::Result;

use super::{Context, DefinitionsAction};
use crate::errors::EXIT_SUCCESS;
use crate::registry::{definition_digest, short_digest, DefinitionRef, WorkflowDefinition};
use crate::utils::print_header;

/// Run the definitions command
pub async fn run(action: DefinitionsAction, ctx: Context) -> Result<i32> {
    let registry = ctx.registry()?;

    match action {
        DefinitionsAction::List => {
            if registry.is_empty() {
                println!(
                    "No definitions found in {}",
                    ctx.definitions_dir().display()
                );
                return Ok(EXIT_SUCCESS);
            }

            print_header("Workflow definitions");
            for definition in registry.list() {
                let digest = definition_digest(&definition)?;
                println!(
                    "  {:<32} {}  {}",
                    definition.reference().to_string().cyan(),
                    short_digest(&digest).dimmed(),
                    definition.description.as_deref().unwrap_or("")
                );
            }
        }
        DefinitionsAction::Show { reference } => {
            let reference: DefinitionRef = reference.parse().map_err(|e: String| {
                miette::miette!("Invalid definition reference '{}': {}", reference, e)
            })?;
            let definition = registry.resolve_ref(&reference)?;
            show(&definition, ctx.verbose)?;
        }
    }

    Ok(EXIT_SUCCESS)
}

fn show(definition: &WorkflowDefinition, verbose: bool) -> Result<()> {
    let digest = definition_digest(definition)?;

    print_header(&definition.reference().to_string());
    if let Some(description) = &definition.description {
        println!("{}", description);
    }
    println!("{} {}", "digest:".dimmed(), digest);

    if !definition.inputs.is_empty() {
        println!();
        println!("{}:", "Inputs".bold());
        for (name, spec) in definition.inputs.iter() {
            let mut flags = vec![spec.kind.to_string()];
            if spec.required {
                flags.push("required".into());
            }
            if let Some(default) = &spec.default {
                flags.push(format!("default: {}", default));
            }
            println!("  {} ({})", name, flags.join(", ").dimmed());
        }
    }

    if !definition.secrets.is_empty() {
        println!();
        println!("{}:", "Secrets".bold());
        for (name, spec) in &definition.secrets {
            let required = if spec.required { " (required)" } else { "" };
            println!("  {}{}", name, required.dimmed());
        }
    }

    if !definition.outputs.is_empty() {
        println!();
        println!("{}:", "Outputs".bold());
        for (name, spec) in definition.outputs.iter() {
            println!("  {} = {}", name, spec.value.dimmed());
        }
    }

    if !definition.permissions.is_empty() {
        println!();
        println!("{}:", "Permissions".bold());
        for (scope, access) in &definition.permissions {
            println!("  {}: {}", scope, access);
        }
    }

    println!();
    println!("{}:", "Steps".bold());
    for (i, step) in definition.steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step.label());
    }

    if verbose {
        println!();
        println!("{}", definition.to_yaml()?);
    }

    Ok(())
}
