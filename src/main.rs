// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! pipeforge - Reusable Pipeline Composition & Execution Engine
//!
//! Compose versioned CI workflow definitions and run them as a DAG.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeforge::cli::{Cli, Commands, Context};
use pipeforge::errors::{PipeforgeError, EXIT_VALIDATION};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "pipeforge=debug" } else { "pipeforge=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if !pipeforge::utils::should_use_colors() {
        colored::control::set_override(false);
    }

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(report) => {
            let code = report
                .downcast_ref::<PipeforgeError>()
                .map(PipeforgeError::exit_code)
                .unwrap_or(EXIT_VALIDATION);
            eprintln!("{:?}", report);
            code
        }
    };

    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> miette::Result<i32> {
    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let ctx = Context::load(cli.definitions, cli.verbose)?;

    // Dispatch to command handlers
    match cli.command {
        Commands::Init { force } => pipeforge::cli::init::run(force, ctx).await,
        Commands::Run(args) => pipeforge::cli::run::run(args, ctx).await,
        Commands::Validate { invocation, strict } => {
            pipeforge::cli::validate::run(invocation, strict, ctx).await
        }
        Commands::Graph { invocation, format } => {
            pipeforge::cli::graph::run(invocation, format).await
        }
        Commands::Definitions { action } => pipeforge::cli::definitions::run(action, ctx).await,
        Commands::Watch {
            invocation,
            debounce,
        } => pipeforge::cli::watch::run(invocation, debounce, ctx).await,
    }
}
