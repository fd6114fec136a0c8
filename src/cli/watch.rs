// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Watch command - re-run the pipeline on file changes

use colored::Colorize;
use miette::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::{load_invocation, Context};
use crate::engine::{Engine, RunRequest};
use crate::errors::EXIT_SUCCESS;
use crate::pipeline::{RunResult, RunStatus, TriggerEvent};
use crate::registry::Registry;
use crate::utils::status_label;

/// Directories whose changes never trigger a re-run
const IGNORED: [&str; 3] = [".git", "target", "node_modules"];

/// Run the watch command
pub async fn run(invocation_path: PathBuf, debounce_ms: u64, ctx: Context) -> Result<i32> {
    // Fail fast on a missing or malformed invocation
    load_invocation(&invocation_path)?;

    println!("{}", "Starting watch mode...".bold());
    println!("Watching for changes (debounce: {}ms)", debounce_ms);
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), move |res| {
        let _ = tx.send(res);
    })
    .map_err(|e| miette::miette!("Failed to create file watcher: {}", e))?;

    debouncer
        .watcher()
        .watch(&ctx.root, RecursiveMode::Recursive)
        .map_err(|e| miette::miette!("Failed to start watching: {}", e))?;

    let mut outputs = RunOutputs::default();

    // Initial run
    run_pipeline(&invocation_path, &ctx, &mut outputs).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(Ok(events)) => {
                    let relevant: Vec<_> = events
                        .iter()
                        .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                        .filter(|e| !is_ignored(&ctx.root, &e.path, &outputs))
                        .collect();

                    if relevant.is_empty() {
                        continue;
                    }

                    println!();
                    println!("{}", "─".repeat(50).dimmed());
                    println!(
                        "{}: {} file(s) changed",
                        "Change detected".yellow(),
                        relevant.len()
                    );
                    if ctx.verbose {
                        for event in &relevant {
                            println!("  {}", event.path.display());
                        }
                    }
                    println!();

                    run_pipeline(&invocation_path, &ctx, &mut outputs).await;
                }
                Some(Err(e)) => eprintln!("{}: {:?}", "Watch error".red(), e),
                None => break,
            },
        }
    }

    Ok(EXIT_SUCCESS)
}

/// Files a run writes into the project
///
/// Artifact patterns come from the loaded definitions; collected artifact
/// paths cover patterns that are only known once templates are rendered.
#[derive(Debug, Default)]
struct RunOutputs {
    patterns: Vec<glob::Pattern>,
    written: BTreeSet<PathBuf>,
}

impl RunOutputs {
    /// Record the artifact patterns every registered definition declares
    fn learn_definitions(&mut self, registry: &Registry) {
        self.patterns = registry
            .list()
            .iter()
            .flat_map(|def| def.steps.iter())
            .flat_map(|step| {
                step.artifacts.iter().filter_map(move |artifact| {
                    let path = match step.working_dir.as_deref() {
                        Some(dir) => format!("{}/{}", dir.trim_end_matches('/'), artifact.path),
                        None => artifact.path.clone(),
                    };
                    let path = path.trim_start_matches("./");
                    if path.contains("${{") {
                        return None;
                    }
                    glob::Pattern::new(path).ok()
                })
            })
            .collect();
    }

    /// Record the artifacts a finished run collected
    fn learn_run(&mut self, root: &Path, result: &RunResult) {
        self.written.extend(
            result
                .artifacts
                .iter()
                .map(|a| a.path.strip_prefix(root).unwrap_or(&a.path).to_path_buf()),
        );
    }

    fn contains(&self, relative: &Path) -> bool {
        self.written.contains(relative) || self.patterns.iter().any(|p| p.matches_path(relative))
    }
}

/// Changes under tool directories and to artifacts written by a run do
/// not trigger a re-run
fn is_ignored(root: &Path, path: &Path, outputs: &RunOutputs) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let in_ignored_dir = relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        IGNORED.contains(&name.as_ref())
    });
    in_ignored_dir || outputs.contains(relative)
}

async fn run_pipeline(invocation_path: &Path, ctx: &Context, outputs: &mut RunOutputs) {
    let start = Instant::now();

    // Reload both so edits to definitions or the invocation take effect
    let invocation = match load_invocation(invocation_path) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load invocation".red(), e);
            return;
        }
    };
    let registry = match ctx.registry() {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load definitions".red(), e);
            return;
        }
    };

    outputs.learn_definitions(&registry);

    let engine = Engine::new(registry, ctx.config.clone(), &ctx.root);
    let result = engine
        .run(RunRequest::new(invocation, TriggerEvent::manual()))
        .await;
    outputs.learn_run(&ctx.root, &result);

    if let Some(error) = &result.error {
        eprintln!("{}: {}", "Invocation rejected".red(), error.message);
        return;
    }

    for node in result.nodes.iter().filter(|n| n.state.is_terminal()) {
        if result.status != RunStatus::Succeeded || ctx.verbose {
            let reason = node
                .reason
                .as_ref()
                .map(|r| format!(" - {}", r))
                .unwrap_or_default();
            println!("  {} {}{}", node.id, node.state, reason.dimmed());
        }
    }

    println!(
        "Pipeline {} ({:.2}s)",
        status_label(result.status),
        start.elapsed().as_secs_f64()
    );
}
