// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Run command - execute a pipeline invocation

use colored::Colorize;
use miette::Result;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{collect_secrets, load_invocation, Context, OutputFormat, RunArgs};
use crate::engine::{Engine, RunRequest};
use crate::errors::EXIT_SUCCESS;
use crate::pipeline::{
    DagBuilder, ExecutionPlan, NodeState, PipelineInvocation, PipelineValidator, RunResult,
    SecretStore, TriggerEvent,
};
use crate::registry::Registry;
use crate::utils::{print_section, print_warning, state_label, status_label, RunProgress};

/// Run the pipeline; returns the process exit code
pub async fn run(args: RunArgs, ctx: Context) -> Result<i32> {
    let registry = ctx.registry()?;

    let mut invocation = load_invocation(&args.invocation)?;
    for assignment in &args.set {
        invocation.set_input(assignment)?;
    }

    let trigger = args.trigger.to_trigger()?;
    let secrets = collect_secrets(&args.secrets, &args.secret_env)?;
    let text = args.format == OutputFormat::Text;

    if text {
        report_warnings(&registry, &trigger, &secrets, &invocation, ctx.verbose);
    }

    let engine = Engine::new(registry, ctx.config.clone(), &ctx.root);

    if args.dry_run {
        let plan = engine.plan(&invocation, &trigger, &secrets, &args.only)?;
        print_plan(&plan);
        return Ok(EXIT_SUCCESS);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut progress = RunProgress::new(progress_total(&invocation, &args.only), text);
    let progress_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            progress.handle(&event);
        }
        progress.finish();
    });

    let mut request = RunRequest::new(invocation, trigger);
    request.secrets = secrets;
    request.only = args.only.clone();
    request.max_concurrency = args.max_concurrency;
    request.timeout = args.timeout.map(Duration::from_secs);
    request.events = Some(tx);
    request.cancel = cancel;

    let result = engine.run(request).await;
    // The scheduler dropped its sender, so the progress task drains and ends
    let _ = progress_task.await;

    if let Some(path) = &args.report {
        let json = result.to_json()?;
        std::fs::write(path, json)
            .map_err(|e| miette::miette!("Failed to write report '{}': {}", path.display(), e))?;
    }

    match args.format {
        OutputFormat::Json => println!("{}", result.to_json()?),
        OutputFormat::Text => print_summary(&result, ctx.verbose),
    }

    Ok(result.exit_code())
}

/// Print validation warnings (missing tools, secrets) ahead of a run
/// Number of nodes a run reports on, after `--only` narrows the graph
///
/// Falls back to every declared node when the graph is invalid; the run
/// then aborts before any node finishes.
fn progress_total(invocation: &PipelineInvocation, only: &[String]) -> usize {
    DagBuilder::build(&invocation.node_ids(), &invocation.edges())
        .and_then(|dag| if only.is_empty() { Ok(dag) } else { dag.restrict(only) })
        .map(|dag| dag.len())
        .unwrap_or(invocation.nodes.len())
}

fn report_warnings(
    registry: &Registry,
    trigger: &TriggerEvent,
    secrets: &SecretStore,
    invocation: &PipelineInvocation,
    verbose: bool,
) {
    let validation = PipelineValidator::new(registry, trigger)
        .with_secrets(secrets)
        .validate(invocation);

    if validation.has_warnings() {
        eprintln!("{}", "Warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    } else if verbose {
        eprintln!("{}", "No warnings".dimmed());
    }
}

fn print_plan(plan: &ExecutionPlan) {
    println!("{} {}", "Execution plan for".bold(), plan.name.cyan());
    for (level, nodes) in plan.dag.levels().iter().enumerate() {
        println!();
        println!("  {} {}", "Level".bold(), level + 1);
        for id in nodes {
            let uses = plan
                .node(id)
                .map(|n| n.definition.reference().to_string())
                .unwrap_or_default();
            println!("    - {} ({})", id, uses.dimmed());
        }
    }
}

fn print_summary(result: &RunResult, verbose: bool) {
    if let Some(error) = &result.error {
        eprintln!();
        eprintln!("{} {}", "Invocation rejected:".red().bold(), error.message);
        return;
    }

    print_section("Nodes");
    for node in &result.nodes {
        let reason = node
            .reason
            .as_ref()
            .map(|r| format!(" - {}", r))
            .unwrap_or_default();
        let duration = node
            .duration_ms
            .map(|ms| format!(" ({:.2}s)", ms as f64 / 1000.0))
            .unwrap_or_default();
        println!(
            "  {:<20} {}{}{}",
            node.id,
            state_label(node.state),
            duration.dimmed(),
            reason.dimmed()
        );

        if verbose || node.state == NodeState::Failed {
            for log in &node.logs {
                let failed = log.exit_code != Some(0);
                if !verbose && !failed {
                    continue;
                }
                if !log.stderr.is_empty() {
                    println!("{}", indent(&log.stderr).dimmed());
                } else if !log.stdout.is_empty() {
                    println!("{}", indent(&log.stdout).dimmed());
                }
            }
        }
    }

    let outputs: Vec<_> = result
        .nodes
        .iter()
        .flat_map(|n| n.outputs.iter().map(move |(k, v)| (n.id.as_str(), k, v)))
        .collect();
    if !outputs.is_empty() {
        print_section("Outputs");
        for (node, key, value) in outputs {
            println!("  {}.{} = {}", node, key, value);
        }
    }

    if !result.artifacts.is_empty() {
        print_section("Artifacts");
        for artifact in &result.artifacts {
            println!(
                "  {} {} {}",
                artifact.kind.to_string().cyan(),
                artifact.path.display(),
                format!("({})", artifact.node).dimmed()
            );
        }
    }

    let skipped = result.count(NodeState::Skipped);
    if skipped > 0 && verbose {
        print_warning(&format!("{} node(s) skipped", skipped));
    }

    println!();
    println!(
        "Pipeline '{}' {} in {:.2}s",
        result.invocation,
        status_label(result.status),
        result.duration_ms as f64 / 1000.0
    );
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("      {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}
