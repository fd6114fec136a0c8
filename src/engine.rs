// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Engine entry point
//!
//! Turns an invocation into an execution plan and runs it. Planning stops
//! at the first problem; nothing executes unless every selected node binds
//! and the graph is acyclic.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::errors::{PipeforgeError, PipeforgeResult};
use crate::executors::{ProcessExecutor, WorkflowRunner};
use crate::pipeline::{
    upstream_definitions, BoundNode, DagBuilder, ExecutionPlan, InputResolver, NodeEvent,
    NodeRunner, PipelineInvocation, RunResult, Scheduler, SchedulerOptions, SecretStore,
    TriggerEvent,
};
use crate::registry::{Registry, WorkflowDefinition};

/// One request to run an invocation
pub struct RunRequest {
    pub invocation: PipelineInvocation,
    pub trigger: TriggerEvent,
    pub secrets: SecretStore,
    /// Run only these nodes and what they depend on
    pub only: Vec<String>,
    /// Overrides the invocation's and the config's limit
    pub max_concurrency: Option<usize>,
    /// Overrides the configured default node timeout
    pub timeout: Option<Duration>,
    pub events: Option<UnboundedSender<NodeEvent>>,
    pub cancel: CancellationToken,
}

impl RunRequest {
    pub fn new(invocation: PipelineInvocation, trigger: TriggerEvent) -> Self {
        Self {
            invocation,
            trigger,
            secrets: SecretStore::new(),
            only: Vec::new(),
            max_concurrency: None,
            timeout: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Pipeline engine
pub struct Engine {
    registry: Arc<Registry>,
    config: EngineConfig,
    runner: Arc<dyn NodeRunner>,
}

impl Engine {
    /// Engine running steps as processes in `work_dir`
    pub fn new(registry: Registry, config: EngineConfig, work_dir: impl Into<PathBuf>) -> Self {
        let runner = WorkflowRunner::new(Arc::new(ProcessExecutor::new()), work_dir)
            .mask_secrets(config.mask_secrets);
        Self::with_runner(registry, config, Arc::new(runner))
    }

    /// Engine with a custom node runner
    pub fn with_runner(registry: Registry, config: EngineConfig, runner: Arc<dyn NodeRunner>) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            runner,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bind and order an invocation without running it
    pub fn plan(
        &self,
        invocation: &PipelineInvocation,
        trigger: &TriggerEvent,
        secrets: &SecretStore,
        only: &[String],
    ) -> PipeforgeResult<ExecutionPlan> {
        if invocation.nodes.is_empty() {
            return Err(PipeforgeError::InvalidInvocation {
                reason: "invocation has no nodes".into(),
                help: Some("Add at least one entry under 'nodes'".into()),
            });
        }

        let mut seen = HashSet::new();
        for node in &invocation.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(PipeforgeError::DuplicateNode {
                    node: node.id.clone(),
                });
            }
        }

        let mut dag = DagBuilder::build(&invocation.node_ids(), &invocation.edges())?;
        if !only.is_empty() {
            dag = dag.restrict(only)?;
        }

        let mut resolved: HashMap<String, Arc<WorkflowDefinition>> = HashMap::new();
        for id in dag.node_ids() {
            if let Some(node) = invocation.node(id) {
                resolved.insert(node.id.clone(), self.registry.resolve_ref(&node.uses)?);
            }
        }

        let resolver =
            InputResolver::new(trigger, secrets).with_grants(invocation.permissions.as_ref());

        let mut bound: Vec<BoundNode> = Vec::with_capacity(resolved.len());
        for id in dag.topological_order() {
            let (Some(node), Some(definition)) = (invocation.node(id), resolved.get(id)) else {
                continue;
            };
            let upstream = upstream_definitions(node, &resolved);
            bound.push(resolver.bind(node, Arc::clone(definition), &upstream)?);
        }

        Ok(ExecutionPlan::new(&invocation.name, dag, bound, trigger.clone()))
    }

    /// Plan and execute an invocation
    ///
    /// Never returns an error: planning failures produce an aborted result
    /// whose exit code reflects the error.
    pub async fn run(&self, request: RunRequest) -> RunResult {
        let start = Instant::now();
        let invocation = &request.invocation;

        let plan = match self.plan(invocation, &request.trigger, &request.secrets, &request.only) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(invocation = %invocation.name, error = %e, "invocation rejected");
                let nodes: Vec<(String, String, bool)> = invocation
                    .nodes
                    .iter()
                    .map(|n| (n.id.clone(), n.uses.to_string(), n.required))
                    .collect();
                return RunResult::aborted(
                    &invocation.name,
                    &nodes,
                    &e,
                    start.elapsed().as_millis() as u64,
                );
            }
        };

        let options = SchedulerOptions {
            max_concurrency: request
                .max_concurrency
                .or(invocation.max_concurrency)
                .unwrap_or(self.config.max_concurrency)
                .max(1),
            default_timeout: request.timeout.or_else(|| self.config.node_timeout()),
        };

        info!(
            invocation = %invocation.name,
            nodes = plan.dag.len(),
            max_concurrency = options.max_concurrency,
            "starting run"
        );

        let mut scheduler = Scheduler::new(Arc::clone(&self.runner), options);
        if let Some(tx) = request.events {
            scheduler = scheduler.with_events(tx);
        }

        let result = scheduler.run(&plan, request.cancel).await;
        info!(invocation = %invocation.name, status = ?result.status, "run finished");
        result
    }
}
