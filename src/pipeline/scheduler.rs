// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Execution scheduler
//!
//! Dispatches every ready node concurrently (bounded by `max_concurrency`),
//! re-evaluates dependents whenever a node reaches a terminal state and
//! aggregates the outcome into a [`RunResult`].
//!
//! A single coordinator loop owns dispatch. Node work runs in a `JoinSet`;
//! each node's record is guarded by its own mutex so only one completion is
//! ever recorded per node.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::binding::BoundNode;
use super::dag::Dag;
use super::invocation::FailurePolicy;
use super::node::{ExecutionNode, NodeState, StateReason};
use super::result::{FailureReason, NodeOutcome, NodeReport, RunResult};
use super::trigger::TriggerEvent;

/// Everything a runner needs to execute one node
#[derive(Debug, Clone)]
pub struct NodeWork {
    pub node: Arc<BoundNode>,
    /// Fully resolved inputs
    pub inputs: BTreeMap<String, Value>,
    pub trigger: Arc<TriggerEvent>,
}

/// Executes the work of a single node
///
/// Implementations should return `NodeOutcome::Cancelled` promptly once
/// `cancel` fires. Node failures are reported as outcomes, never panics.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    async fn run(&self, work: NodeWork, cancel: CancellationToken) -> NodeOutcome;
}

/// Progress notifications emitted while a run is in flight
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Started {
        node: String,
    },
    Finished {
        node: String,
        state: NodeState,
        reason: Option<StateReason>,
    },
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Upper bound on concurrently running nodes (at least 1)
    pub max_concurrency: usize,
    /// Budget for nodes that set no timeout of their own
    pub default_timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            default_timeout: None,
        }
    }
}

/// A validated invocation ready to be scheduled
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,
    pub dag: Dag,
    pub nodes: HashMap<String, Arc<BoundNode>>,
    pub trigger: Arc<TriggerEvent>,
}

impl ExecutionPlan {
    pub fn new(name: impl Into<String>, dag: Dag, nodes: Vec<BoundNode>, trigger: TriggerEvent) -> Self {
        Self {
            name: name.into(),
            dag,
            nodes: nodes
                .into_iter()
                .map(|n| (n.id.clone(), Arc::new(n)))
                .collect(),
            trigger: Arc::new(trigger),
        }
    }

    /// Bound node for an id
    pub fn node(&self, id: &str) -> Option<&Arc<BoundNode>> {
        self.nodes.get(id)
    }
}

/// Runs execution plans
pub struct Scheduler {
    runner: Arc<dyn NodeRunner>,
    options: SchedulerOptions,
    events: Option<UnboundedSender<NodeEvent>>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn NodeRunner>, options: SchedulerOptions) -> Self {
        Self {
            runner,
            options,
            events: None,
        }
    }

    /// Send progress events to `tx`
    pub fn with_events(mut self, tx: UnboundedSender<NodeEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Execute a plan to completion or cancellation
    pub async fn run(&self, plan: &ExecutionPlan, cancel: CancellationToken) -> RunResult {
        let start = Instant::now();
        let mut run = Run::new(self, plan, cancel);

        run.drive().await;

        let cancel_requested = run.cancel.is_cancelled();
        let reports: Vec<NodeReport> = plan
            .dag
            .node_ids()
            .into_iter()
            .filter_map(|id| {
                let bound = plan.node(id)?;
                let state = run.states.get(id)?;
                Some(state.report(&bound.definition.reference().to_string(), bound.required))
            })
            .collect();

        let result = RunResult::from_nodes(
            plan.name.clone(),
            reports,
            cancel_requested,
            start.elapsed().as_millis() as u64,
        );
        info!(
            invocation = %plan.name,
            status = %result.status,
            duration_ms = result.duration_ms,
            "run finished"
        );
        result
    }
}

/// State of one scheduler run
struct Run<'a> {
    scheduler: &'a Scheduler,
    plan: &'a ExecutionPlan,
    cancel: CancellationToken,
    states: HashMap<String, Arc<ExecutionNode>>,
    ready: VecDeque<String>,
    tasks: JoinSet<(String, NodeOutcome)>,
    cancelled: bool,
}

impl<'a> Run<'a> {
    fn new(scheduler: &'a Scheduler, plan: &'a ExecutionPlan, cancel: CancellationToken) -> Self {
        let states = plan
            .dag
            .node_ids()
            .into_iter()
            .map(|id| (id.to_string(), Arc::new(ExecutionNode::new(id))))
            .collect();

        Self {
            scheduler,
            plan,
            cancel,
            states,
            ready: VecDeque::new(),
            tasks: JoinSet::new(),
            cancelled: false,
        }
    }

    fn max_concurrency(&self) -> usize {
        self.scheduler.options.max_concurrency.max(1)
    }

    /// Coordinator loop
    async fn drive(&mut self) {
        let roots: Vec<String> = self.plan.dag.roots().into_iter().map(String::from).collect();
        for id in roots {
            self.evaluate_and_propagate(id);
        }

        loop {
            if !self.cancelled && self.cancel.is_cancelled() {
                self.cancel_waiting();
            }

            if !self.cancelled {
                while self.tasks.len() < self.max_concurrency() {
                    let Some(id) = self.ready.pop_front() else {
                        break;
                    };
                    self.dispatch(id);
                }
            }

            if self.tasks.is_empty() {
                if self.ready.is_empty() || self.cancelled {
                    break;
                }
                // Everything dispatched failed before spawning; try the next batch
                continue;
            }

            let cancel = self.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled(), if !self.cancelled => {}
                joined = self.tasks.join_next() => match joined {
                    Some(Ok((id, outcome))) => self.finish(id, outcome),
                    Some(Err(e)) => error!(error = %e, "node task failed to join"),
                    None => {}
                },
            }
        }

        self.sweep();
    }

    /// Cancel every node that has not started and stop dispatching
    fn cancel_waiting(&mut self) {
        self.cancelled = true;
        self.ready.clear();
        warn!(invocation = %self.plan.name, "cancellation requested");

        for id in self.plan.dag.topological_order() {
            let node = &self.states[id];
            if node.cancel_waiting(StateReason::CancelRequested) {
                self.emit_finished(id);
            }
        }
    }

    /// Move `id` from Ready to Running and spawn its work
    fn dispatch(&mut self, id: String) {
        let node = Arc::clone(&self.states[&id]);
        let Some(bound) = self.plan.node(&id).cloned() else {
            return;
        };

        if !node.transition(NodeState::Ready, NodeState::Running) {
            return;
        }
        debug!(node = %id, "dispatching node");
        self.emit(NodeEvent::Started { node: id.clone() });

        let produced: HashMap<String, BTreeMap<String, String>> = bound
            .deferred_sources()
            .into_iter()
            .filter_map(|producer| {
                let outputs = self.states.get(&producer)?.outputs();
                Some((producer, outputs))
            })
            .collect();

        let inputs = match bound.resolve_inputs(&produced) {
            Ok(inputs) => inputs,
            Err(message) => {
                node.fail(FailureReason::InputResolution { message });
                self.on_terminal(id);
                return;
            }
        };

        let work = NodeWork {
            node: bound.clone(),
            inputs,
            trigger: Arc::clone(&self.plan.trigger),
        };
        let runner = Arc::clone(&self.scheduler.runner);
        let token = self.cancel.child_token();
        let timeout = bound.timeout.or(self.scheduler.options.default_timeout);

        self.tasks.spawn(async move {
            let outcome = run_node(runner, work, token, timeout).await;
            (id, outcome)
        });
    }

    /// Record a node's outcome and re-evaluate its dependents
    fn finish(&mut self, id: String, outcome: NodeOutcome) {
        let Some(node) = self.states.get(&id) else {
            return;
        };

        match node.complete(outcome) {
            Some(NodeState::Succeeded) => info!(node = %id, "node succeeded"),
            Some(NodeState::Failed) => {
                let reason = node.reason().map(|r| r.to_string()).unwrap_or_default();
                warn!(node = %id, reason = %reason, "node failed");
            }
            Some(state) => info!(node = %id, state = %state, "node finished"),
            None => return,
        }

        self.on_terminal(id);
    }

    fn on_terminal(&mut self, id: String) {
        self.emit_finished(&id);

        let dependents: Vec<String> = self
            .plan
            .dag
            .dependents(&id)
            .into_iter()
            .map(String::from)
            .collect();
        for dependent in dependents {
            self.evaluate_and_propagate(dependent);
        }
    }

    /// Evaluate `start` and anything its resolution unblocks
    fn evaluate_and_propagate(&mut self, start: String) {
        let mut worklist = VecDeque::from([start]);

        while let Some(id) = worklist.pop_front() {
            if !self.evaluate(&id) {
                continue;
            }

            // `id` became terminal without running
            self.emit_finished(&id);
            worklist.extend(self.plan.dag.dependents(&id).into_iter().map(String::from));
        }
    }

    /// Decide a pending node whose dependencies are all terminal
    ///
    /// Returns `true` if the node became terminal (skipped or cancelled);
    /// ready nodes are queued for dispatch.
    fn evaluate(&mut self, id: &str) -> bool {
        let node = Arc::clone(&self.states[id]);
        if node.state() != NodeState::Pending {
            return false;
        }

        let deps = self.plan.dag.dependencies(id);
        if deps.iter().any(|(dep, _)| !self.states[*dep].state().is_terminal()) {
            return false;
        }

        if self.cancelled {
            return node.cancel_waiting(StateReason::CancelRequested);
        }

        if let Some(reason) = self.blocking_reason(&deps) {
            return match reason {
                StateReason::DependencyCancelled { .. } => node.cancel_waiting(reason),
                _ => node.skip(reason),
            };
        }

        if let Some(bound) = self.plan.node(id) {
            if let Some(when) = &bound.when {
                if !when.matches(&self.plan.trigger) {
                    debug!(node = %id, "condition not met");
                    return node.skip(StateReason::ConditionNotMet);
                }
            }
        }

        if node.transition(NodeState::Pending, NodeState::Ready) {
            self.ready.push_back(id.to_string());
        }
        false
    }

    /// The most severe reason a dependency prevents `deps`' consumer from running
    fn blocking_reason(&self, deps: &[(&str, FailurePolicy)]) -> Option<StateReason> {
        let mut worst: Option<(u8, StateReason)> = None;

        for (dep, policy) in deps {
            let producer = &self.states[*dep];
            let candidate = match (producer.state(), policy) {
                (NodeState::Succeeded, _) => None,
                (NodeState::Cancelled, _) => Some((
                    3,
                    StateReason::DependencyCancelled {
                        node: dep.to_string(),
                    },
                )),
                (_, FailurePolicy::ContinueOnError) => None,
                (NodeState::Failed, FailurePolicy::Block) => Some((
                    2,
                    StateReason::DependencyFailed {
                        node: dep.to_string(),
                    },
                )),
                (_, FailurePolicy::Block) => {
                    let upstream_failed = producer
                        .reason()
                        .map(|r| r.is_upstream_failure())
                        .unwrap_or(false);
                    if upstream_failed {
                        Some((2, StateReason::DependencyFailed { node: dep.to_string() }))
                    } else {
                        Some((1, StateReason::UpstreamSkipped { node: dep.to_string() }))
                    }
                }
            };

            if let Some((rank, reason)) = candidate {
                if worst.as_ref().map(|(r, _)| rank > *r).unwrap_or(true) {
                    worst = Some((rank, reason));
                }
            }
        }

        worst.map(|(_, reason)| reason)
    }

    /// Settle nodes left non-terminal when the loop ends
    fn sweep(&mut self) {
        for id in self.plan.dag.topological_order() {
            let node = &self.states[id];
            match node.state() {
                NodeState::Running => {
                    node.fail(FailureReason::Crashed {
                        message: "node task was lost".into(),
                    });
                }
                NodeState::Pending | NodeState::Ready => {
                    node.cancel_waiting(StateReason::CancelRequested);
                }
                _ => continue,
            }
            self.emit_finished(id);
        }
    }

    fn emit_finished(&self, id: &str) {
        if let Some(node) = self.states.get(id) {
            self.emit(NodeEvent::Finished {
                node: id.to_string(),
                state: node.state(),
                reason: node.reason(),
            });
        }
    }

    fn emit(&self, event: NodeEvent) {
        if let Some(tx) = &self.scheduler.events {
            let _ = tx.send(event);
        }
    }
}

/// Run one node's work with its time budget
///
/// The work runs in its own task so a panic fails only this node.
async fn run_node(
    runner: Arc<dyn NodeRunner>,
    work: NodeWork,
    token: CancellationToken,
    timeout: Option<Duration>,
) -> NodeOutcome {
    let inner_token = token.clone();
    let mut handle = tokio::spawn(async move { runner.run(work, inner_token).await });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                token.cancel();
                handle.abort();
                return NodeOutcome::failed(FailureReason::Timeout {
                    ms: limit.as_millis() as u64,
                });
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "runner panicked".to_string());
            NodeOutcome::failed(FailureReason::Crashed { message })
        }
        Err(_) => NodeOutcome::Cancelled { logs: Vec::new() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::binding::BoundValue;
    use crate::pipeline::dag::DagBuilder;
    use crate::pipeline::invocation::{Condition, EdgeSpec};
    use crate::pipeline::result::RunStatus;
    use crate::pipeline::trigger::EventType;
    use crate::registry::{InputType, WorkflowDefinition};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Script {
        delay: Duration,
        fail: bool,
        panic: bool,
        give_up: bool,
        outputs: BTreeMap<String, String>,
    }

    impl Script {
        fn sleep(ms: u64) -> Self {
            Self {
                delay: Duration::from_millis(ms),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[derive(Default)]
    struct ScriptedRunner {
        scripts: HashMap<String, Script>,
        events: Mutex<Vec<String>>,
        inputs: Mutex<HashMap<String, BTreeMap<String, Value>>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedRunner {
        fn new(scripts: Vec<(&str, Script)>) -> Arc<Self> {
            Arc::new(Self {
                scripts: scripts
                    .into_iter()
                    .map(|(id, s)| (id.to_string(), s))
                    .collect(),
                ..Default::default()
            })
        }

        fn position(&self, event: &str) -> usize {
            let events = self.events.lock().unwrap();
            events
                .iter()
                .position(|e| e == event)
                .unwrap_or_else(|| panic!("missing event {} in {:?}", event, events))
        }

        fn ran(&self, id: &str) -> bool {
            self.events.lock().unwrap().contains(&format!("start:{}", id))
        }
    }

    #[async_trait]
    impl NodeRunner for ScriptedRunner {
        async fn run(&self, work: NodeWork, cancel: CancellationToken) -> NodeOutcome {
            let id = work.node.id.clone();
            let script = self.scripts.get(&id).cloned().unwrap_or_default();

            self.events.lock().unwrap().push(format!("start:{}", id));
            self.inputs.lock().unwrap().insert(id.clone(), work.inputs.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let finished = tokio::select! {
                _ = tokio::time::sleep(script.delay) => true,
                _ = cancel.cancelled() => false,
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("end:{}", id));

            if !finished || script.give_up {
                return NodeOutcome::Cancelled { logs: Vec::new() };
            }
            if script.panic {
                panic!("runner exploded");
            }
            if script.fail {
                return NodeOutcome::failed(FailureReason::ExitCode {
                    step: "lint".into(),
                    code: 1,
                });
            }
            NodeOutcome::Succeeded {
                outputs: script.outputs,
                artifacts: Vec::new(),
                logs: Vec::new(),
            }
        }
    }

    fn definition() -> Arc<WorkflowDefinition> {
        Arc::new(
            WorkflowDefinition::from_yaml(
                "name: go-lint\nversion: v1\noutputs:\n  digest: { value: \"${{ steps.lint.outputs.digest }}\" }\nsteps:\n  - id: lint\n    run: golangci-lint\n",
            )
            .unwrap(),
        )
    }

    fn bound(id: &str) -> BoundNode {
        BoundNode {
            id: id.to_string(),
            definition: definition(),
            inputs: BTreeMap::new(),
            secrets: BTreeMap::new(),
            required: true,
            when: None,
            timeout: None,
        }
    }

    fn plan_with(nodes: Vec<BoundNode>, edges: Vec<EdgeSpec>, trigger: TriggerEvent) -> ExecutionPlan {
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let dag = DagBuilder::build(&ids, &edges).unwrap();
        ExecutionPlan::new("test", dag, nodes, trigger)
    }

    fn plan(nodes: &[&str], edges: &[(&str, &str)]) -> ExecutionPlan {
        plan_with(
            nodes.iter().map(|id| bound(id)).collect(),
            edges.iter().map(|(f, t)| EdgeSpec::new(*f, *t)).collect(),
            TriggerEvent::manual(),
        )
    }

    fn scheduler(runner: &Arc<ScriptedRunner>, max_concurrency: usize) -> Scheduler {
        let runner: Arc<dyn NodeRunner> = runner.clone();
        Scheduler::new(
            runner,
            SchedulerOptions {
                max_concurrency,
                default_timeout: None,
            },
        )
    }

    fn state(result: &RunResult, id: &str) -> NodeState {
        result.node(id).unwrap().state
    }

    #[tokio::test]
    async fn test_node_waits_for_all_dependencies() {
        let runner = ScriptedRunner::new(vec![("a", Script::sleep(30)), ("b", Script::sleep(60))]);
        let plan = plan(&["a", "b", "c"], &[("a", "c"), ("b", "c")]);

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert_eq!(result.status, RunStatus::Succeeded);
        let c_start = runner.position("start:c");
        assert!(c_start > runner.position("end:a"));
        assert!(c_start > runner.position("end:b"));
    }

    #[tokio::test]
    async fn test_independent_nodes_run_concurrently() {
        let runner = ScriptedRunner::new(vec![
            ("a", Script::sleep(200)),
            ("b", Script::sleep(200)),
            ("c", Script::sleep(200)),
        ]);
        let plan = plan(&["a", "b", "c"], &[]);

        let start = Instant::now();
        let result = scheduler(&runner, 8).run(&plan, CancellationToken::new()).await;

        assert_eq!(result.count(NodeState::Succeeded), 3);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(runner.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_max_concurrency_is_respected() {
        let runner = ScriptedRunner::new(vec![
            ("a", Script::sleep(20)),
            ("b", Script::sleep(20)),
            ("c", Script::sleep(20)),
        ]);
        let plan = plan(&["a", "b", "c"], &[]);

        let result = scheduler(&runner, 1).run(&plan, CancellationToken::new()).await;

        assert_eq!(result.count(NodeState::Succeeded), 3);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_but_not_siblings() {
        let runner = ScriptedRunner::new(vec![("a", Script::failing()), ("d", Script::sleep(50))]);
        let plan = plan(&["a", "b", "d"], &[("a", "b")]);

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert_eq!(state(&result, "a"), NodeState::Failed);
        assert_eq!(state(&result, "b"), NodeState::Skipped);
        assert_eq!(
            result.node("b").unwrap().reason,
            Some(StateReason::DependencyFailed { node: "a".into() })
        );
        assert_eq!(state(&result, "d"), NodeState::Succeeded);
        assert_eq!(result.status, RunStatus::Failed);
        assert!(!runner.ran("b"));
    }

    #[tokio::test]
    async fn test_skip_propagates_through_chain() {
        let runner = ScriptedRunner::new(vec![("a", Script::failing())]);
        let plan = plan(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert_eq!(state(&result, "c"), NodeState::Skipped);
        assert_eq!(
            result.node("c").unwrap().reason,
            Some(StateReason::DependencyFailed { node: "b".into() })
        );
    }

    #[tokio::test]
    async fn test_continue_on_error_edge() {
        let runner = ScriptedRunner::new(vec![("scan", Script::failing())]);
        let mut scan = bound("scan");
        scan.required = false;
        let plan = plan_with(
            vec![scan, bound("report")],
            vec![EdgeSpec::new("scan", "report").with_policy(FailurePolicy::ContinueOnError)],
            TriggerEvent::manual(),
        );

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert_eq!(state(&result, "scan"), NodeState::Failed);
        assert_eq!(state(&result, "report"), NodeState::Succeeded);
        // The failed node is optional, so the run succeeds
        assert_eq!(result.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancellation_stops_pending_and_running_nodes() {
        let runner = ScriptedRunner::new(vec![
            ("a", Script::sleep(5_000)),
            ("b", Script::sleep(5_000)),
        ]);
        let plan = plan(&["a", "b", "c", "d"], &[("a", "c"), ("b", "d")]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = scheduler(&runner, 4).run(&plan, cancel).await;

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(result.status, RunStatus::Cancelled);
        for id in ["a", "b", "c", "d"] {
            assert_eq!(state(&result, id), NodeState::Cancelled, "node {}", id);
        }
        assert!(!runner.ran("c"));
        assert!(!runner.ran("d"));
        assert_eq!(result.exit_code(), crate::errors::EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let runner = ScriptedRunner::new(vec![]);
        let plan = plan(&["a", "b"], &[("a", "b")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = scheduler(&runner, 4).run(&plan, cancel).await;

        assert_eq!(result.count(NodeState::Cancelled), 2);
        assert!(runner.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fails_node_with_distinct_reason() {
        let runner = ScriptedRunner::new(vec![("slow", Script::sleep(5_000))]);
        let mut slow = bound("slow");
        slow.timeout = Some(Duration::from_millis(50));
        let plan = plan_with(vec![slow, bound("after")], vec![EdgeSpec::new("slow", "after")], TriggerEvent::manual());

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert_eq!(state(&result, "slow"), NodeState::Failed);
        assert!(matches!(
            result.node("slow").unwrap().reason,
            Some(StateReason::Failure(FailureReason::Timeout { ms: 50 }))
        ));
        assert_eq!(state(&result, "after"), NodeState::Skipped);
    }

    #[tokio::test]
    async fn test_runner_cancelling_itself_fails_the_run() {
        let give_up = Script {
            give_up: true,
            ..Default::default()
        };
        let runner = ScriptedRunner::new(vec![("a", give_up)]);
        let plan = plan(&["a", "b"], &[("a", "b")]);

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert_eq!(state(&result, "a"), NodeState::Cancelled);
        assert!(!runner.ran("b"));
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code(), crate::errors::EXIT_EXECUTION_FAILED);
    }

    #[tokio::test]
    async fn test_panicking_runner_fails_only_its_node() {
        let runner = ScriptedRunner::new(vec![(
            "boom",
            Script {
                panic: true,
                ..Default::default()
            },
        )]);
        let plan = plan(&["boom", "fine"], &[]);

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert!(matches!(
            result.node("boom").unwrap().reason,
            Some(StateReason::Failure(FailureReason::Crashed { .. }))
        ));
        assert_eq!(state(&result, "fine"), NodeState::Succeeded);
    }

    #[tokio::test]
    async fn test_outputs_flow_to_dependents() {
        let runner = ScriptedRunner::new(vec![(
            "build",
            Script {
                outputs: BTreeMap::from([("digest".to_string(), "sha256:feed".to_string())]),
                ..Default::default()
            },
        )]);

        let mut deploy = bound("deploy");
        deploy.inputs.insert(
            "image".into(),
            BoundValue::Deferred {
                template: "ghcr.io/acme/api@${{ needs.build.outputs.digest }}".into(),
                kind: InputType::String,
            },
        );
        let plan = plan_with(
            vec![bound("build"), deploy],
            vec![EdgeSpec::new("build", "deploy")],
            TriggerEvent::manual(),
        );

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert_eq!(result.node("build").unwrap().outputs["digest"], "sha256:feed");
        let inputs = runner.inputs.lock().unwrap();
        assert_eq!(inputs["deploy"]["image"], json!("ghcr.io/acme/api@sha256:feed"));
    }

    #[tokio::test]
    async fn test_unresolvable_deferred_input_fails_node() {
        let runner = ScriptedRunner::new(vec![(
            "build",
            Script {
                outputs: BTreeMap::from([("digest".to_string(), "not-a-number".to_string())]),
                ..Default::default()
            },
        )]);

        let mut deploy = bound("deploy");
        deploy.inputs.insert(
            "replicas".into(),
            BoundValue::Deferred {
                template: "${{ needs.build.outputs.digest }}".into(),
                kind: InputType::Number,
            },
        );
        let plan = plan_with(
            vec![bound("build"), deploy],
            vec![EdgeSpec::new("build", "deploy")],
            TriggerEvent::manual(),
        );

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert!(matches!(
            result.node("deploy").unwrap().reason,
            Some(StateReason::Failure(FailureReason::InputResolution { .. }))
        ));
        assert!(!runner.ran("deploy"));
    }

    #[tokio::test]
    async fn test_false_condition_skips_without_failing() {
        let runner = ScriptedRunner::new(vec![]);
        let mut release = bound("release");
        release.when = Some(Condition {
            events: vec![EventType::Tag],
            ..Default::default()
        });
        let plan = plan_with(
            vec![bound("lint"), release, bound("announce")],
            vec![EdgeSpec::new("release", "announce")],
            TriggerEvent::new(EventType::Push, "refs/heads/main"),
        );

        let result = scheduler(&runner, 4).run(&plan, CancellationToken::new()).await;

        assert_eq!(state(&result, "release"), NodeState::Skipped);
        assert_eq!(
            result.node("announce").unwrap().reason,
            Some(StateReason::UpstreamSkipped {
                node: "release".into()
            })
        );
        assert_eq!(state(&result, "lint"), NodeState::Succeeded);
        assert_eq!(result.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let runner = ScriptedRunner::new(vec![]);
        let plan = plan(&["a"], &[]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let runner: Arc<dyn NodeRunner> = runner;
        let scheduler = Scheduler::new(runner, SchedulerOptions::default()).with_events(tx);
        scheduler.run(&plan, CancellationToken::new()).await;

        assert!(matches!(rx.recv().await, Some(NodeEvent::Started { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(NodeEvent::Finished {
                state: NodeState::Succeeded,
                ..
            })
        ));
    }
}
