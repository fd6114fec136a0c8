// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Per-node execution state
//!
//! Each node's mutable record sits behind its own mutex, and every state
//! change is a compare-and-set against the allowed transition table, so a
//! node can never be completed twice.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use super::result::{Artifact, FailureReason, NodeOutcome, NodeReport, StepLog};

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a node ended up in its terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum StateReason {
    /// The node's own work failed
    Failure(FailureReason),
    /// A blocking dependency failed, or was skipped because of a failure
    DependencyFailed { node: String },
    /// A blocking dependency was cancelled
    DependencyCancelled { node: String },
    /// The node's `when` condition was false
    ConditionNotMet,
    /// A blocking dependency was skipped by its condition
    UpstreamSkipped { node: String },
    /// Cancellation was requested before or while the node ran
    CancelRequested,
    /// The run was aborted before scheduling
    NotStarted { message: String },
}

impl StateReason {
    /// Whether this skip stems from a failure or cancellation upstream
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::DependencyFailed { .. } | Self::DependencyCancelled { .. } | Self::NotStarted { .. }
        )
    }
}

impl fmt::Display for StateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure(reason) => write!(f, "{}", reason),
            Self::DependencyFailed { node } => write!(f, "dependency '{}' failed", node),
            Self::DependencyCancelled { node } => write!(f, "dependency '{}' was cancelled", node),
            Self::ConditionNotMet => write!(f, "condition not met"),
            Self::UpstreamSkipped { node } => write!(f, "dependency '{}' was skipped", node),
            Self::CancelRequested => write!(f, "cancelled"),
            Self::NotStarted { message } => write!(f, "not started: {}", message),
        }
    }
}

/// Mutable part of a node
#[derive(Debug)]
struct NodeRecord {
    state: NodeState,
    reason: Option<StateReason>,
    outputs: BTreeMap<String, String>,
    artifacts: Vec<Artifact>,
    logs: Vec<StepLog>,
    started_at: Option<Instant>,
    duration: Option<Duration>,
}

/// A node of one run
#[derive(Debug)]
pub struct ExecutionNode {
    id: String,
    record: Mutex<NodeRecord>,
}

impl ExecutionNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record: Mutex::new(NodeRecord {
                state: NodeState::Pending,
                reason: None,
                outputs: BTreeMap::new(),
                artifacts: Vec::new(),
                logs: Vec::new(),
                started_at: None,
                duration: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, NodeRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> NodeState {
        self.lock().state
    }

    pub fn reason(&self) -> Option<StateReason> {
        self.lock().reason.clone()
    }

    /// Outputs published by the node (empty unless it succeeded)
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.lock().outputs.clone()
    }

    /// Move from `from` to `to`; returns `false` if the node was not in
    /// `from` or the transition is not allowed
    pub fn transition(&self, from: NodeState, to: NodeState) -> bool {
        self.transition_with(from, to, None)
    }

    fn transition_with(&self, from: NodeState, to: NodeState, reason: Option<StateReason>) -> bool {
        let mut record = self.lock();
        if record.state != from || !from.can_transition_to(to) {
            return false;
        }

        debug!(node = %self.id, from = %from, to = %to, "node transition");
        record.state = to;
        if reason.is_some() {
            record.reason = reason;
        }

        match to {
            NodeState::Running => record.started_at = Some(Instant::now()),
            _ if to.is_terminal() => {
                record.duration = record.started_at.map(|t| t.elapsed());
            }
            _ => {}
        }
        true
    }

    /// Mark a pending node skipped
    pub fn skip(&self, reason: StateReason) -> bool {
        self.transition_with(NodeState::Pending, NodeState::Skipped, Some(reason))
    }

    /// Cancel a node that has not started
    pub fn cancel_waiting(&self, reason: StateReason) -> bool {
        let state = self.state();
        matches!(state, NodeState::Pending | NodeState::Ready)
            && self.transition_with(state, NodeState::Cancelled, Some(reason))
    }

    /// Fail a running node before its work ran
    pub fn fail(&self, reason: FailureReason) -> bool {
        self.transition_with(
            NodeState::Running,
            NodeState::Failed,
            Some(StateReason::Failure(reason)),
        )
    }

    /// Record the outcome of a running node
    ///
    /// Returns the resulting state, or `None` if the node was not running.
    pub fn complete(&self, outcome: NodeOutcome) -> Option<NodeState> {
        let mut record = self.lock();
        if record.state != NodeState::Running {
            return None;
        }

        let (state, reason) = match outcome {
            NodeOutcome::Succeeded {
                outputs,
                artifacts,
                logs,
            } => {
                record.outputs = outputs;
                record.artifacts = artifacts;
                record.logs = logs;
                (NodeState::Succeeded, None)
            }
            NodeOutcome::Failed {
                reason,
                artifacts,
                logs,
            } => {
                record.artifacts = artifacts;
                record.logs = logs;
                (NodeState::Failed, Some(StateReason::Failure(reason)))
            }
            NodeOutcome::Cancelled { logs } => {
                record.logs = logs;
                (NodeState::Cancelled, Some(StateReason::CancelRequested))
            }
        };

        debug!(node = %self.id, to = %state, "node completed");
        record.state = state;
        record.reason = reason;
        record.duration = record.started_at.map(|t| t.elapsed());
        Some(state)
    }

    /// Snapshot for the run result
    pub fn report(&self, uses: &str, required: bool) -> NodeReport {
        let record = self.lock();
        NodeReport {
            id: self.id.clone(),
            uses: uses.to_string(),
            required,
            state: record.state,
            reason: record.reason.clone(),
            outputs: record.outputs.clone(),
            artifacts: record.artifacts.clone(),
            logs: record.logs.clone(),
            duration_ms: record.duration.map(|d| d.as_millis() as u64),
        }
    }
}
