// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Run results
//!
//! The aggregate outcome of one invocation. Every node of the invocation is
//! listed with its terminal state and reason, including runs aborted before
//! scheduling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::node::{NodeState, StateReason};
use crate::errors::{ErrorKind, PipeforgeError, EXIT_CANCELLED, EXIT_EXECUTION_FAILED, EXIT_SUCCESS};
use crate::registry::ArtifactKind;

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a node's own work failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FailureReason {
    /// A step exited non-zero
    ExitCode { step: String, code: i32 },
    /// A step could not be started, or the runner panicked
    Crashed { message: String },
    /// The node exceeded its time budget
    Timeout { ms: u64 },
    /// Deferred inputs could not be resolved at dispatch
    InputResolution { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitCode { step, code } => write!(f, "step '{}' exited with code {}", step, code),
            Self::Crashed { message } => write!(f, "crashed: {}", message),
            Self::Timeout { ms } if ms % 1000 == 0 => write!(f, "timed out after {}s", ms / 1000),
            Self::Timeout { ms } => write!(f, "timed out after {}ms", ms),
            Self::InputResolution { message } => write!(f, "input resolution failed: {}", message),
        }
    }
}

/// A report file produced by a node, passed through unmodified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub node: String,
    pub name: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// Diagnostic output of one step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub step: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Tail of stdout, secrets masked
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,

    /// Tail of stderr, secrets masked
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,

    pub duration_ms: u64,
}

/// What a node runner reports back to the scheduler
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Succeeded {
        outputs: BTreeMap<String, String>,
        artifacts: Vec<Artifact>,
        logs: Vec<StepLog>,
    },
    Failed {
        reason: FailureReason,
        artifacts: Vec<Artifact>,
        logs: Vec<StepLog>,
    },
    Cancelled {
        logs: Vec<StepLog>,
    },
}

impl NodeOutcome {
    /// A failure with no diagnostics
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed {
            reason,
            artifacts: Vec::new(),
            logs: Vec::new(),
        }
    }
}

/// Terminal state of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: String,
    /// `name@version` of the definition the node ran
    pub uses: String,
    pub required: bool,
    pub state: NodeState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StateReason>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<StepLog>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl NodeReport {
    /// A node that never got to run
    pub fn not_started(id: &str, uses: &str, required: bool, message: &str) -> Self {
        Self {
            id: id.to_string(),
            uses: uses.to_string(),
            required,
            state: NodeState::Skipped,
            reason: Some(StateReason::NotStarted {
                message: message.to_string(),
            }),
            outputs: BTreeMap::new(),
            artifacts: Vec::new(),
            logs: Vec::new(),
            duration_ms: None,
        }
    }

    /// Whether this node makes the run fail
    ///
    /// A required node that ends cancelled without a cancel request did not
    /// succeed, so it fails the run.
    fn fails_run(&self, cancel_requested: bool) -> bool {
        if !self.required {
            return false;
        }
        match self.state {
            NodeState::Failed => true,
            NodeState::Cancelled => !cancel_requested,
            NodeState::Skipped => self
                .reason
                .as_ref()
                .map(StateReason::is_upstream_failure)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Error that aborted a run before scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    pub exit_code: i32,
}

impl From<&PipeforgeError> for RunError {
    fn from(e: &PipeforgeError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            exit_code: e.exit_code(),
        }
    }
}

/// Aggregate outcome of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub invocation: String,
    pub status: RunStatus,
    pub nodes: Vec<NodeReport>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,

    pub duration_ms: u64,
}

impl RunResult {
    /// Aggregate node reports
    ///
    /// Cancelled when cancellation was requested; failed when a required
    /// node failed, was cancelled on its own, or was skipped because
    /// something upstream failed. Nodes skipped by a false condition do not
    /// fail the run.
    pub fn from_nodes(
        invocation: impl Into<String>,
        nodes: Vec<NodeReport>,
        cancel_requested: bool,
        duration_ms: u64,
    ) -> Self {
        let status = if cancel_requested {
            RunStatus::Cancelled
        } else if nodes.iter().any(|n| n.fails_run(cancel_requested)) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let artifacts = nodes.iter().flat_map(|n| n.artifacts.iter().cloned()).collect();

        Self {
            invocation: invocation.into(),
            status,
            nodes,
            artifacts,
            error: None,
            duration_ms,
        }
    }

    /// Result for a run aborted before scheduling
    ///
    /// `nodes` lists `(id, uses, required)` for every node the invocation
    /// declares.
    pub fn aborted(
        invocation: impl Into<String>,
        nodes: &[(String, String, bool)],
        error: &PipeforgeError,
        duration_ms: u64,
    ) -> Self {
        let message = error.to_string();
        let nodes = nodes
            .iter()
            .map(|(id, uses, required)| NodeReport::not_started(id, uses, *required, &message))
            .collect();

        Self {
            invocation: invocation.into(),
            status: RunStatus::Failed,
            nodes,
            artifacts: Vec::new(),
            error: Some(RunError::from(error)),
            duration_ms,
        }
    }

    /// Process exit code for this result
    pub fn exit_code(&self) -> i32 {
        if let Some(error) = &self.error {
            return error.exit_code;
        }
        match self.status {
            RunStatus::Succeeded => EXIT_SUCCESS,
            RunStatus::Failed => EXIT_EXECUTION_FAILED,
            RunStatus::Cancelled => EXIT_CANCELLED,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Number of nodes in a given state
    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    pub fn to_json(&self) -> Result<String, PipeforgeError> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EXIT_CYCLE, EXIT_VALIDATION};

    fn report(id: &str, state: NodeState, reason: Option<StateReason>, required: bool) -> NodeReport {
        NodeReport {
            id: id.into(),
            uses: "go-lint@v1".into(),
            required,
            state,
            reason,
            outputs: BTreeMap::new(),
            artifacts: Vec::new(),
            logs: Vec::new(),
            duration_ms: None,
        }
    }

    #[test]
    fn test_all_succeeded() {
        let result = RunResult::from_nodes(
            "ci",
            vec![report("a", NodeState::Succeeded, None, true)],
            false,
            5,
        );
        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn test_failure_and_upstream_skip_fail_the_run() {
        let failed = RunResult::from_nodes(
            "ci",
            vec![
                report(
                    "a",
                    NodeState::Failed,
                    Some(StateReason::Failure(FailureReason::ExitCode {
                        step: "lint".into(),
                        code: 1,
                    })),
                    true,
                ),
                report(
                    "b",
                    NodeState::Skipped,
                    Some(StateReason::DependencyFailed { node: "a".into() }),
                    true,
                ),
            ],
            false,
            5,
        );
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.exit_code(), EXIT_EXECUTION_FAILED);
    }

    #[test]
    fn test_optional_failure_and_condition_skip_do_not_fail() {
        let result = RunResult::from_nodes(
            "ci",
            vec![
                report(
                    "notify",
                    NodeState::Failed,
                    Some(StateReason::Failure(FailureReason::Timeout { ms: 5_000 })),
                    false,
                ),
                report("scan", NodeState::Skipped, Some(StateReason::ConditionNotMet), true),
                report(
                    "publish",
                    NodeState::Skipped,
                    Some(StateReason::UpstreamSkipped { node: "scan".into() }),
                    true,
                ),
            ],
            false,
            5,
        );
        assert_eq!(result.status, RunStatus::Succeeded);
    }

    #[test]
    fn test_cancel_request_wins() {
        let result = RunResult::from_nodes(
            "ci",
            vec![report("a", NodeState::Succeeded, None, true)],
            true,
            5,
        );
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_unrequested_cancel_fails_the_run() {
        let nodes = vec![
            report("a", NodeState::Cancelled, Some(StateReason::CancelRequested), true),
            report(
                "b",
                NodeState::Cancelled,
                Some(StateReason::DependencyCancelled { node: "a".into() }),
                true,
            ),
        ];
        let result = RunResult::from_nodes("ci", nodes, false, 5);
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.exit_code(), EXIT_EXECUTION_FAILED);

        let optional = vec![report("a", NodeState::Cancelled, None, false)];
        let result = RunResult::from_nodes("ci", optional, false, 5);
        assert_eq!(result.status, RunStatus::Succeeded);
    }

    #[test]
    fn test_aborted_lists_every_node() {
        let err = PipeforgeError::CircularDependency {
            nodes: vec!["a".into(), "b".into()],
        };
        let nodes = vec![
            ("a".to_string(), "go-lint@v1".to_string(), true),
            ("b".to_string(), "go-lint@v1".to_string(), true),
        ];
        let result = RunResult::aborted("ci", &nodes, &err, 0);

        assert_eq!(result.nodes.len(), 2);
        assert!(result.nodes.iter().all(|n| n.state == NodeState::Skipped));
        assert_eq!(result.exit_code(), EXIT_CYCLE);

        let missing = PipeforgeError::MissingRequiredInput {
            node: "a".into(),
            input: "path".into(),
        };
        assert_eq!(RunResult::aborted("ci", &nodes, &missing, 0).exit_code(), EXIT_VALIDATION);
    }

    #[test]
    fn test_json_report_shape() {
        let result = RunResult::from_nodes(
            "ci",
            vec![report(
                "a",
                NodeState::Skipped,
                Some(StateReason::DependencyFailed { node: "b".into() }),
                true,
            )],
            false,
            5,
        );
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["nodes"][0]["state"], "skipped");
        assert_eq!(json["nodes"][0]["reason"]["kind"], "dependency_failed");
        assert_eq!(json["nodes"][0]["reason"]["detail"]["node"], "b");
    }
}
