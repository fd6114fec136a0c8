// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Workflow runner
//!
//! Executes a node by running its definition's steps in order through a
//! [`ToolExecutor`], then renders the definition's declared outputs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{parse_outputs, tail, ToolExecutor, ToolInvocation};
use crate::pipeline::expr::{self, ExprRef};
use crate::pipeline::{
    mask, Artifact, FailureReason, NodeOutcome, NodeRunner, NodeWork, SecretValue, StepLog,
};
use crate::registry::Step;

/// Lines of stdout/stderr kept per step
const DEFAULT_LOG_LINES: usize = 40;

/// Runs workflow definitions step by step
pub struct WorkflowRunner {
    executor: Arc<dyn ToolExecutor>,
    base_dir: PathBuf,
    mask_secrets: bool,
    log_lines: usize,
}

impl WorkflowRunner {
    /// Create a runner executing steps relative to `base_dir`
    pub fn new(executor: Arc<dyn ToolExecutor>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            base_dir: base_dir.into(),
            mask_secrets: true,
            log_lines: DEFAULT_LOG_LINES,
        }
    }

    /// Toggle masking of secret values in captured output
    pub fn mask_secrets(mut self, enabled: bool) -> Self {
        self.mask_secrets = enabled;
        self
    }

    fn scrub(&self, text: &str, secrets: &BTreeMap<String, SecretValue>) -> String {
        if self.mask_secrets {
            mask(text, secrets.values())
        } else {
            text.to_string()
        }
    }
}

/// Values visible to a definition's expressions while it runs
struct Scope<'a> {
    work: &'a NodeWork,
    steps: HashMap<String, BTreeMap<String, String>>,
}

impl Scope<'_> {
    fn lookup(&self, reference: &ExprRef) -> Option<String> {
        match reference {
            ExprRef::Input(name) => self.work.inputs.get(name).map(expr::value_to_text),
            ExprRef::Secret(name) => self
                .work
                .node
                .secrets
                .get(name)
                .map(|s| s.expose().to_string()),
            ExprRef::StepOutput { step, output } => {
                self.steps.get(step).and_then(|o| o.get(output)).cloned()
            }
            ExprRef::NeedsOutput { .. } | ExprRef::Trigger(_) => None,
        }
    }

    fn render(&self, text: &str) -> Result<String, String> {
        expr::render(text, |r| self.lookup(r))
    }

    fn invocation(&self, step: &Step, base_dir: &Path) -> Result<ToolInvocation, String> {
        let args = step
            .args
            .iter()
            .map(|a| self.render(a))
            .collect::<Result<Vec<_>, _>>()?;

        let env = step
            .env
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.render(v)?)))
            .collect::<Result<BTreeMap<_, _>, String>>()?;

        let working_dir = match &step.working_dir {
            Some(dir) => base_dir.join(self.render(dir)?),
            None => base_dir.to_path_buf(),
        };

        Ok(ToolInvocation {
            command: self.render(&step.run)?,
            args,
            env,
            working_dir,
            artifacts: step.artifacts.clone(),
        })
    }
}

#[async_trait]
impl NodeRunner for WorkflowRunner {
    async fn run(&self, work: NodeWork, cancel: CancellationToken) -> NodeOutcome {
        let node = Arc::clone(&work.node);
        let definition = &node.definition;
        let mut scope = Scope {
            work: &work,
            steps: HashMap::new(),
        };
        let mut logs: Vec<StepLog> = Vec::new();
        let mut artifacts: Vec<Artifact> = Vec::new();

        for step in &definition.steps {
            if cancel.is_cancelled() {
                return NodeOutcome::Cancelled { logs };
            }

            let label = step.label().to_string();
            let invocation = match scope.invocation(step, &self.base_dir) {
                Ok(invocation) => invocation,
                Err(message) => {
                    return NodeOutcome::Failed {
                        reason: FailureReason::InputResolution { message },
                        artifacts,
                        logs,
                    }
                }
            };

            debug!(node = %node.id, step = %label, "running step");
            let output = match self.executor.invoke(&invocation, cancel.clone()).await {
                Ok(output) => output,
                Err(e) => {
                    return NodeOutcome::Failed {
                        reason: FailureReason::Crashed {
                            message: e.to_string(),
                        },
                        artifacts,
                        logs,
                    }
                }
            };

            logs.push(StepLog {
                step: label.clone(),
                exit_code: output.exit_code,
                stdout: self.scrub(&tail(&output.stdout, self.log_lines), &node.secrets),
                stderr: self.scrub(&tail(&output.stderr, self.log_lines), &node.secrets),
                duration_ms: output.duration.as_millis() as u64,
            });
            artifacts.extend(output.artifacts.iter().map(|a| Artifact {
                node: node.id.clone(),
                name: a.name.clone(),
                kind: a.kind,
                path: a.path.clone(),
            }));

            if output.cancelled {
                return NodeOutcome::Cancelled { logs };
            }

            if let Some(id) = &step.id {
                scope.steps.insert(id.clone(), parse_outputs(&output.stdout));
            }

            if !output.success() {
                let code = output.exit_code.unwrap_or(-1);
                if step.continue_on_error {
                    warn!(node = %node.id, step = %label, code, "step failed, continuing");
                    continue;
                }
                return NodeOutcome::Failed {
                    reason: FailureReason::ExitCode { step: label, code },
                    artifacts,
                    logs,
                };
            }
        }

        let mut outputs = BTreeMap::new();
        for (name, spec) in definition.outputs.iter() {
            match scope.render(&spec.value) {
                Ok(value) => {
                    outputs.insert(name.to_string(), self.scrub(&value, &node.secrets));
                }
                Err(message) => {
                    return NodeOutcome::Failed {
                        reason: FailureReason::InputResolution { message },
                        artifacts,
                        logs,
                    }
                }
            }
        }

        NodeOutcome::Succeeded {
            outputs,
            artifacts,
            logs,
        }
    }
}
