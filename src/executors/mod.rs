// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Tool executors
//!
//! This module provides the executor trait that runs opaque tool commands,
//! the process-backed implementation and the runner that turns a node's
//! definition into a sequence of tool invocations.

mod process;
mod runner;

pub use process::ProcessExecutor;
pub use runner::WorkflowRunner;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::PipeforgeResult;
use crate::registry::{ArtifactKind, ArtifactSpec};

/// Prefix a step prints on stdout to publish an output
pub const SET_OUTPUT_PREFIX: &str = "::set-output name=";

/// A single external tool invocation
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Program, or a shell script when `args` is empty
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    /// Report files to collect after the run
    pub artifacts: Vec<ArtifactSpec>,
}

/// Result of a tool invocation
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code; `None` if the process was killed or cancelled
    pub exit_code: Option<i32>,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Report files found after the run
    pub artifacts: Vec<CollectedArtifact>,

    /// Execution duration
    pub duration: Duration,

    /// The invocation was stopped by cancellation
    pub cancelled: bool,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.cancelled
    }
}

/// A report file matched by an artifact pattern
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedArtifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// Trait for tool executors
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run one tool invocation
    ///
    /// A non-zero exit is reported in the output, not as an error. Errors
    /// mean the tool could not be started at all.
    async fn invoke(&self, invocation: &ToolInvocation, cancel: CancellationToken)
        -> PipeforgeResult<ToolOutput>;

    /// Check if a program is available
    fn check_available(&self, program: &str) -> bool;
}

/// Resolve artifact glob patterns relative to `base_dir`
///
/// Patterns that match nothing are skipped; a step that failed early may
/// not have written its report.
pub fn resolve_artifacts(specs: &[ArtifactSpec], base_dir: &Path) -> PipeforgeResult<Vec<CollectedArtifact>> {
    let mut collected = Vec::new();

    for spec in specs {
        let full_pattern = if Path::new(&spec.path).is_absolute() {
            spec.path.clone()
        } else {
            base_dir.join(&spec.path).to_string_lossy().to_string()
        };

        let mut matches: Vec<PathBuf> = glob::glob(&full_pattern)?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        matches.sort();

        collected.extend(matches.into_iter().map(|path| CollectedArtifact {
            name: spec.name.clone(),
            kind: spec.kind,
            path,
        }));
    }

    Ok(collected)
}

/// Collect `::set-output name=<key>::<value>` lines from stdout
///
/// Later lines override earlier ones for the same key.
pub fn parse_outputs(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix(SET_OUTPUT_PREFIX))
        .filter_map(|rest| rest.split_once("::"))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Last `max_lines` lines of `text`
pub fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outputs() {
        let stdout = "building...\n::set-output name=digest::sha256:abc\n::set-output name=tags::a::b\n::set-output name=digest::sha256:def\r\nnoise ::set-output name=x::y\n";
        let outputs = parse_outputs(stdout);

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["digest"], "sha256:def");
        // Only the first separator splits
        assert_eq!(outputs["tags"], "a::b");
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }

    #[test]
    fn test_resolve_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("reports")).unwrap();
        std::fs::write(dir.path().join("reports/trivy.sarif"), "{}").unwrap();
        std::fs::write(dir.path().join("reports/hadolint.sarif"), "{}").unwrap();

        let specs = vec![
            ArtifactSpec {
                name: "scan".into(),
                path: "reports/*.sarif".into(),
                kind: ArtifactKind::Sarif,
            },
            ArtifactSpec {
                name: "sbom".into(),
                path: "sbom.json".into(),
                kind: ArtifactKind::Sbom,
            },
        ];

        let found = resolve_artifacts(&specs, dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].path.ends_with("reports/hadolint.sarif"));
        assert!(found.iter().all(|a| a.kind == ArtifactKind::Sarif));
    }
}
