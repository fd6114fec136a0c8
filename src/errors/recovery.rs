// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Error recovery suggestions
//!
//! Provides actionable next steps for configuration errors.

use super::PipeforgeError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Pick a suggestion for an error, if one is useful
    pub fn for_error(error: &PipeforgeError) -> Option<Self> {
        match error {
            PipeforgeError::CircularDependency { nodes } => {
                Some(Self::fix_circular_dependency(nodes))
            }
            PipeforgeError::InvocationNotFound { .. } => Some(Self::create_invocation()),
            PipeforgeError::ToolNotFound { tool, .. } => Some(Self::install_tool(tool)),
            PipeforgeError::DefinitionNotFound { name, version } => {
                Some(Self::register_definition(name, version))
            }
            PipeforgeError::MissingRequiredSecret { secret, .. } => {
                Some(Self::supply_secret(secret))
            }
            _ => None,
        }
    }

    /// Suggest installing a missing tool
    pub fn install_tool(tool: &str) -> Self {
        let (action, url) = match tool {
            "hadolint" => (
                "Install Hadolint",
                "https://github.com/hadolint/hadolint#install",
            ),
            "trivy" => (
                "Install Trivy",
                "https://aquasecurity.github.io/trivy/latest/getting-started/installation/",
            ),
            "golangci-lint" => (
                "Install golangci-lint",
                "https://golangci-lint.run/welcome/install/",
            ),
            "kubeconform" => (
                "Install kubeconform",
                "https://github.com/yannh/kubeconform#installation",
            ),
            "docker" => ("Install Docker", "https://docs.docker.com/engine/install/"),
            _ => {
                return Self {
                    action: format!("Install {} and ensure it's in your PATH", tool),
                    steps: vec![format!("A step runs '{}' but it was not found", tool)],
                    commands: vec![],
                }
            }
        };

        Self {
            action: format!("{} ({})", action, url),
            steps: vec![format!("A step runs '{}' but it was not found in PATH", tool)],
            commands: vec![format!("# See {}", url)],
        }
    }

    /// Suggest fixing a circular dependency
    pub fn fix_circular_dependency(nodes: &[String]) -> Self {
        Self {
            action: "Remove circular dependency".into(),
            steps: vec![
                format!("Nodes on the cycle: {}", nodes.join(" → ")),
                "Review the 'needs' entries of these nodes".into(),
                "Ensure the nodes form a directed acyclic graph (DAG)".into(),
            ],
            commands: vec![
                "# Visualize the pipeline:".into(),
                "pipeforge graph --format mermaid".into(),
            ],
        }
    }

    /// Suggest creating an invocation file
    pub fn create_invocation() -> Self {
        Self {
            action: "Create an invocation file".into(),
            steps: vec![
                "No pipeline.yaml found in the current directory".into(),
                "Scaffold example definitions and an invocation, or pass a path".into(),
            ],
            commands: vec!["pipeforge init".into()],
        }
    }

    /// Suggest registering a missing definition
    pub fn register_definition(name: &str, version: &str) -> Self {
        Self {
            action: format!("Publish '{}@{}'", name, version),
            steps: vec![
                "Definitions are loaded from the definitions directory".into(),
                format!(
                    "Add a YAML file with 'name: {}' and 'version: {}' or reference an existing version",
                    name, version
                ),
            ],
            commands: vec!["pipeforge definitions list".into()],
        }
    }

    /// Suggest supplying a secret
    pub fn supply_secret(secret: &str) -> Self {
        Self {
            action: format!("Provide secret '{}'", secret),
            steps: vec![
                "Secrets are passed per invocation and never read from files".into(),
                "Map the caller secret in the node's 'secrets' block or use 'secrets: inherit'".into(),
            ],
            commands: vec![format!(
                "pipeforge run --secret-env {}",
                secret.to_uppercase()
            )],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_suggestion_lists_nodes() {
        let err = PipeforgeError::CircularDependency {
            nodes: vec!["a".into(), "b".into()],
        };
        let suggestion = RecoverySuggestion::for_error(&err).unwrap();
        assert!(suggestion.to_string().contains("a → b"));
    }

    #[test]
    fn test_unknown_tool_falls_back_to_path_hint() {
        let suggestion = RecoverySuggestion::install_tool("frobnicate");
        assert!(suggestion.action.contains("PATH"));
    }
}
