// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Invocation validation
//!
//! Checks an invocation against the registry without running anything.
//! Unlike planning, which stops at the first problem, validation reports
//! every error it can find.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::binding::{upstream_definitions, InputResolver};
use super::dag::DagBuilder;
use super::expr;
use super::invocation::{FailurePolicy, PipelineInvocation};
use super::secrets::SecretStore;
use super::trigger::TriggerEvent;
use crate::errors::{ErrorKind, PipeforgeError, RecoverySuggestion, EXIT_CYCLE, EXIT_SUCCESS, EXIT_VALIDATION};
use crate::registry::{Registry, WorkflowDefinition};

/// Invocation validator
pub struct PipelineValidator<'a> {
    registry: &'a Registry,
    trigger: &'a TriggerEvent,
    secrets: Option<&'a SecretStore>,
    check_tools: bool,
}

impl<'a> PipelineValidator<'a> {
    pub fn new(registry: &'a Registry, trigger: &'a TriggerEvent) -> Self {
        Self {
            registry,
            trigger,
            secrets: None,
            check_tools: true,
        }
    }

    /// Check required secrets against `secrets`
    ///
    /// Without a store, missing secrets are reported as warnings since the
    /// values are only supplied at run time.
    pub fn with_secrets(mut self, secrets: &'a SecretStore) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Warn about step commands missing from `PATH`
    pub fn check_tools(mut self, enabled: bool) -> Self {
        self.check_tools = enabled;
        self
    }

    /// Validate an invocation
    pub fn validate(&self, invocation: &PipelineInvocation) -> ValidationResult {
        let mut result = ValidationResult::new();

        if invocation.nodes.is_empty() {
            result.add_error(PipeforgeError::InvalidInvocation {
                reason: "invocation has no nodes".into(),
                help: Some("Add at least one entry under 'nodes'".into()),
            });
            return result;
        }

        let mut seen = HashSet::new();
        for node in &invocation.nodes {
            if !seen.insert(node.id.as_str()) {
                result.add_error(PipeforgeError::DuplicateNode {
                    node: node.id.clone(),
                });
            }
        }

        let mut resolved: HashMap<String, Arc<WorkflowDefinition>> = HashMap::new();
        for node in &invocation.nodes {
            match self.registry.resolve_ref(&node.uses) {
                Ok(definition) => {
                    resolved.entry(node.id.clone()).or_insert(definition);
                }
                Err(e) => result.add_error(e),
            }
        }

        let empty = SecretStore::new();
        let resolver = InputResolver::new(self.trigger, self.secrets.unwrap_or(&empty))
            .with_grants(invocation.permissions.as_ref());

        for node in &invocation.nodes {
            let Some(definition) = resolved.get(&node.id) else {
                continue;
            };

            let upstream = upstream_definitions(node, &resolved);
            match resolver.bind(node, Arc::clone(definition), &upstream) {
                Ok(_) => {}
                Err(PipeforgeError::MissingRequiredSecret { node, secret }) if self.secrets.is_none() => {
                    result.add_warning(format!(
                        "Node '{}': secret '{}' is required and must be supplied at run time",
                        node, secret
                    ));
                }
                Err(e) => result.add_error(e),
            }

            if self.check_tools {
                self.check_commands(&node.id, definition, &mut result);
            }
        }

        let ids = invocation.node_ids();
        let mut unique = HashSet::new();
        let ids: Vec<&String> = ids.iter().filter(|id| unique.insert(id.as_str())).collect();
        let ids: Vec<&str> = ids.into_iter().map(String::as_str).collect();
        if let Err(e) = DagBuilder::build(&ids, &invocation.edges()) {
            result.add_error(e);
        }

        self.check_optional_dependencies(invocation, &mut result);

        result
    }

    /// Warn about step commands that are not installed
    fn check_commands(&self, node: &str, definition: &WorkflowDefinition, result: &mut ValidationResult) {
        for step in &definition.steps {
            if expr::has_expressions(&step.run) {
                continue;
            }
            let Some(program) = step.run.split_whitespace().next() else {
                continue;
            };

            if which::which(program).is_err() {
                let suggestion = RecoverySuggestion::install_tool(program);
                result.add_warning(format!(
                    "Node '{}': step '{}' runs '{}', which is not on PATH ({})",
                    node,
                    step.label(),
                    program,
                    suggestion.action
                ));
            }
        }
    }

    /// Optional nodes still fail the run through blocking required dependents
    fn check_optional_dependencies(&self, invocation: &PipelineInvocation, result: &mut ValidationResult) {
        for edge in invocation.edges() {
            if edge.policy != FailurePolicy::Block {
                continue;
            }
            let (Some(producer), Some(consumer)) = (invocation.node(&edge.from), invocation.node(&edge.to)) else {
                continue;
            };
            if !producer.required && consumer.required {
                result.add_warning(format!(
                    "Node '{}' is optional, but required node '{}' blocks on it; \
                     use policy 'continue-on-error' to let '{}' run when '{}' fails",
                    edge.from, edge.to, edge.to, edge.from
                ));
            }
        }
    }
}

/// Result of invocation validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<PipeforgeError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: PipeforgeError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Process exit code: cycles take precedence over other errors
    pub fn exit_code(&self) -> i32 {
        if self.errors.iter().any(|e| e.kind() == ErrorKind::Graph) {
            EXIT_CYCLE
        } else if self.errors.is_empty() {
            EXIT_SUCCESS
        } else {
            EXIT_VALIDATION
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                WorkflowDefinition::from_yaml(
                    r#"
name: docker-build
version: v1
inputs:
  image_name: { type: string, required: true }
secrets:
  registry_token: { required: true }
outputs:
  digest: { value: "${{ steps.build.outputs.digest }}" }
steps:
  - id: build
    run: definitely-not-installed-tool
"#,
                )
                .unwrap(),
            )
            .unwrap();
        registry
            .register(
                WorkflowDefinition::from_yaml(
                    "name: go-lint\nversion: v1\ninputs:\n  path: { type: string, default: ./... }\nsteps:\n  - run: sh\n",
                )
                .unwrap(),
            )
            .unwrap();
        registry
    }

    fn validate(yaml: &str) -> ValidationResult {
        let registry = registry();
        let trigger = TriggerEvent::manual();
        let invocation = PipelineInvocation::from_yaml(yaml).unwrap();
        PipelineValidator::new(&registry, &trigger)
            .check_tools(false)
            .validate(&invocation)
    }

    #[test]
    fn test_valid_invocation() {
        let result = validate(
            "name: ci\nnodes:\n  - id: lint\n    uses: go-lint@v1\n  - id: lint2\n    uses: go-lint@latest\n    needs: [lint]\n",
        );
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn test_collects_every_error() {
        let result = validate(
            r#"
name: ci
nodes:
  - id: build
    uses: docker-build@v1
    with:
      image_name: api
  - id: lint
    uses: go-lint@v9
  - id: lint
    uses: go-lint@v1
    with:
      path: 3
"#,
        );

        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| matches!(e, PipeforgeError::TypeMismatch { .. })));
        assert!(result.errors.iter().any(|e| matches!(e, PipeforgeError::DefinitionNotFound { .. })));
        assert!(result.errors.iter().any(|e| matches!(e, PipeforgeError::DuplicateNode { .. })));
        // Missing secrets are only warnings when none were supplied
        assert!(result.warnings.iter().any(|w| w.contains("registry_token")));
        assert_eq!(result.exit_code(), EXIT_VALIDATION);
    }

    #[test]
    fn test_cycle_sets_exit_code() {
        let result = validate(
            "name: ci\nnodes:\n  - id: a\n    uses: go-lint@v1\n    needs: [b]\n  - id: b\n    uses: go-lint@v1\n    needs: [a]\n",
        );
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, PipeforgeError::CircularDependency { .. })));
        assert_eq!(result.exit_code(), EXIT_CYCLE);
    }

    #[test]
    fn test_supplied_secrets_are_enforced() {
        let registry = registry();
        let trigger = TriggerEvent::manual();
        let secrets = SecretStore::new();
        let invocation = PipelineInvocation::from_yaml(
            "name: ci\nnodes:\n  - id: build\n    uses: docker-build@v1\n    with:\n      image_name: api\n",
        )
        .unwrap();

        let result = PipelineValidator::new(&registry, &trigger)
            .with_secrets(&secrets)
            .check_tools(false)
            .validate(&invocation);
        assert!(matches!(
            result.errors.as_slice(),
            [PipeforgeError::MissingRequiredSecret { .. }]
        ));
    }

    #[test]
    fn test_missing_tool_is_a_warning() {
        let registry = registry();
        let trigger = TriggerEvent::manual();
        let invocation = PipelineInvocation::from_yaml(
            "name: ci\nnodes:\n  - id: build\n    uses: docker-build@v1\n    with:\n      image_name: api\n",
        )
        .unwrap();

        let result = PipelineValidator::new(&registry, &trigger).validate(&invocation);
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("definitely-not-installed-tool")));
    }

    #[test]
    fn test_optional_blocking_dependency_warns() {
        let result = validate(
            "name: ci\nnodes:\n  - id: a\n    uses: go-lint@v1\n    required: false\n  - id: b\n    uses: go-lint@v1\n    needs: [a]\n",
        );
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("optional")));
    }

    #[test]
    fn test_empty_invocation() {
        let result = validate("name: ci\nnodes: []\n");
        assert!(!result.is_valid());
    }
}
