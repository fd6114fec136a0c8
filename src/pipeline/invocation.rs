// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Pipeline invocation structures
//!
//! Defines the schema for invocation files: which definitions to run, with
//! which inputs and secrets, and in what dependency order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use super::trigger::{EventType, TriggerEvent};
use crate::errors::PipeforgeError;
use crate::registry::{Access, DefinitionRef};

/// One concrete request to run definitions together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineInvocation {
    /// Invocation name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Scopes the caller grants; when absent every requested scope is granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeMap<String, Access>>,

    /// Upper bound on concurrently running nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Nodes, in declaration order
    pub nodes: Vec<NodeSpec>,
}

impl PipelineInvocation {
    /// Load an invocation from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, PipeforgeError> {
        if !path.exists() {
            return Err(PipeforgeError::InvocationNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| PipeforgeError::read_error(path, e))?;

        Self::from_yaml(&content)
    }

    /// Parse an invocation from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, PipeforgeError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize the invocation to YAML
    pub fn to_yaml(&self) -> Result<String, PipeforgeError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a node by id
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Node ids in declaration order
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// All dependency edges, producer first
    pub fn edges(&self) -> Vec<EdgeSpec> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.needs.iter().map(move |need| EdgeSpec {
                    from: need.node().to_string(),
                    to: node.id.clone(),
                    policy: need.policy(),
                })
            })
            .collect()
    }

    /// Override an input value, as given by `--set node.input=value`
    pub fn set_input(&mut self, assignment: &str) -> Result<(), PipeforgeError> {
        let invalid = |reason: String| PipeforgeError::InvalidInvocation {
            reason,
            help: Some("Use --set <node>.<input>=<value>".into()),
        };

        let (target, value) = assignment
            .split_once('=')
            .ok_or_else(|| invalid(format!("'{}' is missing '='", assignment)))?;
        let (node_id, input) = target
            .split_once('.')
            .ok_or_else(|| invalid(format!("'{}' is not of the form node.input", target)))?;

        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| invalid(format!("no node named '{}'", node_id)))?;

        node.with
            .insert(input.to_string(), Value::String(value.to_string()));
        Ok(())
    }
}

/// One node of an invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    /// Node id (unique within the invocation)
    pub id: String,

    /// Definition to run, as `name@version`
    pub uses: DefinitionRef,

    /// Input values; strings may contain `${{ trigger.* }}` and
    /// `${{ needs.<node>.outputs.<name> }}` expressions
    #[serde(default)]
    pub with: BTreeMap<String, Value>,

    /// How caller secrets map onto the definition's secrets
    #[serde(default)]
    pub secrets: SecretMapping,

    /// Nodes this node depends on
    #[serde(default)]
    pub needs: Vec<Need>,

    /// Whether this node counts toward the aggregate status
    #[serde(default = "default_true")]
    pub required: bool,

    /// Run only when the trigger matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,

    /// Execution budget, overriding the definition's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// A dependency entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Need {
    /// Bare node id, default policy
    Node(String),

    /// Node id with an explicit failure policy
    Detailed(NeedSpec),
}

impl Need {
    pub fn node(&self) -> &str {
        match self {
            Self::Node(node) => node,
            Self::Detailed(spec) => &spec.node,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        match self {
            Self::Node(_) => FailurePolicy::default(),
            Self::Detailed(spec) => spec.policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NeedSpec {
    pub node: String,

    #[serde(default)]
    pub policy: FailurePolicy,
}

/// What a consumer does when its producer does not succeed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Producer failure skips the consumer
    #[default]
    Block,
    /// Consumer runs once the producer is terminal, whatever the outcome
    ContinueOnError,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::ContinueOnError => write!(f, "continue-on-error"),
        }
    }
}

/// A dependency edge: `to` depends on `from`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
    pub policy: FailurePolicy,
}

impl EdgeSpec {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            policy: FailurePolicy::Block,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Mapping of caller secrets onto a definition's declared secrets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SecretMappingRepr", into = "SecretMappingRepr")]
pub enum SecretMapping {
    /// Pass every caller secret whose name matches a declared secret
    Inherit,
    /// Declared secret name → caller secret name
    Explicit(BTreeMap<String, String>),
}

impl Default for SecretMapping {
    fn default() -> Self {
        Self::Explicit(BTreeMap::new())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SecretMappingRepr {
    Keyword(String),
    Map(BTreeMap<String, String>),
}

impl TryFrom<SecretMappingRepr> for SecretMapping {
    type Error = String;

    fn try_from(repr: SecretMappingRepr) -> Result<Self, Self::Error> {
        match repr {
            SecretMappingRepr::Keyword(k) if k == "inherit" => Ok(Self::Inherit),
            SecretMappingRepr::Keyword(k) => {
                Err(format!("expected 'inherit' or a mapping, got '{}'", k))
            }
            SecretMappingRepr::Map(map) => Ok(Self::Explicit(map)),
        }
    }
}

impl From<SecretMapping> for SecretMappingRepr {
    fn from(mapping: SecretMapping) -> Self {
        match mapping {
            SecretMapping::Inherit => Self::Keyword("inherit".into()),
            SecretMapping::Explicit(map) => Self::Map(map),
        }
    }
}

/// Trigger-based run condition
///
/// Every non-empty list must match. Patterns use glob syntax.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// Event types that allow the node to run
    #[serde(default)]
    pub events: Vec<EventType>,

    /// Ref patterns, e.g. `refs/tags/v*`
    #[serde(default)]
    pub refs: Vec<String>,

    /// Changed-file patterns, e.g. `**/Dockerfile`
    #[serde(default)]
    pub changed: Vec<String>,
}

impl Condition {
    /// Check every pattern compiles
    pub fn validate(&self) -> Result<(), String> {
        for pattern in self.refs.iter().chain(&self.changed) {
            glob::Pattern::new(pattern)
                .map_err(|e| format!("invalid pattern '{}' in 'when': {}", pattern, e))?;
        }
        Ok(())
    }

    /// Evaluate against a trigger
    ///
    /// When the trigger carries no changed-file list, `changed` is treated
    /// as satisfied.
    pub fn matches(&self, trigger: &TriggerEvent) -> bool {
        if !self.events.is_empty() && !self.events.contains(&trigger.event) {
            return false;
        }

        if !self.refs.is_empty() && !any_match(&self.refs, std::iter::once(trigger.git_ref.as_str())) {
            return false;
        }

        if !self.changed.is_empty() {
            if let Some(files) = trigger.changed_files() {
                if !any_match(&self.changed, files.into_iter()) {
                    return false;
                }
            }
        }

        true
    }
}

fn any_match<'a>(patterns: &[String], mut candidates: impl Iterator<Item = &'a str>) -> bool {
    let compiled: Vec<glob::Pattern> = patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();

    candidates.any(|candidate| compiled.iter().any(|p| p.matches(candidate)))
}
