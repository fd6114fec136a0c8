// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Workflow definition structures
//!
//! Defines the schema for versioned workflow definition files. Unknown keys
//! are rejected at parse time.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

use crate::errors::PipeforgeError;
use crate::pipeline::expr::{self, ExprRef};

/// A named, versioned, parameterized unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    /// Definition name
    pub name: String,

    /// Immutable version tag
    pub version: String,

    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared inputs, in declaration order
    #[serde(default)]
    pub inputs: OrderedMap<InputSpec>,

    /// Declared secrets
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretSpec>,

    /// Declared outputs, in declaration order
    #[serde(default)]
    pub outputs: OrderedMap<OutputSpec>,

    /// Capability scopes requested from the caller
    #[serde(default)]
    pub permissions: BTreeMap<String, Access>,

    /// Steps executed in order
    pub steps: Vec<Step>,

    /// Execution budget for one run of this definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl WorkflowDefinition {
    /// Load a definition from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, PipeforgeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PipeforgeError::read_error(path, e))?;

        Self::from_yaml(&content).map_err(|e| PipeforgeError::InvalidDefinition {
            name: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, PipeforgeError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize the definition to YAML
    pub fn to_yaml(&self) -> Result<String, PipeforgeError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// `name@version`
    pub fn reference(&self) -> DefinitionRef {
        DefinitionRef {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Look up a declared input
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.get(name)
    }

    /// Look up a declared output
    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.get(name)
    }

    /// Check the definition is internally consistent
    ///
    /// Steps may reference inputs, secrets and outputs of earlier steps;
    /// outputs may reference inputs and any step. Trigger and `needs`
    /// references belong to invocations, not definitions.
    pub fn validate(&self) -> Result<(), PipeforgeError> {
        let invalid = |reason: String| PipeforgeError::InvalidDefinition {
            name: self.name.clone(),
            reason,
        };

        DefinitionRef::check_segment("name", &self.name).map_err(&invalid)?;
        DefinitionRef::check_segment("version", &self.version).map_err(&invalid)?;

        if self.steps.is_empty() {
            return Err(invalid("definition has no steps".into()));
        }

        for (name, spec) in self.inputs.iter() {
            if let Some(default) = &spec.default {
                spec.kind.coerce(default).map_err(|found| {
                    invalid(format!(
                        "default for input '{}' is {}, expected {}",
                        name, found, spec.kind
                    ))
                })?;
            }
        }

        let mut earlier_steps: HashSet<&str> = HashSet::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if step.run.trim().is_empty() {
                return Err(invalid(format!("step {} has an empty 'run' command", idx + 1)));
            }

            for text in step.templated_fields() {
                for reference in expr::references(text).map_err(&invalid)? {
                    self.check_step_reference(&reference, &earlier_steps)
                        .map_err(|reason| invalid(format!("step '{}': {}", step.label(), reason)))?;
                }
            }

            if let Some(id) = &step.id {
                if !earlier_steps.insert(id.as_str()) {
                    return Err(invalid(format!("duplicate step id '{}'", id)));
                }
            }
        }

        for (name, output) in self.outputs.iter() {
            for reference in expr::references(&output.value).map_err(&invalid)? {
                let ok = match &reference {
                    ExprRef::Input(input) => self.inputs.contains_key(input),
                    ExprRef::StepOutput { step, .. } => earlier_steps.contains(step.as_str()),
                    _ => false,
                };
                if !ok {
                    return Err(invalid(format!(
                        "output '{}' references '{}' which is not available",
                        name, reference
                    )));
                }
            }
        }

        Ok(())
    }

    fn check_step_reference(
        &self,
        reference: &ExprRef,
        earlier_steps: &HashSet<&str>,
    ) -> Result<(), String> {
        match reference {
            ExprRef::Input(name) if self.inputs.contains_key(name) => Ok(()),
            ExprRef::Secret(name) if self.secrets.contains_key(name) => Ok(()),
            ExprRef::StepOutput { step, .. } if earlier_steps.contains(step.as_str()) => Ok(()),
            ExprRef::Input(_) | ExprRef::Secret(_) | ExprRef::StepOutput { .. } => {
                Err(format!("'{}' is not declared", reference))
            }
            ExprRef::NeedsOutput { .. } | ExprRef::Trigger(_) => Err(format!(
                "'{}' can only be used in an invocation's 'with' block",
                reference
            )),
        }
    }
}

/// Reference to a definition as `name@version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionRef {
    pub name: String,
    pub version: String,
}

impl DefinitionRef {
    fn check_segment(what: &str, value: &str) -> Result<(), String> {
        if value.is_empty() {
            return Err(format!("{} is empty", what));
        }
        if value.contains('@') || value.chars().any(char::is_whitespace) {
            return Err(format!("{} '{}' contains '@' or whitespace", what, value));
        }
        Ok(())
    }
}

impl FromStr for DefinitionRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .split_once('@')
            .ok_or_else(|| format!("'{}' is not of the form name@version", s))?;
        Self::check_segment("name", name)?;
        Self::check_segment("version", version)?;
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for DefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl Serialize for DefinitionRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DefinitionRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Declared input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    /// Value type
    #[serde(rename = "type")]
    pub kind: InputType,

    /// Caller must supply a value when there is no default
    #[serde(default)]
    pub required: bool,

    /// Value used when the caller supplies none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Input value types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    #[serde(alias = "bool")]
    Boolean,
    /// Array of objects, such as a list of images to build
    Json,
}

impl InputType {
    /// Check a value against this type
    ///
    /// Strings are parsed for non-string types since command-line and
    /// trigger values always arrive as text. On mismatch, returns a
    /// description of what was found.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        match (self, value) {
            (Self::String, Value::String(_)) => Ok(value.clone()),
            (Self::Number, Value::Number(_)) => Ok(value.clone()),
            (Self::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (Self::Json, Value::Array(items)) => {
                if items.iter().all(Value::is_object) {
                    Ok(value.clone())
                } else {
                    Err("an array containing non-object items".into())
                }
            }

            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<serde_json::Number>()
                .map(Value::Number)
                .map_err(|_| format!("string \"{}\"", s)),
            (Self::Boolean, Value::String(s)) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("string \"{}\"", s)),
            },
            (Self::Json, Value::String(s)) => {
                let parsed: Value =
                    serde_json::from_str(s).map_err(|_| "a string that is not valid JSON".to_string())?;
                Self::Json.coerce(&parsed)
            }

            (_, other) => Err(describe_value(other)),
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Json => write!(f, "json (array of objects)"),
        }
    }
}

/// Short description of a JSON value's kind
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(_) => "boolean".into(),
        Value::Number(_) => "number".into(),
        Value::String(_) => "string".into(),
        Value::Array(_) => "array".into(),
        Value::Object(_) => "object".into(),
    }
}

/// Declared secret
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretSpec {
    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    /// Expression producing the value, e.g. `${{ steps.build.outputs.digest }}`
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Access level for a permission scope
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    None,
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// A single opaque tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Identifier used by `steps.<id>.outputs.*`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Command to execute
    pub run: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory, relative to the invocation's directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// A failing step does not fail the node
    #[serde(default)]
    pub continue_on_error: bool,

    /// Report files produced by this step
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
}

impl Step {
    /// Name used in logs and diagnostics
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or(self.run.as_str())
    }

    /// Every string that may contain expressions
    pub fn templated_fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.run.as_str())
            .chain(self.args.iter().map(String::as_str))
            .chain(self.env.values().map(String::as_str))
            .chain(self.working_dir.as_deref())
    }
}

/// A report file declared by a step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSpec {
    pub name: String,

    /// Glob pattern, relative to the step's working directory
    pub path: String,

    #[serde(default)]
    pub kind: ArtifactKind,
}

/// Kinds of structured reports passed through untouched
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Sbom,
    Sarif,
    Coverage,
    Provenance,
    #[default]
    Other,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sbom => write!(f, "sbom"),
            Self::Sarif => write!(f, "sarif"),
            Self::Coverage => write!(f, "coverage"),
            Self::Provenance => write!(f, "provenance"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// String-keyed map that keeps declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value; returns `false` if the key already exists
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.0.push((key, value));
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping with unique keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    if !map.insert(key.clone(), value) {
                        return Err(serde::de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                }
                Ok(map)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(OrderedMap::new())
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKER_BUILD: &str = r#"
name: docker-build
version: v1
description: Build and scan a container image
inputs:
  image_name:
    type: string
    required: true
  push:
    type: boolean
    default: false
  platforms:
    type: json
    default: [{"os": "linux", "arch": "amd64"}]
secrets:
  registry_token:
    required: true
outputs:
  digest:
    value: "${{ steps.build.outputs.digest }}"
permissions:
  contents: read
  packages: write
steps:
  - id: build
    run: docker
    args: ["build", "-t", "${{ inputs.image_name }}", "."]
    env:
      TOKEN: "${{ secrets.registry_token }}"
  - name: scan
    run: trivy
    args: ["image", "${{ inputs.image_name }}"]
    artifacts:
      - name: sbom
        path: sbom.json
        kind: sbom
"#;

    #[test]
    fn test_parse_definition_keeps_input_order() {
        let def = WorkflowDefinition::from_yaml(DOCKER_BUILD).unwrap();
        assert_eq!(def.reference().to_string(), "docker-build@v1");
        let names: Vec<&str> = def.inputs.keys().collect();
        assert_eq!(names, vec!["image_name", "push", "platforms"]);
        assert_eq!(def.permissions["packages"], Access::Write);
        assert_eq!(def.steps[1].artifacts[0].kind, ArtifactKind::Sbom);
        def.validate().unwrap();
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let yaml = r#"
name: lint
version: v1
steps:
  - run: golangci-lint
    timeout: 5
"#;
        assert!(WorkflowDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_input_keys_are_rejected() {
        let yaml = r#"
name: lint
version: v1
inputs:
  path: { type: string }
  path: { type: number }
steps:
  - run: golangci-lint
"#;
        assert!(WorkflowDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_mistyped_default() {
        let yaml = r#"
name: lint
version: v1
inputs:
  jobs: { type: number, default: "many" }
steps:
  - run: golangci-lint
"#;
        let def = WorkflowDefinition::from_yaml(yaml).unwrap();
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("default for input 'jobs'"));
    }

    #[test]
    fn test_validate_rejects_forward_step_reference() {
        let yaml = r#"
name: chain
version: v1
steps:
  - run: echo
    args: ["${{ steps.later.outputs.x }}"]
  - id: later
    run: echo
"#;
        let def = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert!(matches!(
            def.validate(),
            Err(PipeforgeError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_trigger_reference_in_step() {
        let yaml = r#"
name: tagger
version: v1
steps:
  - run: echo
    args: ["${{ trigger.tag }}"]
"#;
        let def = WorkflowDefinition::from_yaml(yaml).unwrap();
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("invocation"));
    }

    #[test]
    fn test_coerce_input_types() {
        assert_eq!(
            InputType::Number.coerce(&Value::String("42".into())).unwrap(),
            serde_json::json!(42)
        );
        assert_eq!(
            InputType::Boolean.coerce(&Value::String("true".into())).unwrap(),
            Value::Bool(true)
        );
        assert!(InputType::String.coerce(&serde_json::json!(3)).is_err());
        assert!(InputType::Json.coerce(&serde_json::json!([1, 2])).is_err());
        assert!(InputType::Json
            .coerce(&Value::String(r#"[{"name":"api"}]"#.into()))
            .is_ok());
    }

    #[test]
    fn test_definition_ref_parsing() {
        let r: DefinitionRef = "docker-build@v1.2.0".parse().unwrap();
        assert_eq!(r.name, "docker-build");
        assert_eq!(r.version, "v1.2.0");
        assert!("docker-build".parse::<DefinitionRef>().is_err());
        assert!("@v1".parse::<DefinitionRef>().is_err());
    }
}
