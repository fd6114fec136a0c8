// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Input and secret binding
//!
//! Binds a node's supplied values against its definition's contract before
//! anything runs. Binding is pure: it performs no I/O and never logs values.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::expr::{self, ExprRef};
use super::invocation::{Condition, NodeSpec, SecretMapping};
use super::secrets::{SecretStore, SecretValue};
use super::trigger::TriggerEvent;
use crate::errors::{PipeforgeError, PipeforgeResult};
use crate::registry::{Access, InputSpec, InputType, WorkflowDefinition};

/// An input value after binding
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    /// Fully known
    Ready(Value),
    /// Depends on upstream node outputs; resolved at dispatch
    Deferred { template: String, kind: InputType },
}

/// A node whose inputs and secrets satisfy its definition's contract
#[derive(Debug, Clone)]
pub struct BoundNode {
    pub id: String,
    pub definition: Arc<WorkflowDefinition>,
    pub inputs: BTreeMap<String, BoundValue>,
    pub secrets: BTreeMap<String, SecretValue>,
    pub required: bool,
    pub when: Option<Condition>,
    pub timeout: Option<Duration>,
}

impl BoundNode {
    /// Resolve deferred inputs from upstream outputs
    ///
    /// `needs` maps producer node id to its outputs. Missing outputs render
    /// as empty text; an input that is exactly one missing output falls
    /// back to its default.
    pub fn resolve_inputs(
        &self,
        needs: &HashMap<String, BTreeMap<String, String>>,
    ) -> Result<BTreeMap<String, Value>, String> {
        let mut resolved = BTreeMap::new();

        for (name, value) in &self.inputs {
            match value {
                BoundValue::Ready(v) => {
                    resolved.insert(name.clone(), v.clone());
                }
                BoundValue::Deferred { template, kind } => {
                    let lookup = |r: &ExprRef| match r {
                        ExprRef::NeedsOutput { node, output } => {
                            needs.get(node).and_then(|outputs| outputs.get(output)).cloned()
                        }
                        _ => None,
                    };

                    if let Some(Ok(reference)) = expr::sole_reference(template) {
                        if lookup(&reference).is_none() {
                            let spec = self.definition.input(name);
                            match spec.and_then(|s| s.default.clone()) {
                                Some(default) => {
                                    resolved.insert(name.clone(), default);
                                }
                                None if spec.map(|s| s.required).unwrap_or(false) => {
                                    return Err(format!(
                                        "required input '{}' resolved to no value ('{}' was not produced)",
                                        name, reference
                                    ));
                                }
                                None => {}
                            }
                            continue;
                        }
                    }

                    let text = expr::render(template, lookup)?;
                    let value = kind.coerce(&Value::String(text)).map_err(|found| {
                        format!("input '{}' expects {}, got {}", name, kind, found)
                    })?;
                    resolved.insert(name.clone(), value);
                }
            }
        }

        Ok(resolved)
    }

    /// Producer node ids this node reads outputs from
    pub fn deferred_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self
            .inputs
            .values()
            .filter_map(|v| match v {
                BoundValue::Deferred { template, .. } => expr::references(template).ok(),
                BoundValue::Ready(_) => None,
            })
            .flatten()
            .filter_map(|r| match r {
                ExprRef::NeedsOutput { node, .. } => Some(node),
                _ => None,
            })
            .collect();
        sources.sort();
        sources.dedup();
        sources
    }
}

/// Definitions of the nodes `node` lists under `needs`
///
/// Dependencies whose definition could not be resolved are left out.
pub fn upstream_definitions<'a>(
    node: &'a NodeSpec,
    resolved: &HashMap<String, Arc<WorkflowDefinition>>,
) -> HashMap<&'a str, Arc<WorkflowDefinition>> {
    node.needs
        .iter()
        .filter_map(|need| {
            let definition = resolved.get(need.node())?;
            Some((need.node(), Arc::clone(definition)))
        })
        .collect()
}

/// Binds invocation nodes against their definitions
pub struct InputResolver<'a> {
    trigger: &'a TriggerEvent,
    secrets: &'a SecretStore,
    grants: Option<&'a BTreeMap<String, Access>>,
}

impl<'a> InputResolver<'a> {
    pub fn new(trigger: &'a TriggerEvent, secrets: &'a SecretStore) -> Self {
        Self {
            trigger,
            secrets,
            grants: None,
        }
    }

    /// Restrict the scopes definitions may request
    pub fn with_grants(mut self, grants: Option<&'a BTreeMap<String, Access>>) -> Self {
        self.grants = grants;
        self
    }

    /// Bind one node
    ///
    /// `upstream` maps each node id this node `needs` to that node's
    /// definition, so `needs.*` references can be checked against the
    /// producer's declared outputs.
    pub fn bind(
        &self,
        node: &NodeSpec,
        definition: Arc<WorkflowDefinition>,
        upstream: &HashMap<&str, Arc<WorkflowDefinition>>,
    ) -> PipeforgeResult<BoundNode> {
        for supplied in node.with.keys() {
            if definition.input(supplied).is_none() {
                return Err(PipeforgeError::UnknownInput {
                    node: node.id.clone(),
                    input: supplied.clone(),
                });
            }
        }

        self.check_permissions(node, &definition)?;

        let mut inputs = BTreeMap::new();
        for (name, spec) in definition.inputs.iter() {
            let supplied = match node.with.get(name) {
                Some(raw) => self.bind_supplied(node, name, spec, raw, upstream)?,
                None => None,
            };

            let bound = match supplied {
                Some(value) => value,
                None => match &spec.default {
                    Some(default) => BoundValue::Ready(
                        self.check_type(node, name, spec.kind, default)?,
                    ),
                    None if spec.required => {
                        return Err(PipeforgeError::MissingRequiredInput {
                            node: node.id.clone(),
                            input: name.to_string(),
                        })
                    }
                    None => continue,
                },
            };

            inputs.insert(name.to_string(), bound);
        }

        let secrets = self.bind_secrets(node, &definition)?;

        if let Some(when) = &node.when {
            when.validate()
                .map_err(|reason| PipeforgeError::InvalidReference {
                    node: node.id.clone(),
                    reason,
                })?;
        }

        let timeout = node
            .timeout_secs
            .or(definition.timeout_secs)
            .map(Duration::from_secs);

        Ok(BoundNode {
            id: node.id.clone(),
            definition,
            inputs,
            secrets,
            required: node.required,
            when: node.when.clone(),
            timeout,
        })
    }

    /// Bind a supplied value; `None` means it resolved to nothing
    fn bind_supplied(
        &self,
        node: &NodeSpec,
        name: &str,
        spec: &InputSpec,
        raw: &Value,
        upstream: &HashMap<&str, Arc<WorkflowDefinition>>,
    ) -> PipeforgeResult<Option<BoundValue>> {
        let Value::String(text) = raw else {
            return Ok(Some(BoundValue::Ready(
                self.check_type(node, name, spec.kind, raw)?,
            )));
        };

        if !expr::has_expressions(text) {
            return Ok(Some(BoundValue::Ready(
                self.check_type(node, name, spec.kind, raw)?,
            )));
        }

        let invalid = |reason: String| PipeforgeError::InvalidReference {
            node: node.id.clone(),
            reason,
        };

        let references = expr::references(text).map_err(&invalid)?;
        let mut deferred = false;
        for reference in &references {
            match reference {
                ExprRef::Trigger(_) => {}
                ExprRef::NeedsOutput { node: producer, output } => {
                    self.check_needs_reference(node, producer, output, upstream)?;
                    deferred = true;
                }
                other => {
                    return Err(invalid(format!(
                        "input '{}' uses '{}', which is only available inside definitions",
                        name, other
                    )))
                }
            }
        }

        // A lone trigger reference keeps the JSON type of the value
        if let Some(Ok(ExprRef::Trigger(field))) = expr::sole_reference(text) {
            return match self.trigger.lookup(&field) {
                Some(value) => Ok(Some(BoundValue::Ready(
                    self.check_type(node, name, spec.kind, &value)?,
                ))),
                None => Ok(None),
            };
        }

        let trigger_lookup = |r: &ExprRef| match r {
            ExprRef::Trigger(field) => self.trigger.lookup(field).map(|v| expr::value_to_text(&v)),
            // Keep deferred references intact for dispatch-time rendering
            other => Some(format!("${{{{ {} }}}}", other)),
        };
        let rendered = expr::render(text, trigger_lookup).map_err(&invalid)?;

        if deferred {
            return Ok(Some(BoundValue::Deferred {
                template: rendered,
                kind: spec.kind,
            }));
        }

        Ok(Some(BoundValue::Ready(self.check_type(
            node,
            name,
            spec.kind,
            &Value::String(rendered),
        )?)))
    }

    fn check_needs_reference(
        &self,
        node: &NodeSpec,
        producer: &str,
        output: &str,
        upstream: &HashMap<&str, Arc<WorkflowDefinition>>,
    ) -> PipeforgeResult<()> {
        if !node.needs.iter().any(|n| n.node() == producer) {
            return Err(PipeforgeError::InvalidReference {
                node: node.id.clone(),
                reason: format!(
                    "reads outputs of '{}' but does not list it under 'needs'",
                    producer
                ),
            });
        }

        let definition = upstream.get(producer).ok_or_else(|| PipeforgeError::UnknownDependency {
            node: node.id.clone(),
            dependency: producer.to_string(),
        })?;

        if definition.output(output).is_none() {
            return Err(PipeforgeError::InvalidReference {
                node: node.id.clone(),
                reason: format!(
                    "'{}' ({}) declares no output '{}'",
                    producer,
                    definition.reference(),
                    output
                ),
            });
        }

        Ok(())
    }

    fn check_type(
        &self,
        node: &NodeSpec,
        name: &str,
        kind: InputType,
        value: &Value,
    ) -> PipeforgeResult<Value> {
        kind.coerce(value).map_err(|found| PipeforgeError::TypeMismatch {
            node: node.id.clone(),
            input: name.to_string(),
            expected: kind.to_string(),
            found,
        })
    }

    fn check_permissions(&self, node: &NodeSpec, definition: &WorkflowDefinition) -> PipeforgeResult<()> {
        let Some(grants) = self.grants else {
            return Ok(());
        };

        for (scope, requested) in &definition.permissions {
            let granted = grants.get(scope).copied().unwrap_or(Access::None);
            if *requested > granted {
                return Err(PipeforgeError::PermissionDenied {
                    node: node.id.clone(),
                    scope: scope.clone(),
                    requested: requested.to_string(),
                    granted: granted.to_string(),
                });
            }
        }

        Ok(())
    }

    fn bind_secrets(
        &self,
        node: &NodeSpec,
        definition: &WorkflowDefinition,
    ) -> PipeforgeResult<BTreeMap<String, SecretValue>> {
        let mut bound = BTreeMap::new();

        match &node.secrets {
            SecretMapping::Inherit => {
                for name in definition.secrets.keys() {
                    if let Some(value) = self.secrets.get(name) {
                        bound.insert(name.clone(), value.clone());
                    }
                }
            }
            SecretMapping::Explicit(mapping) => {
                for (declared, source) in mapping {
                    if !definition.secrets.contains_key(declared) {
                        return Err(PipeforgeError::InvalidReference {
                            node: node.id.clone(),
                            reason: format!(
                                "maps secret '{}' which {} does not declare",
                                declared,
                                definition.reference()
                            ),
                        });
                    }
                    if let Some(value) = self.secrets.get(source) {
                        bound.insert(declared.clone(), value.clone());
                    }
                }
            }
        }

        for (name, spec) in &definition.secrets {
            if spec.required && !bound.contains_key(name) {
                return Err(PipeforgeError::MissingRequiredSecret {
                    node: node.id.clone(),
                    secret: name.clone(),
                });
            }
        }

        Ok(bound)
    }
}
