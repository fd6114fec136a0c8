// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! `${{ ... }}` expressions
//!
//! Definitions and invocations refer to values that only exist later
//! (inputs, secrets, step and node outputs, the trigger event) through
//! `${{ path }}` placeholders. Only dotted paths are supported; there are
//! no operators or functions.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]*)\s*\}\}").expect("expression regex is valid")
    })
}

/// Field of the trigger event an expression can read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerField {
    Event,
    Ref,
    Sha,
    Tag,
    Branch,
    /// Dotted path into the event payload
    Payload(Vec<String>),
}

/// A parsed expression reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprRef {
    /// `inputs.<name>`
    Input(String),
    /// `secrets.<name>`
    Secret(String),
    /// `steps.<id>.outputs.<name>`
    StepOutput { step: String, output: String },
    /// `needs.<node>.outputs.<name>`
    NeedsOutput { node: String, output: String },
    /// `trigger.<field>`
    Trigger(TriggerField),
}

impl ExprRef {
    /// Parse a dotted path such as `steps.build.outputs.digest`
    pub fn parse(path: &str) -> Result<Self, String> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(format!("malformed expression '{}'", path));
        }

        match parts.as_slice() {
            ["inputs", name] => Ok(Self::Input(name.to_string())),
            ["secrets", name] => Ok(Self::Secret(name.to_string())),
            ["steps", step, "outputs", output] => Ok(Self::StepOutput {
                step: step.to_string(),
                output: output.to_string(),
            }),
            ["needs", node, "outputs", output] => Ok(Self::NeedsOutput {
                node: node.to_string(),
                output: output.to_string(),
            }),
            ["trigger", "event"] => Ok(Self::Trigger(TriggerField::Event)),
            ["trigger", "ref"] => Ok(Self::Trigger(TriggerField::Ref)),
            ["trigger", "sha"] => Ok(Self::Trigger(TriggerField::Sha)),
            ["trigger", "tag"] => Ok(Self::Trigger(TriggerField::Tag)),
            ["trigger", "branch"] => Ok(Self::Trigger(TriggerField::Branch)),
            ["trigger", "payload", rest @ ..] if !rest.is_empty() => Ok(Self::Trigger(
                TriggerField::Payload(rest.iter().map(|s| s.to_string()).collect()),
            )),
            _ => Err(format!("unknown expression '{}'", path)),
        }
    }
}

impl fmt::Display for ExprRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(name) => write!(f, "inputs.{}", name),
            Self::Secret(name) => write!(f, "secrets.{}", name),
            Self::StepOutput { step, output } => write!(f, "steps.{}.outputs.{}", step, output),
            Self::NeedsOutput { node, output } => write!(f, "needs.{}.outputs.{}", node, output),
            Self::Trigger(field) => match field {
                TriggerField::Event => write!(f, "trigger.event"),
                TriggerField::Ref => write!(f, "trigger.ref"),
                TriggerField::Sha => write!(f, "trigger.sha"),
                TriggerField::Tag => write!(f, "trigger.tag"),
                TriggerField::Branch => write!(f, "trigger.branch"),
                TriggerField::Payload(path) => write!(f, "trigger.payload.{}", path.join(".")),
            },
        }
    }
}

/// All expression references contained in a string
pub fn references(text: &str) -> Result<Vec<ExprRef>, String> {
    expression_regex()
        .captures_iter(text)
        .map(|caps| ExprRef::parse(&caps[1]))
        .collect()
}

/// Whether a string contains at least one expression
pub fn has_expressions(text: &str) -> bool {
    expression_regex().is_match(text)
}

/// If the whole string is exactly one expression, return it
///
/// Used to keep the JSON type of a substituted value (for example a payload
/// array bound to a `json` input) instead of flattening it into a string.
pub fn sole_reference(text: &str) -> Option<Result<ExprRef, String>> {
    let caps = expression_regex().captures(text.trim())?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == text.trim().len() {
        Some(ExprRef::parse(&caps[1]))
    } else {
        None
    }
}

/// Substitute every expression using `lookup`
///
/// References that `lookup` returns `None` for render as the empty string.
pub fn render<F>(text: &str, mut lookup: F) -> Result<String, String>
where
    F: FnMut(&ExprRef) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in expression_regex().captures_iter(text) {
        let whole = caps.get(0).expect("capture group 0 always exists");
        let reference = ExprRef::parse(&caps[1])?;
        out.push_str(&text[last..whole.start()]);
        if let Some(value) = lookup(&reference) {
            out.push_str(&value);
        }
        last = whole.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// Render a JSON value as the text substituted into a template
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
