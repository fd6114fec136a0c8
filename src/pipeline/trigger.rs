// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Trigger events
//!
//! The event that started an invocation. It is consumed as data only: it
//! seeds `${{ trigger.* }}` values and `when` conditions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::expr::TriggerField;
use crate::errors::PipeforgeError;

/// Kind of event that started the invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
    Tag,
    Manual,
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "push" => Ok(Self::Push),
            "pull_request" | "pull-request" | "pr" => Ok(Self::PullRequest),
            "tag" => Ok(Self::Tag),
            "manual" | "workflow_dispatch" => Ok(Self::Manual),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::PullRequest => write!(f, "pull_request"),
            Self::Tag => write!(f, "tag"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Event descriptor for one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event: EventType,

    #[serde(rename = "ref")]
    pub git_ref: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,

    #[serde(default)]
    pub payload: Value,
}

impl TriggerEvent {
    pub fn new(event: EventType, git_ref: impl Into<String>) -> Self {
        Self {
            event,
            git_ref: git_ref.into(),
            sha: None,
            payload: Value::Null,
        }
    }

    /// A manual run on `HEAD`
    pub fn manual() -> Self {
        Self::new(EventType::Manual, "HEAD")
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Read the payload from a JSON file
    pub fn with_payload_file(self, path: &Path) -> Result<Self, PipeforgeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PipeforgeError::read_error(path, e))?;
        let payload: Value = serde_json::from_str(&content)?;
        Ok(self.with_payload(payload))
    }

    /// Tag name, for tag refs
    pub fn tag(&self) -> Option<&str> {
        if let Some(tag) = self.git_ref.strip_prefix("refs/tags/") {
            Some(tag)
        } else if self.event == EventType::Tag {
            Some(self.git_ref.as_str())
        } else {
            None
        }
    }

    /// Branch name, for branch refs
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// Files changed by the event, from `payload.changed_files`
    pub fn changed_files(&self) -> Option<Vec<&str>> {
        self.payload
            .get("changed_files")?
            .as_array()
            .map(|files| files.iter().filter_map(Value::as_str).collect())
    }

    /// Value of a trigger field, if present
    pub fn lookup(&self, field: &TriggerField) -> Option<Value> {
        match field {
            TriggerField::Event => Some(Value::String(self.event.to_string())),
            TriggerField::Ref => Some(Value::String(self.git_ref.clone())),
            TriggerField::Sha => self.sha.clone().map(Value::String),
            TriggerField::Tag => self.tag().map(|t| Value::String(t.to_string())),
            TriggerField::Branch => self.branch().map(|b| Value::String(b.to_string())),
            TriggerField::Payload(path) => path
                .iter()
                .try_fold(&self.payload, |value, key| value.get(key.as_str()))
                .cloned(),
        }
    }
}

impl Default for TriggerEvent {
    fn default() -> Self {
        Self::manual()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_and_branch() {
        let tag = TriggerEvent::new(EventType::Tag, "refs/tags/v1.4.0");
        assert_eq!(tag.tag(), Some("v1.4.0"));
        assert_eq!(tag.branch(), None);

        let push = TriggerEvent::new(EventType::Push, "refs/heads/main");
        assert_eq!(push.branch(), Some("main"));
        assert_eq!(push.tag(), None);
    }

    #[test]
    fn test_payload_lookup() {
        let event = TriggerEvent::new(EventType::PullRequest, "refs/pull/7/merge").with_payload(
            json!({"pull_request": {"number": 7}, "changed_files": ["Dockerfile", "main.go"]}),
        );

        assert_eq!(
            event.lookup(&TriggerField::Payload(vec!["pull_request".into(), "number".into()])),
            Some(json!(7))
        );
        assert_eq!(event.lookup(&TriggerField::Payload(vec!["missing".into()])), None);
        assert_eq!(event.changed_files().unwrap(), vec!["Dockerfile", "main.go"]);
    }

    #[test]
    fn test_event_type_parsing() {
        assert_eq!("pull-request".parse::<EventType>().unwrap(), EventType::PullRequest);
        assert_eq!("workflow_dispatch".parse::<EventType>().unwrap(), EventType::Manual);
        assert!("schedule".parse::<EventType>().is_err());
    }
}
