// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Secret values
//!
//! Secrets are passed explicitly into each invocation. Their `Debug` and
//! `Display` output is redacted so they cannot leak through logs.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::PipeforgeError;

/// Placeholder printed instead of secret values
pub const REDACTED: &str = "***";

/// A secret string
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for handing to a tool
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Caller-supplied secrets for one invocation
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    values: BTreeMap<String, SecretValue>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SecretValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Parse a `NAME=VALUE` pair
    pub fn insert_pair(&mut self, pair: &str) -> Result<(), PipeforgeError> {
        let (name, value) = pair.split_once('=').ok_or_else(|| PipeforgeError::InvalidInvocation {
            reason: "secret must be given as NAME=VALUE".into(),
            help: Some("Prefer --secret-env NAME to keep values out of shell history".into()),
        })?;
        self.insert(name.trim(), SecretValue::new(value));
        Ok(())
    }

    /// Read a secret from the process environment
    pub fn insert_from_env(&mut self, name: &str) -> Result<(), PipeforgeError> {
        let value = std::env::var(name).map_err(|_| PipeforgeError::InvalidInvocation {
            reason: format!("environment variable '{}' is not set", name),
            help: None,
        })?;
        self.insert(name, SecretValue::new(value));
        Ok(())
    }
}

/// Replace every occurrence of the given secrets in `text`
pub fn mask<'a>(text: &str, secrets: impl IntoIterator<Item = &'a SecretValue>) -> String {
    let mut masked = text.to_string();
    for secret in secrets {
        if !secret.expose().is_empty() {
            masked = masked.replace(secret.expose(), REDACTED);
        }
    }
    masked
}
