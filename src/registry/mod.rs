// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Workflow definition registry
//!
//! Stores published definitions keyed by `name@version`. A published
//! definition is never altered: changing it means registering a new version.

mod definition;
mod digest;

pub use definition::*;
pub use digest::{definition_digest, short_digest, ContentHasher};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::errors::{PipeforgeError, PipeforgeResult};

/// Version reference resolving to the most recently registered version
pub const LATEST: &str = "latest";

/// Registry of immutable workflow definitions
#[derive(Debug, Default)]
pub struct Registry {
    /// Versions per name, in registration order
    definitions: HashMap<String, Vec<Arc<WorkflowDefinition>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from every definition file under a directory
    pub fn from_dir(dir: &Path) -> PipeforgeResult<Self> {
        let mut registry = Self::new();
        registry.load_dir(dir)?;
        Ok(registry)
    }

    /// Publish a definition
    ///
    /// Fails with `DuplicateVersion` if `name@version` is already present,
    /// even when the contents are identical.
    pub fn register(&mut self, definition: WorkflowDefinition) -> PipeforgeResult<Arc<WorkflowDefinition>> {
        definition.validate()?;

        if definition.version == LATEST {
            return Err(PipeforgeError::InvalidDefinition {
                name: definition.name.clone(),
                reason: format!("'{}' is reserved and cannot be used as a version", LATEST),
            });
        }

        let versions = self.definitions.entry(definition.name.clone()).or_default();
        if versions.iter().any(|d| d.version == definition.version) {
            return Err(PipeforgeError::DuplicateVersion {
                name: definition.name,
                version: definition.version,
            });
        }

        debug!(definition = %definition.reference(), "registered definition");
        let definition = Arc::new(definition);
        versions.push(Arc::clone(&definition));
        Ok(definition)
    }

    /// Look up a definition by name and version (or `latest`)
    pub fn resolve(&self, name: &str, version: &str) -> PipeforgeResult<Arc<WorkflowDefinition>> {
        let not_found = || PipeforgeError::DefinitionNotFound {
            name: name.to_string(),
            version: version.to_string(),
        };

        let versions = self.definitions.get(name).ok_or_else(not_found)?;

        let found = if version == LATEST {
            versions.last()
        } else {
            versions.iter().find(|d| d.version == version)
        };

        found.cloned().ok_or_else(not_found)
    }

    /// Look up a definition by reference
    pub fn resolve_ref(&self, reference: &DefinitionRef) -> PipeforgeResult<Arc<WorkflowDefinition>> {
        self.resolve(&reference.name, &reference.version)
    }

    /// All definitions, ordered by name then registration order
    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut names: Vec<&String> = self.definitions.keys().collect();
        names.sort();

        names
            .into_iter()
            .flat_map(|name| self.definitions[name].iter().cloned())
            .collect()
    }

    /// Number of registered definition versions
    pub fn len(&self) -> usize {
        self.definitions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register every `*.yaml` / `*.yml` file under `dir`
    ///
    /// Returns the number of definitions registered.
    pub fn load_dir(&mut self, dir: &Path) -> PipeforgeResult<usize> {
        if !dir.is_dir() {
            return Err(PipeforgeError::Config {
                message: format!("definitions directory '{}' does not exist", dir.display()),
            });
        }

        let files = definition_files(dir)?;
        for file in &files {
            let definition = WorkflowDefinition::from_file(file)?;
            self.register(definition).map_err(|e| match e {
                PipeforgeError::InvalidDefinition { name, reason } => {
                    PipeforgeError::InvalidDefinition {
                        name: format!("{} ({})", name, file.display()),
                        reason,
                    }
                }
                other => other,
            })?;
        }

        debug!(count = files.len(), dir = %dir.display(), "loaded definitions");
        Ok(files.len())
    }
}

fn definition_files(dir: &Path) -> PipeforgeResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for extension in ["yaml", "yml"] {
        let pattern = dir.join("**").join(format!("*.{}", extension));
        for entry in glob::glob(&pattern.to_string_lossy())? {
            match entry {
                Ok(path) if path.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => return Err(PipeforgeError::read_error(e.path(), e.error())),
            }
        }
    }

    // Sort for consistent registration order
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lint(version: &str) -> WorkflowDefinition {
        WorkflowDefinition::from_yaml(&format!(
            "name: go-lint\nversion: {}\nsteps:\n  - run: golangci-lint\n    args: [run]\n",
            version
        ))
        .unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = Registry::new();
        registry.register(lint("v1")).unwrap();

        let def = registry.resolve("go-lint", "v1").unwrap();
        assert_eq!(def.version, "v1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let mut registry = Registry::new();
        registry.register(lint("v1")).unwrap();

        let result = registry.register(lint("v1"));
        assert!(matches!(result, Err(PipeforgeError::DuplicateVersion { .. })));

        // The original stays untouched
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_version() {
        let mut registry = Registry::new();
        registry.register(lint("v1")).unwrap();

        assert!(matches!(
            registry.resolve("go-lint", "v9"),
            Err(PipeforgeError::DefinitionNotFound { .. })
        ));
        assert!(matches!(
            registry.resolve("docker-build", "v1"),
            Err(PipeforgeError::DefinitionNotFound { .. })
        ));
    }

    #[test]
    fn test_latest_is_most_recent_registration() {
        let mut registry = Registry::new();
        registry.register(lint("v2")).unwrap();
        registry.register(lint("v1.5")).unwrap();

        assert_eq!(registry.resolve("go-lint", LATEST).unwrap().version, "v1.5");
        assert!(registry.register(lint(LATEST)).is_err());
    }

    #[test]
    fn test_invalid_definition_not_registered() {
        let mut registry = Registry::new();
        let def = WorkflowDefinition::from_yaml("name: empty\nversion: v1\nsteps: []\n").unwrap();

        assert!(matches!(
            registry.register(def),
            Err(PipeforgeError::InvalidDefinition { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("go")).unwrap();
        std::fs::write(
            dir.path().join("go/lint.yaml"),
            "name: go-lint\nversion: v1\nsteps:\n  - run: golangci-lint\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("k8s.yml"),
            "name: k8s-validate\nversion: v1\nsteps:\n  - run: kubeconform\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a definition").unwrap();

        let registry = Registry::from_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 2);

        let names: Vec<String> = registry.list().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["go-lint", "k8s-validate"]);
    }
}
