// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Engine configuration
//!
//! Settings are layered: built-in defaults, then the user config file, then
//! the project's `.pipeforge.toml`, then command-line flags. Each file only
//! needs to set the keys it wants to change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use tracing::debug;

use crate::errors::{PipeforgeError, PipeforgeResult};

/// Project-level configuration file name
pub const PROJECT_CONFIG_FILE: &str = ".pipeforge.toml";

/// Default definitions directory, relative to the project root
pub const DEFAULT_DEFINITIONS_DIR: &str = ".pipeforge/workflows";

/// Default invocation file
pub const DEFAULT_INVOCATION_FILE: &str = "pipeline.yaml";

/// Effective engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently running nodes
    pub max_concurrency: usize,

    /// Budget for nodes whose invocation and definition set no timeout
    pub node_timeout_secs: Option<u64>,

    /// Directory of workflow definition files
    pub definitions_dir: PathBuf,

    /// Replace secret values in captured output
    pub mask_secrets: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            node_timeout_secs: None,
            definitions_dir: PathBuf::from(DEFAULT_DEFINITIONS_DIR),
            mask_secrets: true,
        }
    }
}

/// One configuration layer; unset keys fall through to the layer below
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub max_concurrency: Option<usize>,
    pub node_timeout_secs: Option<u64>,
    pub definitions_dir: Option<PathBuf>,
    pub mask_secrets: Option<bool>,
}

impl ConfigLayer {
    /// Read a layer from a TOML file
    pub fn from_file(path: &Path) -> PipeforgeResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PipeforgeError::read_error(path, e))?;
        Self::from_toml(&content).map_err(|e| PipeforgeError::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    pub fn from_toml(content: &str) -> PipeforgeResult<Self> {
        toml::from_str(content).map_err(Into::into)
    }
}

impl EngineConfig {
    /// Load defaults, the user config and the project config under `root`
    pub fn load(root: &Path) -> PipeforgeResult<Self> {
        let mut config = Self::default();

        if let Some(path) = user_config_path() {
            if path.is_file() {
                debug!(path = %path.display(), "loading user config");
                config.apply(ConfigLayer::from_file(&path)?);
            }
        }

        let project = root.join(PROJECT_CONFIG_FILE);
        if project.is_file() {
            debug!(path = %project.display(), "loading project config");
            config.apply(ConfigLayer::from_file(&project)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Overlay a layer's set keys
    pub fn apply(&mut self, layer: ConfigLayer) {
        if let Some(n) = layer.max_concurrency {
            self.max_concurrency = n;
        }
        if let Some(secs) = layer.node_timeout_secs {
            self.node_timeout_secs = Some(secs);
        }
        if let Some(dir) = layer.definitions_dir {
            self.definitions_dir = dir;
        }
        if let Some(mask) = layer.mask_secrets {
            self.mask_secrets = mask;
        }
    }

    pub fn validate(&self) -> PipeforgeResult<()> {
        if self.max_concurrency == 0 {
            return Err(PipeforgeError::Config {
                message: "max_concurrency must be at least 1".into(),
            });
        }
        if self.node_timeout_secs == Some(0) {
            return Err(PipeforgeError::Config {
                message: "node_timeout_secs must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_secs.map(Duration::from_secs)
    }

    /// Definitions directory resolved against `root`
    pub fn definitions_path(&self, root: &Path) -> PathBuf {
        if self.definitions_dir.is_absolute() {
            self.definitions_dir.clone()
        } else {
            root.join(&self.definitions_dir)
        }
    }
}

/// Per-user config file, e.g. `~/.config/pipeforge/config.toml`
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "pipeforge", "pipeforge").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers_override_only_set_keys() {
        let mut config = EngineConfig::default();
        config.apply(ConfigLayer::from_toml("max_concurrency = 8\nnode_timeout_secs = 600\n").unwrap());
        config.apply(ConfigLayer::from_toml("node_timeout_secs = 30\nmask_secrets = false\n").unwrap());

        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.node_timeout(), Some(Duration::from_secs(30)));
        assert!(!config.mask_secrets);
        assert_eq!(config.definitions_dir, PathBuf::from(DEFAULT_DEFINITIONS_DIR));
    }

    #[test]
    fn test_project_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "definitions_dir = \"ci/definitions\"\nmax_concurrency = 2\n",
        )
        .unwrap();

        let config = EngineConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(
            config.definitions_path(dir.path()),
            dir.path().join("ci/definitions")
        );
    }

    #[test]
    fn test_rejects_unknown_keys_and_zero_concurrency() {
        assert!(ConfigLayer::from_toml("max_parallel = 3\n").is_err());

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), "max_concurrency = 0\n").unwrap();
        assert!(matches!(
            EngineConfig::load(dir.path()),
            Err(PipeforgeError::Config { .. })
        ));
    }
}
