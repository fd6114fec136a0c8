// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for pipeforge. Handlers return the
//! process exit code; errors are rendered by `miette` in `main`.

pub mod definitions;
pub mod graph;
pub mod init;
pub mod run;
pub mod validate;
pub mod watch;

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::Result;
use std::path::{Path, PathBuf};

use crate::config::{ConfigLayer, EngineConfig, DEFAULT_INVOCATION_FILE};
use crate::errors::PipeforgeError;
use crate::pipeline::{EventType, PipelineInvocation, SecretStore, TriggerEvent};
use crate::registry::Registry;

/// Reusable pipeline composition and execution engine
///
/// Compose versioned workflow definitions into a dependency graph and run
/// them with bounded concurrency.
#[derive(Parser, Debug)]
#[clap(
    name = "pipeforge",
    version,
    about = "Compose and run versioned CI workflow definitions",
    long_about = None,
    after_help = "Examples:\n\
        pipeforge init                        Scaffold definitions and a pipeline\n\
        pipeforge validate                    Check pipeline.yaml without running it\n\
        pipeforge run --secret-env TOKEN      Run the pipeline\n\
        pipeforge graph --format mermaid      Show the dependency graph\n\n\
        See 'pipeforge <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Directory of workflow definitions
    #[clap(long, global = true, value_name = "DIR", env = "PIPEFORGE_DEFINITIONS")]
    pub definitions: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold example workflow definitions and a pipeline
    Init {
        /// Overwrite existing files
        #[clap(short, long)]
        force: bool,
    },

    /// Run a pipeline invocation
    Run(RunArgs),

    /// Validate an invocation against the registered definitions
    Validate {
        /// Invocation file
        #[clap(default_value = DEFAULT_INVOCATION_FILE)]
        invocation: PathBuf,

        /// Treat warnings as errors
        #[clap(long)]
        strict: bool,
    },

    /// Show an invocation's dependency graph
    Graph {
        /// Invocation file
        #[clap(default_value = DEFAULT_INVOCATION_FILE)]
        invocation: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Inspect registered workflow definitions
    Definitions {
        #[clap(subcommand)]
        action: DefinitionsAction,
    },

    /// Watch mode - re-run the pipeline on file changes
    Watch {
        /// Invocation file
        #[clap(default_value = DEFAULT_INVOCATION_FILE)]
        invocation: PathBuf,

        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,
    },
}

/// Arguments of `pipeforge run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Invocation file
    #[clap(default_value = DEFAULT_INVOCATION_FILE)]
    pub invocation: PathBuf,

    /// Override an input: node.input=value
    #[clap(long = "set", value_name = "NODE.INPUT=VALUE")]
    pub set: Vec<String>,

    /// Supply a secret: NAME=VALUE
    #[clap(long = "secret", value_name = "NAME=VALUE")]
    pub secrets: Vec<String>,

    /// Supply a secret from the environment variable of the same name
    #[clap(long = "secret-env", value_name = "NAME")]
    pub secret_env: Vec<String>,

    #[clap(flatten)]
    pub trigger: TriggerArgs,

    /// Run only these nodes and their dependencies
    #[clap(long, value_name = "NODE")]
    pub only: Vec<String>,

    /// Maximum number of nodes running at once
    #[clap(long, env = "PIPEFORGE_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Default per-node timeout in seconds
    #[clap(long, value_name = "SECS", env = "PIPEFORGE_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Show the execution plan without running anything
    #[clap(long)]
    pub dry_run: bool,

    /// Output format
    #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Write the JSON run report to a file
    #[clap(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// Trigger event description
#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Event type (push, pull_request, tag, manual)
    #[clap(long, default_value = "manual", env = "PIPEFORGE_EVENT")]
    pub event: EventType,

    /// Git ref, e.g. refs/heads/main
    #[clap(long = "ref", value_name = "REF", env = "PIPEFORGE_REF")]
    pub git_ref: Option<String>,

    /// Commit SHA
    #[clap(long, env = "PIPEFORGE_SHA")]
    pub sha: Option<String>,

    /// JSON file with the event payload
    #[clap(long, value_name = "FILE")]
    pub payload: Option<PathBuf>,
}

impl TriggerArgs {
    pub fn to_trigger(&self) -> Result<TriggerEvent> {
        let mut trigger = match &self.git_ref {
            Some(git_ref) => TriggerEvent::new(self.event, git_ref),
            None => TriggerEvent::new(self.event, "HEAD"),
        };
        if let Some(sha) = &self.sha {
            trigger = trigger.with_sha(sha);
        }
        if let Some(path) = &self.payload {
            trigger = trigger.with_payload_file(path)?;
        }
        Ok(trigger)
    }
}

/// Definition inspection actions
#[derive(Subcommand, Debug, Clone)]
pub enum DefinitionsAction {
    /// List registered definitions
    List,

    /// Show one definition
    Show {
        /// Definition reference, name@version
        reference: String,
    },
}

/// Output format for run results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// State shared by command handlers
pub struct Context {
    pub root: PathBuf,
    pub config: EngineConfig,
    pub verbose: bool,
}

impl Context {
    /// Load configuration for the current directory
    pub fn load(definitions: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let root = std::env::current_dir()
            .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
        let mut config = EngineConfig::load(&root)?;
        config.apply(ConfigLayer {
            definitions_dir: definitions,
            ..Default::default()
        });

        Ok(Self {
            root,
            config,
            verbose,
        })
    }

    pub fn definitions_dir(&self) -> PathBuf {
        self.config.definitions_path(&self.root)
    }

    /// Registry of every definition under the definitions directory
    pub fn registry(&self) -> Result<Registry> {
        let dir = self.definitions_dir();
        Registry::from_dir(&dir).map_err(|e| match e {
            PipeforgeError::Config { message } => PipeforgeError::Config {
                message: format!("{} (run 'pipeforge init' to create it)", message),
            }
            .into(),
            other => other.into(),
        })
    }
}

/// Load an invocation file
pub fn load_invocation(path: &Path) -> Result<PipelineInvocation> {
    Ok(PipelineInvocation::from_file(path)?)
}

/// Collect secrets from `--secret` and `--secret-env`
pub fn collect_secrets(pairs: &[String], env_names: &[String]) -> Result<SecretStore> {
    let mut secrets = SecretStore::new();
    for pair in pairs {
        secrets.insert_pair(pair)?;
    }
    for name in env_names {
        secrets.insert_from_env(name)?;
    }
    Ok(secrets)
}
