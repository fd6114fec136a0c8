// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Error types
//!
//! Configuration problems (bad inputs, unknown definitions, dependency
//! cycles) are errors and abort an invocation before anything runs.
//! Failures of individual nodes are *not* errors: they are recorded on the
//! node in the [`RunResult`](crate::pipeline::RunResult).

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeforge operations
pub type PipeforgeResult<T> = Result<T, PipeforgeError>;

/// Process exit code for a successful run
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code when at least one node failed
pub const EXIT_EXECUTION_FAILED: i32 = 1;
/// Process exit code for validation and configuration errors
pub const EXIT_VALIDATION: i32 = 2;
/// Process exit code for dependency cycles
pub const EXIT_CYCLE: i32 = 3;
/// Process exit code for a cancelled run
pub const EXIT_CANCELLED: i32 = 130;

/// Coarse classification used for exit codes and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing input, secret, permission or reference
    Validation,
    /// Malformed dependency graph
    Graph,
    /// Definition lookup or registration problem
    Registry,
    /// Tool could not be started
    Execution,
    /// Filesystem, parsing and configuration errors
    Io,
}

/// Main error type for pipeforge
#[derive(Error, Debug, Diagnostic)]
pub enum PipeforgeError {
    // ─────────────────────────────────────────────────────────────────────────
    // Registry Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Definition '{name}@{version}' is already registered")]
    #[diagnostic(
        code(pipeforge::duplicate_version),
        help("Published definitions are immutable; tag the change as a new version")
    )]
    DuplicateVersion { name: String, version: String },

    #[error("Definition '{name}@{version}' not found")]
    #[diagnostic(
        code(pipeforge::definition_not_found),
        help("Run 'pipeforge definitions list' to see registered definitions")
    )]
    DefinitionNotFound { name: String, version: String },

    #[error("Definition '{name}' is invalid: {reason}")]
    #[diagnostic(code(pipeforge::invalid_definition))]
    InvalidDefinition { name: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Node '{node}' is missing required input '{input}'")]
    #[diagnostic(
        code(pipeforge::missing_required_input),
        help("Add '{input}' under the node's 'with' block or pass --set {node}.{input}=<value>")
    )]
    MissingRequiredInput { node: String, input: String },

    #[error("Node '{node}' is missing required secret '{secret}'")]
    #[diagnostic(
        code(pipeforge::missing_required_secret),
        help("Pass the secret with --secret or --secret-env and map it in the node's 'secrets' block")
    )]
    MissingRequiredSecret { node: String, secret: String },

    #[error("Node '{node}': input '{input}' expects {expected}, got {found}")]
    #[diagnostic(code(pipeforge::type_mismatch))]
    TypeMismatch {
        node: String,
        input: String,
        expected: String,
        found: String,
    },

    #[error("Node '{node}' supplies undeclared input '{input}'")]
    #[diagnostic(
        code(pipeforge::unknown_input),
        help("Run 'pipeforge definitions show' to see the inputs the definition accepts")
    )]
    UnknownInput { node: String, input: String },

    #[error("Node '{node}' requests '{scope}: {requested}' but the invocation grants '{granted}'")]
    #[diagnostic(
        code(pipeforge::permission_denied),
        help("Grant the scope in the invocation's 'permissions' block")
    )]
    PermissionDenied {
        node: String,
        scope: String,
        requested: String,
        granted: String,
    },

    #[error("Node '{node}': {reason}")]
    #[diagnostic(code(pipeforge::invalid_reference))]
    InvalidReference { node: String, reason: String },

    #[error("Invalid invocation: {reason}")]
    #[diagnostic(code(pipeforge::invalid_invocation))]
    InvalidInvocation {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Node '{node}' is declared more than once")]
    #[diagnostic(code(pipeforge::duplicate_node))]
    DuplicateNode { node: String },

    #[error("Node '{node}' needs unknown node '{dependency}'")]
    #[diagnostic(
        code(pipeforge::unknown_dependency),
        help("Check that '{dependency}' is declared in the invocation's nodes")
    )]
    UnknownDependency { node: String, dependency: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Circular dependency detected between: {}", nodes.join(", "))]
    #[diagnostic(
        code(pipeforge::circular_dependency),
        help("Review the 'needs' entries of these nodes to remove the cycle")
    )]
    CircularDependency { nodes: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(pipeforge::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    #[error("Tool '{tool}' could not be started: {error}")]
    #[diagnostic(code(pipeforge::tool_execution_failed))]
    ToolExecutionFailed {
        tool: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // File / Config Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invocation file not found: {path}")]
    #[diagnostic(
        code(pipeforge::invocation_not_found),
        help("Create one with 'pipeforge init' or pass the path explicitly")
    )]
    InvocationNotFound { path: PathBuf },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(pipeforge::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(pipeforge::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(pipeforge::config_error))]
    Config { message: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(pipeforge::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(pipeforge::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(pipeforge::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(pipeforge::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(pipeforge::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for PipeforgeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for PipeforgeError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for PipeforgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for PipeforgeError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for PipeforgeError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl PipeforgeError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateVersion { .. }
            | Self::DefinitionNotFound { .. }
            | Self::InvalidDefinition { .. } => ErrorKind::Registry,

            Self::MissingRequiredInput { .. }
            | Self::MissingRequiredSecret { .. }
            | Self::TypeMismatch { .. }
            | Self::UnknownInput { .. }
            | Self::PermissionDenied { .. }
            | Self::InvalidReference { .. }
            | Self::InvalidInvocation { .. }
            | Self::DuplicateNode { .. }
            | Self::UnknownDependency { .. } => ErrorKind::Validation,

            Self::CircularDependency { .. } => ErrorKind::Graph,

            Self::ToolNotFound { .. } | Self::ToolExecutionFailed { .. } => ErrorKind::Execution,

            Self::InvocationNotFound { .. }
            | Self::FileReadError { .. }
            | Self::FileWriteError { .. }
            | Self::Config { .. }
            | Self::Io { .. }
            | Self::Yaml { .. }
            | Self::Json { .. }
            | Self::Toml { .. }
            | Self::GlobPattern { .. } => ErrorKind::Io,
        }
    }

    /// Process exit code for this error
    ///
    /// Graph errors get their own code so calling automation can tell a
    /// malformed pipeline apart from bad inputs.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Graph => EXIT_CYCLE,
            ErrorKind::Execution => EXIT_EXECUTION_FAILED,
            ErrorKind::Validation | ErrorKind::Registry | ErrorKind::Io => EXIT_VALIDATION,
        }
    }

    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = RecoverySuggestion::install_tool(tool).action;
        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Create a file read error for a path
    pub fn read_error(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Self::FileReadError {
            path: path.to_path_buf(),
            error: error.to_string(),
        }
    }
}
