// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! # pipeforge - Reusable Pipeline Composition & Execution Engine
//!
//! `pipeforge` composes versioned, immutable workflow definitions into a
//! dependency graph and runs them with bounded concurrency.
//!
//! ## Features
//!
//! - **Versioned registry** - Definitions are published as `name@version` and never change
//! - **Contract checking** - Inputs, secrets and permissions are bound before anything runs
//! - **DAG scheduling** - Independent nodes run concurrently, failures propagate to dependents
//! - **Cancellation and timeouts** - Interrupts and budgets stop running tools cleanly
//!
//! ## Quick Start
//!
//! ```bash
//! # Scaffold example definitions and a pipeline
//! pipeforge init
//!
//! # Check the pipeline without running it
//! pipeforge validate
//!
//! # Run it
//! pipeforge run --secret-env REGISTRY_TOKEN
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executors;
pub mod pipeline;
pub mod registry;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{Engine, RunRequest};
pub use errors::{PipeforgeError, PipeforgeResult};
pub use pipeline::{PipelineInvocation, RunResult, RunStatus, TriggerEvent};
pub use registry::{Registry, WorkflowDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
