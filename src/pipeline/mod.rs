// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Pipeline invocations and their execution
//!
//! An invocation composes registered definitions into a DAG of nodes.
//! Binding checks each node against its definition's contract, the DAG
//! builder orders the nodes and the scheduler runs them.

mod binding;
mod dag;
pub mod expr;
mod invocation;
mod node;
mod result;
mod scheduler;
mod secrets;
mod trigger;
mod validation;

pub use binding::{upstream_definitions, BoundNode, BoundValue, InputResolver};
pub use dag::{Dag, DagBuilder};
pub use invocation::{
    Condition, EdgeSpec, FailurePolicy, Need, NeedSpec, NodeSpec, PipelineInvocation, SecretMapping,
};
pub use node::{ExecutionNode, NodeState, StateReason};
pub use result::{
    Artifact, FailureReason, NodeOutcome, NodeReport, RunError, RunResult, RunStatus, StepLog,
};
pub use scheduler::{ExecutionPlan, NodeEvent, NodeRunner, NodeWork, Scheduler, SchedulerOptions};
pub use secrets::{mask, SecretStore, SecretValue, REDACTED};
pub use trigger::{EventType, TriggerEvent};
pub use validation::{PipelineValidator, ValidationResult};
