// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Graph command - visualize an invocation as a graph

use miette::Result;
use std::path::PathBuf;

use super::{load_invocation, GraphFormat};
use crate::errors::EXIT_SUCCESS;
use crate::pipeline::DagBuilder;

/// Run the graph command
pub async fn run(invocation_path: PathBuf, format: GraphFormat) -> Result<i32> {
    let invocation = load_invocation(&invocation_path)?;
    let dag = DagBuilder::build(&invocation.node_ids(), &invocation.edges())?;

    let output = match format {
        GraphFormat::Text => dag.to_text(|id| {
            invocation
                .node(id)
                .map(|n| n.uses.to_string())
                .unwrap_or_default()
        }),
        GraphFormat::Dot => dag.to_dot(),
        GraphFormat::Mermaid => dag.to_mermaid(),
    };

    println!("{}", output);

    Ok(EXIT_SUCCESS)
}
