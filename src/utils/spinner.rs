// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Progress indicators
//!
//! Renders scheduler events as a progress bar with one line per finished
//! node.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use super::colors::state_symbol;
use crate::pipeline::{NodeEvent, NodeState};

/// Progress of a pipeline run
pub struct RunProgress {
    bar: ProgressBar,
    running: Vec<String>,
}

impl RunProgress {
    /// Progress over `total` nodes; `visible` is false for machine output
    pub fn new(total: usize, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::hidden())
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.blue} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("█▓░"));
        }
        bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            bar,
            running: Vec::new(),
        }
    }

    /// Apply one scheduler event
    pub fn handle(&mut self, event: &NodeEvent) {
        match event {
            NodeEvent::Started { node } => {
                self.running.push(node.clone());
            }
            NodeEvent::Finished { node, state, reason } => {
                self.running.retain(|n| n != node);
                self.bar.inc(1);

                let detail = reason
                    .as_ref()
                    .map(|r| format!(" ({})", r).dimmed().to_string())
                    .unwrap_or_default();
                let name = match state {
                    NodeState::Succeeded => node.normal(),
                    NodeState::Failed => node.red(),
                    _ => node.dimmed(),
                };
                self.bar
                    .println(format!("  {} {}{}", state_symbol(*state), name, detail));
            }
        }

        self.bar.set_message(self.running.join(", "));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn running(&self) -> &[String] {
        &self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StateReason;

    #[test]
    fn test_tracks_running_nodes() {
        let mut progress = RunProgress::new(2, false);

        progress.handle(&NodeEvent::Started { node: "build".into() });
        progress.handle(&NodeEvent::Started { node: "lint".into() });
        assert_eq!(progress.running(), ["build", "lint"]);

        progress.handle(&NodeEvent::Finished {
            node: "build".into(),
            state: NodeState::Failed,
            reason: Some(StateReason::CancelRequested),
        });
        assert_eq!(progress.running(), ["lint"]);
        progress.finish();
    }
}
