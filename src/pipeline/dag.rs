// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! DAG (Directed Acyclic Graph) builder for node dependencies
//!
//! Builds and validates the dependency graph of an invocation, producing a
//! deterministic execution order and reporting every node caught in a cycle.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use super::invocation::{EdgeSpec, FailurePolicy};
use crate::errors::{PipeforgeError, PipeforgeResult};

/// A validated, acyclic dependency graph
///
/// Edges point from producer to consumer. Node indices follow declaration
/// order, which is also the tie-break for the topological order.
#[derive(Debug, Clone)]
pub struct Dag {
    graph: DiGraph<String, FailurePolicy>,
    name_to_index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

/// Builds [`Dag`]s from node ids and edges
pub struct DagBuilder;

impl DagBuilder {
    /// Build a DAG from node ids (in declaration order) and edges
    pub fn build<S: AsRef<str>>(nodes: &[S], edges: &[EdgeSpec]) -> PipeforgeResult<Dag> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for id in nodes {
            let id = id.as_ref();
            if name_to_index.contains_key(id) {
                return Err(PipeforgeError::DuplicateNode { node: id.to_string() });
            }
            let idx = graph.add_node(id.to_string());
            name_to_index.insert(id.to_string(), idx);
        }

        for edge in edges {
            let to = *name_to_index
                .get(&edge.to)
                .ok_or_else(|| PipeforgeError::InvalidInvocation {
                    reason: format!("edge '{}' -> '{}' targets an unknown node", edge.from, edge.to),
                    help: None,
                })?;
            let from = *name_to_index
                .get(&edge.from)
                .ok_or_else(|| PipeforgeError::UnknownDependency {
                    node: edge.to.clone(),
                    dependency: edge.from.clone(),
                })?;

            // Repeated edges collapse; blocking wins over continue-on-error
            match graph.find_edge(from, to) {
                Some(existing) => {
                    if edge.policy == FailurePolicy::Block {
                        graph[existing] = FailurePolicy::Block;
                    }
                }
                None => {
                    graph.add_edge(from, to, edge.policy);
                }
            }
        }

        let order = topological_sort(&graph).map_err(|nodes| PipeforgeError::CircularDependency { nodes })?;

        Ok(Dag {
            graph,
            name_to_index,
            order,
        })
    }
}

/// Kahn's algorithm, always taking the lowest ready index
///
/// On failure returns the ids of every node that sits on a cycle, in
/// declaration order.
fn topological_sort(graph: &DiGraph<String, FailurePolicy>) -> Result<Vec<NodeIndex>, Vec<String>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == graph.node_count() {
        return Ok(order);
    }

    let mut members: Vec<NodeIndex> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .collect();
    members.sort();

    Err(members.into_iter().map(|n| graph[n].clone()).collect())
}

impl Dag {
    /// Number of nodes
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Whether the graph contains a node
    pub fn contains(&self, id: &str) -> bool {
        self.name_to_index.contains_key(id)
    }

    /// Node ids in declaration order
    pub fn node_ids(&self) -> Vec<&str> {
        self.graph.node_weights().map(String::as_str).collect()
    }

    /// Node ids in execution order
    ///
    /// Every node appears after all of its dependencies. Among nodes that
    /// are ready at the same time, declaration order wins.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|n| self.graph[*n].as_str()).collect()
    }

    /// Owned copy of [`Dag::topological_order`]
    pub fn topological_order_names(&self) -> Vec<String> {
        self.order.iter().map(|n| self.graph[*n].clone()).collect()
    }

    /// Nodes without dependencies
    pub fn roots(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|n| self.graph.neighbors_directed(**n, Direction::Incoming).count() == 0)
            .map(|n| self.graph[*n].as_str())
            .collect()
    }

    /// Direct dependencies of a node with their failure policies
    pub fn dependencies(&self, id: &str) -> Vec<(&str, FailurePolicy)> {
        let Some(node) = self.name_to_index.get(id) else {
            return Vec::new();
        };

        let mut deps: Vec<(NodeIndex, FailurePolicy)> = self
            .graph
            .edges_directed(*node, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .collect();
        deps.sort_by_key(|(n, _)| *n);

        deps.into_iter()
            .map(|(n, policy)| (self.graph[n].as_str(), policy))
            .collect()
    }

    /// Failure policy of the edge `from -> to`, if present
    pub fn edge_policy(&self, from: &str, to: &str) -> Option<FailurePolicy> {
        let from = self.name_to_index.get(from)?;
        let to = self.name_to_index.get(to)?;
        self.graph.find_edge(*from, *to).map(|e| self.graph[e])
    }

    /// Nodes that directly depend on `id`
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        let Some(node) = self.name_to_index.get(id) else {
            return Vec::new();
        };

        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(*node, Direction::Outgoing)
            .collect();
        deps.sort();
        deps.into_iter().map(|n| self.graph[n].as_str()).collect()
    }

    /// Check if `a` depends (directly or transitively) on `b`
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let (Some(node_a), Some(node_b)) = (self.name_to_index.get(a), self.name_to_index.get(b)) else {
            return false;
        };
        a != b && petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Group nodes by depth: a node's level is one more than its deepest dependency
    ///
    /// Nodes in the same level may run concurrently.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut levels: Vec<Vec<&str>> = Vec::new();

        for node in &self.order {
            let level = self
                .graph
                .neighbors_directed(*node, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(*node, level);

            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(self.graph[*node].as_str());
        }

        levels
    }

    /// Sub-graph holding the selected nodes plus everything they depend on
    pub fn restrict<S: AsRef<str>>(&self, selected: &[S]) -> PipeforgeResult<Dag> {
        let mut keep: BTreeSet<NodeIndex> = BTreeSet::new();
        let mut stack = Vec::new();

        for id in selected {
            let id = id.as_ref();
            let node = self
                .name_to_index
                .get(id)
                .ok_or_else(|| PipeforgeError::InvalidInvocation {
                    reason: format!("unknown node '{}'", id),
                    help: Some("Run `pipeforge graph` to list the invocation's nodes".into()),
                })?;
            stack.push(*node);
        }

        while let Some(node) = stack.pop() {
            if keep.insert(node) {
                stack.extend(self.graph.neighbors_directed(node, Direction::Incoming));
            }
        }

        let nodes: Vec<&str> = keep.iter().map(|n| self.graph[*n].as_str()).collect();
        let edges: Vec<EdgeSpec> = self
            .graph
            .edge_references()
            .filter(|e| keep.contains(&e.source()) && keep.contains(&e.target()))
            .map(|e| {
                EdgeSpec::new(self.graph[e.source()].clone(), self.graph[e.target()].clone())
                    .with_policy(*e.weight())
            })
            .collect();

        DagBuilder::build(&nodes, &edges)
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for node in &self.order {
            let name = &self.graph[*node];
            out.push_str(&format!("    {}[{}]\n", mermaid_id(name), name));
        }

        for edge in self.sorted_edges() {
            let arrow = match edge.2 {
                FailurePolicy::Block => "-->",
                FailurePolicy::ContinueOnError => "-.->",
            };
            out.push_str(&format!(
                "    {} {} {}\n",
                mermaid_id(edge.0),
                arrow,
                mermaid_id(edge.1)
            ));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for node in &self.order {
            out.push_str(&format!("    \"{}\";\n", self.graph[*node]));
        }

        for (from, to, policy) in self.sorted_edges() {
            match policy {
                FailurePolicy::Block => out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to)),
                FailurePolicy::ContinueOnError => {
                    out.push_str(&format!("    \"{}\" -> \"{}\" [style=dashed];\n", from, to))
                }
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    ///
    /// `describe` supplies the label shown next to each node, such as the
    /// definition it uses.
    pub fn to_text<F>(&self, describe: F) -> String
    where
        F: Fn(&str) -> String,
    {
        let mut out = String::new();

        for (i, id) in self.topological_order().into_iter().enumerate() {
            out.push_str(&format!("{}. {} ({})", i + 1, id, describe(id)));

            let deps = self.dependencies(id);
            if !deps.is_empty() {
                let deps: Vec<String> = deps
                    .into_iter()
                    .map(|(dep, policy)| match policy {
                        FailurePolicy::Block => dep.to_string(),
                        FailurePolicy::ContinueOnError => format!("{}?", dep),
                    })
                    .collect();
                out.push_str(&format!(" [needs: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        out
    }

    fn sorted_edges(&self) -> Vec<(&str, &str, FailurePolicy)> {
        let mut edges: Vec<(NodeIndex, NodeIndex, FailurePolicy)> = self
            .graph
            .edge_references()
            .map(|e| (e.source(), e.target(), *e.weight()))
            .collect();
        edges.sort_by_key(|(from, to, _)| (*from, *to));

        edges
            .into_iter()
            .map(|(from, to, policy)| (self.graph[from].as_str(), self.graph[to].as_str(), policy))
            .collect()
    }
}

/// Mermaid node ids cannot contain dashes
fn mermaid_id(name: &str) -> String {
    name.replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(nodes: &[&str], edges: &[(&str, &str)]) -> PipeforgeResult<Dag> {
        let edges: Vec<EdgeSpec> = edges.iter().map(|(f, t)| EdgeSpec::new(*f, *t)).collect();
        DagBuilder::build(nodes, &edges)
    }

    fn position(order: &[&str], id: &str) -> usize {
        order.iter().position(|n| *n == id).unwrap()
    }

    #[test]
    fn test_linear_dag() {
        let dag = build(&["a", "b", "c"], &[("a", "b"), ("b", "c")]).unwrap();
        assert_eq!(dag.topological_order(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_order_is_deterministic() {
        // Declared out of dependency order on purpose
        let dag = build(&["c", "a", "b"], &[("a", "c"), ("b", "c")]).unwrap();
        assert_eq!(dag.topological_order(), vec!["a", "b", "c"]);

        let again = build(&["c", "a", "b"], &[("b", "c"), ("a", "c")]).unwrap();
        assert_eq!(again.topological_order(), dag.topological_order());
    }

    #[test]
    fn test_diamond_dag() {
        let dag = build(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        )
        .unwrap();

        assert_eq!(dag.topological_order(), vec!["a", "b", "c", "d"]);
        assert_eq!(dag.levels(), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert_eq!(dag.roots(), vec!["a"]);
    }

    #[test]
    fn test_every_edge_respects_order() {
        let edges = [
            ("lint", "test"),
            ("build", "scan"),
            ("test", "publish"),
            ("scan", "publish"),
            ("build", "publish"),
        ];
        let dag = build(&["publish", "scan", "test", "build", "lint"], &edges).unwrap();
        let order = dag.topological_order();

        assert_eq!(order.len(), 5);
        for (from, to) in edges {
            assert!(position(&order, from) < position(&order, to), "{} before {}", from, to);
        }
    }

    #[test]
    fn test_circular_dependency_reports_members() {
        let result = build(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "b"), ("a", "d")],
        );

        match result {
            Err(PipeforgeError::CircularDependency { nodes }) => {
                assert_eq!(nodes, vec!["b", "c"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let result = build(&["a", "b"], &[("a", "a")]);
        assert!(matches!(
            result,
            Err(PipeforgeError::CircularDependency { ref nodes }) if nodes == &vec!["a".to_string()]
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let result = build(&["a"], &[("nonexistent", "a")]);
        assert!(matches!(
            result,
            Err(PipeforgeError::UnknownDependency { ref node, ref dependency })
                if node == "a" && dependency == "nonexistent"
        ));
    }

    #[test]
    fn test_duplicate_node() {
        let result = build(&["a", "a"], &[]);
        assert!(matches!(result, Err(PipeforgeError::DuplicateNode { .. })));
    }

    #[test]
    fn test_empty_graph() {
        let dag = build(&[], &[]).unwrap();
        assert!(dag.is_empty());
        assert!(dag.topological_order().is_empty());
    }

    #[test]
    fn test_depends_on_check() {
        let dag = build(&["a", "b", "c"], &[("a", "b"), ("b", "c")]).unwrap();

        assert!(dag.depends_on("c", "a"));
        assert!(dag.depends_on("c", "b"));
        assert!(!dag.depends_on("a", "c"));
        assert!(!dag.depends_on("a", "a"));
    }

    #[test]
    fn test_repeated_edge_keeps_blocking_policy() {
        let edges = vec![
            EdgeSpec::new("a", "b").with_policy(FailurePolicy::ContinueOnError),
            EdgeSpec::new("a", "b"),
        ];
        let dag = DagBuilder::build(&["a", "b"], &edges).unwrap();
        assert_eq!(dag.dependencies("b"), vec![("a", FailurePolicy::Block)]);
        assert_eq!(dag.edge_policy("a", "b"), Some(FailurePolicy::Block));
        assert_eq!(dag.edge_policy("b", "a"), None);
    }

    #[test]
    fn test_restrict_keeps_transitive_dependencies() {
        let dag = build(
            &["lint", "build", "scan", "deploy"],
            &[("build", "scan"), ("scan", "deploy")],
        )
        .unwrap();

        let sub = dag.restrict(&["scan"]).unwrap();
        assert_eq!(sub.topological_order(), vec!["build", "scan"]);
        assert!(dag.restrict(&["missing"]).is_err());
    }

    #[test]
    fn test_renderers() {
        let edges = vec![
            EdgeSpec::new("build-image", "scan"),
            EdgeSpec::new("build-image", "notify").with_policy(FailurePolicy::ContinueOnError),
        ];
        let dag = DagBuilder::build(&["build-image", "scan", "notify"], &edges).unwrap();

        let mermaid = dag.to_mermaid();
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("build_image --> scan"));
        assert!(mermaid.contains("build_image -.-> notify"));

        let dot = dag.to_dot();
        assert!(dot.contains("\"build-image\" -> \"notify\" [style=dashed];"));

        let text = dag.to_text(|_| "docker-build@v1".to_string());
        assert!(text.starts_with("1. build-image (docker-build@v1)\n"));
        assert!(text.contains("3. notify (docker-build@v1) [needs: build-image?]"));
    }
}
