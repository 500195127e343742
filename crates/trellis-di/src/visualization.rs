//! Plan visualization for development and debugging
//!
//! Renders a [`ResolutionPlan`] as Graphviz DOT or Mermaid. Eager edges are
//! solid; deferred edges are dashed, since they are the ones allowed to close
//! a cycle.
//!
//! ## Example
//!
//! ```rust
//! use trellis_di::visualization::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_node("Database", "singleton", "app");
//! graph.add_node("UserService", "scoped", "request");
//! graph.add_dependency("UserService", "Database");
//!
//! let dot = graph.to_dot();
//! assert!(dot.contains("\"UserService\" -> \"Database\""));
//! ```

use crate::planner::{EdgeSource, ResolutionPlan};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

/// One provider in the rendered graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
	pub name: String,
	/// "singleton", "scoped" or "transient"
	pub lifetime: String,
	pub scope: String,
}

/// Edge between two providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
	pub from: String,
	pub to: String,
	pub deferred: bool,
}

/// Dependency graph for rendering.
#[derive(Debug, Default)]
pub struct DependencyGraph {
	nodes: BTreeMap<String, GraphNode>,
	edges: Vec<GraphEdge>,
}

impl DependencyGraph {
	pub fn new() -> Self {
		Self::default()
	}

	/// Graph of every workflow in `plan` and its slot edges.
	pub fn from_plan(plan: &ResolutionPlan) -> Self {
		let mut graph = Self::new();
		for workflow in plan.workflows() {
			graph.add_node(
				workflow.key().to_string(),
				workflow.lifetime().as_str(),
				workflow.scope().name.as_str(),
			);
		}
		for workflow in plan.workflows() {
			let from = workflow.key().to_string();
			for edge in workflow.wiring() {
				match &edge.source {
					EdgeSource::Slot(slot) => {
						if let Some(target) = plan.get_by_slot(*slot) {
							graph.add_dependency(from.clone(), target.key().to_string());
						}
					}
					EdgeSource::All(slots) => {
						for slot in slots {
							if let Some(target) = plan.get_by_slot(*slot) {
								graph.add_dependency(from.clone(), target.key().to_string());
							}
						}
					}
					EdgeSource::Deferred(key) => {
						graph.add_deferred_dependency(from.clone(), key.to_string());
					}
					EdgeSource::Context(_) => {}
				}
			}
		}
		graph
	}

	pub fn add_node(
		&mut self,
		name: impl Into<String>,
		lifetime: impl Into<String>,
		scope: impl Into<String>,
	) {
		let name = name.into();
		self.nodes.insert(
			name.clone(),
			GraphNode {
				name,
				lifetime: lifetime.into(),
				scope: scope.into(),
			},
		);
	}

	pub fn add_dependency(&mut self, from: impl Into<String>, to: impl Into<String>) {
		self.edges.push(GraphEdge {
			from: from.into(),
			to: to.into(),
			deferred: false,
		});
	}

	pub fn add_deferred_dependency(&mut self, from: impl Into<String>, to: impl Into<String>) {
		self.edges.push(GraphEdge {
			from: from.into(),
			to: to.into(),
			deferred: true,
		});
	}

	pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
		self.nodes.values()
	}

	pub fn edges(&self) -> &[GraphEdge] {
		&self.edges
	}

	/// Graphviz DOT output.
	pub fn to_dot(&self) -> String {
		let mut output = String::from("digraph DependencyGraph {\n");
		output.push_str("\trankdir=LR;\n");
		output.push_str("\tnode [shape=box, style=rounded];\n\n");

		for node in self.nodes.values() {
			let color = match node.lifetime.as_str() {
				"singleton" => "lightblue",
				"scoped" => "lightgreen",
				"transient" => "lightyellow",
				_ => "white",
			};
			let _ = writeln!(
				output,
				"\t\"{}\" [label=\"{}\\n({})\", fillcolor={}, style=filled];",
				escape(&node.name),
				escape(&node.name),
				node.scope,
				color
			);
		}

		output.push('\n');

		for edge in &self.edges {
			let style = if edge.deferred { " [style=dashed]" } else { "" };
			let _ = writeln!(
				output,
				"\t\"{}\" -> \"{}\"{};",
				escape(&edge.from),
				escape(&edge.to),
				style
			);
		}

		output.push_str("}\n");
		output
	}

	/// Mermaid flowchart output.
	pub fn to_mermaid(&self) -> String {
		let ids: BTreeMap<&str, String> = self
			.nodes
			.keys()
			.enumerate()
			.map(|(index, name)| (name.as_str(), format!("n{}", index)))
			.collect();
		let id_of = |name: &str| ids.get(name).cloned().unwrap_or_else(|| sanitize(name));

		let mut output = String::from("flowchart LR\n");
		for node in self.nodes.values() {
			let _ = writeln!(
				output,
				"\t{}[\"{}<br/>{} @ {}\"]",
				id_of(&node.name),
				node.name.replace('"', "'"),
				node.lifetime,
				node.scope
			);
		}
		for edge in &self.edges {
			let arrow = if edge.deferred { "-.->" } else { "-->" };
			let _ = writeln!(output, "\t{} {} {}", id_of(&edge.from), arrow, id_of(&edge.to));
		}
		output
	}

	/// Cycles in the graph, deferred edges included.
	///
	/// A plan never contains an eager cycle, so every cycle reported for a
	/// planned graph runs through at least one deferred edge.
	pub fn detect_cycles(&self) -> Vec<Vec<String>> {
		let mut cycles = Vec::new();
		let mut visited = HashSet::new();
		let mut rec_stack = HashSet::new();

		for node_name in self.nodes.keys() {
			if !visited.contains(node_name.as_str()) {
				let mut path = Vec::new();
				self.dfs_detect_cycles(node_name, &mut visited, &mut rec_stack, &mut path, &mut cycles);
			}
		}

		cycles
	}

	fn dfs_detect_cycles(
		&self,
		node: &str,
		visited: &mut HashSet<String>,
		rec_stack: &mut HashSet<String>,
		path: &mut Vec<String>,
		cycles: &mut Vec<Vec<String>>,
	) {
		visited.insert(node.to_string());
		rec_stack.insert(node.to_string());
		path.push(node.to_string());

		let dependencies: Vec<&str> = self
			.edges
			.iter()
			.filter(|edge| edge.from == node)
			.map(|edge| edge.to.as_str())
			.collect();

		for dep in dependencies {
			if !visited.contains(dep) {
				self.dfs_detect_cycles(dep, visited, rec_stack, path, cycles);
			} else if rec_stack.contains(dep) {
				if let Some(cycle_start) = path.iter().position(|p| p == dep) {
					cycles.push(path[cycle_start..].to_vec());
				}
			}
		}

		path.pop();
		rec_stack.remove(node);
	}

	pub fn statistics(&self) -> GraphStatistics {
		let count = |lifetime: &str| self.nodes.values().filter(|n| n.lifetime == lifetime).count();
		GraphStatistics {
			node_count: self.nodes.len(),
			edge_count: self.edges.len(),
			deferred_edge_count: self.edges.iter().filter(|e| e.deferred).count(),
			singleton_count: count("singleton"),
			scoped_count: count("scoped"),
			transient_count: count("transient"),
		}
	}
}

/// Counts over a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStatistics {
	pub node_count: usize,
	pub edge_count: usize,
	pub deferred_edge_count: usize,
	pub singleton_count: usize,
	pub scoped_count: usize,
	pub transient_count: usize,
}

fn escape(name: &str) -> String {
	name.replace('\\', "\\\\").replace('"', "\\\"")
}

fn sanitize(name: &str) -> String {
	name.chars()
		.map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
		.collect()
}

/// DOT rendering of `plan`.
pub fn render_dot(plan: &ResolutionPlan) -> String {
	DependencyGraph::from_plan(plan).to_dot()
}

/// Mermaid rendering of `plan`.
pub fn render_mermaid(plan: &ResolutionPlan) -> String {
	DependencyGraph::from_plan(plan).to_mermaid()
}
