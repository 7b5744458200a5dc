//! CFG visualization module
//!
//! This module contains visualization utilities for CFGs.

use crate::bytecode::Method;
use crate::cfg::{Cfg, ControlDependences, EdgeKind};
use petgraph::visit::EdgeRef;

/// DOT generation options
#[derive(Debug, Clone)]
pub struct DotOptions {
    /// Include edge labels
    pub include_labels: bool,
    /// Include edge colors
    pub include_colors: bool,
    /// Include line numbers and instruction text in node labels
    pub include_node_details: bool,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            include_labels: true,
            include_colors: true,
            include_node_details: true,
        }
    }
}

/// Generate DOT representation of a CFG
pub fn generate_dot(cfg: &Cfg, method: &Method, options: &DotOptions) -> String {
    let mut dot = String::new();
    dot.push_str(&format!("digraph \"{}\" {{\n", escape(&method.to_string())));
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box];\n\n");

    let graph = cfg.graph();

    // Add nodes
    for node in graph.node_indices() {
        let index = graph[node];
        let label = match method.instruction(index) {
            Some(instruction) if options.include_node_details => format!(
                "{}: {} (line {})",
                index,
                escape(&instruction.kind.to_string()),
                instruction.line
            ),
            _ => format!("{}", index),
        };
        dot.push_str(&format!("  {} [label=\"{}\"];\n", node.index(), label));
    }

    dot.push('\n');

    // Add edges with labels and colors
    for edge in graph.edge_references() {
        let mut edge_str = format!("  {} -> {}", edge.source().index(), edge.target().index());
        let mut attributes = Vec::new();

        if options.include_labels {
            if let Some(label) = get_edge_label(edge.weight()) {
                attributes.push(format!("label=\"{}\"", label));
            }
        }

        if options.include_colors {
            attributes.push(format!("color=\"{}\"", get_edge_color(edge.weight())));
        }

        if !attributes.is_empty() {
            edge_str.push_str(&format!(" [{}]", attributes.join(", ")));
        }

        edge_str.push_str(";\n");
        dot.push_str(&edge_str);
    }

    dot.push_str("}\n");
    dot
}

/// Render control dependences as dashed edges from each decision to its dependents
pub fn generate_control_dependence_dot(dependences: &ControlDependences, method: &Method) -> String {
    let mut dot = String::new();
    dot.push_str(&format!(
        "digraph \"{} control dependences\" {{\n",
        escape(&method.to_string())
    ));
    dot.push_str("  node [shape=box];\n");
    for (index, dependents) in dependences.iter() {
        for dependent in dependents {
            dot.push_str(&format!(
                "  {} -> {} [style=dashed];\n",
                index.value(),
                dependent.value()
            ));
        }
    }
    dot.push_str("}\n");
    dot
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Get edge label for DOT
fn get_edge_label(edge_kind: &EdgeKind) -> Option<String> {
    match edge_kind {
        EdgeKind::True => Some("T".to_string()),
        EdgeKind::False => Some("F".to_string()),
        EdgeKind::Switch(idx) => Some(format!("Sw{}", idx)),
        EdgeKind::Default => Some("Def".to_string()),
        EdgeKind::Fall => None,
        EdgeKind::SubroutineReturn => Some("Ret".to_string()),
        EdgeKind::Exception => Some("Exc".to_string()),
        EdgeKind::Uncond => None,
    }
}

/// Get edge color for DOT
fn get_edge_color(edge_kind: &EdgeKind) -> &'static str {
    match edge_kind {
        EdgeKind::True => "green",
        EdgeKind::False => "red",
        EdgeKind::Switch(_) => "blue",
        EdgeKind::Default => "orange",
        EdgeKind::Fall => "gray",
        EdgeKind::SubroutineReturn => "cyan",
        EdgeKind::Exception => "purple",
        EdgeKind::Uncond => "black",
    }
}
