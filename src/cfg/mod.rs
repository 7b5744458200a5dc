//! Control Flow Graph (CFG) module
//!
//! This module builds per-method instruction-level control flow graphs and
//! derives inverse control dependences from them.

pub mod analysis;
pub mod builder;
pub mod control_dependence;
pub mod node_set;
pub mod visualization;

pub use analysis::{Reachability, ReachabilityAnalyser, WorklistOptions};
pub use builder::CfgBuilder;
pub use control_dependence::{ControlDependenceCache, ControlDependences};
pub use node_set::NodeSet;

use crate::bytecode::{InstructionIndex, Method};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// Edge kind in the control flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Unconditional jump or subroutine call
    Uncond,
    /// Conditional jump (taken)
    True,
    /// Conditional jump (not taken)
    False,
    /// Switch case jump
    Switch(usize),
    /// Default case for switch
    Default,
    /// Fallthrough to next instruction
    Fall,
    /// Return from a subroutine to the instruction after its call site
    SubroutineReturn,
    /// Edge into an exception handler
    Exception,
}

/// Options controlling CFG construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CfgOptions {
    /// Skip labels and unconditional jumps; lookups resolve to the next retained node
    pub exclude_labels: bool,
    /// Add an edge from every protected instruction to its handler
    pub add_try_catch_edges: bool,
}

/// Instruction-level CFG of one method
///
/// Nodes live in the petgraph arena; `nodes` maps instruction positions to
/// node indices so that successor and predecessor lists never own nodes.
#[derive(Debug, Clone)]
pub struct Cfg {
    graph: DiGraph<InstructionIndex, EdgeKind>,
    nodes: Vec<Option<NodeIndex>>,
    entry: Option<NodeIndex>,
    options: CfgOptions,
}

impl Cfg {
    /// Build the CFG of `method`
    pub fn build(method: &Method, options: CfgOptions) -> Self {
        CfgBuilder::new(method, options).build()
    }

    pub(crate) fn from_parts(
        graph: DiGraph<InstructionIndex, EdgeKind>,
        nodes: Vec<Option<NodeIndex>>,
        entry: Option<NodeIndex>,
        options: CfgOptions,
    ) -> Self {
        Self {
            graph,
            nodes,
            entry,
            options,
        }
    }

    /// Get the underlying graph
    pub fn graph(&self) -> &DiGraph<InstructionIndex, EdgeKind> {
        &self.graph
    }

    pub fn options(&self) -> CfgOptions {
        self.options
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node of the method's first retained instruction
    pub fn entry_node(&self) -> Option<NodeIndex> {
        self.entry
    }

    /// Node of exactly this instruction, if it was retained
    pub fn node_of(&self, index: InstructionIndex) -> Option<NodeIndex> {
        self.nodes.get(index.value()).copied().flatten()
    }

    /// Node of this instruction, or of the nearest retained instruction after it
    pub fn lookup(&self, index: InstructionIndex) -> Option<NodeIndex> {
        self.nodes
            .get(index.value()..)?
            .iter()
            .find_map(|node| *node)
    }

    /// Instruction represented by a node
    pub fn instruction(&self, node: NodeIndex) -> InstructionIndex {
        self.graph[node]
    }

    /// Successor instructions, in ascending order
    pub fn successors(&self, index: InstructionIndex) -> Vec<InstructionIndex> {
        self.neighbors(index, Direction::Outgoing)
    }

    /// Predecessor instructions, in ascending order
    pub fn predecessors(&self, index: InstructionIndex) -> Vec<InstructionIndex> {
        self.neighbors(index, Direction::Incoming)
    }

    fn neighbors(&self, index: InstructionIndex, direction: Direction) -> Vec<InstructionIndex> {
        let Some(node) = self.lookup(index) else {
            return Vec::new();
        };
        let mut result: Vec<InstructionIndex> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n])
            .collect();
        result.sort();
        result.dedup();
        result
    }

    /// Out-degree of a node
    pub fn out_degree(&self, node: NodeIndex) -> usize {
        self.graph.neighbors_directed(node, Direction::Outgoing).count()
    }

    /// Export CFG to DOT format for visualization
    pub fn to_dot(&self, method: &Method) -> String {
        visualization::generate_dot(self, method, &visualization::DotOptions::default())
    }
}
