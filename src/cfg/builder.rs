//! CFG builder module
//!
//! Nodes are created lazily, starting from the method's first instruction
//! and following the static successor relation. Instructions that are not
//! reachable that way (typically exception handler code) are expanded
//! afterwards, so every retained instruction ends up with exactly one node.
//!
//! Malformed control flow never fails the build: a jump outside the method,
//! a fallthrough past the last instruction or a subroutine return without a
//! matching call simply contributes no edge.

use crate::bytecode::{InstructionIndex, InstructionKind, JumpCondition, LabelKind, Method};
use crate::cfg::{Cfg, CfgOptions, EdgeKind};
use log::debug;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// CFG builder for one method
pub struct CfgBuilder<'a> {
    method: &'a Method,
    options: CfgOptions,
    graph: DiGraph<InstructionIndex, EdgeKind>,
    /// Mapping from instruction position to node index
    nodes: Vec<Option<NodeIndex>>,
    /// Return sites of every subroutine return, computed on first use
    subroutine_returns: Option<HashMap<InstructionIndex, Vec<InstructionIndex>>>,
}

impl<'a> CfgBuilder<'a> {
    pub fn new(method: &'a Method, options: CfgOptions) -> Self {
        CfgBuilder {
            method,
            options,
            graph: DiGraph::new(),
            nodes: vec![None; method.len()],
            subroutine_returns: None,
        }
    }

    /// Build the CFG
    pub fn build(mut self) -> Cfg {
        let entry = self
            .retained(self.method.entry_label())
            .map(|index| self.expand_from(index));

        for position in 0..self.method.len() {
            let index = InstructionIndex::new(position);
            if self.nodes[position].is_none() && self.is_retained(index) {
                self.expand_from(index);
            }
        }

        Cfg::from_parts(self.graph, self.nodes, entry, self.options)
    }

    /// Create nodes for everything reachable from `start`, returning the node of `start`
    fn expand_from(&mut self, start: InstructionIndex) -> NodeIndex {
        let (start_node, _) = self.node_for(start);
        let mut worklist = vec![start];

        while let Some(index) = worklist.pop() {
            let node = self.nodes[index.value()].unwrap_or(start_node);
            for (target, kind) in self.successors_of(index) {
                let Some(target) = self.retained(target) else {
                    continue;
                };
                let (target_node, created) = self.node_for(target);
                if created {
                    worklist.push(target);
                }
                if self.graph.find_edge(node, target_node).is_none() {
                    self.graph.add_edge(node, target_node, kind);
                }
            }
        }

        start_node
    }

    fn node_for(&mut self, index: InstructionIndex) -> (NodeIndex, bool) {
        match self.nodes[index.value()] {
            Some(node) => (node, false),
            None => {
                let node = self.graph.add_node(index);
                self.nodes[index.value()] = Some(node);
                (node, true)
            }
        }
    }

    fn is_retained(&self, index: InstructionIndex) -> bool {
        match self.method.instruction(index) {
            Some(instruction) => !(self.options.exclude_labels && instruction.kind.is_bookkeeping()),
            None => false,
        }
    }

    /// Resolve an instruction to the nearest retained one
    ///
    /// With `exclude_labels`, labels resolve to the next instruction and
    /// unconditional jumps to their target. A cycle of such instructions
    /// resolves to nothing.
    fn retained(&self, mut index: InstructionIndex) -> Option<InstructionIndex> {
        for _ in 0..=self.method.len() {
            let instruction = self.method.instruction(index)?;
            if !self.options.exclude_labels {
                return Some(index);
            }
            match &instruction.kind {
                InstructionKind::Label { .. } => index = index.next(),
                InstructionKind::Jump {
                    condition: JumpCondition::Always,
                    target,
                } => index = *target,
                _ => return Some(index),
            }
        }
        debug!(
            "{}: cycle of elided instructions at {}",
            self.method.qualified_name(),
            index
        );
        None
    }

    /// Static successors of one instruction, with their edge kinds
    fn successors_of(&mut self, index: InstructionIndex) -> Vec<(InstructionIndex, EdgeKind)> {
        let method = self.method;
        let Some(instruction) = method.instruction(index) else {
            return Vec::new();
        };

        let mut successors = match &instruction.kind {
            InstructionKind::Label {
                kind: LabelKind::AbnormalTermination,
            }
            | InstructionKind::Return { .. }
            | InstructionKind::Throw => Vec::new(),
            InstructionKind::Jump {
                condition: JumpCondition::Always,
                target,
            }
            | InstructionKind::Subroutine { target } => vec![(*target, EdgeKind::Uncond)],
            InstructionKind::Jump { target, .. } => {
                vec![(*target, EdgeKind::True), (index.next(), EdgeKind::False)]
            }
            InstructionKind::TableSwitch { default, targets } => {
                std::iter::once((*default, EdgeKind::Default))
                    .chain(
                        targets
                            .iter()
                            .enumerate()
                            .map(|(i, target)| (*target, EdgeKind::Switch(i))),
                    )
                    .collect()
            }
            InstructionKind::LookupSwitch { default, cases } => {
                std::iter::once((*default, EdgeKind::Default))
                    .chain(
                        cases
                            .iter()
                            .enumerate()
                            .map(|(i, (_, target))| (*target, EdgeKind::Switch(i))),
                    )
                    .collect()
            }
            InstructionKind::Ret { .. } => self
                .return_sites(index)
                .into_iter()
                .map(|site| (site, EdgeKind::SubroutineReturn))
                .collect(),
            _ => vec![(index.next(), EdgeKind::Fall)],
        };

        successors.retain(|(target, _)| {
            let valid = target.value() < method.len();
            if !valid {
                debug!(
                    "{}: instruction {} has successor {} outside the method",
                    method.qualified_name(),
                    index,
                    target
                );
            }
            valid
        });

        if self.options.add_try_catch_edges {
            for handler in &method.exception_handlers {
                if handler.covers(index) {
                    successors.push((handler.handler, EdgeKind::Exception));
                }
            }
        }

        successors
    }

    /// Instructions following every call site whose subroutine reaches `ret`
    fn return_sites(&mut self, ret: InstructionIndex) -> Vec<InstructionIndex> {
        if self.subroutine_returns.is_none() {
            self.subroutine_returns = Some(self.find_subroutine_returns());
        }
        let sites = self
            .subroutine_returns
            .as_ref()
            .and_then(|returns| returns.get(&ret))
            .cloned()
            .unwrap_or_default();
        if sites.is_empty() {
            debug!(
                "{}: subroutine return {} has no matching call",
                self.method.qualified_name(),
                ret
            );
        }
        sites
    }

    /// Forward search from each subroutine call to the returns it reaches
    ///
    /// The search does not descend into nested subroutines: a nested call
    /// continues at its own return site, so nested returns are never
    /// attributed to the outer call.
    fn find_subroutine_returns(&self) -> HashMap<InstructionIndex, Vec<InstructionIndex>> {
        let mut returns: HashMap<InstructionIndex, Vec<InstructionIndex>> = HashMap::new();

        for call in &self.method.instructions {
            let InstructionKind::Subroutine { target } = call.kind else {
                continue;
            };
            let return_site = call.index.next();

            let mut visited = HashSet::new();
            let mut queue = VecDeque::from([target]);
            while let Some(index) = queue.pop_front() {
                if !visited.insert(index) {
                    continue;
                }
                let Some(instruction) = self.method.instruction(index) else {
                    continue;
                };
                let next: Vec<InstructionIndex> = match &instruction.kind {
                    InstructionKind::Ret { .. } => {
                        let sites = returns.entry(index).or_default();
                        if !sites.contains(&return_site) {
                            sites.push(return_site);
                        }
                        Vec::new()
                    }
                    InstructionKind::Subroutine { .. } => vec![index.next()],
                    InstructionKind::Return { .. }
                    | InstructionKind::Throw
                    | InstructionKind::Label {
                        kind: LabelKind::AbnormalTermination,
                    } => Vec::new(),
                    InstructionKind::Jump {
                        condition: JumpCondition::Always,
                        target,
                    } => vec![*target],
                    InstructionKind::Jump { target, .. } => vec![*target, index.next()],
                    kind @ (InstructionKind::TableSwitch { .. }
                    | InstructionKind::LookupSwitch { .. }) => kind.branch_targets(),
                    _ => vec![index.next()],
                };
                queue.extend(next);
            }
        }

        returns
    }
}
