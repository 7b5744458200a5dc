//! Inverse control dependences
//!
//! For every instruction of a method, the set of instructions whose execution
//! it decides. Branches with more than one successor decide the instructions
//! that some successor surely reaches and another one may bypass. Catch block
//! labels decide the instructions only guaranteed because an exception was
//! caught: the handler's surely-reached set minus everything reachable from
//! the method entry without exceptional edges.

use crate::bytecode::{InstructionIndex, LabelKind, Method, MethodId};
use crate::cfg::analysis::{ReachabilityAnalyser, WorklistOptions};
use crate::cfg::node_set::NodeSet;
use crate::cfg::{Cfg, CfgOptions};
use crate::error::{Error, Result};
use log::debug;
use petgraph::graph::NodeIndex;
use std::collections::HashMap;
use std::sync::Arc;

/// Control dependences of one method, indexed by instruction position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDependences {
    method: MethodId,
    /// Sorted dependents of each instruction
    dependents: Vec<Vec<InstructionIndex>>,
}

impl ControlDependences {
    /// Analyse `method` with a fresh CFG
    pub fn compute(method: &Method, analyser: &mut ReachabilityAnalyser) -> Self {
        let cfg = Cfg::build(method, CfgOptions::default());
        let reachability = analyser.analyse(&cfg);
        let node_count = cfg.node_count();

        let entry_reachable = cfg
            .entry_node()
            .map(|entry| reachability.reachable(entry).clone())
            .unwrap_or_else(|| NodeSet::new(node_count));

        let to_instructions = |set: &NodeSet| -> Vec<InstructionIndex> {
            let mut instructions: Vec<InstructionIndex> = set
                .iter()
                .map(|n| cfg.instruction(NodeIndex::new(n)))
                .collect();
            instructions.sort();
            instructions
        };

        let dependents = (0..method.len())
            .map(|position| {
                let index = InstructionIndex::new(position);
                let Some(node) = cfg.node_of(index) else {
                    return Vec::new();
                };
                let is_catch_block = method
                    .instruction(index)
                    .and_then(|i| i.kind.label_kind())
                    == Some(LabelKind::CatchBlock);

                if is_catch_block {
                    let mut only_exceptional = reachability.surely_reached(node).clone();
                    only_exceptional.difference_with(&entry_reachable);
                    only_exceptional.remove(node.index());
                    return to_instructions(&only_exceptional);
                }

                let successors: Vec<_> = cfg.graph().neighbors(node).collect();
                if successors.len() <= 1 {
                    return Vec::new();
                }
                let mut union = NodeSet::new(node_count);
                let mut intersection = reachability.surely_reached(successors[0]).clone();
                for &succ in &successors {
                    union.union_with(reachability.surely_reached(succ));
                    intersection.intersect_with(reachability.surely_reached(succ));
                }
                union.difference_with(&intersection);
                to_instructions(&union)
            })
            .collect();

        Self {
            method: method.id,
            dependents,
        }
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Instructions whose execution depends on `index`, or `None` outside the method
    pub fn dependents(&self, index: InstructionIndex) -> Option<&[InstructionIndex]> {
        self.dependents.get(index.value()).map(Vec::as_slice)
    }

    /// Whether `dependent` is control dependent on `index`
    pub fn depends_on(&self, dependent: InstructionIndex, index: InstructionIndex) -> bool {
        self.dependents(index)
            .is_some_and(|deps| deps.binary_search(&dependent).is_ok())
    }

    /// All `(instruction, dependents)` pairs with at least one dependent
    pub fn iter(&self) -> impl Iterator<Item = (InstructionIndex, &[InstructionIndex])> {
        self.dependents
            .iter()
            .enumerate()
            .filter(|(_, deps)| !deps.is_empty())
            .map(|(i, deps)| (InstructionIndex::new(i), deps.as_slice()))
    }
}

/// Per-run cache of control dependences, keyed by method
#[derive(Debug)]
pub struct ControlDependenceCache {
    analyser: ReachabilityAnalyser,
    maps: HashMap<MethodId, Arc<ControlDependences>>,
}

impl Default for ControlDependenceCache {
    fn default() -> Self {
        Self::new(WorklistOptions::default())
    }
}

impl ControlDependenceCache {
    pub fn new(options: WorklistOptions) -> Self {
        Self {
            analyser: ReachabilityAnalyser::new(options),
            maps: HashMap::new(),
        }
    }

    /// Control dependences of `method`, computed on first request
    pub fn get(&mut self, method: &Method) -> Arc<ControlDependences> {
        if let Some(map) = self.maps.get(&method.id) {
            return Arc::clone(map);
        }
        debug!(
            "computing control dependences of {} ({} instructions)",
            method.qualified_name(),
            method.len()
        );
        let map = Arc::new(ControlDependences::compute(method, &mut self.analyser));
        self.maps.insert(method.id, Arc::clone(&map));
        map
    }

    /// Dependents of one instruction; a miss is an internal invariant break
    pub fn dependents(
        &mut self,
        method: &Method,
        index: InstructionIndex,
    ) -> Result<Arc<ControlDependences>> {
        let map = self.get(method);
        if map.dependents(index).is_none() {
            return Err(Error::MissingControlDependences {
                method: method.id.value(),
                index: index.value() as u32,
            });
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}
