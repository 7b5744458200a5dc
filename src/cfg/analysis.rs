//! Reachability analysis
//!
//! Two monotone fixed points over an instruction CFG:
//!
//! - `reachable(n)  = {n} ∪ ⋃ reachable(s)` over successors `s`
//! - `surely(n)     = {n} ∪ ⋂ surely(s)` over successors `s`
//!
//! Both start from `{n}` and only grow. Each is computed by its own worklist
//! pass; re-enqueued predecessors go to the front or the back of the queue at
//! random, with a configurable ratio and an optional seed.

use crate::cfg::node_set::NodeSet;
use crate::cfg::Cfg;
use log::warn;
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Queue discipline of the reachability worklist
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorklistOptions {
    /// Probability that a re-enqueued predecessor goes to the front
    pub front_probability: f64,
    /// Seed for reproducible ordering; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for WorklistOptions {
    fn default() -> Self {
        Self {
            front_probability: 0.5,
            seed: None,
        }
    }
}

impl WorklistOptions {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

/// FIFO/LIFO queue that never holds the same node twice
#[derive(Debug)]
struct UniqueQueue {
    queue: VecDeque<usize>,
    queued: NodeSet,
}

impl UniqueQueue {
    fn new(len: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(len),
            queued: NodeSet::new(len),
        }
    }

    fn push_front(&mut self, node: usize) {
        if !self.queued.contains(node) {
            self.queued.insert(node);
            self.queue.push_front(node);
        }
    }

    fn push_back(&mut self, node: usize) {
        if !self.queued.contains(node) {
            self.queued.insert(node);
            self.queue.push_back(node);
        }
    }

    fn pop(&mut self) -> Option<usize> {
        let node = self.queue.pop_front()?;
        self.queued.remove(node);
        Some(node)
    }
}

#[derive(Debug, Clone, Copy)]
enum Merge {
    Union,
    Intersection,
}

/// Reachable and surely-reached sets of every node, indexed by node position
#[derive(Debug, Clone)]
pub struct Reachability {
    reachable: Vec<NodeSet>,
    surely_reached: Vec<NodeSet>,
}

impl Reachability {
    pub fn reachable(&self, node: NodeIndex) -> &NodeSet {
        &self.reachable[node.index()]
    }

    pub fn surely_reached(&self, node: NodeIndex) -> &NodeSet {
        &self.surely_reached[node.index()]
    }
}

/// Worklist solver for [`Reachability`]
#[derive(Debug)]
pub struct ReachabilityAnalyser {
    front_probability: f64,
    rng: StdRng,
}

impl Default for ReachabilityAnalyser {
    fn default() -> Self {
        Self::new(WorklistOptions::default())
    }
}

impl ReachabilityAnalyser {
    pub fn new(options: WorklistOptions) -> Self {
        let front_probability = if (0.0..=1.0).contains(&options.front_probability) {
            options.front_probability
        } else {
            warn!(
                "worklist front probability {} is not in [0, 1], using 0.5",
                options.front_probability
            );
            0.5
        };
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            front_probability,
            rng,
        }
    }

    /// Compute both fixed points for `cfg`
    pub fn analyse(&mut self, cfg: &Cfg) -> Reachability {
        let graph = cfg.graph();
        let adjacency = |direction| -> Vec<Vec<usize>> {
            graph
                .node_indices()
                .map(|node| {
                    graph
                        .neighbors_directed(node, direction)
                        .map(|n| n.index())
                        .collect()
                })
                .collect()
        };
        let successors = adjacency(Direction::Outgoing);
        let predecessors = adjacency(Direction::Incoming);

        Reachability {
            reachable: self.fixed_point(&successors, &predecessors, Merge::Union),
            surely_reached: self.fixed_point(&successors, &predecessors, Merge::Intersection),
        }
    }

    fn fixed_point(
        &mut self,
        successors: &[Vec<usize>],
        predecessors: &[Vec<usize>],
        merge: Merge,
    ) -> Vec<NodeSet> {
        let len = successors.len();
        let mut sets: Vec<NodeSet> = (0..len).map(|n| NodeSet::singleton(len, n)).collect();

        let mut queue = UniqueQueue::new(len);
        for node in 0..len {
            queue.push_back(node);
        }

        while let Some(node) = queue.pop() {
            let Some((&first, rest)) = successors[node].split_first() else {
                continue;
            };
            let mut merged = sets[first].clone();
            for &succ in rest {
                match merge {
                    Merge::Union => merged.union_with(&sets[succ]),
                    Merge::Intersection => merged.intersect_with(&sets[succ]),
                };
            }

            if sets[node].union_with(&merged) {
                for &pred in &predecessors[node] {
                    if self.rng.gen_bool(self.front_probability) {
                        queue.push_front(pred);
                    } else {
                        queue.push_back(pred);
                    }
                }
            }
        }

        sets
    }
}
