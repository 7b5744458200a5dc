//! Dense set of CFG node positions
//!
//! Reachability sets are unions and intersections over successors, so they are
//! stored as one bit per node of the method's graph.

/// A bit vector over node positions `0..len`
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NodeSet {
    words: Vec<u64>,
    len: usize,
}

impl NodeSet {
    /// Creates an empty set over `len` nodes
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Creates a set containing only `node`
    pub fn singleton(len: usize, node: usize) -> Self {
        let mut set = Self::new(len);
        set.insert(node);
        set
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn insert(&mut self, node: usize) {
        debug_assert!(node < self.len, "node out of bounds");
        self.words[node / 64] |= 1u64 << (node % 64);
    }

    pub fn remove(&mut self, node: usize) {
        debug_assert!(node < self.len, "node out of bounds");
        self.words[node / 64] &= !(1u64 << (node % 64));
    }

    pub fn contains(&self, node: usize) -> bool {
        node < self.len && (self.words[node / 64] & (1u64 << (node % 64))) != 0
    }

    /// Number of nodes in the set
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// In-place union, returning whether `self` changed
    pub fn union_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// In-place intersection, returning whether `self` changed
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a &= *b;
            changed |= old != *a;
        }
        changed
    }

    /// In-place difference, returning whether `self` changed
    pub fn difference_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a &= !*b;
            changed |= old != *a;
        }
        changed
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| a & !b == 0)
    }

    /// Node positions in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| w * 64 + bit)
        })
    }
}

impl std::fmt::Debug for NodeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
