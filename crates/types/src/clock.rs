//! Vector clocks for happens-before tracking between nodes.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A vector clock indexed by node.
///
/// Slots beyond the stored length read as zero, so clocks of different
/// lengths compare as if padded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorClock {
    clocks: Vec<u64>,
}

impl VectorClock {
    /// Create an all-zero clock for `num_nodes` nodes.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            clocks: vec![0; num_nodes],
        }
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    pub fn get(&self, node: NodeId) -> u64 {
        self.clocks.get(node.index()).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, node: NodeId) {
        let i = node.index();
        if i >= self.clocks.len() {
            self.clocks.resize(i + 1, 0);
        }
        self.clocks[i] += 1;
    }

    /// Point-wise maximum: self = max(self, other).
    pub fn join(&mut self, other: &VectorClock) {
        if other.clocks.len() > self.clocks.len() {
            self.clocks.resize(other.clocks.len(), 0);
        }
        for (a, b) in self.clocks.iter_mut().zip(other.clocks.iter()) {
            *a = (*a).max(*b);
        }
    }

    /// Point-wise maximum of two clocks as a new value.
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        result.join(other);
        result
    }

    /// Returns true if self <= other (component-wise).
    pub fn partial_le(&self, other: &VectorClock) -> bool {
        let max_len = self.clocks.len().max(other.clocks.len());
        (0..max_len).all(|i| {
            let node = NodeId::from_index(i);
            self.get(node) <= other.get(node)
        })
    }

    /// Strict causal precedence: `self <= other` component-wise and the
    /// clocks differ in at least one slot.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.partial_le(other) && !other.partial_le(self)
    }

    /// Returns true if neither clock precedes the other.
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        !self.partial_le(other) && !other.partial_le(self)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.clocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "]")
    }
}

/// The clocks of every node in a simulation, one owned clock per node.
///
/// Node `i` only ever advances slot `i` of its own clock; the other slots
/// grow through [`NodeClocks::merge`] when a message is received.
#[derive(Clone, Debug)]
pub struct NodeClocks {
    clocks: Vec<VectorClock>,
}

impl NodeClocks {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            clocks: vec![VectorClock::new(num_nodes); num_nodes],
        }
    }

    /// Zero every clock. Called at the start of each iteration.
    pub fn reset(&mut self) {
        let n = self.clocks.len();
        for clock in &mut self.clocks {
            *clock = VectorClock::new(n);
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.clocks.len()
    }

    pub fn increment(&mut self, node: NodeId) {
        self.clocks[node.index()].increment(node);
    }

    pub fn increment_and_snapshot(&mut self, node: NodeId) -> VectorClock {
        self.increment(node);
        self.snapshot(node)
    }

    pub fn snapshot(&self, node: NodeId) -> VectorClock {
        self.clocks[node.index()].clone()
    }

    /// Merge `other` into `dest`'s clock and return the merged snapshot.
    pub fn merge(&mut self, dest: NodeId, other: &VectorClock) -> VectorClock {
        let clock = &mut self.clocks[dest.index()];
        clock.join(other);
        clock.clone()
    }
}
