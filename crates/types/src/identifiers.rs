//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated node address.
///
/// Addresses are dense: a run with `n` nodes uses `NodeId(0)..NodeId(n)`,
/// which lets vector clocks and per-node tables index by [`NodeId::index`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Position of this node in per-node tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Build a node id from a table position.
    pub fn from_index(index: usize) -> Self {
        NodeId(index as u32)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Schedulable task identifier.
///
/// Allocated from a counter that restarts at zero every iteration, so a
/// deterministic node implementation produces the same ids for the same
/// execution prefix. The interleaving tree relies on this to recognise a
/// revisited state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the next task id.
    pub fn next(self) -> Self {
        TaskId(self.0 + 1)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Message identifier, unique within one iteration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Get the next message id.
    pub fn next(self) -> Self {
        MessageId(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({})", self.0)
    }
}

/// Tag naming a family of nodes that share an implementation (e.g. "client").
///
/// Used to resolve addresses and to apply per-type crash budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeType(pub &'static str);

impl NodeType {
    /// Get the tag name.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
