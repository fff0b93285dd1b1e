//! Scenario operations and their results.

use distcheck_types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One operation a node performs during a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation name, interpreted by the node implementation.
    pub name: String,

    /// Arguments in their textual form.
    pub args: Vec<String>,

    /// Error kinds this operation declares as expected results.
    pub handled_errors: Vec<String>,
}

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            handled_errors: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn with_arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Declare an error kind as an expected result.
    pub fn handles(mut self, kind: impl Into<String>) -> Self {
        self.handled_errors.push(kind.into());
        self
    }

    /// Whether an error of this kind becomes an exception result.
    pub fn is_handled(&self, kind: &str) -> bool {
        self.handled_errors.iter().any(|k| k == kind)
    }

    /// Argument at `i`, if present.
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(String::as_str)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.args.join(", "))
    }
}

/// Per-node operation lists for one test scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    operations: Vec<Vec<Operation>>,
}

impl Scenario {
    /// Create a scenario for `num_nodes` nodes with no operations.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            operations: vec![Vec::new(); num_nodes],
        }
    }

    /// Append an operation to a node's list.
    pub fn with_operation(mut self, node: NodeId, operation: Operation) -> Self {
        self.push(node, operation);
        self
    }

    pub fn push(&mut self, node: NodeId, operation: Operation) {
        if node.index() >= self.operations.len() {
            self.operations.resize(node.index() + 1, Vec::new());
        }
        self.operations[node.index()].push(operation);
    }

    pub fn num_nodes(&self) -> usize {
        self.operations.len()
    }

    /// Operations of one node, empty for nodes without a list.
    pub fn operations(&self, node: NodeId) -> &[Operation] {
        self.operations
            .get(node.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of operations across all nodes.
    pub fn total_operations(&self) -> usize {
        self.operations.iter().map(Vec::len).sum()
    }
}

/// Observed result of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpResult {
    /// Completed with a value.
    Value(String),

    /// Completed without a value.
    Void,

    /// Completed with a declared error kind.
    Exception(String),

    /// The node crashed while the operation was in flight.
    Crashed,

    /// Started but never completed.
    NoResult,
}

impl OpResult {
    /// Whether the operation finished normally or with a declared error.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            OpResult::Value(_) | OpResult::Void | OpResult::Exception(_)
        )
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpResult::Value(v) => write!(f, "{v}"),
            OpResult::Void => write!(f, "void"),
            OpResult::Exception(kind) => write!(f, "{kind}"),
            OpResult::Crashed => write!(f, "CRASHED"),
            OpResult::NoResult => write!(f, "-"),
        }
    }
}
