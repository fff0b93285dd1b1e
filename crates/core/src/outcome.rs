//! Iteration outcomes and the failure taxonomy.

use crate::{OpResult, TraceEntry};
use distcheck_types::{NodeId, TaskId};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Results observed in one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResults {
    /// Result of every started operation, indexed by node.
    pub per_node: Vec<Vec<OpResult>>,

    /// Final `state_representation` of each node; crashed nodes have none.
    pub states: Vec<Option<String>>,
}

/// Why an iteration failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FailureKind {
    /// Node logic raised an undeclared error or panicked, or the engine hit
    /// an internal invariant violation.
    UnexpectedException {
        message: String,

        /// Rendered interleaving tree for internal violations.
        tree_dump: Option<String>,
    },

    /// The iteration ran past its timeout.
    Deadlock { timeout: Duration },

    /// A node rejected its final state.
    ValidationFailure { node: NodeId, message: String },

    /// The verifier rejected the observed results.
    IncorrectResults { results: ExecutionResults },
}

/// A failing iteration with everything needed to reproduce it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,

    /// Task order that was executed.
    pub interleaving: Vec<TaskId>,

    /// Ordered `(node, event)` pairs; empty for deadlocks.
    pub trace: Vec<TraceEntry>,
}

impl Failure {
    /// Get a human-readable name for the failure kind.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FailureKind::UnexpectedException { .. } => "UnexpectedException",
            FailureKind::Deadlock { .. } => "Deadlock",
            FailureKind::ValidationFailure { .. } => "ValidationFailure",
            FailureKind::IncorrectResults { .. } => "IncorrectResults",
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::UnexpectedException { message, .. } => {
                writeln!(f, "= Unexpected exception: {message} =")?
            }
            FailureKind::Deadlock { timeout } => {
                writeln!(f, "= Deadlock: iteration exceeded {timeout:?} =")?
            }
            FailureKind::ValidationFailure { node, message } => {
                writeln!(f, "= Validation failed at {node}: {message} =")?
            }
            FailureKind::IncorrectResults { results } => {
                writeln!(f, "= Invalid execution results =")?;
                for (i, node_results) in results.per_node.iter().enumerate() {
                    let rendered: Vec<String> =
                        node_results.iter().map(ToString::to_string).collect();
                    writeln!(f, "{}: [{}]", NodeId::from_index(i), rendered.join(", "))?;
                }
            }
        }
        let order: Vec<String> = self.interleaving.iter().map(|t| t.0.to_string()).collect();
        writeln!(f, "Interleaving: [{}]", order.join(", "))?;
        for entry in &self.trace {
            writeln!(f, "{entry}")?;
        }
        if let FailureKind::UnexpectedException {
            tree_dump: Some(dump),
            ..
        } = &self.kind
        {
            writeln!(f, "Interleaving tree:")?;
            write!(f, "{dump}")?;
        }
        Ok(())
    }
}

/// Outcome of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    Completed(ExecutionResults),
    Failed(Failure),
}

impl IterationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, IterationOutcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            IterationOutcome::Failed(failure) => Some(failure),
            IterationOutcome::Completed(_) => None,
        }
    }

    pub fn results(&self) -> Option<&ExecutionResults> {
        match self {
            IterationOutcome::Completed(results) => Some(results),
            IterationOutcome::Failed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;

    #[test]
    fn test_incorrect_results_report() {
        let failure = Failure {
            kind: FailureKind::IncorrectResults {
                results: ExecutionResults {
                    per_node: vec![vec![OpResult::Value("1".into())], vec![OpResult::Crashed]],
                    states: vec![Some("x=1".into()), None],
                },
            },
            interleaving: vec![TaskId(0), TaskId(2)],
            trace: vec![TraceEntry {
                node: NodeId(1),
                event: Event::NodeCrashed,
            }],
        };
        let report = failure.to_string();
        assert!(report.contains("Invalid execution results"));
        assert!(report.contains("Node(1): [CRASHED]"));
        assert!(report.contains("Interleaving: [0, 2]"));
        assert!(report.contains("[Node(1)] CRASH"));
        assert_eq!(failure.kind_name(), "IncorrectResults");
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = IterationOutcome::Completed(ExecutionResults {
            per_node: vec![],
            states: vec![],
        });
        assert!(!outcome.is_failure());
        assert!(outcome.results().is_some());
        assert!(outcome.failure().is_none());
    }
}
