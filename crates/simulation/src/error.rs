//! Error types for simulation execution.

use distcheck_core::NodeError;
use distcheck_types::{NodeId, TaskId};
use thiserror::Error;

/// Internal failures while running an iteration.
///
/// All of these surface to the user as an unexpected-exception failure,
/// except [`ExecutionError::Timeout`], which becomes a deadlock.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Node logic returned an error its operation did not declare.
    #[error("unhandled error at {node}: {source}")]
    Node {
        node: NodeId,
        #[source]
        source: NodeError,
    },

    /// A task body panicked.
    #[error("task body panicked: {0}")]
    Panic(String),

    /// The interleaving tree is inconsistent with the execution.
    #[error("interleaving tree invariant violated: {0}")]
    TreeInvariant(String),

    /// A task on the prescribed path was not pending when its turn came.
    #[error("{task} on the prescribed path is not pending")]
    UnknownTask { task: TaskId },

    /// The dispatcher worker stopped.
    #[error("dispatcher worker is gone")]
    DispatcherClosed,

    /// The iteration ran past its timeout.
    #[error("iteration timed out")]
    Timeout,
}

impl ExecutionError {
    /// Whether the error is an engine bug rather than a node failure.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ExecutionError::TreeInvariant(_) | ExecutionError::UnknownTask { .. }
        )
    }
}
