//! Configuration types for the simulator.

use crate::workload::Workload;
use distcheck_types::CheckerConfig;

/// Configuration for a simulator run.
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    /// Protocol and scenario shape to check.
    pub workload: Workload,

    /// Total number of nodes, servers included.
    pub nodes: usize,

    /// Operations per participating node.
    pub operations: usize,

    /// Search and fault settings passed to the checker.
    pub checker: CheckerConfig,
}

impl SimulatorConfig {
    /// Create a configuration for `workload` with two nodes and one operation.
    pub fn new(workload: Workload) -> Self {
        Self {
            workload,
            nodes: 2,
            operations: 1,
            checker: CheckerConfig::default(),
        }
    }

    /// Set the number of nodes.
    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    /// Set the operations per node.
    pub fn with_operations(mut self, operations: usize) -> Self {
        self.operations = operations;
        self
    }

    /// Set the checker configuration.
    pub fn with_checker(mut self, checker: CheckerConfig) -> Self {
        self.checker = checker;
        self
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new(Workload::default())
    }
}
