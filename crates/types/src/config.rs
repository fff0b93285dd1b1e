//! Configuration for a distributed model checking run.

use crate::NodeType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Whether crashed nodes (and partitions) come back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryMode {
    /// A crashed node stays down for the rest of the iteration.
    #[default]
    NoRecoveries,

    /// Every crash is followed by a recovery task; every partition by a heal.
    AllRecoveries,
}

/// Delivery guarantees of the simulated network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageOrder {
    /// A sent message is delivered before anything else happens.
    Synchronous,

    /// Messages between a sender/receiver pair arrive in send order.
    #[default]
    Fifo,

    /// Any pending message may be delivered next.
    Asynchronous,
}

/// Shape of injected network partitions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkPartitionMode {
    /// The nodes are split into exactly two halves.
    #[default]
    Halves,

    /// Individual links are cut; reachability follows graph connectivity.
    SingleEdge,
}

impl FromStr for RecoveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "no-recoveries" => Ok(RecoveryMode::NoRecoveries),
            "all" | "all-recoveries" => Ok(RecoveryMode::AllRecoveries),
            _ => Err(ConfigError::UnknownValue {
                field: "recovery",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for MessageOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" | "synchronous" => Ok(MessageOrder::Synchronous),
            "fifo" => Ok(MessageOrder::Fifo),
            "async" | "asynchronous" => Ok(MessageOrder::Asynchronous),
            _ => Err(ConfigError::UnknownValue {
                field: "message-order",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for NetworkPartitionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "halves" => Ok(NetworkPartitionMode::Halves),
            "single-edge" | "single_edge" => Ok(NetworkPartitionMode::SingleEdge),
            _ => Err(ConfigError::UnknownValue {
                field: "partition-mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one invocation is required.
    #[error("invocations_per_iteration must be positive")]
    NoInvocations,

    /// A zero timeout would fail every iteration.
    #[error("timeout must be positive")]
    ZeroTimeout,

    /// The scenario has no nodes.
    #[error("at least one node is required")]
    NoNodes,

    /// A per-type crash budget names a type that was never registered.
    #[error("crash budget given for unknown node type {0}")]
    UnknownNodeType(NodeType),

    /// The scenario lists operations for a node that does not exist.
    #[error("scenario has operations for {scenario} nodes but {registered} are registered")]
    ScenarioSize { scenario: usize, registered: usize },

    /// A string value could not be parsed.
    #[error("unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },
}

/// Configuration for a model checking run.
#[derive(Clone, Debug)]
pub struct CheckerConfig {
    /// Global bound on simultaneously failed (crashed or partitioned) nodes.
    pub max_failed_nodes: usize,

    /// Optional tighter bound per node type.
    pub max_failed_nodes_for_type: HashMap<NodeType, usize>,

    /// Whether faults are followed by recoveries.
    pub recovery: RecoveryMode,

    /// Network delivery guarantees.
    pub message_order: MessageOrder,

    /// Partition shape, used when partitions are enabled.
    pub partition_mode: NetworkPartitionMode,

    /// Whether network partitions are injected at all.
    pub partitions_enabled: bool,

    /// Wall-clock budget for a single iteration.
    pub timeout: Duration,

    /// Maximum number of interleavings to try for the scenario.
    pub invocations_per_iteration: usize,

    /// Seed for exploration and fault randomness.
    pub seed: u64,

    /// Where to write the event trace of a failing iteration.
    pub trace_file: Option<PathBuf>,
}

impl CheckerConfig {
    /// Create a fault-free configuration with default bounds.
    pub fn new() -> Self {
        Self {
            max_failed_nodes: 0,
            max_failed_nodes_for_type: HashMap::new(),
            recovery: RecoveryMode::default(),
            message_order: MessageOrder::default(),
            partition_mode: NetworkPartitionMode::default(),
            partitions_enabled: false,
            timeout: Duration::from_secs(10),
            invocations_per_iteration: 1000,
            seed: 12345,
            trace_file: None,
        }
    }

    /// Set the global failed-node budget.
    pub fn with_max_failed_nodes(mut self, max: usize) -> Self {
        self.max_failed_nodes = max;
        self
    }

    /// Set the failed-node budget for one node type.
    pub fn with_max_failed_nodes_for_type(mut self, node_type: NodeType, max: usize) -> Self {
        self.max_failed_nodes_for_type.insert(node_type, max);
        self
    }

    /// Set the recovery mode.
    pub fn with_recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    /// Set the message order.
    pub fn with_message_order(mut self, order: MessageOrder) -> Self {
        self.message_order = order;
        self
    }

    /// Enable partitions of the given shape.
    pub fn with_partitions(mut self, mode: NetworkPartitionMode) -> Self {
        self.partitions_enabled = true;
        self.partition_mode = mode;
        self
    }

    /// Set the per-iteration timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of interleavings to try.
    pub fn with_invocations(mut self, invocations: usize) -> Self {
        self.invocations_per_iteration = invocations;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Write failing traces to this file.
    pub fn with_trace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_file = Some(path.into());
        self
    }

    /// Whether any fault can ever be injected.
    pub fn faults_enabled(&self) -> bool {
        self.max_failed_nodes > 0
    }

    /// Whether recovery tasks follow faults.
    pub fn supports_recovery(&self) -> bool {
        self.recovery == RecoveryMode::AllRecoveries
    }

    /// Check the bounds that do not depend on the registered nodes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.invocations_per_iteration == 0 {
            return Err(ConfigError::NoInvocations);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_fault_free() {
        let config = CheckerConfig::default();
        assert!(!config.faults_enabled());
        assert!(!config.partitions_enabled);
        assert_eq!(config.message_order, MessageOrder::Fifo);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CheckerConfig::new()
            .with_max_failed_nodes(1)
            .with_max_failed_nodes_for_type(NodeType("server"), 1)
            .with_recovery(RecoveryMode::AllRecoveries)
            .with_partitions(NetworkPartitionMode::SingleEdge)
            .with_seed(7);
        assert!(config.faults_enabled());
        assert!(config.supports_recovery());
        assert!(config.partitions_enabled);
        assert_eq!(config.partition_mode, NetworkPartitionMode::SingleEdge);
        assert_eq!(config.max_failed_nodes_for_type[&NodeType("server")], 1);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let config = CheckerConfig::new().with_invocations(0);
        assert_eq!(config.validate(), Err(ConfigError::NoInvocations));
        let config = CheckerConfig::new().with_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("sync".parse::<MessageOrder>(), Ok(MessageOrder::Synchronous));
        assert_eq!(
            "single-edge".parse::<NetworkPartitionMode>(),
            Ok(NetworkPartitionMode::SingleEdge)
        );
        assert_eq!("all".parse::<RecoveryMode>(), Ok(RecoveryMode::AllRecoveries));
        assert!("sometimes".parse::<RecoveryMode>().is_err());
    }
}
