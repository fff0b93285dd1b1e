//! Core types for the distributed model checker.
//!
//! Everything here is plain data shared by the simulation engine and the
//! node implementations under test: identifiers, vector clocks, and the
//! checker configuration.

mod clock;
mod config;
mod identifiers;

pub use clock::{NodeClocks, VectorClock};
pub use config::{CheckerConfig, ConfigError, MessageOrder, NetworkPartitionMode, RecoveryMode};
pub use identifiers::{MessageId, NodeId, NodeType, TaskId};
