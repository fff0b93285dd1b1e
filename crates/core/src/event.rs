//! Events recorded while an iteration runs.

use crate::OpResult;
use distcheck_types::{MessageId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Something that happened at a node.
///
/// Messages are stored in their `Debug` form so the log is comparable
/// across iterations and printable in a trace file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Operations
    // ═══════════════════════════════════════════════════════════════════════
    /// The node started its `index`-th operation.
    OperationStarted { index: usize, operation: String },

    /// The node's `index`-th operation produced a result.
    OperationFinished { index: usize, result: OpResult },

    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// A message left the node.
    MessageSent {
        id: MessageId,
        to: NodeId,
        message: String,
    },

    /// A message was handed to the node.
    MessageReceived {
        id: MessageId,
        from: NodeId,
        message: String,
    },

    /// A message from the node was dropped by the fault model.
    MessageLost { id: MessageId, to: NodeId },

    /// Entry recorded by node logic.
    InternalEvent { message: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Faults
    // ═══════════════════════════════════════════════════════════════════════
    /// The node crashed.
    NodeCrashed,

    /// The node came back with fresh state.
    NodeRecovered,

    /// The network was partitioned.
    NetworkPartitioned { description: String },

    /// A partition was healed.
    PartitionHealed { description: String },

    /// The node ran its end-of-scenario hook.
    ScenarioFinished,
}

impl Event {
    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::OperationStarted { .. } => "OperationStarted",
            Event::OperationFinished { .. } => "OperationFinished",
            Event::MessageSent { .. } => "MessageSent",
            Event::MessageReceived { .. } => "MessageReceived",
            Event::MessageLost { .. } => "MessageLost",
            Event::InternalEvent { .. } => "InternalEvent",
            Event::NodeCrashed => "NodeCrashed",
            Event::NodeRecovered => "NodeRecovered",
            Event::NetworkPartitioned { .. } => "NetworkPartitioned",
            Event::PartitionHealed { .. } => "PartitionHealed",
            Event::ScenarioFinished => "ScenarioFinished",
        }
    }

    /// Check if this event was caused by fault injection.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Event::NodeCrashed
                | Event::NodeRecovered
                | Event::NetworkPartitioned { .. }
                | Event::PartitionHealed { .. }
                | Event::MessageLost { .. }
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::OperationStarted { index, operation } => {
                write!(f, "start op #{index}: {operation}")
            }
            Event::OperationFinished { index, result } => {
                write!(f, "finish op #{index}: {result}")
            }
            Event::MessageSent { id, to, message } => write!(f, "send {id} to {to}: {message}"),
            Event::MessageReceived { id, from, message } => {
                write!(f, "receive {id} from {from}: {message}")
            }
            Event::MessageLost { id, to } => write!(f, "lost {id} to {to}"),
            Event::InternalEvent { message } => write!(f, "internal: {message}"),
            Event::NodeCrashed => write!(f, "CRASH"),
            Event::NodeRecovered => write!(f, "RECOVER"),
            Event::NetworkPartitioned { description } => write!(f, "PARTITION {description}"),
            Event::PartitionHealed { description } => write!(f, "HEAL {description}"),
            Event::ScenarioFinished => write!(f, "scenario finished"),
        }
    }
}

/// One `(node, event)` pair of the iteration's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node: NodeId,
    pub event: Event,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.node, self.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let entry = TraceEntry {
            node: NodeId(1),
            event: Event::MessageReceived {
                id: MessageId(0),
                from: NodeId(0),
                message: "\"m\"".into(),
            },
        };
        assert_eq!(entry.to_string(), "[Node(1)] receive Msg(0) from Node(0): \"m\"");
    }

    #[test]
    fn test_fault_classification() {
        assert!(Event::NodeCrashed.is_fault());
        assert!(!Event::ScenarioFinished.is_fault());
        assert_eq!(Event::NodeRecovered.type_name(), "NodeRecovered");
    }

    #[test]
    fn test_serializes_to_json() {
        let event = Event::OperationFinished {
            index: 0,
            result: OpResult::Value("1".into()),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
