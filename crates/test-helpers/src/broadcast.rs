//! Best-effort broadcast.

use distcheck_core::{Environment, Node, NodeError, Operation, OperationOutcome};
use distcheck_types::{NodeId, NodeType};

pub const BROADCAST: NodeType = NodeType("peer");

/// `broadcast(x)` sends `x` to every other node and finishes immediately.
///
/// Delivered values are kept in arrival order. Validation rejects a value
/// delivered twice from the same sender.
#[derive(Debug, Default)]
pub struct BroadcastNode {
    pub delivered: Vec<(String, NodeId)>,
}

impl BroadcastNode {
    pub fn boxed(_id: NodeId) -> Box<dyn Node<String>> {
        Box::<Self>::default()
    }
}

impl Node<String> for BroadcastNode {
    fn on_operation(
        &mut self,
        operation: &Operation,
        env: &mut dyn Environment<String>,
    ) -> Result<OperationOutcome, NodeError> {
        let value = operation.arg(0).unwrap_or(&operation.name).to_string();
        env.broadcast(value);
        Ok(OperationOutcome::Void)
    }

    fn on_message(
        &mut self,
        message: String,
        sender: NodeId,
        _env: &mut dyn Environment<String>,
    ) -> Result<(), NodeError> {
        self.delivered.push((message, sender));
        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        for (i, entry) in self.delivered.iter().enumerate() {
            if self.delivered[..i].contains(entry) {
                return Err(format!("{} from {} delivered twice", entry.0, entry.1));
            }
        }
        Ok(())
    }

    fn state_representation(&self) -> String {
        let entries: Vec<String> = self
            .delivered
            .iter()
            .map(|(m, from)| format!("{m} from {from}"))
            .collect();
        format!("[{}]", entries.join(", "))
    }
}
