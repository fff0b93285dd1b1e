//! A single-server register with a read-your-writes bug.
//!
//! The client acknowledges `write(v)` as soon as the request is sent. When
//! the network may reorder messages on a link, a later `read` can overtake
//! the write and return the old value.

use distcheck_core::{Environment, Node, NodeError, OpResult, Operation, OperationOutcome, Scenario};
use distcheck_types::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterMessage {
    Write(i64),
    Read,
    Value(i64),
}

/// Client side. The server is always `Node(0)`.
#[derive(Debug, Default)]
pub struct RegisterClient {
    reading: bool,
}

impl RegisterClient {
    pub fn boxed(_id: NodeId) -> Box<dyn Node<RegisterMessage>> {
        Box::<Self>::default()
    }
}

impl Node<RegisterMessage> for RegisterClient {
    fn on_operation(
        &mut self,
        operation: &Operation,
        env: &mut dyn Environment<RegisterMessage>,
    ) -> Result<OperationOutcome, NodeError> {
        match operation.name.as_str() {
            "write" => {
                let value = operation
                    .arg(0)
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| NodeError::new("BadArgs", "write takes an integer"))?;
                env.send(RegisterMessage::Write(value), NodeId(0));
                Ok(OperationOutcome::Void)
            }
            "read" => {
                self.reading = true;
                env.send(RegisterMessage::Read, NodeId(0));
                Ok(OperationOutcome::Pending)
            }
            other => Err(NodeError::new("Unsupported", other.to_string())),
        }
    }

    fn on_message(
        &mut self,
        message: RegisterMessage,
        _sender: NodeId,
        env: &mut dyn Environment<RegisterMessage>,
    ) -> Result<(), NodeError> {
        if let RegisterMessage::Value(v) = message {
            if std::mem::take(&mut self.reading) {
                env.complete_operation(Some(v.to_string()));
            }
        }
        Ok(())
    }

    fn state_representation(&self) -> String {
        format!("reading={}", self.reading)
    }
}

#[derive(Debug, Default)]
pub struct RegisterServer {
    value: i64,
}

impl RegisterServer {
    pub fn boxed(_id: NodeId) -> Box<dyn Node<RegisterMessage>> {
        Box::<Self>::default()
    }
}

impl Node<RegisterMessage> for RegisterServer {
    fn on_operation(
        &mut self,
        operation: &Operation,
        _env: &mut dyn Environment<RegisterMessage>,
    ) -> Result<OperationOutcome, NodeError> {
        Err(NodeError::new("Unsupported", operation.name.clone()))
    }

    fn on_message(
        &mut self,
        message: RegisterMessage,
        sender: NodeId,
        env: &mut dyn Environment<RegisterMessage>,
    ) -> Result<(), NodeError> {
        match message {
            RegisterMessage::Write(v) => self.value = v,
            RegisterMessage::Read => env.send(RegisterMessage::Value(self.value), sender),
            RegisterMessage::Value(_) => {}
        }
        Ok(())
    }

    fn state_representation(&self) -> String {
        format!("value={}", self.value)
    }
}

/// Each read returns the value of the same node's latest preceding write,
/// or 0 before any write.
pub fn read_your_writes(scenario: &Scenario, results: &[Vec<OpResult>]) -> bool {
    results.iter().enumerate().all(|(i, node_results)| {
        let mut last_written = 0i64;
        let operations = scenario.operations(NodeId::from_index(i));
        for (op, result) in operations.iter().zip(node_results) {
            match (op.name.as_str(), result) {
                ("write", _) => {
                    last_written = op.arg(0).and_then(|v| v.parse().ok()).unwrap_or(0);
                }
                ("read", OpResult::Value(v)) if v.parse::<i64>().ok() != Some(last_written) => {
                    return false
                }
                _ => {}
            }
        }
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_your_writes() {
        let scenario = Scenario::new(2)
            .with_operation(NodeId(1), Operation::new("write").with_arg(5))
            .with_operation(NodeId(1), Operation::new("read"));
        let good = vec![vec![], vec![OpResult::Void, OpResult::Value("5".into())]];
        let stale = vec![vec![], vec![OpResult::Void, OpResult::Value("0".into())]];
        assert!(read_your_writes(&scenario, &good));
        assert!(!read_your_writes(&scenario, &stale));
    }
}
