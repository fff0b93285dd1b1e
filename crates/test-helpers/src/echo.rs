//! Request/reply echo.
//!
//! A client's `echo(x)` operation sends `x` to the first server and stays
//! pending until the reply arrives; the result is the echoed payload.

use distcheck_core::{Environment, Node, NodeError, OpResult, Operation, OperationOutcome, Scenario};
use distcheck_types::{NodeId, NodeType};

pub const CLIENT: NodeType = NodeType("client");
pub const SERVER: NodeType = NodeType("server");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoMessage {
    Request { id: u64, payload: String },
    Reply { id: u64, payload: String },
}

#[derive(Debug, Default)]
pub struct EchoClient {
    next_id: u64,
    outstanding: Option<u64>,
}

impl EchoClient {
    pub fn boxed(_id: NodeId) -> Box<dyn Node<EchoMessage>> {
        Box::<Self>::default()
    }
}

impl Node<EchoMessage> for EchoClient {
    fn on_operation(
        &mut self,
        operation: &Operation,
        env: &mut dyn Environment<EchoMessage>,
    ) -> Result<OperationOutcome, NodeError> {
        let server = env
            .addresses_for_type(SERVER)
            .first()
            .copied()
            .ok_or_else(|| NodeError::new("NoServer", "no server registered"))?;
        let payload = operation
            .arg(0)
            .ok_or_else(|| NodeError::new("BadArgs", "echo takes one argument"))?
            .to_string();
        let id = self.next_id;
        self.next_id += 1;
        self.outstanding = Some(id);
        env.send(EchoMessage::Request { id, payload }, server);
        Ok(OperationOutcome::Pending)
    }

    fn on_message(
        &mut self,
        message: EchoMessage,
        _sender: NodeId,
        env: &mut dyn Environment<EchoMessage>,
    ) -> Result<(), NodeError> {
        if let EchoMessage::Reply { id, payload } = message {
            if self.outstanding == Some(id) {
                self.outstanding = None;
                env.complete_operation(Some(payload));
            }
        }
        Ok(())
    }

    fn state_representation(&self) -> String {
        format!("outstanding={:?}", self.outstanding)
    }
}

/// Replies to every request and remembers what it echoed.
#[derive(Debug, Default)]
pub struct EchoServer {
    pub echoed: Vec<String>,
}

impl EchoServer {
    pub fn boxed(_id: NodeId) -> Box<dyn Node<EchoMessage>> {
        Box::<Self>::default()
    }
}

impl Node<EchoMessage> for EchoServer {
    fn on_operation(
        &mut self,
        operation: &Operation,
        _env: &mut dyn Environment<EchoMessage>,
    ) -> Result<OperationOutcome, NodeError> {
        Err(NodeError::new(
            "Unsupported",
            format!("server has no operation {}", operation.name),
        ))
    }

    fn on_message(
        &mut self,
        message: EchoMessage,
        sender: NodeId,
        env: &mut dyn Environment<EchoMessage>,
    ) -> Result<(), NodeError> {
        if let EchoMessage::Request { id, payload } = message {
            self.echoed.push(payload.clone());
            env.record_internal_event(format!("echo {payload} for {sender}"));
            env.send(EchoMessage::Reply { id, payload }, sender);
        }
        Ok(())
    }

    fn state_representation(&self) -> String {
        self.echoed.join(",")
    }
}

/// Every completed echo returned its own argument.
pub fn echo_verifier(scenario: &Scenario, results: &[Vec<OpResult>]) -> bool {
    results.iter().enumerate().all(|(i, node_results)| {
        let operations = scenario.operations(NodeId::from_index(i));
        node_results
            .iter()
            .zip(operations)
            .all(|(result, op)| match result {
                OpResult::Value(v) => op.arg(0) == Some(v.as_str()),
                OpResult::Crashed | OpResult::NoResult => true,
                OpResult::Void | OpResult::Exception(_) => false,
            })
    })
}
