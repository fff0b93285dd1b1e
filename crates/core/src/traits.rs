//! Traits implemented by the code under test and by the checker.

use crate::{Event, OpResult, Operation, Scenario};
use distcheck_types::{NodeId, NodeType};
use std::fmt;
use thiserror::Error;

/// Bound for the messages a protocol exchanges.
///
/// Messages are moved into delivery tasks that run on the dispatcher worker,
/// and their `Debug` form is what the event log records.
pub trait Message: Clone + fmt::Debug + Send + 'static {}

impl<T: Clone + fmt::Debug + Send + 'static> Message for T {}

/// Error raised by node logic.
///
/// `kind` is matched against [`Operation::handled_errors`]: a declared kind
/// becomes an [`OpResult::Exception`], anything else aborts the iteration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct NodeError {
    pub kind: String,
    pub message: String,
}

impl NodeError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// What an operation invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Finished with a value.
    Value(String),

    /// Finished without a value.
    Void,

    /// Still running; the node will call [`Environment::complete_operation`]
    /// from a later handler.
    Pending,
}

/// Facade through which node logic talks to the simulated world.
///
/// Every call happens inside a task body, so nothing here blocks: a `send`
/// only schedules a delivery task.
pub trait Environment<M: Message> {
    /// Address of the node this environment belongs to.
    fn node_id(&self) -> NodeId;

    /// Number of nodes in the simulation.
    fn num_nodes(&self) -> usize;

    /// Send a message. Delivery happens in a later task, if at all.
    fn send(&mut self, message: M, target: NodeId);

    /// Send a message to every other node.
    fn broadcast(&mut self, message: M) {
        let me = self.node_id();
        for i in 0..self.num_nodes() {
            let target = NodeId::from_index(i);
            if target != me {
                self.send(message.clone(), target);
            }
        }
    }

    /// Append a free-form entry to the event log and this node's log.
    fn record_internal_event(&mut self, message: String);

    /// Addresses of every node registered under `node_type`.
    fn addresses_for_type(&self, node_type: NodeType) -> Vec<NodeId>;

    /// Events recorded for this node so far in the current iteration.
    fn events(&self) -> Vec<Event>;

    /// Internal-event logs of all nodes, indexed by node.
    fn logs(&self) -> Vec<Vec<String>>;

    /// Finish the operation this node has in flight.
    ///
    /// Returns false if no operation was pending.
    fn complete_operation(&mut self, value: Option<String>) -> bool;
}

/// A participant in the distributed algorithm under test.
///
/// Handlers run to completion once scheduled; the checker chooses which
/// handler runs next.
pub trait Node<M: Message>: Send {
    /// Called once before the node's first operation.
    fn on_start(&mut self, _env: &mut dyn Environment<M>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Invoke one scenario operation.
    fn on_operation(
        &mut self,
        operation: &Operation,
        env: &mut dyn Environment<M>,
    ) -> Result<OperationOutcome, NodeError>;

    /// Handle a delivered message.
    fn on_message(
        &mut self,
        message: M,
        sender: NodeId,
        env: &mut dyn Environment<M>,
    ) -> Result<(), NodeError>;

    /// Called on a freshly created instance after a crash is recovered.
    fn on_recovery(&mut self, env: &mut dyn Environment<M>) -> Result<(), NodeError> {
        self.on_start(env)
    }

    /// Called once on every live node after all tasks have run.
    fn on_scenario_finish(&mut self, _env: &mut dyn Environment<M>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Check the final state. An `Err` is reported as a validation failure.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Human-readable state, included in failure reports.
    fn state_representation(&self) -> String;
}

/// Judges whether observed per-node results are correct.
pub trait Verifier: Send {
    fn verify_results(&mut self, scenario: &Scenario, results: &[Vec<OpResult>]) -> bool;
}

impl<F> Verifier for F
where
    F: FnMut(&Scenario, &[Vec<OpResult>]) -> bool + Send,
{
    fn verify_results(&mut self, scenario: &Scenario, results: &[Vec<OpResult>]) -> bool {
        self(scenario, results)
    }
}

/// Verifier that accepts every result set.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Verifier for AcceptAll {
    fn verify_results(&mut self, _scenario: &Scenario, _results: &[Vec<OpResult>]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_display() {
        let err = NodeError::new("Timeout", "no reply from Node(1)");
        assert_eq!(err.to_string(), "Timeout: no reply from Node(1)");
    }

    #[test]
    fn test_closure_verifier() {
        let scenario = Scenario::new(1);
        let mut verifier =
            |_: &Scenario, results: &[Vec<OpResult>]| results.iter().all(|r| r.is_empty());
        assert!(verifier.verify_results(&scenario, &[vec![]]));
        assert!(!verifier.verify_results(&scenario, &[vec![OpResult::Void]]));
        assert!(AcceptAll.verify_results(&scenario, &[vec![OpResult::Void]]));
    }
}
