//! Core boundary between the model checker and the code under test.
//!
//! A distributed algorithm is plugged in as a set of [`Node`] implementations.
//! The checker drives them through an [`Environment`] it controls, records an
//! [`Event`] log, and hands the per-node [`OpResult`] sequences of every
//! iteration to a [`Verifier`].

mod event;
mod outcome;
mod scenario;
mod traits;

pub use event::{Event, TraceEntry};
pub use outcome::{ExecutionResults, Failure, FailureKind, IterationOutcome};
pub use scenario::{OpResult, Operation, Scenario};
pub use traits::{
    AcceptAll, Environment, Message, Node, NodeError, OperationOutcome, Verifier,
};
