//! Systematic interleaving exploration for distributed algorithms.
//!
//! This crate runs a scenario of operations against simulated nodes many
//! times, choosing a different order of message deliveries, operations and
//! injected faults on each iteration. Given the same seed, it explores the
//! same interleavings in the same order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Runner                           │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     InterleavingTree (persists across iterations)  │ │
//! │  │     Picks a prefix, then the canonical next task   │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │ TaskId                      │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Dispatcher (one worker, in-flight counter)     │ │
//! │  │     Runs the task body, times out on deadlock      │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     SimulationContext (reset every iteration)      │ │
//! │  │     Nodes, vector clocks, FaultModel, event log    │ │
//! │  │     Sends → new pending tasks                      │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod context;
mod dispatcher;
mod error;
mod fault;
mod runner;
mod task;
mod trace;
mod tree;

pub use context::{NodeEnvironment, NodeFactory, NodeRegistry, SimulationContext};
pub use dispatcher::Dispatcher;
pub use error::ExecutionError;
pub use fault::FaultModel;
pub use runner::{RunReport, Runner};
pub use task::{PendingTaskRegistry, Task, TaskBody, TaskInfo, TaskKind};
pub use trace::{render as render_trace, write_trace};
pub use tree::{InterleavingTree, TreeIndex, ROOT};
