//! Distcheck Simulator
//!
//! A command-line friendly driver built on top of the checker.
//! Runs built-in sample protocols under configurable fault and ordering
//! settings and reports what the search found.
//!
//! # Example
//!
//! ```ignore
//! use distcheck_simulator::{Simulator, SimulatorConfig, Workload};
//! use distcheck_types::{CheckerConfig, MessageOrder};
//!
//! let config = SimulatorConfig::new(Workload::Register)
//!     .with_nodes(2)
//!     .with_checker(CheckerConfig::new().with_message_order(MessageOrder::Asynchronous));
//!
//! let summary = Simulator::new(config)?.run()?;
//! summary.print();
//! ```

pub mod config;
pub mod runner;
pub mod workload;

pub use config::SimulatorConfig;
pub use runner::{SimulationSummary, Simulator, SimulatorError};
pub use workload::Workload;
