//! Simulator runner: wires a workload into the checker.

use crate::config::SimulatorConfig;
use crate::workload::Workload;
use distcheck_core::{AcceptAll, Message, Scenario, Verifier};
use distcheck_simulation::{NodeRegistry, RunReport, Runner};
use distcheck_test_helpers::{
    echo_verifier, read_your_writes, BroadcastNode, EchoClient, EchoServer, RegisterClient,
    RegisterServer, BROADCAST, CLIENT, SERVER,
};
use distcheck_types::ConfigError;
use thiserror::Error;
use tracing::info;

/// Errors that prevent a simulation from starting.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("{workload} needs at least {required} nodes, got {got}")]
    TooFewNodes {
        workload: Workload,
        required: usize,
        got: usize,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result of a simulator run.
#[derive(Debug)]
pub struct SimulationSummary {
    pub workload: Workload,
    pub nodes: usize,
    pub report: RunReport,
}

impl SimulationSummary {
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("Workload:              {} ({} nodes)", self.workload, self.nodes);
        println!("Iterations:            {}", self.report.iterations);
        println!("Interrupted:           {}", self.report.interrupted_iterations);
        println!("Switch budget:         {}", self.report.number_of_switches);
        println!("Fully explored:        {}", self.report.fully_explored);
        match &self.report.failure {
            None => println!("Result:                OK"),
            Some(failure) => {
                println!("Result:                {}", failure.kind_name());
                println!();
                print!("{failure}");
            }
        }
    }
}

/// Runs one workload under the configured checker settings.
pub struct Simulator {
    config: SimulatorConfig,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        let workload = config.workload;
        if config.nodes < workload.min_nodes() {
            return Err(SimulatorError::TooFewNodes {
                workload,
                required: workload.min_nodes(),
                got: config.nodes,
            });
        }
        config.checker.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn run(&self) -> Result<SimulationSummary, SimulatorError> {
        let SimulatorConfig {
            workload,
            nodes,
            operations,
            ..
        } = self.config;
        let scenario = workload.scenario(nodes, operations);
        info!(
            workload = %workload,
            nodes,
            operations = scenario.total_operations(),
            "Running workload"
        );

        let report = match workload {
            Workload::Echo => {
                let registry = NodeRegistry::new()
                    .with_nodes(SERVER, 1, EchoServer::boxed)
                    .with_nodes(CLIENT, nodes - 1, EchoClient::boxed);
                self.check(registry, scenario, echo_verifier)?
            }
            Workload::Broadcast => {
                let registry =
                    NodeRegistry::new().with_nodes(BROADCAST, nodes, BroadcastNode::boxed);
                self.check(registry, scenario, AcceptAll)?
            }
            Workload::Register => {
                let registry = NodeRegistry::new()
                    .with_nodes(SERVER, 1, RegisterServer::boxed)
                    .with_nodes(CLIENT, nodes - 1, RegisterClient::boxed);
                self.check(registry, scenario, read_your_writes)?
            }
        };

        Ok(SimulationSummary {
            workload,
            nodes,
            report,
        })
    }

    fn check<M: Message>(
        &self,
        registry: NodeRegistry<M>,
        scenario: Scenario,
        verifier: impl Verifier + 'static,
    ) -> Result<RunReport, SimulatorError> {
        let mut runner = Runner::new(registry, scenario, self.config.checker.clone(), verifier)?;
        Ok(runner.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distcheck_types::{CheckerConfig, MessageOrder};
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_echo_passes() {
        let config = SimulatorConfig::new(Workload::Echo)
            .with_checker(CheckerConfig::new().with_max_failed_nodes(1));
        let summary = Simulator::new(config).unwrap().run().unwrap();
        assert!(summary.is_success());
        assert!(summary.report.fully_explored);
    }

    #[traced_test]
    #[test]
    fn test_register_fails_on_reordering_links() {
        let config = SimulatorConfig::new(Workload::Register).with_checker(
            CheckerConfig::new().with_message_order(MessageOrder::Asynchronous),
        );
        let summary = Simulator::new(config).unwrap().run().unwrap();
        assert_eq!(
            summary.report.failure.as_ref().map(|f| f.kind_name()),
            Some("IncorrectResults")
        );
    }

    #[test]
    fn test_rejects_single_node() {
        let config = SimulatorConfig::new(Workload::Echo).with_nodes(1);
        assert!(matches!(
            Simulator::new(config),
            Err(SimulatorError::TooFewNodes { required: 2, .. })
        ));
    }
}
