//! Distcheck Simulator CLI
//!
//! Runs the model checker against a built-in workload and prints the result.

use clap::{Parser, Subcommand};
use distcheck_simulator::{Simulator, SimulatorConfig, Workload};
use distcheck_types::{CheckerConfig, MessageOrder, NetworkPartitionMode, RecoveryMode};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "distcheck-sim")]
#[command(about = "Explore interleavings of sample distributed protocols")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in workloads
    Workloads,

    /// Check a workload
    Run {
        /// Workload to check (echo, broadcast, register)
        #[arg(short, long, default_value = "echo")]
        workload: Workload,

        /// Total number of nodes
        #[arg(short, long, default_value = "2")]
        nodes: usize,

        /// Operations per participating node
        #[arg(long, default_value = "1")]
        operations: usize,

        /// Maximum simultaneously failed nodes (0 disables fault injection)
        #[arg(long, default_value = "0")]
        max_failed: usize,

        /// Recovery mode (none, all)
        #[arg(long, default_value = "none")]
        recovery: RecoveryMode,

        /// Message ordering (sync, fifo, async)
        #[arg(long, default_value = "fifo")]
        order: MessageOrder,

        /// Enable network partitions (halves, single-edge)
        #[arg(long)]
        partitions: Option<NetworkPartitionMode>,

        /// Per-iteration timeout (e.g., "500ms", "10s")
        #[arg(long, default_value = "10s")]
        timeout: humantime::Duration,

        /// Maximum number of iterations
        #[arg(short, long, default_value = "1000")]
        invocations: usize,

        /// Seed for every random choice
        #[arg(long, default_value = "12345")]
        seed: u64,

        /// Write the failing iteration's trace here
        #[arg(long)]
        trace_file: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Workloads => {
            for workload in Workload::ALL {
                println!("{:<10} {}", workload.name(), workload.description());
            }
            ExitCode::SUCCESS
        }

        Commands::Run {
            workload,
            nodes,
            operations,
            max_failed,
            recovery,
            order,
            partitions,
            timeout,
            invocations,
            seed,
            trace_file,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();

            let mut checker = CheckerConfig::new()
                .with_max_failed_nodes(max_failed)
                .with_recovery(recovery)
                .with_message_order(order)
                .with_timeout(*timeout)
                .with_invocations(invocations)
                .with_seed(seed);
            if let Some(mode) = partitions {
                checker = checker.with_partitions(mode);
            }
            if let Some(path) = trace_file {
                checker = checker.with_trace_file(path);
            }

            let config = SimulatorConfig::new(workload)
                .with_nodes(nodes)
                .with_operations(operations)
                .with_checker(checker);

            let summary = match Simulator::new(config).and_then(|s| s.run()) {
                Ok(summary) => summary,
                Err(e) => {
                    eprintln!("error: {e}");
                    return ExitCode::from(2);
                }
            };
            summary.print();
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
