//! End-to-end scenarios: delivery, crashes, recoveries and partitions.

use distcheck_core::{AcceptAll, Event, OpResult, Operation, Scenario, TraceEntry};
use distcheck_simulation::{NodeRegistry, Runner};
use distcheck_test_helpers::{
    echo_verifier, BroadcastNode, EchoClient, EchoMessage, EchoServer, BROADCAST, CLIENT, SERVER,
};
use distcheck_types::{
    CheckerConfig, MessageOrder, NetworkPartitionMode, NodeId, RecoveryMode, TaskId,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_test::traced_test;

fn echo_runner(config: CheckerConfig) -> Runner<EchoMessage> {
    let registry = NodeRegistry::new()
        .with_nodes(CLIENT, 1, EchoClient::boxed)
        .with_nodes(SERVER, 1, EchoServer::boxed);
    let scenario =
        Scenario::new(2).with_operation(NodeId(0), Operation::new("echo").with_arg("m"));
    Runner::new(registry, scenario, config, echo_verifier).unwrap()
}

fn broadcast_runner(nodes: usize, config: CheckerConfig) -> Runner<String> {
    let registry = NodeRegistry::new().with_nodes(BROADCAST, nodes, BroadcastNode::boxed);
    let scenario =
        Scenario::new(nodes).with_operation(NodeId(0), Operation::new("broadcast").with_arg("m"));
    Runner::new(registry, scenario, config, AcceptAll).unwrap()
}

fn received_at(trace: &[TraceEntry], node: NodeId) -> usize {
    trace
        .iter()
        .filter(|e| e.node == node && matches!(e.event, Event::MessageReceived { .. }))
        .count()
}

#[traced_test]
#[test]
fn test_single_message_synchronous() {
    let config = CheckerConfig::new().with_message_order(MessageOrder::Synchronous);
    let mut runner = broadcast_runner(2, config);

    let outcome = runner.run_interleaving(&[]);
    let results = outcome.results().unwrap();
    assert_eq!(results.per_node.len(), 2);
    assert_eq!(results.per_node[0], vec![OpResult::Void]);
    assert_eq!(results.states[1].as_deref(), Some("[m from Node(0)]"));
    assert_eq!(received_at(&runner.last_trace(), NodeId(1)), 1);

    let report = runner.run();
    assert!(report.is_success());
    assert!(report.fully_explored);
}

#[traced_test]
#[test]
fn test_crash_before_delivery_loses_message() {
    let config = CheckerConfig::new().with_max_failed_nodes(1);
    let mut runner = echo_runner(config);

    // Task 0 is the client's echo, task 1 the server's empty operation list.
    // The request becomes delivery 2 with crash candidate 3.
    let outcome = runner.run_interleaving(&[TaskId(0), TaskId(3)]);
    let results = outcome.results().unwrap();
    assert_eq!(results.per_node[0], vec![OpResult::Crashed]);
    assert_eq!(results.states[0], None);
    assert_eq!(results.states[1].as_deref(), Some(""));

    let trace = runner.last_trace();
    assert_eq!(received_at(&trace, NodeId(1)), 0);
    assert!(trace
        .iter()
        .any(|e| e.node == NodeId(0) && matches!(e.event, Event::MessageLost { .. })));
}

#[traced_test]
#[test]
fn test_exploration_reaches_crash() {
    let seen: Arc<Mutex<Vec<Vec<Vec<OpResult>>>>> = Arc::default();
    let registry = NodeRegistry::new()
        .with_nodes(CLIENT, 1, EchoClient::boxed)
        .with_nodes(SERVER, 1, EchoServer::boxed);
    let scenario =
        Scenario::new(2).with_operation(NodeId(0), Operation::new("echo").with_arg("m"));
    let verifier = {
        let seen = Arc::clone(&seen);
        move |scenario: &Scenario, results: &[Vec<OpResult>]| {
            seen.lock().push(results.to_vec());
            echo_verifier(scenario, results)
        }
    };
    let config = CheckerConfig::new().with_max_failed_nodes(1);
    let mut runner = Runner::new(registry, scenario, config, verifier).unwrap();

    let report = runner.run();
    assert!(report.is_success());
    assert!(report.fully_explored);

    let seen = seen.lock();
    assert!(seen
        .iter()
        .any(|r| r[0] == vec![OpResult::Value("m".into())]));
    assert!(seen.iter().any(|r| r[0] == vec![OpResult::Crashed]));
}

#[traced_test]
#[test]
fn test_recovery_brings_node_back() {
    let config = CheckerConfig::new()
        .with_max_failed_nodes(1)
        .with_recovery(RecoveryMode::AllRecoveries);
    let mut runner = echo_runner(config);

    let outcome = runner.run_interleaving(&[TaskId(0), TaskId(3)]);
    let results = outcome.results().unwrap();
    assert_eq!(results.per_node[0], vec![OpResult::Crashed]);
    assert!(results.states[0].is_some());

    let events: Vec<Event> = runner
        .last_trace()
        .into_iter()
        .filter(|e| e.node == NodeId(0))
        .map(|e| e.event)
        .collect();
    let crashed = events.iter().position(|e| *e == Event::NodeCrashed).unwrap();
    let recovered = events.iter().position(|e| *e == Event::NodeRecovered).unwrap();
    assert!(crashed < recovered);

    assert!(runner.run().is_success());
}

#[traced_test]
#[test]
fn test_partition_drops_cross_half_messages() {
    let config = CheckerConfig::new()
        .with_max_failed_nodes(1)
        .with_partitions(NetworkPartitionMode::Halves);
    let mut runner = broadcast_runner(3, config);

    // Broadcast to Node(1): delivery 3, crash 4, partition 5.
    let outcome = runner.run_interleaving(&[TaskId(0), TaskId(5)]);
    assert!(!outcome.is_failure());

    let trace = runner.last_trace();
    assert!(trace
        .iter()
        .any(|e| matches!(e.event, Event::NetworkPartitioned { .. })));
    assert!(trace
        .iter()
        .any(|e| matches!(e.event, Event::MessageLost { .. })));
    assert!(!trace.iter().any(|e| e.event == Event::NodeCrashed));
}

#[traced_test]
#[test]
fn test_single_edge_partition_exploration() {
    let config = CheckerConfig::new()
        .with_max_failed_nodes(1)
        .with_partitions(NetworkPartitionMode::SingleEdge)
        .with_recovery(RecoveryMode::AllRecoveries)
        .with_invocations(200);
    let report = broadcast_runner(3, config).run();
    assert!(report.is_success());
    assert!(report.iterations > 1);
}
