//! Per-iteration simulation state and the node-facing environment.
//!
//! [`SimulationContext`] owns everything a single iteration mutates: node
//! instances, vector clocks, pending tasks, the fault model and the event log.
//! It is reset between iterations; only the interleaving tree (held by the
//! runner) persists.

use crate::error::ExecutionError;
use crate::fault::FaultModel;
use crate::task::{PendingTaskRegistry, Task, TaskBody, TaskInfo, TaskKind};
use distcheck_core::{
    Environment, Event, ExecutionResults, Message, Node, NodeError, OpResult, OperationOutcome,
    Scenario, TraceEntry,
};
use distcheck_types::{
    CheckerConfig, ConfigError, MessageId, NodeClocks, NodeId, NodeType, TaskId, VectorClock,
};
use indexmap::IndexMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Creates a fresh node instance for an address.
pub type NodeFactory<M> = Arc<dyn Fn(NodeId) -> Box<dyn Node<M>> + Send + Sync>;

struct NodeGroup<M> {
    count: usize,
    factory: NodeFactory<M>,
}

/// Node types, their counts and factories.
///
/// Addresses are handed out contiguously in registration order: the first
/// registered type gets `Node(0)..Node(count-1)`, and so on.
pub struct NodeRegistry<M> {
    groups: IndexMap<NodeType, NodeGroup<M>>,
}

impl<M: Message> NodeRegistry<M> {
    pub fn new() -> Self {
        Self {
            groups: IndexMap::new(),
        }
    }

    /// Register `count` nodes of `node_type` built by `factory`.
    ///
    /// Registering a type again replaces its count and factory.
    pub fn with_nodes<F>(mut self, node_type: NodeType, count: usize, factory: F) -> Self
    where
        F: Fn(NodeId) -> Box<dyn Node<M>> + Send + Sync + 'static,
    {
        self.groups.insert(
            node_type,
            NodeGroup {
                count,
                factory: Arc::new(factory),
            },
        );
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.groups.values().map(|g| g.count).sum()
    }

    pub fn is_registered(&self, node_type: &NodeType) -> bool {
        self.groups.contains_key(node_type)
    }

    /// Type of every address, indexed by node.
    pub fn node_types(&self) -> Vec<NodeType> {
        self.groups
            .iter()
            .flat_map(|(t, g)| std::iter::repeat(*t).take(g.count))
            .collect()
    }

    pub fn addresses_for_type(&self, node_type: &NodeType) -> Vec<NodeId> {
        let mut start = 0;
        for (t, g) in &self.groups {
            if t == node_type {
                return (start..start + g.count).map(NodeId::from_index).collect();
            }
            start += g.count;
        }
        Vec::new()
    }

    /// Build a fresh instance for `node`.
    pub fn create(&self, node: NodeId) -> Option<Box<dyn Node<M>>> {
        let mut start = 0;
        for g in self.groups.values() {
            if node.index() < start + g.count {
                return Some((g.factory)(node));
            }
            start += g.count;
        }
        None
    }
}

impl<M: Message> Default for NodeRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation bookkeeping for one node.
#[derive(Debug, Clone, Default)]
struct NodeProgress {
    started: bool,
    /// Index of the operation in flight.
    current: Option<usize>,
    /// Index of the next operation to invoke.
    next: usize,
}

/// Mutable state of one iteration.
pub struct SimulationContext<M: Message> {
    config: Arc<CheckerConfig>,
    registry: Arc<NodeRegistry<M>>,
    scenario: Arc<Scenario>,
    node_types: Vec<NodeType>,

    clocks: NodeClocks,
    tasks: PendingTaskRegistry<M>,
    next_task_id: TaskId,
    next_message_id: MessageId,

    /// `None` while a node is crashed or its handler is running.
    nodes: Vec<Option<Box<dyn Node<M>>>>,
    progress: Vec<NodeProgress>,
    results: Vec<Vec<OpResult>>,

    events: Vec<TraceEntry>,
    logs: Vec<Vec<String>>,

    fault: FaultModel,
    rng: ChaCha8Rng,

    /// Fault candidates attached to each pending delivery.
    fault_candidates: BTreeMap<MessageId, Vec<TaskId>>,
}

impl<M: Message> SimulationContext<M> {
    /// Check the run setup and build an empty context.
    pub fn new(
        config: Arc<CheckerConfig>,
        registry: Arc<NodeRegistry<M>>,
        scenario: Arc<Scenario>,
    ) -> Result<Self, ConfigError> {
        Self::check_setup(&config, &registry, &scenario)?;
        Ok(Self::build(config, registry, scenario))
    }

    /// Reject configurations no iteration could run with.
    pub fn check_setup(
        config: &CheckerConfig,
        registry: &NodeRegistry<M>,
        scenario: &Scenario,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        let num_nodes = registry.num_nodes();
        if num_nodes == 0 {
            return Err(ConfigError::NoNodes);
        }
        if scenario.num_nodes() > num_nodes {
            return Err(ConfigError::ScenarioSize {
                scenario: scenario.num_nodes(),
                registered: num_nodes,
            });
        }
        if let Some(unknown) = config
            .max_failed_nodes_for_type
            .keys()
            .find(|t| !registry.is_registered(t))
        {
            return Err(ConfigError::UnknownNodeType(*unknown));
        }
        Ok(())
    }

    /// Build an empty context for an already checked setup.
    pub(crate) fn build(
        config: Arc<CheckerConfig>,
        registry: Arc<NodeRegistry<M>>,
        scenario: Arc<Scenario>,
    ) -> Self {
        let num_nodes = registry.num_nodes();
        let node_types = registry.node_types();
        let fault = FaultModel::new(node_types.clone(), &config);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            clocks: NodeClocks::new(num_nodes),
            tasks: PendingTaskRegistry::new(),
            next_task_id: TaskId(0),
            next_message_id: MessageId(0),
            nodes: (0..num_nodes).map(|_| None).collect(),
            progress: vec![NodeProgress::default(); num_nodes],
            results: vec![Vec::new(); num_nodes],
            events: Vec::new(),
            logs: vec![Vec::new(); num_nodes],
            fault,
            rng,
            fault_candidates: BTreeMap::new(),
            node_types,
            config,
            registry,
            scenario,
        }
    }

    /// Start a new iteration: fresh nodes, clocks and fault model, and one
    /// operation task per node.
    ///
    /// Task and message ids restart at zero, so the same choices in a later
    /// iteration produce the same ids.
    pub fn reset(&mut self) {
        let n = self.num_nodes();
        self.clocks.reset();
        self.tasks.clear();
        self.next_task_id = TaskId(0);
        self.next_message_id = MessageId(0);
        self.nodes = (0..n)
            .map(|i| self.registry.create(NodeId::from_index(i)))
            .collect();
        self.progress = vec![NodeProgress::default(); n];
        self.results = vec![Vec::new(); n];
        self.events.clear();
        self.logs = vec![Vec::new(); n];
        self.fault = FaultModel::new(self.node_types.clone(), &self.config);
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.fault_candidates.clear();

        for i in 0..n {
            let node = NodeId::from_index(i);
            let clock = self.clocks.increment_and_snapshot(node);
            self.add_task(node, clock, TaskBody::Operation { index: 0 });
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn fault_model(&self) -> &FaultModel {
        &self.fault
    }

    pub fn has_pending(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn pending_infos(&self) -> Vec<TaskInfo> {
        self.tasks.infos()
    }

    pub fn first_pending(&self) -> Option<TaskId> {
        self.tasks.first_id()
    }

    /// Remove a task for execution.
    pub fn take_task(&mut self, id: TaskId) -> Option<Task<M>> {
        self.tasks.take(id)
    }

    pub fn events(&self) -> &[TraceEntry] {
        &self.events
    }

    pub fn logs(&self) -> &[Vec<String>] {
        &self.logs
    }

    /// Results and final node states of the iteration.
    pub fn results(&self) -> ExecutionResults {
        ExecutionResults {
            per_node: self.results.clone(),
            states: self
                .nodes
                .iter()
                .map(|n| n.as_ref().map(|n| n.state_representation()))
                .collect(),
        }
    }

    /// First live node whose final state is rejected.
    pub fn validate(&self) -> Option<(NodeId, String)> {
        self.nodes.iter().enumerate().find_map(|(i, n)| {
            let node = n.as_ref()?;
            node.validate().err().map(|msg| (NodeId::from_index(i), msg))
        })
    }

    fn add_task(&mut self, owner: NodeId, clock: VectorClock, body: TaskBody<M>) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id = id.next();
        self.tasks.insert(Task {
            id,
            owner,
            clock,
            body,
        });
        id
    }

    fn record(&mut self, node: NodeId, event: Event) {
        trace!(%node, %event, "event");
        self.events.push(TraceEntry { node, event });
    }

    /// Run `f` on the node's instance with an environment bound to it.
    ///
    /// Returns `None` if the node has no instance (crashed).
    fn with_node<R>(
        &mut self,
        node: NodeId,
        f: impl FnOnce(&mut dyn Node<M>, &mut dyn Environment<M>) -> R,
    ) -> Option<R> {
        let mut instance = self.nodes.get_mut(node.index())?.take()?;
        let result = {
            let mut env = NodeEnvironment { ctx: self, node };
            f(instance.as_mut(), &mut env)
        };
        self.nodes[node.index()] = Some(instance);
        Some(result)
    }

    /// Declared errors finish the operation in flight with an exception;
    /// anything else aborts the iteration.
    fn handle_node_error(&mut self, node: NodeId, error: NodeError) -> Result<(), ExecutionError> {
        let handled = self.progress[node.index()]
            .current
            .and_then(|index| self.scenario.operations(node).get(index))
            .is_some_and(|op| op.is_handled(&error.kind));
        if handled {
            debug!(%node, kind = %error.kind, "Operation finished with declared error");
            self.finish_operation(node, OpResult::Exception(error.kind));
            Ok(())
        } else {
            Err(ExecutionError::Node {
                node,
                source: error,
            })
        }
    }

    fn ensure_started(&mut self, node: NodeId) -> Result<(), ExecutionError> {
        if self.progress[node.index()].started {
            return Ok(());
        }
        self.progress[node.index()].started = true;
        match self.with_node(node, |n, env| n.on_start(env)) {
            Some(Err(e)) => self.handle_node_error(node, e),
            _ => Ok(()),
        }
    }

    /// Finish the node's operation in flight and schedule the next one.
    ///
    /// Returns false if nothing was in flight.
    fn finish_operation(&mut self, node: NodeId, result: OpResult) -> bool {
        let Some(index) = self.progress[node.index()].current.take() else {
            return false;
        };
        self.results[node.index()][index] = result.clone();
        self.record(node, Event::OperationFinished { index, result });
        self.schedule_next_operation(node);
        true
    }

    fn schedule_next_operation(&mut self, node: NodeId) {
        let next = self.progress[node.index()].next;
        if next < self.scenario.operations(node).len() {
            let clock = self.clocks.increment_and_snapshot(node);
            self.add_task(node, clock, TaskBody::Operation { index: next });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Task bodies
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn run_operation(&mut self, node: NodeId, index: usize) -> Result<(), ExecutionError> {
        if self.fault.is_crashed(node) {
            return Ok(());
        }
        self.ensure_started(node)?;
        let Some(operation) = self.scenario.operations(node).get(index).cloned() else {
            return Ok(());
        };

        let progress = &mut self.progress[node.index()];
        progress.current = Some(index);
        progress.next = index + 1;
        self.results[node.index()].push(OpResult::NoResult);
        self.record(
            node,
            Event::OperationStarted {
                index,
                operation: operation.to_string(),
            },
        );

        let outcome = self.with_node(node, |n, env| n.on_operation(&operation, env));
        match outcome {
            Some(Ok(OperationOutcome::Value(v))) => {
                self.finish_operation(node, OpResult::Value(v));
            }
            Some(Ok(OperationOutcome::Void)) => {
                self.finish_operation(node, OpResult::Void);
            }
            Some(Ok(OperationOutcome::Pending)) | None => {}
            Some(Err(e)) => self.handle_node_error(node, e)?,
        }
        Ok(())
    }

    pub(crate) fn deliver(
        &mut self,
        node: NodeId,
        from: NodeId,
        message: M,
        message_id: MessageId,
        sent_at: &VectorClock,
    ) -> Result<(), ExecutionError> {
        self.withdraw_candidates(message_id);
        if self.fault.is_crashed(node) || !self.fault.can_send(from, node) {
            self.record(from, Event::MessageLost { id: message_id, to: node });
            return Ok(());
        }
        self.ensure_started(node)?;

        self.clocks.merge(node, sent_at);
        self.clocks.increment(node);
        self.record(
            node,
            Event::MessageReceived {
                id: message_id,
                from,
                message: format!("{message:?}"),
            },
        );
        match self.with_node(node, |n, env| n.on_message(message, from, env)) {
            Some(Err(e)) => self.handle_node_error(node, e),
            _ => Ok(()),
        }
    }

    pub(crate) fn crash(&mut self, node: NodeId, at: MessageId) -> Result<(), ExecutionError> {
        let Some(next) = self.fault.crash_node(node) else {
            return Ok(());
        };
        self.fault = next;
        self.record(node, Event::NodeCrashed);

        // The node's sends from `at` on never happened, and its own work dies
        // with it. A heal belongs to the network and outlives its initiator.
        let dropped = self.tasks.drain_where(|t| {
            let owned = t.owner == node && t.kind() != TaskKind::PartitionHeal;
            owned || (t.sender() == Some(node) && t.message_id().is_some_and(|m| m >= at))
        });
        for task in dropped {
            if let TaskBody::MessageReceive {
                from, message_id, ..
            } = task.body
            {
                self.withdraw_candidates(message_id);
                self.record(from, Event::MessageLost { id: message_id, to: task.owner });
            }
        }

        self.nodes[node.index()] = None;
        if let Some(index) = self.progress[node.index()].current.take() {
            self.results[node.index()][index] = OpResult::Crashed;
            self.record(
                node,
                Event::OperationFinished {
                    index,
                    result: OpResult::Crashed,
                },
            );
        }
        self.prune_candidates();

        if self.config.supports_recovery() {
            let clock = self.clocks.increment_and_snapshot(node);
            self.add_task(node, clock, TaskBody::NodeRecover);
        }
        Ok(())
    }

    pub(crate) fn recover(&mut self, node: NodeId) -> Result<(), ExecutionError> {
        let Some(next) = self.fault.recover_node(node) else {
            return Ok(());
        };
        self.fault = next;
        self.nodes[node.index()] = self.registry.create(node);
        self.progress[node.index()].started = true;
        self.record(node, Event::NodeRecovered);

        if let Some(Err(e)) = self.with_node(node, |n, env| n.on_recovery(env)) {
            self.handle_node_error(node, e)?;
        }
        if self.progress[node.index()].current.is_none() {
            self.schedule_next_operation(node);
        }
        Ok(())
    }

    pub(crate) fn partition(&mut self, initiator: NodeId) -> Result<(), ExecutionError> {
        let Some(next) = self.fault.set_partition(&mut self.rng) else {
            return Ok(());
        };
        self.fault = next;
        let description = self.fault.describe_partition();
        self.record(initiator, Event::NetworkPartitioned { description });
        self.prune_candidates();

        if self.config.supports_recovery() {
            let clock = self.clocks.increment_and_snapshot(initiator);
            self.add_task(initiator, clock, TaskBody::PartitionHeal);
        }
        Ok(())
    }

    pub(crate) fn heal(&mut self, initiator: NodeId) -> Result<(), ExecutionError> {
        let Some(next) = self.fault.heal_partition(&mut self.rng) else {
            return Ok(());
        };
        self.fault = next;
        let description = self.fault.describe_partition();
        self.record(initiator, Event::PartitionHealed { description });
        Ok(())
    }

    /// End-of-scenario hook for one node. Crashed nodes are skipped.
    pub(crate) fn finish_scenario(&mut self, node: NodeId) -> Result<(), ExecutionError> {
        match self.with_node(node, |n, env| n.on_scenario_finish(env)) {
            None => Ok(()),
            Some(result) => {
                self.record(node, Event::ScenarioFinished);
                result.or_else(|e| self.handle_node_error(node, e))
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════

    fn send(&mut self, from: NodeId, message: M, to: NodeId) {
        if to.index() >= self.num_nodes() {
            warn!(%from, %to, "Dropping message to unknown address");
            return;
        }
        let id = self.next_message_id;
        self.next_message_id = id.next();
        let clock = self.clocks.increment_and_snapshot(from);
        self.record(
            from,
            Event::MessageSent {
                id,
                to,
                message: format!("{message:?}"),
            },
        );
        if !self.fault.can_send(from, to) {
            self.record(from, Event::MessageLost { id, to });
            return;
        }

        self.add_task(
            to,
            clock.clone(),
            TaskBody::MessageReceive {
                from,
                message,
                message_id: id,
            },
        );

        // Candidates are created after the delivery so their ids are larger.
        let mut candidates = Vec::new();
        if self.config.faults_enabled() && self.fault.crash_node(from).is_some() {
            candidates.push(self.add_task(from, clock.clone(), TaskBody::NodeCrash { message_id: id }));
        }
        if self.config.partitions_enabled && self.fault.can_partition() {
            candidates.push(self.add_task(from, clock, TaskBody::NetworkPartition { message_id: id }));
        }
        if !candidates.is_empty() {
            self.fault_candidates.insert(id, candidates);
        }
    }

    /// A delivered message's fault candidates can no longer be chosen.
    fn withdraw_candidates(&mut self, message_id: MessageId) {
        if let Some(ids) = self.fault_candidates.remove(&message_id) {
            for id in ids {
                self.tasks.take(id);
            }
        }
    }

    /// Drop candidates the current fault model no longer allows.
    fn prune_candidates(&mut self) {
        let mut stale = Vec::new();
        for ids in self.fault_candidates.values_mut() {
            ids.retain(|&id| {
                let applicable = match self.tasks.get(id) {
                    Some(task) => match task.kind() {
                        TaskKind::NodeCrash => self.fault.crash_node(task.owner).is_some(),
                        TaskKind::NetworkPartition => self.fault.can_partition(),
                        _ => true,
                    },
                    None => false,
                };
                if !applicable {
                    stale.push(id);
                }
                applicable
            });
        }
        self.fault_candidates.retain(|_, ids| !ids.is_empty());
        for id in stale {
            self.tasks.take(id);
        }
    }
}

/// [`Environment`] handed to node logic for the duration of one handler.
pub struct NodeEnvironment<'a, M: Message> {
    ctx: &'a mut SimulationContext<M>,
    node: NodeId,
}

impl<M: Message> Environment<M> for NodeEnvironment<'_, M> {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn num_nodes(&self) -> usize {
        self.ctx.num_nodes()
    }

    fn send(&mut self, message: M, target: NodeId) {
        self.ctx.send(self.node, message, target);
    }

    fn record_internal_event(&mut self, message: String) {
        self.ctx.logs[self.node.index()].push(message.clone());
        self.ctx.record(self.node, Event::InternalEvent { message });
    }

    fn addresses_for_type(&self, node_type: NodeType) -> Vec<NodeId> {
        self.ctx.registry.addresses_for_type(&node_type)
    }

    fn events(&self) -> Vec<Event> {
        self.ctx
            .events
            .iter()
            .filter(|e| e.node == self.node)
            .map(|e| e.event.clone())
            .collect()
    }

    fn logs(&self) -> Vec<Vec<String>> {
        self.ctx.logs.clone()
    }

    fn complete_operation(&mut self, value: Option<String>) -> bool {
        let result = match value {
            Some(v) => OpResult::Value(v),
            None => OpResult::Void,
        };
        self.ctx.finish_operation(self.node, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distcheck_core::Operation;
    use distcheck_types::{NetworkPartitionMode, RecoveryMode};
    use tracing_test::traced_test;

    const PEER: NodeType = NodeType("peer");

    /// Sends `ping` to the next node on every operation and stays pending
    /// until a `pong` comes back.
    struct Pinger {
        received: Vec<String>,
    }

    impl Node<String> for Pinger {
        fn on_operation(
            &mut self,
            _operation: &Operation,
            env: &mut dyn Environment<String>,
        ) -> Result<OperationOutcome, NodeError> {
            let target = NodeId::from_index((env.node_id().index() + 1) % env.num_nodes());
            env.send("ping".into(), target);
            Ok(OperationOutcome::Pending)
        }

        fn on_message(
            &mut self,
            message: String,
            sender: NodeId,
            env: &mut dyn Environment<String>,
        ) -> Result<(), NodeError> {
            self.received.push(message.clone());
            match message.as_str() {
                "ping" => env.send("pong".into(), sender),
                "pong" => {
                    env.complete_operation(Some("ok".into()));
                }
                "bad" => return Err(NodeError::new("Rejected", "bad message")),
                _ => {}
            }
            Ok(())
        }

        fn state_representation(&self) -> String {
            format!("{:?}", self.received)
        }
    }

    fn context(config: CheckerConfig, scenario: Scenario) -> SimulationContext<String> {
        let registry = NodeRegistry::new().with_nodes(PEER, 2, |_| {
            Box::new(Pinger {
                received: Vec::new(),
            }) as Box<dyn Node<String>>
        });
        let mut ctx =
            SimulationContext::new(Arc::new(config), Arc::new(registry), Arc::new(scenario))
                .unwrap();
        ctx.reset();
        ctx
    }

    fn ping_scenario() -> Scenario {
        Scenario::new(2).with_operation(NodeId(0), Operation::new("ping"))
    }

    fn run(ctx: &mut SimulationContext<String>, id: u64) {
        let task = ctx.take_task(TaskId(id)).unwrap();
        task.execute(ctx).unwrap();
    }

    #[test]
    fn test_registry_addresses_are_contiguous() {
        let registry: NodeRegistry<String> = NodeRegistry::new()
            .with_nodes(NodeType("client"), 1, |_| unreachable!())
            .with_nodes(NodeType("server"), 3, |_| unreachable!());
        assert_eq!(registry.num_nodes(), 4);
        assert_eq!(
            registry.addresses_for_type(&NodeType("server")),
            vec![NodeId(1), NodeId(2), NodeId(3)]
        );
        assert_eq!(registry.node_types()[0], NodeType("client"));
        assert!(registry.addresses_for_type(&NodeType("other")).is_empty());
    }

    #[test]
    fn test_rejects_scenario_larger_than_cluster() {
        let registry: NodeRegistry<String> =
            NodeRegistry::new().with_nodes(PEER, 1, |_| unreachable!());
        let result = SimulationContext::new(
            Arc::new(CheckerConfig::new()),
            Arc::new(registry),
            Arc::new(Scenario::new(2)),
        );
        assert!(matches!(
            result.err(),
            Some(ConfigError::ScenarioSize {
                scenario: 2,
                registered: 1
            })
        ));
    }

    #[traced_test]
    #[test]
    fn test_reset_seeds_one_operation_per_node() {
        let ctx = context(CheckerConfig::new(), ping_scenario());
        let infos = ctx.pending_infos();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|t| t.kind == TaskKind::Operation));
        assert_eq!(infos[0].id, TaskId(0));
        assert_eq!(infos[1].owner, NodeId(1));
    }

    #[traced_test]
    #[test]
    fn test_request_reply_completes_pending_operation() {
        let mut ctx = context(CheckerConfig::new(), ping_scenario());
        run(&mut ctx, 0); // node 0 sends ping (task 2)
        assert_eq!(ctx.results().per_node[0], vec![OpResult::NoResult]);
        run(&mut ctx, 2); // node 1 replies (task 3)
        run(&mut ctx, 3);
        assert_eq!(ctx.results().per_node[0], vec![OpResult::Value("ok".into())]);

        let sent_at = ctx
            .events()
            .iter()
            .position(|e| matches!(e.event, Event::MessageSent { .. }))
            .unwrap();
        let received_at = ctx
            .events()
            .iter()
            .position(|e| matches!(e.event, Event::MessageReceived { .. }))
            .unwrap();
        assert!(sent_at < received_at);
    }

    #[traced_test]
    #[test]
    fn test_send_creates_crash_candidate_after_delivery() {
        let config = CheckerConfig::new().with_max_failed_nodes(1);
        let mut ctx = context(config, ping_scenario());
        run(&mut ctx, 0);
        let infos = ctx.pending_infos();
        let delivery = infos.iter().find(|t| t.kind == TaskKind::MessageReceive).unwrap();
        let crash = infos.iter().find(|t| t.kind == TaskKind::NodeCrash).unwrap();
        assert!(crash.id > delivery.id);
        assert_eq!(crash.owner, NodeId(0));
        assert_eq!(crash.message, delivery.message);

        // Delivering withdraws the candidate.
        run(&mut ctx, delivery.id.0);
        assert!(ctx
            .pending_infos()
            .iter()
            .all(|t| t.kind != TaskKind::NodeCrash || t.message != delivery.message));
    }

    #[traced_test]
    #[test]
    fn test_crash_drops_later_sends_and_marks_operation() {
        let config = CheckerConfig::new().with_max_failed_nodes(1);
        let mut ctx = context(config, ping_scenario());
        run(&mut ctx, 0); // delivery 2, crash candidate 3
        run(&mut ctx, 3);

        assert!(ctx.fault_model().is_crashed(NodeId(0)));
        assert!(ctx
            .pending_infos()
            .iter()
            .all(|t| t.kind != TaskKind::MessageReceive));
        assert_eq!(ctx.results().per_node[0], vec![OpResult::Crashed]);
        assert_eq!(ctx.results().states[0], None);
        assert!(ctx
            .events()
            .iter()
            .any(|e| e.node == NodeId(0) && e.event == Event::NodeCrashed));
    }

    #[traced_test]
    #[test]
    fn test_recovery_schedules_and_restarts_node() {
        let config = CheckerConfig::new()
            .with_max_failed_nodes(1)
            .with_recovery(RecoveryMode::AllRecoveries);
        let mut ctx = context(config, ping_scenario());
        run(&mut ctx, 0);
        run(&mut ctx, 3);
        let recover = ctx
            .pending_infos()
            .into_iter()
            .find(|t| t.kind == TaskKind::NodeRecover)
            .unwrap();
        run(&mut ctx, recover.id.0);
        assert!(!ctx.fault_model().is_crashed(NodeId(0)));
        assert_eq!(ctx.results().states[0], Some("[]".into()));
    }

    #[traced_test]
    #[test]
    fn test_partition_heals_after_initiator_crashes() {
        let config = CheckerConfig::new()
            .with_max_failed_nodes(2)
            .with_partitions(NetworkPartitionMode::Halves)
            .with_recovery(RecoveryMode::AllRecoveries);
        let mut ctx = context(config, ping_scenario());
        run(&mut ctx, 0); // delivery 2, crash candidate 3, partition candidate 4
        run(&mut ctx, 4);
        assert!(ctx.fault_model().is_partitioned());
        run(&mut ctx, 3);
        assert!(ctx.fault_model().is_crashed(NodeId(0)));
        assert!(ctx
            .pending_infos()
            .iter()
            .any(|t| t.kind == TaskKind::PartitionHeal));

        while let Some(id) = ctx.first_pending() {
            run(&mut ctx, id.0);
        }
        assert!(!ctx.fault_model().is_partitioned());
        assert!(ctx
            .events()
            .iter()
            .any(|e| matches!(e.event, Event::PartitionHealed { .. })));
    }

    #[traced_test]
    #[test]
    fn test_undeclared_error_aborts_and_declared_error_completes() {
        let scenario = Scenario::new(2)
            .with_operation(NodeId(0), Operation::new("ping").handles("Rejected"));
        let mut ctx = context(CheckerConfig::new(), scenario);
        run(&mut ctx, 0);
        // Node 0 has an operation in flight that declares `Rejected`.
        let env_result = ctx.deliver(NodeId(0), NodeId(1), "bad".into(), MessageId(9), &VectorClock::new(2));
        assert!(env_result.is_ok());
        assert_eq!(
            ctx.results().per_node[0],
            vec![OpResult::Exception("Rejected".into())]
        );

        // Node 1 has nothing in flight, so the same error is fatal.
        let err = ctx
            .deliver(NodeId(1), NodeId(0), "bad".into(), MessageId(10), &VectorClock::new(2))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Node { node: NodeId(1), .. }));
    }
}
