//! Iteration loop driving the interleaving search.

use crate::context::{NodeRegistry, SimulationContext};
use crate::dispatcher::Dispatcher;
use crate::error::ExecutionError;
use crate::task::TaskInfo;
use crate::trace;
use crate::tree::{InterleavingTree, TreeIndex, ROOT};
use distcheck_core::{
    Failure, FailureKind, IterationOutcome, Message, Scenario, TraceEntry, Verifier,
};
use distcheck_types::{CheckerConfig, ConfigError, NodeId, TaskId};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Summary of a [`Runner::run`] call.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Iterations executed.
    pub iterations: usize,

    /// Iterations that ran out of eligible tasks and were drained in id order.
    pub interrupted_iterations: usize,

    /// Whether every interleaving reachable under the reduction was explored.
    pub fully_explored: bool,

    /// Switch budget when the run stopped.
    pub number_of_switches: usize,

    /// First failing iteration, which also stopped the run.
    pub failure: Option<Failure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

struct Iteration {
    outcome: IterationOutcome,
    interrupted: bool,
}

/// Explores interleavings of a scenario until it finds a failure, exhausts
/// the search space or runs out of invocations.
///
/// # Example
///
/// ```ignore
/// let registry = NodeRegistry::new().with_nodes(NodeType("peer"), 3, |_| {
///     Box::new(MyNode::default()) as Box<dyn Node<MyMessage>>
/// });
/// let scenario = Scenario::new(3).with_operation(NodeId(0), Operation::new("put"));
/// let config = CheckerConfig::new().with_max_failed_nodes(1);
///
/// let mut runner = Runner::new(registry, scenario, config, AcceptAll)?;
/// let report = runner.run();
/// assert!(report.is_success());
/// ```
pub struct Runner<M: Message> {
    config: Arc<CheckerConfig>,
    registry: Arc<NodeRegistry<M>>,
    scenario: Arc<Scenario>,
    verifier: Box<dyn Verifier>,

    tree: InterleavingTree,
    rng: ChaCha8Rng,
    number_of_switches: usize,

    context: Arc<Mutex<SimulationContext<M>>>,
    dispatcher: Dispatcher,
}

impl<M: Message> Runner<M> {
    pub fn new(
        registry: NodeRegistry<M>,
        scenario: Scenario,
        config: CheckerConfig,
        verifier: impl Verifier + 'static,
    ) -> Result<Self, ConfigError> {
        let config = Arc::new(config);
        let registry = Arc::new(registry);
        let scenario = Arc::new(scenario);
        let context = SimulationContext::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&scenario),
        )?;
        Ok(Self {
            tree: InterleavingTree::new(config.message_order),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            number_of_switches: 0,
            context: Arc::new(Mutex::new(context)),
            dispatcher: Dispatcher::new(),
            verifier: Box::new(verifier),
            config,
            registry,
            scenario,
        })
    }

    pub fn tree(&self) -> &InterleavingTree {
        &self.tree
    }

    pub fn number_of_switches(&self) -> usize {
        self.number_of_switches
    }

    /// Event log of the most recent iteration.
    pub fn last_trace(&self) -> Vec<TraceEntry> {
        self.context.lock().events().to_vec()
    }

    /// Run iterations until a failure, full exploration, or the invocation
    /// limit.
    pub fn run(&mut self) -> RunReport {
        info!(
            nodes = self.registry.num_nodes(),
            operations = self.scenario.total_operations(),
            invocations = self.config.invocations_per_iteration,
            seed = self.config.seed,
            "Starting model check"
        );

        let mut report = RunReport::default();
        for _ in 0..self.config.invocations_per_iteration {
            if self.tree.is_fully_explored(ROOT) {
                break;
            }
            let before = self.tree.fraction_unexplored(ROOT);
            let path = self
                .tree
                .choose_next_interleaving(self.number_of_switches, &mut self.rng);
            debug!(
                iteration = report.iterations,
                prefix = path.len(),
                switches = self.number_of_switches,
                "Starting iteration"
            );

            let iteration = self.run_iteration(&path, true);
            report.iterations += 1;
            if iteration.interrupted {
                report.interrupted_iterations += 1;
            }
            if let IterationOutcome::Failed(failure) = iteration.outcome {
                warn!(
                    kind = failure.kind_name(),
                    iteration = report.iterations,
                    "Iteration failed"
                );
                self.write_trace(&failure);
                report.failure = Some(failure);
                break;
            }

            // No progress: allow one more deviation from the canonical order.
            if self.tree.fraction_unexplored(ROOT) >= before {
                self.number_of_switches += 1;
            }
        }

        report.fully_explored = self.tree.is_fully_explored(ROOT);
        report.number_of_switches = self.number_of_switches;
        info!(
            iterations = report.iterations,
            interrupted = report.interrupted_iterations,
            fully_explored = report.fully_explored,
            failed = report.failure.is_some(),
            "Model check finished"
        );
        report
    }

    /// Replay an exact task order, then drain what is left in id order.
    ///
    /// Exploration statistics are left untouched.
    pub fn run_interleaving(&mut self, path: &[TaskId]) -> IterationOutcome {
        self.run_iteration(path, false).outcome
    }

    fn run_iteration(&mut self, path: &[TaskId], explore: bool) -> Iteration {
        let deadline = Instant::now() + self.config.timeout;
        self.context.lock().reset();

        let mut executed = Vec::new();
        let mut visited = Vec::new();
        let driven = self
            .drive(path, deadline, explore, &mut executed, &mut visited)
            .and_then(|interrupted| self.finish_scenario(deadline).map(|()| interrupted));
        if explore {
            self.tree.update_stats(&visited);
        }

        match driven {
            Ok(interrupted) => Iteration {
                outcome: self.judge(executed),
                interrupted,
            },
            Err(ExecutionError::Timeout) => {
                warn!(timeout = ?self.config.timeout, "Iteration timed out");
                self.restart_worker();
                Iteration {
                    outcome: IterationOutcome::Failed(Failure {
                        kind: FailureKind::Deadlock {
                            timeout: self.config.timeout,
                        },
                        interleaving: executed,
                        trace: Vec::new(),
                    }),
                    interrupted: false,
                }
            }
            Err(e) => Iteration {
                outcome: self.unexpected(e, executed),
                interrupted: false,
            },
        }
    }

    /// Execute the prescribed prefix, then continue canonically.
    ///
    /// Returns whether the iteration ran out of eligible tasks while some
    /// were still pending.
    fn drive(
        &mut self,
        path: &[TaskId],
        deadline: Instant,
        explore: bool,
        executed: &mut Vec<TaskId>,
        visited: &mut Vec<TreeIndex>,
    ) -> Result<bool, ExecutionError> {
        if !explore {
            for &id in path {
                self.execute(id, deadline)?;
                executed.push(id);
            }
            self.drain(deadline, executed)?;
            return Ok(false);
        }

        let pending = self.context.lock().pending_infos();
        self.tree.finish(ROOT, None, &pending)?;
        visited.push(ROOT);

        let mut node = ROOT;
        let mut prescribed = path.iter().copied();
        loop {
            let has_pending = self.context.lock().has_pending();
            if !has_pending {
                return Ok(false);
            }
            let Some(id) = prescribed.next().or_else(|| self.tree.next(node)) else {
                debug!(executed = executed.len(), "No eligible task left, draining");
                self.drain(deadline, executed)?;
                return Ok(true);
            };

            let info = self.execute(id, deadline)?;
            executed.push(id);
            node = self.tree.child(node, id)?;
            visited.push(node);
            let pending = self.context.lock().pending_infos();
            self.tree.finish(node, Some(&info), &pending)?;
        }
    }

    /// Run one task body on the dispatcher and wait for it.
    fn execute(&mut self, id: TaskId, deadline: Instant) -> Result<TaskInfo, ExecutionError> {
        if Instant::now() >= deadline {
            return Err(ExecutionError::Timeout);
        }
        let task = self
            .context
            .lock()
            .take_task(id)
            .ok_or(ExecutionError::UnknownTask { task: id })?;
        let info = task.info();

        let context = Arc::clone(&self.context);
        self.dispatcher
            .submit(move || task.execute(&mut context.lock()))?;
        self.await_dispatcher(deadline)?;
        Ok(info)
    }

    fn await_dispatcher(&self, deadline: Instant) -> Result<(), ExecutionError> {
        self.dispatcher.wait_idle(deadline)?;
        match self.dispatcher.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Execute every pending task in id order.
    fn drain(&mut self, deadline: Instant, executed: &mut Vec<TaskId>) -> Result<(), ExecutionError> {
        loop {
            let next = self.context.lock().first_pending();
            let Some(id) = next else {
                return Ok(());
            };
            self.execute(id, deadline)?;
            executed.push(id);
        }
    }

    /// End-of-scenario hooks on every live node, then whatever they scheduled.
    fn finish_scenario(&mut self, deadline: Instant) -> Result<(), ExecutionError> {
        let num_nodes = self.context.lock().num_nodes();
        for i in 0..num_nodes {
            let context = Arc::clone(&self.context);
            let node = NodeId::from_index(i);
            self.dispatcher
                .submit(move || context.lock().finish_scenario(node))?;
        }
        self.await_dispatcher(deadline)?;
        self.drain(deadline, &mut Vec::new())
    }

    fn judge(&mut self, executed: Vec<TaskId>) -> IterationOutcome {
        let context = self.context.lock();
        let trace = context.events().to_vec();
        if let Some((node, message)) = context.validate() {
            return IterationOutcome::Failed(Failure {
                kind: FailureKind::ValidationFailure { node, message },
                interleaving: executed,
                trace,
            });
        }
        let results = context.results();
        drop(context);

        if self
            .verifier
            .verify_results(&self.scenario, &results.per_node)
        {
            IterationOutcome::Completed(results)
        } else {
            IterationOutcome::Failed(Failure {
                kind: FailureKind::IncorrectResults { results },
                interleaving: executed,
                trace,
            })
        }
    }

    fn unexpected(&self, error: ExecutionError, executed: Vec<TaskId>) -> IterationOutcome {
        let tree_dump = if error.is_internal() {
            warn!(error = %error, "Internal error during iteration");
            Some(self.tree.dump())
        } else {
            debug!(error = %error, "Node logic failed");
            None
        };
        let trace = self.context.lock().events().to_vec();
        IterationOutcome::Failed(Failure {
            kind: FailureKind::UnexpectedException {
                message: error.to_string(),
                tree_dump,
            },
            interleaving: executed,
            trace,
        })
    }

    /// Replace the worker and context after a body overran its deadline.
    ///
    /// The stuck body keeps the old context locked, so neither can be reused.
    fn restart_worker(&mut self) {
        self.dispatcher = Dispatcher::new();
        self.context = Arc::new(Mutex::new(SimulationContext::build(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.scenario),
        )));
    }

    fn write_trace(&self, failure: &Failure) {
        let Some(path) = &self.config.trace_file else {
            return;
        };
        match trace::write_trace(path, failure) {
            Ok(()) => info!(path = %path.display(), "Wrote failure trace"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write failure trace"),
        }
    }
}
