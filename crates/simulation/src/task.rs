//! Schedulable units of node-local work.

use crate::context::SimulationContext;
use crate::error::ExecutionError;
use distcheck_core::Message;
use distcheck_types::{MessageId, NodeId, TaskId, VectorClock};
use std::collections::BTreeMap;

/// What a task does, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    /// Run the owner's next scenario operation.
    Operation,
    /// Deliver a message to the owner.
    MessageReceive,
    /// Crash the owner (a fault-injection candidate).
    NodeCrash,
    /// Bring the crashed owner back.
    NodeRecover,
    /// Partition the network (a fault-injection candidate).
    NetworkPartition,
    /// Heal the current partition.
    PartitionHeal,
}

impl TaskKind {
    /// Scheduling preference of the canonical order, lower first.
    ///
    /// Deliveries and recoveries run before operations; injected faults
    /// come last so the canonical execution is fault-free.
    pub fn rank(self) -> u8 {
        match self {
            TaskKind::MessageReceive | TaskKind::NodeRecover | TaskKind::PartitionHeal => 0,
            TaskKind::Operation => 1,
            TaskKind::NodeCrash | TaskKind::NetworkPartition => 2,
        }
    }

    /// Whether this task injects a fault when chosen.
    pub fn is_fault_injection(self) -> bool {
        matches!(self, TaskKind::NodeCrash | TaskKind::NetworkPartition)
    }

    pub fn short_name(self) -> &'static str {
        match self {
            TaskKind::Operation => "op",
            TaskKind::MessageReceive => "recv",
            TaskKind::NodeCrash => "crash",
            TaskKind::NodeRecover => "recover",
            TaskKind::NetworkPartition => "partition",
            TaskKind::PartitionHeal => "heal",
        }
    }
}

/// Task payload.
#[derive(Debug)]
pub enum TaskBody<M> {
    Operation {
        index: usize,
    },
    MessageReceive {
        from: NodeId,
        message: M,
        message_id: MessageId,
    },
    /// Crash at the send of `message_id`: the crashed node's messages from
    /// that one on are lost.
    NodeCrash {
        message_id: MessageId,
    },
    NodeRecover,
    NetworkPartition {
        message_id: MessageId,
    },
    PartitionHeal,
}

/// A unit of node-local work with its causal timestamp.
#[derive(Debug)]
pub struct Task<M> {
    pub id: TaskId,
    pub owner: NodeId,
    pub clock: VectorClock,
    pub body: TaskBody<M>,
}

/// Payload-free view of a task, used by the interleaving tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub owner: NodeId,
    pub clock: VectorClock,
    pub kind: TaskKind,

    /// Delivered message, or the send a fault candidate is attached to.
    pub message: Option<MessageId>,

    /// Sender of a delivered message.
    pub sender: Option<NodeId>,
}

impl<M: Message> Task<M> {
    pub fn kind(&self) -> TaskKind {
        match self.body {
            TaskBody::Operation { .. } => TaskKind::Operation,
            TaskBody::MessageReceive { .. } => TaskKind::MessageReceive,
            TaskBody::NodeCrash { .. } => TaskKind::NodeCrash,
            TaskBody::NodeRecover => TaskKind::NodeRecover,
            TaskBody::NetworkPartition { .. } => TaskKind::NetworkPartition,
            TaskBody::PartitionHeal => TaskKind::PartitionHeal,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match self.body {
            TaskBody::MessageReceive { message_id, .. }
            | TaskBody::NodeCrash { message_id }
            | TaskBody::NetworkPartition { message_id } => Some(message_id),
            _ => None,
        }
    }

    pub fn sender(&self) -> Option<NodeId> {
        match self.body {
            TaskBody::MessageReceive { from, .. } => Some(from),
            _ => None,
        }
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            owner: self.owner,
            clock: self.clock.clone(),
            kind: self.kind(),
            message: self.message_id(),
            sender: self.sender(),
        }
    }

    /// Run the task body against the simulation state.
    pub fn execute(self, ctx: &mut SimulationContext<M>) -> Result<(), ExecutionError> {
        let Task {
            owner, clock, body, ..
        } = self;
        match body {
            TaskBody::Operation { index } => ctx.run_operation(owner, index),
            TaskBody::MessageReceive {
                from,
                message,
                message_id,
            } => ctx.deliver(owner, from, message, message_id, &clock),
            TaskBody::NodeCrash { message_id } => ctx.crash(owner, message_id),
            TaskBody::NodeRecover => ctx.recover(owner),
            TaskBody::NetworkPartition { .. } => ctx.partition(owner),
            TaskBody::PartitionHeal => ctx.heal(owner),
        }
    }
}

/// Tasks created but not yet executed, ordered by id.
#[derive(Debug)]
pub struct PendingTaskRegistry<M> {
    tasks: BTreeMap<TaskId, Task<M>>,
}

impl<M> Default for PendingTaskRegistry<M> {
    fn default() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }
}

impl<M: Message> PendingTaskRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task<M>) {
        debug_assert!(!self.tasks.contains_key(&task.id), "task id reused");
        self.tasks.insert(task.id, task);
    }

    /// Remove a task for execution. Each task is taken at most once.
    pub fn take(&mut self, id: TaskId) -> Option<Task<M>> {
        self.tasks.remove(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task<M>> {
        self.tasks.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Lowest pending id.
    pub fn first_id(&self) -> Option<TaskId> {
        self.tasks.keys().next().copied()
    }

    /// Payload-free views of every pending task, in id order.
    pub fn infos(&self) -> Vec<TaskInfo> {
        self.tasks.values().map(Task::info).collect()
    }

    /// Remove every task matching `drop`, returning them in id order.
    pub fn drain_where(&mut self, mut drop: impl FnMut(&Task<M>) -> bool) -> Vec<Task<M>> {
        let ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| drop(t))
            .map(|t| t.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.tasks.remove(&id))
            .collect()
    }
}
