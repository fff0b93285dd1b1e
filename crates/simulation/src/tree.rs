//! Persistent search tree over task interleavings.
//!
//! Every tree node is a point in an execution where the scheduler had a
//! choice; its children are keyed by the task executed next. Because task ids
//! restart at zero each iteration and the code under test is deterministic,
//! the same path of choices always reaches the same tree node.
//!
//! The eligible set of a node is reduced with vector clocks: after a task of
//! node `p` ran, a pending task of a lower-numbered node is only worth
//! scheduling if it causally follows the finished one. Independent
//! lower-numbered work commutes with it and is explored elsewhere in the tree.

use crate::error::ExecutionError;
use crate::task::{TaskInfo, TaskKind};
use distcheck_types::{MessageId, MessageOrder, TaskId};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Index of a node in the tree arena.
pub type TreeIndex = usize;

/// The root: the state right after an iteration is reset.
pub const ROOT: TreeIndex = 0;

#[derive(Debug, Clone)]
struct TreeNode {
    /// Task executed to reach this node; `None` at the root.
    task: Option<(TaskId, TaskKind)>,
    parent: Option<TreeIndex>,

    /// Tasks worth scheduling next. `None` until the node is first reached.
    next_possible: Option<BTreeMap<TaskId, TaskKind>>,
    children: BTreeMap<TaskId, TreeIndex>,

    /// Pending deliveries at this node, used to check fault candidates.
    deliveries: BTreeMap<MessageId, TaskId>,

    fully_explored: bool,
    fraction_unexplored: f64,
}

impl TreeNode {
    fn new(task: Option<(TaskId, TaskKind)>, parent: Option<TreeIndex>) -> Self {
        Self {
            task,
            parent,
            next_possible: None,
            children: BTreeMap::new(),
            deliveries: BTreeMap::new(),
            fully_explored: false,
            fraction_unexplored: 1.0,
        }
    }
}

/// Arena-backed interleaving tree that survives across iterations.
#[derive(Debug, Clone)]
pub struct InterleavingTree {
    nodes: Vec<TreeNode>,
    message_order: MessageOrder,
}

impl InterleavingTree {
    pub fn new(message_order: MessageOrder) -> Self {
        Self {
            nodes: vec![TreeNode::new(None, None)],
            message_order,
        }
    }

    /// Number of tree nodes created so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_fully_explored(&self, node: TreeIndex) -> bool {
        self.nodes.get(node).is_some_and(|n| n.fully_explored)
    }

    pub fn fraction_unexplored(&self, node: TreeIndex) -> f64 {
        self.nodes.get(node).map_or(0.0, |n| n.fraction_unexplored)
    }

    pub fn parent(&self, node: TreeIndex) -> Option<TreeIndex> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    /// Eligible task ids at a visited node, in id order.
    pub fn next_possible(&self, node: TreeIndex) -> Vec<TaskId> {
        self.nodes
            .get(node)
            .and_then(|n| n.next_possible.as_ref())
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Record the eligible set of `node` the first time it is reached.
    ///
    /// `finished` is the task whose execution led here (`None` at the root)
    /// and `pending` every task pending afterwards. On later visits the
    /// eligible set must come out the same, otherwise the code under test is
    /// not deterministic and the tree cannot be trusted.
    pub fn finish(
        &mut self,
        node: TreeIndex,
        finished: Option<&TaskInfo>,
        pending: &[TaskInfo],
    ) -> Result<(), ExecutionError> {
        let deliveries: BTreeMap<MessageId, TaskId> = pending
            .iter()
            .filter(|t| t.kind == TaskKind::MessageReceive)
            .filter_map(|t| t.message.map(|m| (m, t.id)))
            .collect();
        let eligible = self.eligible(finished, pending, &deliveries);

        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| ExecutionError::TreeInvariant(format!("no tree node {node}")))?;
        match &entry.next_possible {
            None => {
                entry.next_possible = Some(eligible);
                entry.deliveries = deliveries;
                Ok(())
            }
            Some(known) if *known == eligible => Ok(()),
            Some(known) => Err(ExecutionError::TreeInvariant(format!(
                "eligible tasks changed between visits: {:?} then {:?}",
                known.keys().collect::<Vec<_>>(),
                eligible.keys().collect::<Vec<_>>()
            ))),
        }
    }

    fn eligible(
        &self,
        finished: Option<&TaskInfo>,
        pending: &[TaskInfo],
        deliveries: &BTreeMap<MessageId, TaskId>,
    ) -> BTreeMap<TaskId, TaskKind> {
        // A fault candidate only applies while its delivery is outstanding.
        let live = |t: &&TaskInfo| {
            !t.kind.is_fault_injection()
                || t.message.is_some_and(|m| deliveries.contains_key(&m))
        };

        if self.message_order == MessageOrder::Synchronous {
            // Only the oldest message may move, together with its faults.
            if let Some((&oldest, _)) = deliveries.iter().next() {
                return pending
                    .iter()
                    .filter(live)
                    .filter(|t| t.message == Some(oldest))
                    .map(|t| (t.id, t.kind))
                    .collect();
            }
        }

        let blocked: BTreeSet<TaskId> = if self.message_order == MessageOrder::Fifo {
            // A delivery waits for older messages on the same link.
            pending
                .iter()
                .filter(|t| t.kind == TaskKind::MessageReceive)
                .filter(|t| {
                    pending.iter().any(|u| {
                        u.kind == TaskKind::MessageReceive
                            && u.sender == t.sender
                            && u.owner == t.owner
                            && u.message < t.message
                    })
                })
                .map(|t| t.id)
                .collect()
        } else {
            BTreeSet::new()
        };

        pending
            .iter()
            .filter(live)
            .filter(|t| !blocked.contains(&t.id))
            .filter(|t| match finished {
                None => true,
                Some(f) => t.owner >= f.owner || f.clock.happens_before(&t.clock),
            })
            .map(|t| (t.id, t.kind))
            .collect()
    }

    /// Canonical choice at a visited node: deliveries, recoveries and heals
    /// first, then operations, then fault injections; ties by lowest id.
    pub fn next(&self, node: TreeIndex) -> Option<TaskId> {
        self.nodes
            .get(node)?
            .next_possible
            .as_ref()?
            .iter()
            .min_by_key(|(id, kind)| (kind.rank(), **id))
            .map(|(id, _)| *id)
    }

    /// Child reached by executing `task` at `node`, created on first use.
    pub fn child(&mut self, node: TreeIndex, task: TaskId) -> Result<TreeIndex, ExecutionError> {
        let parent = self
            .nodes
            .get(node)
            .ok_or_else(|| ExecutionError::TreeInvariant(format!("no tree node {node}")))?;
        if let Some(&child) = parent.children.get(&task) {
            return Ok(child);
        }
        let kind = parent
            .next_possible
            .as_ref()
            .and_then(|m| m.get(&task))
            .copied()
            .ok_or_else(|| {
                ExecutionError::TreeInvariant(format!("{task} is not eligible at tree node {node}"))
            })?;

        let index = self.nodes.len();
        self.nodes.push(TreeNode::new(Some((task, kind)), Some(node)));
        self.nodes[node].children.insert(task, index);
        Ok(index)
    }

    /// Pick the prefix of the next iteration.
    ///
    /// Descends from the root. With no switch budget left the canonical
    /// [`next`](Self::next) choice is taken; otherwise the choice is sampled
    /// in proportion to how much of each subtree is unexplored, and every
    /// non-canonical choice spends one switch. Stops at a node that has not
    /// been visited yet or after stepping into a new child.
    pub fn choose_next_interleaving(&self, switches: usize, rng: &mut impl Rng) -> Vec<TaskId> {
        let mut path = Vec::new();
        let mut node = ROOT;
        let mut remaining = switches;

        while let Some(eligible) = self.nodes[node].next_possible.as_ref() {
            let Some(canonical) = self.next(node) else {
                break;
            };
            let chosen = if remaining == 0 {
                canonical
            } else {
                self.sample(node, eligible, rng).unwrap_or(canonical)
            };
            if chosen != canonical {
                remaining -= 1;
            }
            path.push(chosen);
            match self.nodes[node].children.get(&chosen) {
                Some(&child) => node = child,
                None => break,
            }
        }
        path
    }

    fn sample(
        &self,
        node: TreeIndex,
        eligible: &BTreeMap<TaskId, TaskKind>,
        rng: &mut impl Rng,
    ) -> Option<TaskId> {
        let weights: Vec<(TaskId, f64)> = eligible
            .keys()
            .map(|id| (*id, self.weight(node, *id)))
            .collect();
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return None;
        }
        let mut point = rng.gen_range(0.0..total);
        for (id, weight) in &weights {
            if *weight <= 0.0 {
                continue;
            }
            if point < *weight {
                return Some(*id);
            }
            point -= weight;
        }
        weights.iter().rev().find(|(_, w)| *w > 0.0).map(|(id, _)| *id)
    }

    /// Unexplored share of the subtree behind `task` at `node`.
    fn weight(&self, node: TreeIndex, task: TaskId) -> f64 {
        match self.nodes[node].children.get(&task) {
            None => 1.0,
            Some(&child) if self.nodes[child].fully_explored => 0.0,
            Some(&child) => self.nodes[child].fraction_unexplored,
        }
    }

    /// Recompute exploration statistics bottom-up along a visited path.
    ///
    /// `path` lists tree nodes from the root down.
    pub fn update_stats(&mut self, path: &[TreeIndex]) {
        for &node in path.iter().rev() {
            let Some(eligible) = self.nodes[node].next_possible.as_ref() else {
                continue;
            };
            if eligible.is_empty() {
                self.nodes[node].fully_explored = true;
                self.nodes[node].fraction_unexplored = 0.0;
                continue;
            }
            let mut fully = true;
            let mut sum = 0.0;
            for id in eligible.keys() {
                let explored = self.nodes[node]
                    .children
                    .get(id)
                    .is_some_and(|&c| self.nodes[c].fully_explored);
                fully &= explored;
                sum += self.weight(node, *id);
            }
            let fraction = sum / eligible.len() as f64;
            self.nodes[node].fully_explored = fully;
            self.nodes[node].fraction_unexplored = if fully { 0.0 } else { fraction };
        }
    }

    /// Tree nodes from the root to the node reached by `path`, if every step
    /// exists.
    pub fn resolve(&self, path: &[TaskId]) -> Option<Vec<TreeIndex>> {
        let mut nodes = vec![ROOT];
        let mut node = ROOT;
        for task in path {
            node = *self.nodes[node].children.get(task)?;
            nodes.push(node);
        }
        Some(nodes)
    }

    /// Indented rendering for failure reports.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(ROOT, 0, &mut out);
        out
    }

    fn dump_node(&self, node: TreeIndex, depth: usize, out: &mut String) {
        let entry = &self.nodes[node];
        let label = match entry.task {
            Some((id, kind)) => format!("{} {}", kind.short_name(), id),
            None => "root".to_string(),
        };
        let eligible = match &entry.next_possible {
            Some(m) => format!("{:?}", m.keys().map(|t| t.0).collect::<Vec<_>>()),
            None => "unvisited".to_string(),
        };
        let _ = writeln!(
            out,
            "{:indent$}{label} next={eligible} unexplored={:.3}{}",
            "",
            entry.fraction_unexplored,
            if entry.fully_explored { " done" } else { "" },
            indent = depth * 2
        );
        for &child in entry.children.values() {
            self.dump_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distcheck_types::{NodeId, VectorClock};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn clock(values: &[u32]) -> VectorClock {
        let mut c = VectorClock::new(values.len());
        for (i, v) in values.iter().enumerate() {
            for _ in 0..*v {
                c.increment(NodeId::from_index(i));
            }
        }
        c
    }

    fn op(id: u64, owner: u32, c: &[u32]) -> TaskInfo {
        TaskInfo {
            id: TaskId(id),
            owner: NodeId(owner),
            clock: clock(c),
            kind: TaskKind::Operation,
            message: None,
            sender: None,
        }
    }

    fn delivery(id: u64, from: u32, to: u32, msg: u64, c: &[u32]) -> TaskInfo {
        TaskInfo {
            id: TaskId(id),
            owner: NodeId(to),
            clock: clock(c),
            kind: TaskKind::MessageReceive,
            message: Some(MessageId(msg)),
            sender: Some(NodeId(from)),
        }
    }

    fn crash(id: u64, owner: u32, msg: u64, c: &[u32]) -> TaskInfo {
        TaskInfo {
            id: TaskId(id),
            owner: NodeId(owner),
            clock: clock(c),
            kind: TaskKind::NodeCrash,
            message: Some(MessageId(msg)),
            sender: None,
        }
    }

    #[test]
    fn test_root_admits_everything_and_prefers_lowest_operation() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, None, &[op(0, 0, &[1, 0]), op(1, 1, &[0, 1])])
            .unwrap();
        assert_eq!(tree.next_possible(ROOT), vec![TaskId(0), TaskId(1)]);
        assert_eq!(tree.next(ROOT), Some(TaskId(0)));
    }

    #[test]
    fn test_next_prefers_deliveries_over_operations_over_faults() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        let pending = [
            op(1, 1, &[0, 1]),
            delivery(2, 0, 1, 0, &[2, 0]),
            crash(3, 0, 0, &[2, 0]),
        ];
        tree.finish(ROOT, None, &pending).unwrap();
        assert_eq!(tree.next(ROOT), Some(TaskId(2)));
    }

    #[test]
    fn test_independent_lower_node_task_is_pruned() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        let finished = op(1, 1, &[0, 1]);
        // Node 0's operation is concurrent with node 1's: skip it here.
        tree.finish(ROOT, Some(&finished), &[op(0, 0, &[1, 0])])
            .unwrap();
        assert!(tree.next_possible(ROOT).is_empty());

        // A delivery to node 0 caused by node 1 stays.
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, Some(&finished), &[delivery(2, 1, 0, 0, &[0, 2])])
            .unwrap();
        assert_eq!(tree.next_possible(ROOT), vec![TaskId(2)]);
    }

    #[test]
    fn test_fifo_blocks_newer_message_on_same_link() {
        let pending = [
            delivery(2, 0, 1, 0, &[2, 0]),
            delivery(3, 0, 1, 1, &[3, 0]),
            delivery(4, 1, 0, 2, &[0, 2]),
        ];
        let mut tree = InterleavingTree::new(MessageOrder::Fifo);
        tree.finish(ROOT, None, &pending).unwrap();
        assert_eq!(tree.next_possible(ROOT), vec![TaskId(2), TaskId(4)]);

        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, None, &pending).unwrap();
        assert_eq!(tree.next_possible(ROOT).len(), 3);
    }

    #[test]
    fn test_synchronous_allows_only_oldest_message_and_its_faults() {
        let pending = [
            op(1, 1, &[0, 1]),
            delivery(2, 0, 1, 0, &[2, 0]),
            crash(3, 0, 0, &[2, 0]),
            delivery(4, 1, 0, 1, &[0, 2]),
        ];
        let mut tree = InterleavingTree::new(MessageOrder::Synchronous);
        tree.finish(ROOT, None, &pending).unwrap();
        assert_eq!(tree.next_possible(ROOT), vec![TaskId(2), TaskId(3)]);
    }

    #[test]
    fn test_fault_candidate_without_delivery_is_not_eligible() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, None, &[crash(3, 0, 0, &[2, 0])]).unwrap();
        assert!(tree.next_possible(ROOT).is_empty());
    }

    #[test]
    fn test_revisit_with_different_tasks_is_an_error() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, None, &[op(0, 0, &[1])]).unwrap();
        tree.finish(ROOT, None, &[op(0, 0, &[1])]).unwrap();
        let err = tree.finish(ROOT, None, &[op(1, 0, &[1])]).unwrap_err();
        assert!(matches!(err, ExecutionError::TreeInvariant(_)));
    }

    #[test]
    fn test_child_requires_eligibility() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, None, &[op(0, 0, &[1])]).unwrap();
        let child = tree.child(ROOT, TaskId(0)).unwrap();
        assert_eq!(tree.child(ROOT, TaskId(0)).unwrap(), child);
        assert_eq!(tree.parent(child), Some(ROOT));
        assert!(tree.child(ROOT, TaskId(7)).is_err());
    }

    #[test]
    fn test_stats_and_exhaustion() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, None, &[op(0, 0, &[1, 0]), op(1, 1, &[0, 1])])
            .unwrap();

        let a = tree.child(ROOT, TaskId(0)).unwrap();
        tree.finish(a, Some(&op(0, 0, &[1, 0])), &[]).unwrap();
        tree.update_stats(&[ROOT, a]);
        assert!(tree.is_fully_explored(a));
        assert!(!tree.is_fully_explored(ROOT));
        assert!((tree.fraction_unexplored(ROOT) - 0.5).abs() < 1e-9);

        let b = tree.child(ROOT, TaskId(1)).unwrap();
        tree.finish(b, Some(&op(1, 1, &[0, 1])), &[]).unwrap();
        tree.update_stats(&[ROOT, b]);
        assert!(tree.is_fully_explored(ROOT));
        assert_eq!(tree.fraction_unexplored(ROOT), 0.0);

        // An exhausted tree always proposes the canonical path.
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let first = tree.choose_next_interleaving(5, &mut rng);
        for _ in 0..10 {
            assert_eq!(tree.choose_next_interleaving(5, &mut rng), first);
        }
        assert_eq!(first, vec![TaskId(0)]);
    }

    #[test]
    fn test_switches_reach_unexplored_branch() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, None, &[op(0, 0, &[1, 0]), op(1, 1, &[0, 1])])
            .unwrap();
        let a = tree.child(ROOT, TaskId(0)).unwrap();
        tree.finish(a, Some(&op(0, 0, &[1, 0])), &[]).unwrap();
        tree.update_stats(&[ROOT, a]);

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert_eq!(tree.choose_next_interleaving(0, &mut rng), vec![TaskId(0)]);
        // The explored branch weighs nothing, so one switch must take the other.
        assert_eq!(tree.choose_next_interleaving(1, &mut rng), vec![TaskId(1)]);
    }

    #[test]
    fn test_dump_and_resolve() {
        let mut tree = InterleavingTree::new(MessageOrder::Asynchronous);
        tree.finish(ROOT, None, &[op(0, 0, &[1])]).unwrap();
        let a = tree.child(ROOT, TaskId(0)).unwrap();
        assert_eq!(tree.resolve(&[TaskId(0)]), Some(vec![ROOT, a]));
        assert_eq!(tree.resolve(&[TaskId(3)]), None);
        let dump = tree.dump();
        assert!(dump.starts_with("root next=[0]"));
        assert!(dump.contains("  op Task(0) next=unvisited"));
    }
}
