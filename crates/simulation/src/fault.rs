//! Crash and partition state of the simulated cluster.
//!
//! [`FaultModel`] is a persistent value: every transition returns a new
//! instance (or `None` when the transition is not allowed) and leaves the
//! receiver untouched. The simulation context holds exactly one current
//! instance and swaps it at fault-injection points. Sets are `im` collections,
//! so a transition shares structure with its predecessor.

use distcheck_types::{CheckerConfig, NetworkPartitionMode, NodeId, NodeType};
use im::{OrdSet, Vector};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Static limits shared by every fault-model instance of a run.
#[derive(Debug, PartialEq, Eq)]
struct FaultBudget {
    max_failed: usize,
    max_failed_for_type: HashMap<NodeType, usize>,
    node_types: Vec<NodeType>,
}

impl FaultBudget {
    /// Whether `failed` nodes may be down at the same time.
    fn allows(&self, failed: &OrdSet<NodeId>) -> bool {
        if failed.len() > self.max_failed {
            return false;
        }
        self.max_failed_for_type.iter().all(|(node_type, &max)| {
            let count = failed
                .iter()
                .filter(|id| self.node_types.get(id.index()) == Some(node_type))
                .count();
            count <= max
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PartitionState {
    /// `minority` is one half; everyone else is the other. Empty when healed.
    Halves { minority: OrdSet<NodeId> },

    /// Links are cut individually. `component` labels every node with its
    /// connected component; nodes outside the largest one are `unreachable`.
    SingleEdge {
        removed: OrdSet<(NodeId, NodeId)>,
        component: Vector<usize>,
        unreachable: OrdSet<NodeId>,
    },
}

/// Which nodes are crashed and how the network is partitioned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultModel {
    budget: Arc<FaultBudget>,
    crashed: OrdSet<NodeId>,
    partition: PartitionState,
}

impl FaultModel {
    /// Create a healthy cluster.
    ///
    /// `node_types[i]` is the type of `NodeId(i)`.
    pub fn new(node_types: Vec<NodeType>, config: &CheckerConfig) -> Self {
        let n = node_types.len();
        let partition = match config.partition_mode {
            NetworkPartitionMode::Halves => PartitionState::Halves {
                minority: OrdSet::new(),
            },
            NetworkPartitionMode::SingleEdge => PartitionState::SingleEdge {
                removed: OrdSet::new(),
                component: Vector::from(vec![0; n]),
                unreachable: OrdSet::new(),
            },
        };
        Self {
            budget: Arc::new(FaultBudget {
                max_failed: config.max_failed_nodes,
                max_failed_for_type: config.max_failed_nodes_for_type.clone(),
                node_types,
            }),
            crashed: OrdSet::new(),
            partition,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.budget.node_types.len()
    }

    pub fn is_crashed(&self, node: NodeId) -> bool {
        self.crashed.contains(&node)
    }

    /// Nodes cut off by the current partition.
    pub fn partitioned(&self) -> OrdSet<NodeId> {
        match &self.partition {
            PartitionState::Halves { minority } => minority.clone(),
            PartitionState::SingleEdge { unreachable, .. } => unreachable.clone(),
        }
    }

    /// Whether any partition is in effect.
    pub fn is_partitioned(&self) -> bool {
        match &self.partition {
            PartitionState::Halves { minority } => !minority.is_empty(),
            PartitionState::SingleEdge { removed, .. } => !removed.is_empty(),
        }
    }

    /// Crashed and partitioned nodes together.
    pub fn failed_nodes(&self) -> OrdSet<NodeId> {
        self.crashed.clone().union(self.partitioned())
    }

    pub fn number_of_failed_nodes(&self) -> usize {
        self.failed_nodes().len()
    }

    /// Mark `node` crashed.
    ///
    /// Fails if it is already crashed or the crash budget is exhausted.
    pub fn crash_node(&self, node: NodeId) -> Option<Self> {
        if node.index() >= self.num_nodes() || self.crashed.contains(&node) {
            return None;
        }
        if !self.budget.allows(&self.failed_nodes().update(node)) {
            return None;
        }
        Some(Self {
            crashed: self.crashed.update(node),
            ..self.clone()
        })
    }

    /// Bring a crashed node back.
    pub fn recover_node(&self, node: NodeId) -> Option<Self> {
        if !self.crashed.contains(&node) {
            return None;
        }
        Some(Self {
            crashed: self.crashed.without(&node),
            ..self.clone()
        })
    }

    /// Whether a message from `from` reaches `to` under the current partition.
    pub fn can_send(&self, from: NodeId, to: NodeId) -> bool {
        match &self.partition {
            PartitionState::Halves { minority } => {
                minority.contains(&from) == minority.contains(&to)
            }
            PartitionState::SingleEdge { component, .. } => {
                // A crashed sender is modelled as dropping, not as cut off.
                if self.crashed.contains(&from) {
                    return true;
                }
                match (component.get(from.index()), component.get(to.index())) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
        }
    }

    /// Whether [`FaultModel::set_partition`] could possibly succeed.
    pub fn can_partition(&self) -> bool {
        if self.number_of_failed_nodes() >= self.budget.max_failed {
            return false;
        }
        match &self.partition {
            PartitionState::Halves { minority } => {
                minority.is_empty() && self.num_nodes() - self.crashed.len() >= 2
            }
            PartitionState::SingleEdge { .. } => self.num_nodes() >= 2,
        }
    }

    /// Inject a random partition.
    ///
    /// Halves: a random non-empty subset of healthy nodes, no larger than the
    /// remaining budget, becomes one half. Single-edge: a random link is cut.
    pub fn set_partition(&self, rng: &mut impl Rng) -> Option<Self> {
        match &self.partition {
            PartitionState::Halves { minority } => {
                if !minority.is_empty() {
                    return None;
                }
                let mut healthy: Vec<NodeId> = (0..self.num_nodes())
                    .map(NodeId::from_index)
                    .filter(|id| !self.crashed.contains(id))
                    .collect();
                let remaining = self
                    .budget
                    .max_failed
                    .saturating_sub(self.number_of_failed_nodes());
                let limit = remaining.min(healthy.len().saturating_sub(1));
                if limit == 0 {
                    return None;
                }
                let size = rng.gen_range(1..=limit);
                healthy.shuffle(rng);

                let mut chosen = OrdSet::new();
                for node in healthy {
                    if chosen.len() == size {
                        break;
                    }
                    let candidate = chosen.update(node);
                    if self.budget.allows(&self.crashed.clone().union(candidate.clone())) {
                        chosen = candidate;
                    }
                }
                if chosen.is_empty() {
                    return None;
                }
                Some(Self {
                    partition: PartitionState::Halves { minority: chosen },
                    ..self.clone()
                })
            }
            PartitionState::SingleEdge { removed, .. } => {
                let edges: Vec<(NodeId, NodeId)> = self
                    .all_edges()
                    .filter(|edge| !removed.contains(edge))
                    .collect();
                let &(a, b) = edges.choose(rng)?;
                self.remove_edge(a, b)
            }
        }
    }

    /// Undo a partition.
    ///
    /// Halves: the two halves merge. Single-edge: one random cut link is
    /// restored.
    pub fn heal_partition(&self, rng: &mut impl Rng) -> Option<Self> {
        match &self.partition {
            PartitionState::Halves { minority } => {
                if minority.is_empty() {
                    return None;
                }
                Some(Self {
                    partition: PartitionState::Halves {
                        minority: OrdSet::new(),
                    },
                    ..self.clone()
                })
            }
            PartitionState::SingleEdge { removed, .. } => {
                let edges: Vec<(NodeId, NodeId)> = removed.iter().copied().collect();
                let &(a, b) = edges.choose(rng)?;
                self.restore_edge(a, b)
            }
        }
    }

    /// Cut the link between `a` and `b` (single-edge mode only).
    ///
    /// Fails if the link is already cut or if the nodes left outside the
    /// largest connected component would exceed the failure budget.
    pub fn remove_edge(&self, a: NodeId, b: NodeId) -> Option<Self> {
        let PartitionState::SingleEdge { removed, .. } = &self.partition else {
            return None;
        };
        let edge = normalize(a, b)?;
        if edge.1.index() >= self.num_nodes() || removed.contains(&edge) {
            return None;
        }
        let next = self.with_removed_edges(removed.update(edge));
        if !self.budget.allows(&next.failed_nodes()) {
            return None;
        }
        Some(next)
    }

    /// Restore a previously cut link (single-edge mode only).
    pub fn restore_edge(&self, a: NodeId, b: NodeId) -> Option<Self> {
        let PartitionState::SingleEdge { removed, .. } = &self.partition else {
            return None;
        };
        let edge = normalize(a, b)?;
        if !removed.contains(&edge) {
            return None;
        }
        Some(self.with_removed_edges(removed.without(&edge)))
    }

    /// Short description of the partition for the event log.
    pub fn describe_partition(&self) -> String {
        match &self.partition {
            PartitionState::Halves { minority } => {
                let ids: Vec<String> = minority.iter().map(|n| n.0.to_string()).collect();
                format!("halves {{{}}}", ids.join(", "))
            }
            PartitionState::SingleEdge {
                removed,
                unreachable,
                ..
            } => {
                let cut: Vec<String> = removed
                    .iter()
                    .map(|(a, b)| format!("{}-{}", a.0, b.0))
                    .collect();
                let lost: Vec<String> = unreachable.iter().map(|n| n.0.to_string()).collect();
                format!(
                    "cut [{}] unreachable {{{}}}",
                    cut.join(", "),
                    lost.join(", ")
                )
            }
        }
    }

    fn all_edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> {
        let n = self.num_nodes();
        (0..n).flat_map(move |i| {
            (i + 1..n).map(move |j| (NodeId::from_index(i), NodeId::from_index(j)))
        })
    }

    fn with_removed_edges(&self, removed: OrdSet<(NodeId, NodeId)>) -> Self {
        let n = self.num_nodes();
        let labels = connected_components(n, &removed);

        // The largest component stays reachable; ties go to the lowest label,
        // which is the component of the lowest node id.
        let mut sizes = vec![0usize; n];
        for &label in &labels {
            sizes[label] += 1;
        }
        let mut main = 0;
        for (label, &size) in sizes.iter().enumerate() {
            if size > sizes[main] {
                main = label;
            }
        }
        let unreachable = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label != main)
            .map(|(i, _)| NodeId::from_index(i))
            .collect();

        Self {
            partition: PartitionState::SingleEdge {
                removed,
                component: Vector::from(labels),
                unreachable,
            },
            ..self.clone()
        }
    }
}

fn normalize(a: NodeId, b: NodeId) -> Option<(NodeId, NodeId)> {
    match a.cmp(&b) {
        std::cmp::Ordering::Less => Some((a, b)),
        std::cmp::Ordering::Greater => Some((b, a)),
        std::cmp::Ordering::Equal => None,
    }
}

/// Label the nodes of a complete graph minus `removed` by component.
/// Labels are assigned in order of each component's lowest node.
fn connected_components(n: usize, removed: &OrdSet<(NodeId, NodeId)>) -> Vec<usize> {
    let mut labels = vec![usize::MAX; n];
    let mut next_label = 0;
    for start in 0..n {
        if labels[start] != usize::MAX {
            continue;
        }
        labels[start] = next_label;
        let mut stack = vec![start];
        while let Some(u) = stack.pop() {
            for v in 0..n {
                if labels[v] != usize::MAX || v == u {
                    continue;
                }
                let edge = (NodeId::from_index(u.min(v)), NodeId::from_index(u.max(v)));
                if !removed.contains(&edge) {
                    labels[v] = next_label;
                    stack.push(v);
                }
            }
        }
        next_label += 1;
    }
    labels
}
