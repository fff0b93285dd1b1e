//! Built-in workloads: a protocol plus the scenario it is checked against.

use distcheck_core::{Operation, Scenario};
use distcheck_types::{ConfigError, NodeId};
use std::fmt;
use std::str::FromStr;

/// Which sample protocol to check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Workload {
    /// One server, every other node echoes through it.
    #[default]
    Echo,

    /// Every node is a peer; node 0 broadcasts.
    Broadcast,

    /// One register server, clients write then read their own value.
    /// Loses read-your-writes when links may reorder.
    Register,
}

impl Workload {
    pub const ALL: [Workload; 3] = [Workload::Echo, Workload::Broadcast, Workload::Register];

    pub fn name(self) -> &'static str {
        match self {
            Workload::Echo => "echo",
            Workload::Broadcast => "broadcast",
            Workload::Register => "register",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Workload::Echo => "request/reply through a single server",
            Workload::Broadcast => "best-effort broadcast from node 0",
            Workload::Register => "register with client-side write acknowledgement",
        }
    }

    /// Fewest nodes the workload makes sense with.
    pub fn min_nodes(self) -> usize {
        2
    }

    /// Build the scenario for `nodes` nodes and `operations` per active node.
    ///
    /// Server-based workloads put the server at `Node(0)`.
    pub fn scenario(self, nodes: usize, operations: usize) -> Scenario {
        let mut scenario = Scenario::new(nodes);
        match self {
            Workload::Echo => {
                for client in 1..nodes {
                    for j in 0..operations {
                        scenario.push(
                            NodeId::from_index(client),
                            Operation::new("echo").with_arg(format!("c{client}-{j}")),
                        );
                    }
                }
            }
            Workload::Broadcast => {
                for j in 0..operations {
                    scenario.push(
                        NodeId(0),
                        Operation::new("broadcast").with_arg(format!("v{j}")),
                    );
                }
            }
            Workload::Register => {
                for client in 1..nodes {
                    let node = NodeId::from_index(client);
                    for j in 0..operations {
                        let value = client * 100 + j + 1;
                        scenario.push(node, Operation::new("write").with_arg(value));
                        scenario.push(node, Operation::new("read"));
                    }
                }
            }
        }
        scenario
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Workload {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Workload::ALL
            .into_iter()
            .find(|w| w.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownValue {
                field: "workload",
                value: s.to_string(),
            })
    }
}
