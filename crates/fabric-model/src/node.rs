// Numan Thabit 2025
use std::collections::BTreeMap;

use crate::edge::Edge;
use crate::ids::{PartitionSet, PhysId};
use crate::partition::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Compute endpoint (channel adapter).
    Host,
    Switch,
}

impl NodeKind {
    pub fn encode(&self) -> &'static str {
        match self {
            NodeKind::Host => "CA",
            NodeKind::Switch => "SW",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "CA" => Some(NodeKind::Host),
            "SW" => Some(NodeKind::Switch),
            _ => None,
        }
    }
}

/// A host or switch in the explicit graph.
///
/// A node with a non-empty `subnodes` list is virtual; a node carrying
/// `virtual_parent` lives inside that virtual node's subnode table and not
/// in the machine's global map. Rust ownership makes the two states
/// mutually exclusive: virtualization moves the `Node` value itself.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub id: PhysId,
    pub kind: Option<NodeKind>,
    pub logical_id: i64,
    pub hostname: Option<String>,
    pub description: Option<String>,
    /// Outgoing edges keyed by destination physical id. BTreeMap keeps the
    /// iteration order the virtualization pass relies on.
    pub edges: BTreeMap<PhysId, Edge>,
    /// Ids of the physical links leaving this node. A virtual node carries
    /// the concatenation of its subnodes' lists.
    pub physical_links: Vec<u64>,
    pub partitions: PartitionSet,
    /// Per-partition placement, indexed by partition index.
    pub positions: Vec<Option<Position>>,
    pub subnodes: Vec<Node>,
    pub virtual_parent: Option<PhysId>,
    pub in_restriction: bool,
    /// 1-based slot in the machine's hwloc file table, when a per-host
    /// topology file was found.
    pub hwloc_topo_idx: Option<usize>,
}

impl Node {
    pub fn new(id: PhysId, kind: NodeKind) -> Self {
        Self {
            id,
            kind: Some(kind),
            logical_id: -1,
            ..Self::default()
        }
    }

    pub fn is_host(&self) -> bool {
        self.kind == Some(NodeKind::Host)
    }

    pub fn is_switch(&self) -> bool {
        self.kind == Some(NodeKind::Switch)
    }

    pub fn is_virtual(&self) -> bool {
        !self.subnodes.is_empty()
    }

    pub fn position(&self, partition_idx: usize) -> Option<&Position> {
        self.positions.get(partition_idx).and_then(|p| p.as_ref())
    }

    pub fn set_position(&mut self, partition_idx: usize, position: Position) {
        if self.positions.len() <= partition_idx {
            self.positions.resize(partition_idx + 1, None);
        }
        self.positions[partition_idx] = Some(position);
    }
}
