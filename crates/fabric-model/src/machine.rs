// Numan Thabit 2025
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::ids::PhysId;
use crate::link::PhysicalLink;
use crate::node::Node;
use crate::partition::Partition;
use crate::{FabricError, Result};

/// The explicit network graph: every node and physical link, with the
/// hostname index kept alongside the id map.
#[derive(Debug, Default)]
pub struct ExplicitGraph {
    pub nodes: BTreeMap<PhysId, Node>,
    pub by_hostname: BTreeMap<String, PhysId>,
    pub links: BTreeMap<u64, PhysicalLink>,
}

impl ExplicitGraph {
    pub fn add_node(&mut self, node: Node) {
        debug_assert!(!self.nodes.contains_key(&node.id));
        if let Some(hostname) = &node.hostname {
            self.by_hostname.insert(hostname.clone(), node.id);
        }
        self.nodes.insert(node.id, node);
    }

    pub fn node(&self, id: &PhysId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_by_hostname(&self, name: &str) -> Option<&Node> {
        self.by_hostname.get(name).and_then(|id| self.nodes.get(id))
    }
}

/// Subset of nodes usable for placement in the current allocation,
/// mirrored by the `in_restriction` flag on each listed node.
#[derive(Debug, Default)]
pub struct Restriction {
    pub nodes: Vec<PhysId>,
}

/// Root of the model. Owns partitions, the explicit graph, the
/// restriction, the hwloc file table and the id counters used while
/// building, so several machines can coexist in one process.
#[derive(Debug)]
pub struct Machine {
    pub topo_dir: PathBuf,
    pub topo_path: Option<PathBuf>,
    pub partitions: Vec<Partition>,
    pub explicit: Option<ExplicitGraph>,
    pub restriction: Restriction,
    pub hwloc_dir: Option<PathBuf>,
    /// File names of the per-host hwloc topologies; `Node::hwloc_topo_idx`
    /// is a 1-based slot in this table.
    pub hwloc_paths: Vec<String>,
    next_link_id: u64,
    next_virtual_seq: u32,
}

impl Machine {
    pub fn new(topo_dir: impl Into<PathBuf>) -> Self {
        Self {
            topo_dir: topo_dir.into(),
            topo_path: None,
            partitions: Vec::new(),
            explicit: None,
            restriction: Restriction::default(),
            hwloc_dir: None,
            hwloc_paths: Vec::new(),
            next_link_id: 0,
            next_virtual_seq: 0,
        }
    }

    /// File the machine serializes to, `IB-<subnet>-nodes.xml` under the
    /// topology directory.
    pub fn default_topo_path(&self) -> Option<PathBuf> {
        let subnet = &self.partitions.first()?.subnet;
        Some(self.topo_dir.join(format!("IB-{subnet}-nodes.xml")))
    }

    pub fn add_partitions(&mut self, partitions: Vec<Partition>) {
        self.partitions = partitions;
    }

    pub fn add_explicit(&mut self) -> &mut ExplicitGraph {
        self.explicit.get_or_insert_with(ExplicitGraph::default)
    }

    pub fn explicit(&self) -> Result<&ExplicitGraph> {
        self.explicit
            .as_ref()
            .ok_or(FabricError::BadMachine("no explicit graph"))
    }

    pub fn explicit_mut(&mut self) -> Result<&mut ExplicitGraph> {
        self.explicit
            .as_mut()
            .ok_or(FabricError::BadMachine("no explicit graph"))
    }

    pub fn next_link_id(&mut self) -> u64 {
        let id = self.next_link_id;
        self.next_link_id += 1;
        id
    }

    pub fn next_virtual_id(&mut self) -> PhysId {
        self.next_virtual_seq += 1;
        PhysId::virtual_id(self.next_virtual_seq)
    }

    /// Bump the link counter past ids read back from a file so later
    /// additions cannot collide.
    pub fn reserve_link_id(&mut self, id: u64) {
        if id >= self.next_link_id {
            self.next_link_id = id + 1;
        }
    }

    pub fn find_node_by_name(&self, name: &str) -> Option<&Node> {
        self.explicit.as_ref()?.node_by_hostname(name)
    }

    /// Node matching the hostname reported by the OS.
    pub fn current_node(&self) -> Option<&Node> {
        let name = hostname::get().ok()?;
        self.find_node_by_name(name.to_string_lossy().as_ref())
    }

    pub fn restriction_add_node(&mut self, id: &PhysId) -> Result<()> {
        let explicit = self
            .explicit
            .as_mut()
            .ok_or(FabricError::BadMachine("no explicit graph"))?;
        let node = explicit
            .nodes
            .get_mut(id)
            .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
        if node.in_restriction {
            return Err(FabricError::AlreadyInRestriction(id.to_string()));
        }
        node.in_restriction = true;
        self.restriction.nodes.push(*id);
        Ok(())
    }

    /// Replace the restriction wholesale.
    pub fn restriction_set_nodes(&mut self, ids: Vec<PhysId>) -> Result<()> {
        let explicit = self
            .explicit
            .as_mut()
            .ok_or(FabricError::BadMachine("no explicit graph"))?;
        for id in &self.restriction.nodes {
            if let Some(node) = explicit.nodes.get_mut(id) {
                node.in_restriction = false;
            }
        }
        for id in &ids {
            let node = explicit
                .nodes
                .get_mut(id)
                .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
            node.in_restriction = true;
        }
        debug!(num_nodes = ids.len(), "restriction replaced");
        self.restriction.nodes = ids;
        Ok(())
    }

    /// The unique partition every listed node belongs to. Zero or more
    /// than one qualifying partition is an error.
    pub fn find_shared_partition(&self, ids: &[PhysId]) -> Result<usize> {
        if ids.is_empty() {
            return Err(FabricError::NoSharedPartition);
        }
        let explicit = self.explicit()?;
        let mut shared: Vec<usize> = (0..self.partitions.len()).collect();
        for id in ids {
            let node = explicit
                .node(id)
                .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
            shared.retain(|&p| node.partitions.contains(p));
        }
        match shared.as_slice() {
            [p] => Ok(*p),
            _ => Err(FabricError::NoSharedPartition),
        }
    }
}
