// Numan Thabit 2025
//! Read-side lookups: flattened topology description and per-node
//! coordinates, scoped by an optional filter.

use crate::ids::PhysId;
use crate::machine::Machine;
use crate::partition::TopologyKind;
use crate::{FabricError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionChoice {
    Index(usize),
    /// Resolve through the current hostname's node.
    Current,
}

/// Options recognized by the query surface. A missing filter means the
/// queried node's unique partition (an error when ambiguous).
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologyFilter {
    pub partition: Option<PartitionChoice>,
    pub restricted_only: bool,
}

/// The recursive topology of one partition flattened into parallel
/// arrays; `level_idx[l+1] - level_idx[l]` is the ndims of level `l`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTopology {
    pub num_levels: usize,
    pub num_coords: usize,
    pub kinds: Vec<TopologyKind>,
    pub level_idx: Vec<usize>,
    pub dims: Vec<u32>,
    pub costs: Vec<u64>,
}

fn unique_partition_of(machine: &Machine, id: &PhysId) -> Result<usize> {
    let node = machine
        .explicit()?
        .node(id)
        .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
    let mut parts = node.partitions.ones();
    match (parts.next(), parts.next()) {
        (Some(p), None) => Ok(p),
        _ => Err(FabricError::AmbiguousPartition(id.to_string())),
    }
}

fn resolve_partition(
    machine: &Machine,
    filter: Option<&TopologyFilter>,
    node: Option<&PhysId>,
) -> Result<usize> {
    let idx = match filter.and_then(|f| f.partition) {
        Some(PartitionChoice::Index(idx)) => idx,
        Some(PartitionChoice::Current) => {
            let current = machine
                .current_node()
                .ok_or(FabricError::BadMachine("current host is not in the machine"))?;
            let id = current.id;
            unique_partition_of(machine, &id)?
        }
        None => match node {
            Some(id) => unique_partition_of(machine, id)?,
            None if machine.partitions.len() == 1 => 0,
            None => {
                return Err(FabricError::AmbiguousPartition(
                    "several partitions declared".to_string(),
                ))
            }
        },
    };
    if idx >= machine.partitions.len() {
        return Err(FabricError::PartitionOutOfRange {
            idx,
            nparts: machine.partitions.len(),
        });
    }
    Ok(idx)
}

/// Flatten the (possibly nested) topology of the selected partition.
pub fn get_topology(machine: &Machine, filter: Option<&TopologyFilter>) -> Result<FlatTopology> {
    let partition_idx = resolve_partition(machine, filter, None)?;
    let partition = &machine.partitions[partition_idx];
    let mut topology = partition
        .topology
        .as_ref()
        .ok_or(FabricError::BadMachine("partition has no fitted topology"))?;

    let mut kinds = Vec::new();
    let mut level_idx = vec![0usize];
    let mut dims = Vec::new();
    let mut costs = Vec::new();
    loop {
        kinds.push(topology.kind);
        dims.extend_from_slice(&topology.dims);
        costs.extend_from_slice(&topology.costs);
        level_idx.push(dims.len());
        match &topology.sub {
            Some(sub) => topology = sub,
            None => break,
        }
    }
    Ok(FlatTopology {
        num_levels: kinds.len(),
        num_coords: dims.len(),
        kinds,
        level_idx,
        dims,
        costs,
    })
}

/// Coordinates of one node in the partition selected by the filter.
pub fn get_node_coords(
    machine: &Machine,
    filter: Option<&TopologyFilter>,
    id: &PhysId,
) -> Result<Vec<u32>> {
    let partition_idx = resolve_partition(machine, filter, Some(id))?;
    let node = machine
        .explicit()?
        .node(id)
        .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
    if filter.map_or(false, |f| f.restricted_only) && !node.in_restriction {
        return Err(FabricError::NodeNotFound(id.to_string()));
    }
    if !node.partitions.contains(partition_idx) {
        return Err(FabricError::NoSuchEntry(format!(
            "{id} is not in partition {partition_idx}"
        )));
    }
    let position = node
        .position(partition_idx)
        .ok_or_else(|| FabricError::NoSuchEntry(format!("{id} has no coordinates")))?;
    Ok(position.coords.clone())
}
