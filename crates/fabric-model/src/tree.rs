// Numan Thabit 2025
//! Decide whether a partition's graph is a balanced tree and assign a leaf
//! coordinate to every host, padding with ghost leaves where the tree is
//! incomplete.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::ids::PhysId;
use crate::machine::Machine;
use crate::partition::{Position, Topology};
use crate::{FabricError, Result};

const NETWORK_COEFF: u64 = 2;

/// Fit a tree topology to the given partition. On success the partition's
/// topology and every member host's position are filled in; on a level
/// mismatch the topology is left empty and the error is returned.
pub fn fit_partition(machine: &mut Machine, partition_idx: usize) -> Result<()> {
    if partition_idx >= machine.partitions.len() {
        return Err(FabricError::PartitionOutOfRange {
            idx: partition_idx,
            nparts: machine.partitions.len(),
        });
    }

    let fit = analyze(machine, partition_idx)?;

    for (id, position) in fit.positions {
        let explicit = machine.explicit_mut()?;
        let node = explicit
            .nodes
            .get_mut(&id)
            .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
        node.set_position(partition_idx, position);
    }
    info!(
        partition = %machine.partitions[partition_idx].name,
        levels = fit.topology.ndims(),
        "partition fits a balanced tree"
    );
    machine.partitions[partition_idx].topology = Some(fit.topology);
    Ok(())
}

struct TreeFit {
    topology: Topology,
    positions: Vec<(PhysId, Position)>,
}

fn analyze(machine: &Machine, partition_idx: usize) -> Result<TreeFit> {
    let explicit = machine.explicit()?;

    let member_ids: Vec<PhysId> = explicit
        .nodes
        .values()
        .filter(|n| n.partitions.contains(partition_idx))
        .map(|n| n.id)
        .collect();
    let hosts: Vec<PhysId> = member_ids
        .iter()
        .copied()
        .filter(|id| explicit.nodes[id].is_host())
        .collect();

    if hosts.is_empty() {
        return Err(FabricError::EmptyPartition);
    }
    if hosts.len() == 1 {
        // Degenerate tree: one host, no levels.
        return Ok(TreeFit {
            topology: Topology::tree(Vec::new(), Vec::new()),
            positions: vec![(
                hosts[0],
                Position {
                    idx: 0,
                    coords: Vec::new(),
                },
            )],
        });
    }

    let in_partition =
        |edge: &crate::edge::Edge| edge.partitions.contains(partition_idx);

    // Level every node by BFS from the host set; edges traversed upward
    // get the level of their source, downward edges stay unassigned.
    let mut node_level: BTreeMap<PhysId, i32> = BTreeMap::new();
    let mut up_edges: BTreeSet<(PhysId, PhysId)> = BTreeSet::new();
    let mut wave = hosts.clone();
    let mut num_levels: i32 = 0;
    while !wave.is_empty() {
        let mut next = Vec::new();
        for id in wave {
            match node_level.get(&id) {
                Some(&level) if level == num_levels => continue,
                Some(&level) => {
                    return Err(FabricError::LevelMismatch {
                        node: id.to_string(),
                        seen: level,
                        expected: num_levels,
                    })
                }
                None => {}
            }
            node_level.insert(id, num_levels);
            let node = &explicit.nodes[&id];
            for edge in node.edges.values().filter(|e| in_partition(e)) {
                match node_level.get(&edge.dest) {
                    Some(&l) if l < num_levels => continue,
                    Some(_) => continue,
                    None => {
                        up_edges.insert((id, edge.dest));
                        next.push(edge.dest);
                    }
                }
            }
        }
        num_levels += 1;
        wave = next;
    }

    for id in &member_ids {
        if !node_level.contains_key(id) {
            return Err(FabricError::NodeNotReached(id.to_string()));
        }
    }

    let tree_levels = (num_levels - 1) as usize;

    // Walk the tree depth first, preferring unexplored down-edges, to get
    // the canonical host ordering and the observed down-degrees per level.
    let mut ordered: Vec<PhysId> = vec![hosts[0]];
    let mut down_degrees: Vec<Vec<i64>> = vec![Vec::new(); num_levels as usize];
    let mut max_down: Vec<i64> = vec![0; tree_levels];
    let mut down_stack: Vec<(PhysId, PhysId)> = Vec::new();

    let first_node = &explicit.nodes[&hosts[0]];
    let mut up_edge: Option<(PhysId, PhysId)> = first_node
        .edges
        .values()
        .find(|e| in_partition(e))
        .map(|e| (hosts[0], e.dest));

    loop {
        if let Some((_, dest)) = down_stack.pop() {
            let dest_node = &explicit.nodes[&dest];
            if dest_node.is_host() {
                ordered.push(dest);
                continue;
            }
            let mut num_edges: i64 = 0;
            for edge in dest_node.edges.values().filter(|e| in_partition(e)) {
                if !up_edges.contains(&(dest, edge.dest)) {
                    down_stack.push((dest, edge.dest));
                    num_edges += 1;
                }
            }
            record_degree(
                &mut down_degrees,
                &mut max_down,
                num_levels,
                node_level[&dest],
                num_edges,
            );
        } else {
            let Some((from, up)) = up_edge else {
                break;
            };
            let up_node = &explicit.nodes[&up];
            let mut num_edges: i64 = 0;
            let mut new_up = None;
            for edge in up_node.edges.values().filter(|e| in_partition(e)) {
                if edge.dest == from {
                    num_edges += 1;
                    continue;
                }
                if !up_edges.contains(&(up, edge.dest)) {
                    down_stack.push((up, edge.dest));
                    num_edges += 1;
                } else {
                    new_up = Some((up, edge.dest));
                }
            }
            record_degree(
                &mut down_degrees,
                &mut max_down,
                num_levels,
                node_level[&up],
                num_edges,
            );
            up_edge = new_up;
        }
    }

    if ordered.len() != hosts.len() {
        return Err(FabricError::NodeNotReached(format!(
            "walked {} of {} hosts",
            ordered.len(),
            hosts.len()
        )));
    }

    let dims: Vec<u32> = max_down.iter().map(|&d| d as u32).collect();
    let mut costs = vec![0u64; tree_levels];
    if tree_levels > 0 {
        costs[tree_levels - 1] = 1;
        for i in (0..tree_levels - 1).rev() {
            costs[i] = costs[i + 1] * NETWORK_COEFF;
        }
    }

    let arch_idx = complete_tree(&max_down, &mut down_degrees, ordered.len());
    debug!(
        hosts = ordered.len(),
        leaves = dims.iter().map(|&d| d as u64).product::<u64>(),
        "tree completed with ghost leaves"
    );

    let positions = ordered
        .into_iter()
        .zip(arch_idx)
        .map(|(id, idx)| {
            (
                id,
                Position {
                    idx,
                    coords: coords_for(idx, &dims),
                },
            )
        })
        .collect();

    Ok(TreeFit {
        topology: Topology::tree(dims, costs),
        positions,
    })
}

fn record_degree(
    down_degrees: &mut [Vec<i64>],
    max_down: &mut [i64],
    num_levels: i32,
    level: i32,
    num_edges: i64,
) {
    let slot = (num_levels - 1 - level) as usize;
    down_degrees[slot].push(num_edges);
    if max_down[slot] < num_edges {
        max_down[slot] = num_edges;
    }
}

/// Rewrite the observed degree lists so every internal position has the
/// level's full arity, inserting negative placeholders that propagate down
/// by multiplication, then number the real hosts while skipping ghost
/// slots.
fn complete_tree(max_degrees: &[i64], down: &mut [Vec<i64>], num_hosts: usize) -> Vec<u64> {
    let num_levels = max_degrees.len();
    for l in 0..num_levels.saturating_sub(1) {
        let max_degree = max_degrees[l];
        let down_level_max = max_degrees[l + 1];
        let (head, tail) = down.split_at_mut(l + 1);
        let degrees = &head[l];
        let down_level = &mut tail[0];

        let mut down_idx: usize = 0;
        for &degree in degrees {
            if degree > 0 {
                down_idx += degree as usize;
                if degree < max_degree {
                    let missing = (degree - max_degree) * down_level_max;
                    down_level.insert(down_idx, missing);
                    down_idx += 1;
                }
            } else {
                let missing = degree * down_level_max;
                down_level.insert(down_idx, missing);
                down_idx += 1;
            }
        }
    }

    let degrees = &down[num_levels - 1];
    let max_degree = max_degrees[num_levels - 1];
    let mut ghost_idx: u64 = 0;
    let mut arch_idx = Vec::with_capacity(num_hosts);
    for &degree in degrees {
        let diff = if degree > 0 {
            max_degree - degree
        } else {
            -degree
        } as u64;
        for _ in 0..degree.max(0) {
            arch_idx.push(ghost_idx);
            ghost_idx += 1;
        }
        ghost_idx += diff;
    }
    arch_idx
}

/// Per-level coordinates of a completed-tree leaf index, root first.
pub fn coords_for(idx: u64, dims: &[u32]) -> Vec<u32> {
    let mut coords = vec![0u32; dims.len()];
    let mut rest = idx;
    for d in (0..dims.len()).rev() {
        coords[d] = (rest % dims[d] as u64) as u32;
        rest /= dims[d] as u64;
    }
    coords
}
