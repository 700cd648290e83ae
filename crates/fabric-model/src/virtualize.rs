// Numan Thabit 2025
//! Collapse switches with identical neighborhoods into virtual nodes, and
//! the inverse operation that restores the flat graph.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::edge::Edge;
use crate::ids::PhysId;
use crate::machine::Machine;
use crate::node::{Node, NodeKind};
use crate::{FabricError, Result};

/// Detect equivalence classes of switches and collapse each class into a
/// single virtual node. Two switches are equivalent when their sorted
/// destination lists are identical; a previously collapsed neighbor counts
/// as one destination, so classes cascade until a fixed point.
pub fn virtualize(machine: &mut Machine) -> Result<()> {
    let mut collapsed = 0usize;
    while let Some(members) = next_class(machine)? {
        debug!(
            members = members.len(),
            first = %members[0],
            "collapsing equivalent switches"
        );
        collapse(machine, &members)?;
        collapsed += 1;
    }
    if collapsed > 0 {
        info!(virtual_nodes = collapsed, "virtualization complete");
    }
    Ok(())
}

/// First equivalence class with at least two members, in the id order of
/// its first member. Signatures are the sorted edge destinations, which a
/// `BTreeMap` yields directly.
fn next_class(machine: &Machine) -> Result<Option<Vec<PhysId>>> {
    let explicit = machine.explicit()?;
    let mut by_signature: BTreeMap<Vec<PhysId>, Vec<PhysId>> = BTreeMap::new();
    for (id, node) in &explicit.nodes {
        if !node.is_switch() || node.edges.is_empty() {
            continue;
        }
        let signature: Vec<PhysId> = node.edges.keys().copied().collect();
        by_signature.entry(signature).or_default().push(*id);
    }
    Ok(by_signature
        .into_values()
        .filter(|members| members.len() >= 2)
        .min_by_key(|members| members[0]))
}

fn collapse(machine: &mut Machine, member_ids: &[PhysId]) -> Result<()> {
    let vid = machine.next_virtual_id();
    let explicit = machine.explicit_mut()?;

    let mut members: Vec<Node> = Vec::with_capacity(member_ids.len());
    for id in member_ids {
        let node = explicit
            .nodes
            .remove(id)
            .ok_or_else(|| FabricError::NodeNotFound(id.to_string()))?;
        members.push(node);
    }
    let signature: Vec<PhysId> = members[0].edges.keys().copied().collect();

    let mut virtual_node = Node::new(vid, NodeKind::Switch);
    virtual_node.description = Some(vid.to_string());
    for member in &members {
        virtual_node.partitions.union_with(&member.partitions);
        virtual_node
            .physical_links
            .extend(member.physical_links.iter().copied());
    }

    for dest in &signature {
        let mut virtual_edge = Edge::new(vid, *dest);
        for member in &mut members {
            let edge = member.edges.remove(dest).ok_or_else(|| {
                FabricError::MissingReverseEdge {
                    src: member.id.to_string(),
                    dest: dest.to_string(),
                }
            })?;
            merge_edge(&mut virtual_edge, edge);
        }

        let dest_node = explicit
            .nodes
            .get_mut(dest)
            .ok_or_else(|| FabricError::NodeNotFound(dest.to_string()))?;
        let mut virtual_reverse = Edge::new(*dest, vid);
        for member in &members {
            let reverse = dest_node.edges.remove(&member.id).ok_or_else(|| {
                FabricError::MissingReverseEdge {
                    src: dest.to_string(),
                    dest: member.id.to_string(),
                }
            })?;
            merge_edge(&mut virtual_reverse, reverse);
        }
        dest_node.edges.insert(vid, virtual_reverse);
        virtual_node.edges.insert(*dest, virtual_edge);
    }

    for mut member in members {
        if member.is_virtual() {
            // Absorbing an existing virtual node: adopt its subnodes
            // directly so subedges keep leaf endpoints and untangling
            // stays single-level.
            for mut subnode in std::mem::take(&mut member.subnodes) {
                subnode.virtual_parent = Some(vid);
                virtual_node.subnodes.push(subnode);
            }
        } else {
            member.virtual_parent = Some(vid);
            virtual_node.subnodes.push(member);
        }
    }
    explicit.nodes.insert(vid, virtual_node);
    Ok(())
}

/// Fold `edge` into the virtual aggregate: gbits, partition bits and link
/// ids accumulate; a plain edge becomes a subedge, a virtual edge donates
/// its subedges and drops its shell.
fn merge_edge(aggregate: &mut Edge, edge: Edge) {
    aggregate.total_gbits += edge.total_gbits;
    aggregate.partitions.union_with(&edge.partitions);
    aggregate.links.extend(edge.links.iter().copied());
    if edge.is_virtual() {
        aggregate.subedges.extend(edge.subedges);
    } else {
        aggregate.subedges.push(edge);
    }
}

/// Reinsert every virtual node's subnodes into the global map and dissolve
/// the subedges back into the edges they came from. After this the graph
/// is identical to the pre-virtualization one.
pub fn untangle(machine: &mut Machine) -> Result<()> {
    let explicit = machine.explicit_mut()?;
    let virtual_ids: Vec<PhysId> = explicit
        .nodes
        .values()
        .filter(|n| n.is_virtual())
        .map(|n| n.id)
        .collect();
    let virtual_set: BTreeSet<PhysId> = virtual_ids.iter().copied().collect();

    for vid in virtual_ids {
        let mut virtual_node = explicit
            .nodes
            .remove(&vid)
            .ok_or_else(|| FabricError::NodeNotFound(vid.to_string()))?;

        for mut subnode in std::mem::take(&mut virtual_node.subnodes) {
            subnode.virtual_parent = None;
            explicit.add_node(subnode);
        }

        for (dest, virtual_edge) in std::mem::take(&mut virtual_node.edges) {
            for subedge in virtual_edge.subedges {
                let owner = explicit
                    .nodes
                    .get_mut(&subedge.src)
                    .ok_or_else(|| FabricError::NodeNotFound(subedge.src.to_string()))?;
                owner.edges.insert(subedge.dest, subedge);
            }
            if virtual_set.contains(&dest) {
                // The mirror edge belongs to the other virtual node and is
                // dissolved when that node is processed.
                continue;
            }
            let dest_node = explicit
                .nodes
                .get_mut(&dest)
                .ok_or_else(|| FabricError::NodeNotFound(dest.to_string()))?;
            let virtual_reverse =
                dest_node
                    .edges
                    .remove(&vid)
                    .ok_or_else(|| FabricError::MissingReverseEdge {
                        src: dest.to_string(),
                        dest: vid.to_string(),
                    })?;
            for subedge in virtual_reverse.subedges {
                dest_node.edges.insert(subedge.dest, subedge);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{DiscoverySnapshot, GraphBuilder};

    /// Four switches each cabled to the same three hosts.
    fn fat_stripe() -> Machine {
        let mut toml = String::from(
            "subnet = \"fe80:0000:0000:0000\"\npartitions = [\"batch\"]\n",
        );
        for s in 1..=4 {
            toml.push_str(&format!(
                "[[nodes]]\nid = \"sw-{s}\"\nkind = \"SW\"\n"
            ));
        }
        for h in 1..=3 {
            toml.push_str(&format!(
                "[[nodes]]\nid = \"ca-{h}\"\nkind = \"CA\"\nhostname = \"node00{h}\"\n"
            ));
        }
        for s in 1..=4 {
            for h in 1..=3 {
                toml.push_str(&format!(
                    "[[links]]\nsrc = \"sw-{s}\"\nsrc_port = {h}\ndest = \"ca-{h}\"\n\
                     dest_port = {s}\nspeed = \"QDR\"\nwidth = \"4x\"\npartition = \"batch\"\n"
                ));
            }
        }
        let snapshot: DiscoverySnapshot = toml::from_str(&toml).expect("valid snapshot");
        let mut builder = GraphBuilder::new("/tmp/topo");
        builder.ingest(&snapshot).expect("ingest");
        builder.finish().expect("valid graph")
    }

    fn graph_fingerprint(machine: &Machine) -> Vec<(String, String, Vec<u64>)> {
        let explicit = machine.explicit().unwrap();
        let mut out = Vec::new();
        for node in explicit.nodes.values() {
            for edge in node.edges.values() {
                let mut links: Vec<u64> = edge.links.to_vec();
                links.sort_unstable();
                out.push((node.id.to_string(), edge.dest.to_string(), links));
            }
        }
        out
    }

    #[test]
    fn four_equivalent_switches_collapse_to_one_virtual() {
        let mut machine = fat_stripe();
        virtualize(&mut machine).expect("virtualize");

        let explicit = machine.explicit().unwrap();
        let virtuals: Vec<&Node> = explicit
            .nodes
            .values()
            .filter(|n| n.is_virtual())
            .collect();
        assert_eq!(virtuals.len(), 1);
        let v = virtuals[0];
        assert_eq!(v.id.as_str(), "virtual000000000001");
        assert_eq!(v.subnodes.len(), 4);
        assert_eq!(v.edges.len(), 3);

        let total_sublinks: usize = v
            .edges
            .values()
            .flat_map(|e| e.subedges.iter())
            .map(|s| s.links.len())
            .sum();
        assert_eq!(total_sublinks, 12);

        for edge in v.edges.values() {
            assert_eq!(edge.subedges.len(), 4);
            let sub_gbits: f32 = edge.subedges.iter().map(|s| s.total_gbits).sum();
            assert!((edge.total_gbits - sub_gbits).abs() < 1e-3);
            // Each host keeps exactly one reverse edge, toward the virtual.
            let host = explicit.node(&edge.dest).unwrap();
            assert_eq!(host.edges.len(), 1);
            let reverse = &host.edges[&v.id];
            assert_eq!(reverse.subedges.len(), 4);
        }
    }

    #[test]
    fn virtual_partitions_are_the_or_of_subnodes() {
        let mut machine = fat_stripe();
        virtualize(&mut machine).expect("virtualize");
        let explicit = machine.explicit().unwrap();
        let v = explicit
            .nodes
            .values()
            .find(|n| n.is_virtual())
            .expect("one virtual");
        let mut expected = crate::ids::PartitionSet::new();
        for subnode in &v.subnodes {
            expected.union_with(&subnode.partitions);
        }
        assert_eq!(v.partitions, expected);
    }

    #[test]
    fn every_link_stays_in_exactly_one_top_level_edge() {
        let mut machine = fat_stripe();
        virtualize(&mut machine).expect("virtualize");
        let explicit = machine.explicit().unwrap();
        let mut seen: Vec<u64> = explicit
            .nodes
            .values()
            .flat_map(|n| n.edges.values())
            .flat_map(|e| e.links.iter().copied())
            .collect();
        seen.sort_unstable();
        let mut expected: Vec<u64> = explicit.links.keys().copied().collect();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn untangle_restores_the_flat_graph() {
        let mut machine = fat_stripe();
        let before = graph_fingerprint(&machine);
        let nodes_before: Vec<String> = machine
            .explicit()
            .unwrap()
            .nodes
            .keys()
            .map(|k| k.to_string())
            .collect();

        virtualize(&mut machine).expect("virtualize");
        untangle(&mut machine).expect("untangle");

        let nodes_after: Vec<String> = machine
            .explicit()
            .unwrap()
            .nodes
            .keys()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(nodes_before, nodes_after);

        let mut before_sorted = before;
        before_sorted.sort();
        let mut after_sorted = graph_fingerprint(&machine);
        after_sorted.sort();
        assert_eq!(before_sorted, after_sorted);
        assert!(machine
            .explicit()
            .unwrap()
            .nodes
            .values()
            .all(|n| n.virtual_parent.is_none() && !n.is_virtual()));
    }

    #[test]
    fn cascading_classes_collapse_switch_layers() {
        // Two leaf switches under two spine switches, hosts below: the
        // leaves collapse first, which makes the spines equivalent too.
        let toml = r#"
            subnet = "fe80:0000:0000:0000"
            partitions = ["batch"]

            [[nodes]]
            id = "spine-1"
            kind = "SW"
            [[nodes]]
            id = "spine-2"
            kind = "SW"
            [[nodes]]
            id = "leaf-1"
            kind = "SW"
            [[nodes]]
            id = "leaf-2"
            kind = "SW"
            [[nodes]]
            id = "ca-1"
            kind = "CA"
            hostname = "node001"
            [[nodes]]
            id = "ca-2"
            kind = "CA"
            hostname = "node002"

            [[links]]
            src = "leaf-1"
            src_port = 1
            dest = "ca-1"
            dest_port = 1
            speed = "QDR"
            width = "4x"
            partition = "batch"
            [[links]]
            src = "leaf-1"
            src_port = 2
            dest = "ca-2"
            dest_port = 1
            speed = "QDR"
            width = "4x"
            partition = "batch"
            [[links]]
            src = "leaf-2"
            src_port = 1
            dest = "ca-1"
            dest_port = 2
            speed = "QDR"
            width = "4x"
            partition = "batch"
            [[links]]
            src = "leaf-2"
            src_port = 2
            dest = "ca-2"
            dest_port = 2
            speed = "QDR"
            width = "4x"
            partition = "batch"
            [[links]]
            src = "spine-1"
            src_port = 1
            dest = "leaf-1"
            dest_port = 3
            speed = "QDR"
            width = "4x"
            partition = "batch"
            [[links]]
            src = "spine-1"
            src_port = 2
            dest = "leaf-2"
            dest_port = 3
            speed = "QDR"
            width = "4x"
            partition = "batch"
            [[links]]
            src = "spine-2"
            src_port = 1
            dest = "leaf-1"
            dest_port = 4
            speed = "QDR"
            width = "4x"
            partition = "batch"
            [[links]]
            src = "spine-2"
            src_port = 2
            dest = "leaf-2"
            dest_port = 4
            speed = "QDR"
            width = "4x"
            partition = "batch"
        "#;
        let snapshot: DiscoverySnapshot = toml::from_str(toml).expect("valid snapshot");
        let mut builder = GraphBuilder::new("/tmp/topo");
        builder.ingest(&snapshot).expect("ingest");
        let mut machine = builder.finish().expect("valid graph");
        let before = graph_fingerprint(&machine);

        virtualize(&mut machine).expect("virtualize");
        {
            let explicit = machine.explicit().unwrap();
            // leaf-1/leaf-2 collapse, then spine-1/spine-2 see a single
            // virtual destination and collapse as well.
            let virtuals: Vec<&Node> =
                explicit.nodes.values().filter(|n| n.is_virtual()).collect();
            assert_eq!(virtuals.len(), 2);
            for v in &virtuals {
                assert_eq!(v.subnodes.len(), 2);
            }
        }

        untangle(&mut machine).expect("untangle");
        let mut before_sorted = before;
        before_sorted.sort();
        let mut after_sorted = graph_fingerprint(&machine);
        after_sorted.sort();
        assert_eq!(before_sorted, after_sorted);
    }
}
