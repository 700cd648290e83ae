// Numan Thabit 2025
//! Load a machine from its XML document and re-establish the invariants
//! the in-memory model relies on: reverse links, virtual subedges and the
//! restriction flags.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use fabric_model::builder::{check_reverse_edges, check_reverse_links};
use fabric_model::{
    Edge, Machine, Node, NodeKind, Partition, PhysId, PhysicalLink, Position, Topology,
    TopologyKind, Transport,
};

use crate::dom::{parse, Elem};
use crate::{Result, XmlError, FILE_VERSION};

pub fn load_machine(path: &Path) -> Result<Machine> {
    let text = fs::read_to_string(path)?;
    let mut machine = machine_from_str(&text)?;
    machine.topo_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    machine.topo_path = Some(path.to_path_buf());
    info!(path = %path.display(), "machine loaded");
    Ok(machine)
}

pub fn machine_from_str(text: &str) -> Result<Machine> {
    let root = parse(text)?;
    if root.name != "machine" {
        return Err(XmlError::UnexpectedElement(root.name.clone()));
    }
    let version = root.require("version")?;
    if version != FILE_VERSION {
        return Err(XmlError::BadVersion {
            found: version.to_string(),
            expected: FILE_VERSION.to_string(),
        });
    }

    let mut machine = Machine::new(".");
    if let Some(dir) = root.attr("hwloc_path") {
        if !dir.is_empty() {
            machine.hwloc_dir = Some(dir.into());
        }
    }

    let mut restriction_names: Vec<String> = Vec::new();
    for child in &root.children {
        match child.name.as_str() {
            "partitions" => read_partitions(child, &mut machine)?,
            "explicit" => read_explicit(child, &mut machine)?,
            "restriction" => {
                for node in child.children_named("node") {
                    restriction_names.push(node.require("name")?.to_string());
                }
            }
            other => return Err(XmlError::UnexpectedElement(other.to_string())),
        }
    }

    finalize_graph(&mut machine)?;

    if !restriction_names.is_empty() {
        let mut ids = Vec::with_capacity(restriction_names.len());
        for name in &restriction_names {
            let node = machine
                .find_node_by_name(name)
                .ok_or_else(|| fabric_model::FabricError::NodeNotFound(name.clone()))?;
            ids.push(node.id);
        }
        machine.restriction_set_nodes(ids)?;
    }
    Ok(machine)
}

fn parse_num<T: std::str::FromStr>(what: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| XmlError::BadNumber {
        what,
        value: value.to_string(),
    })
}

fn parse_array<T: std::str::FromStr>(what: &'static str, value: &str) -> Result<Vec<T>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value.split(' ').map(|v| parse_num(what, v)).collect()
}

fn parse_2d_array(what: &'static str, value: &str) -> Result<Vec<Vec<u32>>> {
    value.split(';').map(|row| parse_array(what, row)).collect()
}

fn read_partitions(elem: &Elem, machine: &mut Machine) -> Result<()> {
    let mut partitions = Vec::new();
    for (position, child) in elem.children.iter().enumerate() {
        if child.name != "partition" {
            return Err(XmlError::UnexpectedElement(child.name.clone()));
        }
        let idx: usize = parse_num("partition idx", child.require("idx")?)?;
        if idx != position {
            return Err(XmlError::Invalid(format!(
                "partition idx {idx} out of order, expected {position}"
            )));
        }
        let transport = Transport::decode(child.require("transport")?).ok_or_else(|| {
            XmlError::Invalid(format!("unknown transport {:?}", child.attr("transport")))
        })?;
        let mut partition = Partition::new(
            idx,
            child.require("name")?,
            child.require("subnet")?,
            transport,
        );
        partition.topology = child
            .child("topology")
            .map(read_topology)
            .transpose()?;
        partitions.push(partition);
    }
    machine.add_partitions(partitions);
    Ok(())
}

fn read_topology(elem: &Elem) -> Result<Topology> {
    let kind_code: u32 = parse_num("topology type", elem.require("type")?)?;
    let kind = TopologyKind::decode(kind_code)
        .ok_or_else(|| XmlError::Invalid(format!("unknown topology type {kind_code}")))?;
    let ndims: usize = parse_num("topology ndims", elem.require("ndims")?)?;
    let (dims, costs) = if ndims > 0 {
        let dims: Vec<u32> = parse_array("topology dims", elem.require("dims")?)?;
        let costs: Vec<u64> = parse_array("topology costs", elem.require("costs")?)?;
        if dims.len() != ndims || costs.len() != ndims {
            return Err(XmlError::Invalid(format!(
                "topology declares ndims {ndims} but carries {} dims and {} costs",
                dims.len(),
                costs.len()
            )));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(XmlError::Invalid("topology dims must be positive".into()));
        }
        (dims, costs)
    } else {
        (Vec::new(), Vec::new())
    };
    let mut topology = Topology { kind, dims, costs, sub: None };
    if let Some(sub) = elem.child("topology") {
        topology.sub = Some(Box::new(read_topology(sub)?));
    }
    Ok(topology)
}

fn read_explicit(elem: &Elem, machine: &mut Machine) -> Result<()> {
    machine.add_explicit();
    for nodes_elem in elem.children_named("nodes") {
        if let Some(dir) = nodes_elem.attr("hwloc_path") {
            if !dir.is_empty() && machine.hwloc_dir.is_none() {
                machine.hwloc_dir = Some(dir.into());
            }
        }
        for node_elem in nodes_elem.children_named("node") {
            let node = read_node(node_elem, machine, false)?;
            let explicit = machine.explicit_mut()?;
            if explicit.nodes.contains_key(&node.id) {
                return Err(XmlError::Invalid(format!("duplicate node {}", node.id)));
            }
            explicit.add_node(node);
        }
    }
    Ok(())
}

fn read_node(elem: &Elem, machine: &mut Machine, is_subnode: bool) -> Result<Node> {
    let id = PhysId::new(elem.require("mac_addr")?)?;
    let kind = NodeKind::decode(elem.require("type")?)
        .ok_or_else(|| XmlError::Invalid(format!("unknown node type for {id}")))?;
    let mut node = Node::new(id, kind);

    let name = elem.require("name")?;
    if !name.is_empty() {
        node.hostname = Some(name.to_string());
    }
    if let Some(description) = elem.attr("description") {
        node.description = Some(description.to_string());
    }
    if let Some(file) = elem.attr("hwloc_file") {
        if !file.is_empty() {
            node.hwloc_topo_idx = Some(intern_hwloc_path(machine, file));
        }
    }

    let nparts = machine.partitions.len();
    let member_partitions: Vec<usize> =
        parse_array("node partitions", elem.attr("partitions").unwrap_or(""))?;
    for &p in &member_partitions {
        if p >= nparts {
            return Err(XmlError::Invalid(format!(
                "node {id} references undeclared partition {p}"
            )));
        }
        node.partitions.insert(p);
    }

    if node.is_host() {
        read_positions(elem, machine, &member_partitions, &mut node)?;
    }

    for sub_elem in elem.children_named("node") {
        if is_subnode {
            return Err(XmlError::Invalid(format!(
                "nested virtual node under subnode of {id}"
            )));
        }
        let mut subnode = read_node(sub_elem, machine, true)?;
        subnode.virtual_parent = Some(id);
        node.subnodes.push(subnode);
    }
    if let Some(size) = elem.attr("size") {
        let size: usize = parse_num("virtual size", size)?;
        if size != node.subnodes.len() {
            return Err(XmlError::Invalid(format!(
                "virtual node {id} declares size {size} but carries {} subnodes",
                node.subnodes.len()
            )));
        }
    }

    for connections in elem.children_named("connections") {
        for connection in connections.children_named("connection") {
            let edge = read_connection(connection, machine, &node)?;
            node.edges.insert(edge.dest, edge);
        }
    }
    Ok(node)
}

fn read_positions(
    elem: &Elem,
    machine: &Machine,
    member_partitions: &[usize],
    node: &mut Node,
) -> Result<()> {
    let index_attr = match elem.attr("index") {
        Some(attr) if !attr.is_empty() => attr,
        _ => return Ok(()),
    };
    let indices: Vec<u64> = parse_array("node index", index_attr)?;
    if indices.len() != member_partitions.len() {
        return Err(XmlError::Invalid(format!(
            "node {} carries {} indices for {} partitions",
            node.id,
            indices.len(),
            member_partitions.len()
        )));
    }
    let coords_attr = elem.attr("coords").unwrap_or("");
    let rows = if coords_attr.is_empty() {
        vec![Vec::new(); indices.len()]
    } else {
        parse_2d_array("node coords", coords_attr)?
    };
    if rows.len() != indices.len() {
        return Err(XmlError::Invalid(format!(
            "node {} carries {} coordinate rows for {} partitions",
            node.id,
            rows.len(),
            indices.len()
        )));
    }
    for ((&p, &idx), coords) in member_partitions.iter().zip(&indices).zip(rows) {
        let ndims = machine.partitions[p]
            .topology
            .as_ref()
            .map(|t| t.ndims())
            .unwrap_or(0);
        if coords.len() != ndims {
            return Err(XmlError::Invalid(format!(
                "node {} has {} coordinates in partition {p} whose topology has {ndims} dims",
                node.id,
                coords.len()
            )));
        }
        node.set_position(p, Position { idx, coords });
    }
    Ok(())
}

fn read_connection(elem: &Elem, machine: &mut Machine, owner: &Node) -> Result<Edge> {
    let dest = PhysId::new(elem.require("dest")?)?;
    let mut edge = Edge::new(owner.id, dest);
    edge.total_gbits = parse_num("connection bandwidth", elem.require("bandwidth")?)?;

    for link_elem in elem.children_named("link") {
        let link_id: u64 = parse_num("link id", link_elem.require("id")?)?;
        edge.links.push(link_id);
        if owner.is_virtual() {
            // The aggregated links of a virtual edge are owned by the
            // subnode connections; only remember the id here.
            continue;
        }
        let mut link = PhysicalLink {
            id: link_id,
            src: owner.id,
            src_port: parse_num("link srcport", link_elem.require("srcport")?)?,
            dest,
            dest_port: parse_num("link destport", link_elem.require("destport")?)?,
            speed: link_elem.require("speed")?.to_string(),
            width: link_elem.require("width")?.to_string(),
            gbits: parse_num("link bandwidth", link_elem.require("bandwidth")?)?,
            reverse_id: parse_num("link reverse_id", link_elem.require("reverse_id")?)?,
            description: link_elem.attr("description").unwrap_or("").to_string(),
            partitions: Default::default(),
        };
        let parts: Vec<usize> =
            parse_array("link partitions", link_elem.attr("partitions").unwrap_or(""))?;
        for p in parts {
            if p >= machine.partitions.len() {
                return Err(XmlError::Invalid(format!(
                    "link {link_id} references undeclared partition {p}"
                )));
            }
            link.partitions.insert(p);
        }
        machine.reserve_link_id(link_id);
        let explicit = machine.explicit_mut()?;
        if explicit.links.insert(link_id, link).is_some() {
            return Err(XmlError::Invalid(format!("duplicate link id {link_id}")));
        }
    }
    Ok(edge)
}

pub(crate) fn intern_hwloc_path(machine: &mut Machine, file: &str) -> usize {
    if let Some(pos) = machine.hwloc_paths.iter().position(|p| p == file) {
        return pos + 1;
    }
    machine.hwloc_paths.push(file.to_string());
    machine.hwloc_paths.len()
}

/// Post-parse passes: resolve link destinations that point at virtual
/// nodes, regroup subnode edges as subedges, mirror subedges onto plain
/// nodes facing a virtual, recompute partition host counts and check the
/// reverse invariants.
fn finalize_graph(machine: &mut Machine) -> Result<()> {
    if machine.explicit.is_none() {
        return Ok(());
    }

    let mut parent_of: BTreeMap<PhysId, PhysId> = BTreeMap::new();
    {
        let explicit = machine.explicit()?;
        for node in explicit.nodes.values() {
            for subnode in &node.subnodes {
                parent_of.insert(subnode.id, node.id);
            }
        }
    }

    // A link read under a connection toward a virtual node has its real
    // destination on its mate, which a real subnode owns.
    {
        let explicit = machine.explicit_mut()?;
        let mut fixes: Vec<(u64, PhysId)> = Vec::new();
        for link in explicit.links.values() {
            if explicit.nodes.contains_key(&link.dest)
                && explicit.nodes[&link.dest].is_virtual()
            {
                let mate = explicit
                    .links
                    .get(&link.reverse_id)
                    .ok_or(fabric_model::FabricError::MissingReverseLink { id: link.id })?;
                fixes.push((link.id, mate.src));
            }
        }
        for (id, dest) in fixes {
            if let Some(link) = explicit.links.get_mut(&id) {
                link.dest = dest;
            }
        }
    }

    // Move subnode edges into the parent's virtual edges.
    {
        let explicit = machine.explicit_mut()?;
        let virtual_ids: Vec<PhysId> = explicit
            .nodes
            .values()
            .filter(|n| n.is_virtual())
            .map(|n| n.id)
            .collect();
        for vid in virtual_ids {
            let node = explicit.nodes.get_mut(&vid).expect("virtual node present");
            let mut grouped: BTreeMap<PhysId, Vec<Edge>> = BTreeMap::new();
            for subnode in &mut node.subnodes {
                for (_, subedge) in std::mem::take(&mut subnode.edges) {
                    let top_dest = parent_of.get(&subedge.dest).copied().unwrap_or(subedge.dest);
                    grouped.entry(top_dest).or_default().push(subedge);
                }
            }
            for (top_dest, subedges) in grouped {
                let edge = node.edges.get_mut(&top_dest).ok_or_else(|| {
                    XmlError::Invalid(format!(
                        "virtual node {vid} has subedges toward {top_dest} but no edge"
                    ))
                })?;
                edge.subedges = subedges;
            }
            debug!(node = %vid, "virtual subedges regrouped");
        }
    }

    // Rebuild the subedges of plain-node edges that face a virtual node
    // as the reverses of the virtual side's subedges.
    {
        let explicit = machine.explicit_mut()?;
        let mut rebuilt: Vec<(PhysId, PhysId, Vec<Edge>)> = Vec::new();
        for node in explicit.nodes.values() {
            if node.is_virtual() {
                continue;
            }
            for edge in node.edges.values() {
                let dest_node = match explicit.nodes.get(&edge.dest) {
                    Some(dest_node) if dest_node.is_virtual() => dest_node,
                    _ => continue,
                };
                let virtual_edge = dest_node.edges.get(&node.id).ok_or_else(|| {
                    fabric_model::FabricError::MissingReverseEdge {
                        src: edge.dest.to_string(),
                        dest: node.id.to_string(),
                    }
                })?;
                let mut subedges = Vec::with_capacity(virtual_edge.subedges.len());
                for mirror in &virtual_edge.subedges {
                    let mut subedge = Edge::new(node.id, mirror.src);
                    for link_id in &mirror.links {
                        let mate = explicit
                            .links
                            .get(link_id)
                            .and_then(|l| explicit.links.get(&l.reverse_id))
                            .ok_or(fabric_model::FabricError::MissingReverseLink {
                                id: *link_id,
                            })?;
                        subedge.links.push(mate.id);
                        subedge.total_gbits += mate.gbits;
                        subedge.partitions.union_with(&mate.partitions);
                    }
                    subedges.push(subedge);
                }
                rebuilt.push((node.id, edge.dest, subedges));
            }
        }
        for (src, dest, subedges) in rebuilt {
            let node = explicit.nodes.get_mut(&src).expect("node present");
            let edge = node.edges.get_mut(&dest).expect("edge present");
            edge.subedges = subedges;
        }
    }

    // Per-node link lists, in id order; a subnode's links also land on
    // its virtual parent.
    {
        let explicit = machine.explicit_mut()?;
        let link_owners: Vec<(u64, PhysId)> =
            explicit.links.iter().map(|(id, l)| (*id, l.src)).collect();
        for (id, src) in link_owners {
            match parent_of.get(&src) {
                Some(parent_id) => {
                    if let Some(parent) = explicit.nodes.get_mut(parent_id) {
                        parent.physical_links.push(id);
                        if let Some(subnode) =
                            parent.subnodes.iter_mut().find(|s| s.id == src)
                        {
                            subnode.physical_links.push(id);
                        }
                    }
                }
                None => {
                    if let Some(node) = explicit.nodes.get_mut(&src) {
                        node.physical_links.push(id);
                    }
                }
            }
        }
    }

    // Edge partition bits are not persisted, rebuild them from the links.
    {
        let explicit = machine.explicit_mut()?;
        let link_partitions: BTreeMap<u64, fabric_model::PartitionSet> = explicit
            .links
            .iter()
            .map(|(id, link)| (*id, link.partitions.clone()))
            .collect();
        for node in explicit.nodes.values_mut() {
            for edge in node.edges.values_mut() {
                for link_id in &edge.links {
                    if let Some(parts) = link_partitions.get(link_id) {
                        edge.partitions.union_with(parts);
                    }
                }
                for subedge in &mut edge.subedges {
                    for link_id in &subedge.links {
                        if let Some(parts) = link_partitions.get(link_id) {
                            subedge.partitions.union_with(parts);
                        }
                    }
                }
            }
        }
    }

    for p in 0..machine.partitions.len() {
        machine.partitions[p].num_hosts = machine
            .explicit()?
            .nodes
            .values()
            .filter(|n| n.is_host() && n.partitions.contains(p))
            .count();
    }

    check_reverse_edges(machine.explicit()?)?;
    check_reverse_links(machine.explicit()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::{machine_to_string, save_machine};
    use fabric_model::builder::{DiscoverySnapshot, GraphBuilder};
    use fabric_model::{fit_partition, virtualize};

    fn discover(toml: &str) -> Machine {
        let snapshot: DiscoverySnapshot = toml::from_str(toml).expect("valid snapshot");
        let mut builder = GraphBuilder::new("/tmp/topo");
        builder.ingest(&snapshot).expect("ingest");
        builder.finish().expect("valid graph")
    }

    fn fat_tree_machine() -> Machine {
        let mut toml =
            String::from("subnet = \"fe80:0000:0000:0000\"\npartitions = [\"batch\"]\n");
        for s in 1..=2 {
            toml.push_str(&format!("[[nodes]]\nid = \"sw-{s}\"\nkind = \"SW\"\n"));
        }
        for h in 1..=3 {
            toml.push_str(&format!(
                "[[nodes]]\nid = \"ca-{h}\"\nkind = \"CA\"\nhostname = \"node00{h}\"\n"
            ));
        }
        for s in 1..=2 {
            for h in 1..=3 {
                toml.push_str(&format!(
                    "[[links]]\nsrc = \"sw-{s}\"\nsrc_port = {h}\ndest = \"ca-{h}\"\n\
                     dest_port = {s}\nspeed = \"QDR\"\nwidth = \"4x\"\npartition = \"batch\"\n"
                ));
            }
        }
        let mut machine = discover(&toml);
        virtualize(&mut machine).expect("virtualize");
        fit_partition(&mut machine, 0).expect("fit");
        let id = machine.find_node_by_name("node002").expect("host").id;
        machine.restriction_add_node(&id).expect("restrict");
        machine
    }

    fn links_snapshot(machine: &Machine) -> Vec<(u64, u64, String, String, String)> {
        let mut out: Vec<_> = machine
            .explicit
            .as_ref()
            .unwrap()
            .links
            .values()
            .map(|l| {
                (
                    l.id,
                    l.reverse_id,
                    l.src.to_string(),
                    l.dest.to_string(),
                    l.speed.clone(),
                )
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn virtualized_machine_survives_the_round_trip() {
        let machine = fat_tree_machine();
        let text = machine_to_string(&machine).expect("serialize");
        let loaded = machine_from_str(&text).expect("parse back");

        // Partitions.
        assert_eq!(loaded.partitions.len(), machine.partitions.len());
        for (a, b) in machine.partitions.iter().zip(&loaded.partitions) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.subnet, b.subnet);
            assert_eq!(a.transport, b.transport);
            assert_eq!(a.topology, b.topology);
            assert_eq!(a.num_hosts, b.num_hosts);
        }

        // Node sets by physical id, virtual structure included.
        let ids = |m: &Machine| -> Vec<String> {
            m.explicit
                .as_ref()
                .unwrap()
                .nodes
                .keys()
                .map(|k| k.to_string())
                .collect()
        };
        assert_eq!(ids(&machine), ids(&loaded));
        let v_before = machine
            .explicit()
            .unwrap()
            .nodes
            .values()
            .find(|n| n.is_virtual())
            .expect("virtual switch");
        let v_after = loaded
            .explicit()
            .unwrap()
            .node(&v_before.id)
            .expect("loaded virtual");
        assert_eq!(v_before.subnodes.len(), v_after.subnodes.len());
        assert_eq!(v_before.edges.len(), v_after.edges.len());
        for (dest, edge) in &v_before.edges {
            let other = &v_after.edges[dest];
            assert_eq!(edge.subedges.len(), other.subedges.len());
            assert!((edge.total_gbits - other.total_gbits).abs() < 1e-3);
        }

        // Link sets by id, endpoints included.
        assert_eq!(links_snapshot(&machine), links_snapshot(&loaded));

        // Host coordinates.
        for host in machine
            .explicit()
            .unwrap()
            .nodes
            .values()
            .filter(|n| n.is_host())
        {
            let other = loaded.explicit().unwrap().node(&host.id).expect("host");
            assert_eq!(host.position(0), other.position(0));
            assert_eq!(host.in_restriction, other.in_restriction);
        }
        assert_eq!(machine.restriction.nodes, loaded.restriction.nodes);
    }

    #[test]
    fn loaded_host_edges_toward_virtuals_regain_subedges() {
        let machine = fat_tree_machine();
        let text = machine_to_string(&machine).expect("serialize");
        let loaded = machine_from_str(&text).expect("parse back");

        let explicit = loaded.explicit().unwrap();
        let host = explicit.node_by_hostname("node001").expect("host");
        let (_, edge) = host.edges.iter().next().expect("uplink");
        assert_eq!(edge.subedges.len(), 2, "one subedge per collapsed switch");
        let sub_sum: f32 = edge.subedges.iter().map(|s| s.total_gbits).sum();
        assert!((edge.total_gbits - sub_sum).abs() < 1e-3);
    }

    #[test]
    fn save_writes_a_loadable_file() {
        let machine = fat_tree_machine();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("IB-fe80:0000:0000:0000-nodes.xml");
        save_machine(&machine, &path).expect("save");
        let loaded = load_machine(&path).expect("load");
        assert_eq!(loaded.topo_path.as_deref(), Some(path.as_path()));
        assert_eq!(links_snapshot(&machine), links_snapshot(&loaded));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let err = machine_from_str(r#"<machine version="2.0"></machine>"#)
            .expect_err("old version");
        assert!(matches!(err, XmlError::BadVersion { .. }));
    }

    #[test]
    fn undeclared_partition_reference_is_rejected() {
        let text = r#"<machine version="3.0">
            <partitions>
              <partition idx="0" transport="IB" subnet="s" name="all"/>
            </partitions>
            <explicit><nodes>
              <node mac_addr="ca-1" type="CA" name="node001" partitions="3">
                <connections/>
              </node>
            </nodes></explicit>
        </machine>"#;
        let err = machine_from_str(text).expect_err("partition 3 undeclared");
        assert!(matches!(err, XmlError::Invalid(_)));
    }

    #[test]
    fn coordinate_arity_must_match_the_topology() {
        let text = r#"<machine version="3.0">
            <partitions>
              <partition idx="0" transport="IB" subnet="s" name="all">
                <topology type="1" ndims="2" dims="2 2" costs="2 1"/>
              </partition>
            </partitions>
            <explicit><nodes>
              <node mac_addr="ca-1" type="CA" name="node001" partitions="0"
                    index="0" coords="1">
                <connections/>
              </node>
            </nodes></explicit>
        </machine>"#;
        let err = machine_from_str(text).expect_err("one coordinate for two dims");
        assert!(matches!(err, XmlError::Invalid(_)));
    }

    #[test]
    fn negative_array_entries_are_rejected() {
        let text = r#"<machine version="3.0">
            <partitions>
              <partition idx="0" transport="IB" subnet="s" name="all">
                <topology type="1" ndims="1" dims="-2" costs="1"/>
              </partition>
            </partitions>
        </machine>"#;
        let err = machine_from_str(text).expect_err("negative dim");
        assert!(matches!(err, XmlError::BadNumber { .. }));
    }
}
