// Numan Thabit 2025
//! Serialize a machine to the versioned XML document. The write order is
//! fixed: machine attributes, partitions with their topology chain,
//! explicit nodes (virtuals recursing into their subnodes), restriction.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Writer;
use tracing::info;

use fabric_model::{Edge, Machine, Node, Position};

use crate::{Result, XmlError, FILE_VERSION};

type XmlWriter = Writer<Cursor<Vec<u8>>>;

pub fn save_machine(machine: &Machine, path: &Path) -> Result<()> {
    let text = machine_to_string(machine)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    info!(path = %path.display(), "machine written");
    Ok(())
}

pub fn machine_to_string(machine: &Machine) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("machine");
    root.push_attribute(("version", FILE_VERSION));
    let hwloc_dir = machine
        .hwloc_dir
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    if let Some(dir) = &hwloc_dir {
        root.push_attribute(("hwloc_path", dir.as_str()));
    }
    writer.write_event(Event::Start(root))?;

    write_partitions(&mut writer, machine)?;
    write_explicit(&mut writer, machine, hwloc_dir.as_deref())?;
    write_restriction(&mut writer, machine)?;

    writer.write_event(Event::End(BytesStart::new("machine").to_end()))?;
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| XmlError::Invalid(e.to_string()))
}

fn join<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_partitions(writer: &mut XmlWriter, machine: &Machine) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("partitions")))?;
    for partition in &machine.partitions {
        let mut elem = BytesStart::new("partition");
        elem.push_attribute(("idx", partition.idx.to_string().as_str()));
        elem.push_attribute(("transport", partition.transport.encode()));
        elem.push_attribute(("subnet", partition.subnet.as_str()));
        elem.push_attribute(("name", partition.name.as_str()));
        match &partition.topology {
            Some(topology) => {
                writer.write_event(Event::Start(elem))?;
                write_topology(writer, topology)?;
                writer.write_event(Event::End(BytesStart::new("partition").to_end()))?;
            }
            None => {
                writer.write_event(Event::Empty(elem))?;
            }
        }
    }
    writer.write_event(Event::End(BytesStart::new("partitions").to_end()))?;
    Ok(())
}

fn write_topology(writer: &mut XmlWriter, topology: &fabric_model::Topology) -> Result<()> {
    let mut elem = BytesStart::new("topology");
    elem.push_attribute(("type", topology.kind.encode().to_string().as_str()));
    elem.push_attribute(("ndims", topology.ndims().to_string().as_str()));
    if topology.ndims() > 0 {
        elem.push_attribute(("dims", join(&topology.dims).as_str()));
        elem.push_attribute(("costs", join(&topology.costs).as_str()));
    }
    match &topology.sub {
        Some(sub) => {
            writer.write_event(Event::Start(elem))?;
            write_topology(writer, sub)?;
            writer.write_event(Event::End(BytesStart::new("topology").to_end()))?;
        }
        None => writer.write_event(Event::Empty(elem))?,
    }
    Ok(())
}

fn write_explicit(
    writer: &mut XmlWriter,
    machine: &Machine,
    hwloc_dir: Option<&str>,
) -> Result<()> {
    let explicit = match &machine.explicit {
        Some(explicit) => explicit,
        None => return Ok(()),
    };
    writer.write_event(Event::Start(BytesStart::new("explicit")))?;
    let mut nodes_elem = BytesStart::new("nodes");
    if let Some(dir) = hwloc_dir {
        nodes_elem.push_attribute(("hwloc_path", dir));
    }
    writer.write_event(Event::Start(nodes_elem))?;
    for node in explicit.nodes.values() {
        write_node(writer, machine, explicit, node, None)?;
    }
    writer.write_event(Event::End(BytesStart::new("nodes").to_end()))?;
    writer.write_event(Event::End(BytesStart::new("explicit").to_end()))?;
    Ok(())
}

fn position_attrs(machine: &Machine, node: &Node) -> Option<(String, String)> {
    let member_partitions: Vec<usize> = node.partitions.ones().collect();
    if member_partitions.is_empty() {
        return None;
    }
    let mut positions: Vec<&Position> = Vec::with_capacity(member_partitions.len());
    for &p in &member_partitions {
        positions.push(node.position(p)?);
    }
    let index = join(positions.iter().map(|p| p.idx));
    let coords = positions
        .iter()
        .map(|p| join(&p.coords))
        .collect::<Vec<_>>()
        .join(";");
    Some((index, coords))
}

fn write_node(
    writer: &mut XmlWriter,
    machine: &Machine,
    explicit: &fabric_model::ExplicitGraph,
    node: &Node,
    parent: Option<&Node>,
) -> Result<()> {
    let mut elem = BytesStart::new("node");
    elem.push_attribute(("mac_addr", node.id.as_str()));
    let kind = node
        .kind
        .ok_or_else(|| XmlError::Invalid(format!("node {} has no type", node.id)))?;
    elem.push_attribute(("type", kind.encode()));
    elem.push_attribute(("name", node.hostname.as_deref().unwrap_or("")));
    if node.is_virtual() {
        elem.push_attribute(("size", node.subnodes.len().to_string().as_str()));
    }
    if let Some(idx) = node.hwloc_topo_idx {
        if let Some(file) = machine.hwloc_paths.get(idx - 1) {
            elem.push_attribute(("hwloc_file", file.as_str()));
        }
    }
    elem.push_attribute(("partitions", join(node.partitions.ones()).as_str()));
    if let Some(description) = &node.description {
        elem.push_attribute(("description", description.as_str()));
    }
    if node.is_host() {
        if let Some((index, coords)) = position_attrs(machine, node) {
            elem.push_attribute(("index", index.as_str()));
            elem.push_attribute(("coords", coords.as_str()));
        }
    }
    writer.write_event(Event::Start(elem))?;

    for subnode in &node.subnodes {
        write_node(writer, machine, explicit, subnode, Some(node))?;
    }

    // A subnode's edges live as subedges of its parent's virtual edges.
    writer.write_event(Event::Start(BytesStart::new("connections")))?;
    match parent {
        None => {
            for edge in node.edges.values() {
                write_connection(writer, explicit, edge)?;
            }
        }
        Some(parent) => {
            for edge in parent.edges.values() {
                for subedge in &edge.subedges {
                    if subedge.src == node.id {
                        write_connection(writer, explicit, subedge)?;
                    }
                }
            }
        }
    }
    writer.write_event(Event::End(BytesStart::new("connections").to_end()))?;

    writer.write_event(Event::End(BytesStart::new("node").to_end()))?;
    Ok(())
}

fn write_connection(
    writer: &mut XmlWriter,
    explicit: &fabric_model::ExplicitGraph,
    edge: &Edge,
) -> Result<()> {
    let mut elem = BytesStart::new("connection");
    elem.push_attribute(("bandwidth", format!("{:.6}", edge.total_gbits).as_str()));
    elem.push_attribute(("dest", edge.dest.as_str()));
    writer.write_event(Event::Start(elem))?;
    for link_id in &edge.links {
        let link = explicit
            .links
            .get(link_id)
            .ok_or_else(|| XmlError::Invalid(format!("edge references unknown link {link_id}")))?;
        let mut link_elem = BytesStart::new("link");
        link_elem.push_attribute(("srcport", link.src_port.to_string().as_str()));
        link_elem.push_attribute(("destport", link.dest_port.to_string().as_str()));
        link_elem.push_attribute(("speed", link.speed.as_str()));
        link_elem.push_attribute(("width", link.width.as_str()));
        link_elem.push_attribute(("bandwidth", format!("{:.6}", link.gbits).as_str()));
        link_elem.push_attribute(("id", link.id.to_string().as_str()));
        link_elem.push_attribute(("reverse_id", link.reverse_id.to_string().as_str()));
        link_elem.push_attribute(("description", link.description.as_str()));
        link_elem.push_attribute(("partitions", join(link.partitions.ones()).as_str()));
        writer.write_event(Event::Empty(link_elem))?;
    }
    writer.write_event(Event::End(BytesStart::new("connection").to_end()))?;
    Ok(())
}

fn write_restriction(writer: &mut XmlWriter, machine: &Machine) -> Result<()> {
    if machine.restriction.nodes.is_empty() {
        return Ok(());
    }
    let explicit = match &machine.explicit {
        Some(explicit) => explicit,
        None => return Ok(()),
    };
    writer.write_event(Event::Start(BytesStart::new("restriction")))?;
    for id in &machine.restriction.nodes {
        let name = explicit
            .node(id)
            .and_then(|n| n.hostname.as_deref())
            .unwrap_or_else(|| id.as_str());
        let mut elem = BytesStart::new("node");
        elem.push_attribute(("name", name));
        writer.write_event(Event::Empty(elem))?;
    }
    writer.write_event(Event::End(BytesStart::new("restriction").to_end()))?;
    Ok(())
}
