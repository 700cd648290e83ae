// Numan Thabit 2025
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::edge::Edge;
use crate::ids::PhysId;
use crate::link::{gbits_for, PhysicalLink};
use crate::machine::{ExplicitGraph, Machine};
use crate::node::{Node, NodeKind};
use crate::partition::{Partition, Transport};
use crate::{FabricError, Result};

/// One discovered endpoint or switch.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    /// "CA" for hosts, "SW" for switches.
    pub kind: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub logical_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One discovered cable. The builder materializes it as two directed
/// physical links with reciprocal reverse ids.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkRecord {
    pub src: String,
    pub src_port: i32,
    pub dest: String,
    pub dest_port: i32,
    pub speed: String,
    pub width: String,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Everything an external discovery source hands over for one subnet.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySnapshot {
    pub subnet: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub partitions: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}

fn default_transport() -> String {
    "IB".to_string()
}

/// Builds the explicit graph of a machine from discovery records.
pub struct GraphBuilder {
    machine: Machine,
}

impl GraphBuilder {
    pub fn new(topo_dir: impl Into<std::path::PathBuf>) -> Self {
        let mut machine = Machine::new(topo_dir);
        machine.add_explicit();
        Self { machine }
    }

    pub fn ingest(&mut self, snapshot: &DiscoverySnapshot) -> Result<()> {
        let transport = Transport::decode(&snapshot.transport)
            .ok_or_else(|| FabricError::InvalidRecord(snapshot.transport.clone()))?;

        let mut partitions: Vec<Partition> = snapshot
            .partitions
            .iter()
            .enumerate()
            .map(|(idx, name)| Partition::new(idx, name, &snapshot.subnet, transport))
            .collect();

        for record in &snapshot.nodes {
            self.intern_node(record)?;
        }

        for record in &snapshot.links {
            let part_idx = match &record.partition {
                Some(name) => Some(partition_index(&mut partitions, name, &snapshot.subnet, transport)),
                None => None,
            };
            self.add_cable(record, part_idx)?;
        }

        for partition in &mut partitions {
            partition.num_hosts = self
                .machine
                .explicit()?
                .nodes
                .values()
                .filter(|n| n.is_host() && n.partitions.contains(partition.idx))
                .count();
        }
        info!(
            nodes = self.machine.explicit()?.nodes.len(),
            links = self.machine.explicit()?.links.len(),
            partitions = partitions.len(),
            subnet = %snapshot.subnet,
            "discovery snapshot ingested"
        );
        self.machine.add_partitions(partitions);
        Ok(())
    }

    fn intern_node(&mut self, record: &NodeRecord) -> Result<()> {
        let kind = NodeKind::decode(&record.kind)
            .ok_or_else(|| FabricError::InvalidRecord(format!("node kind {}", record.kind)))?;
        let id = PhysId::new(&record.id)?;
        let explicit = self.machine.explicit_mut()?;
        if explicit.nodes.contains_key(&id) {
            debug!(node = %id, "node already interned");
            return Ok(());
        }
        let mut node = Node::new(id, kind);
        node.hostname = record.hostname.clone();
        if let Some(logical_id) = record.logical_id {
            node.logical_id = logical_id;
        }
        node.description = record.description.clone();
        if kind == NodeKind::Host && node.hostname.is_none() {
            warn!(node = %id, "host node has no hostname");
        }
        explicit.add_node(node);
        Ok(())
    }

    /// Create the two directed links of a cable and fold them into the
    /// edges of both endpoints.
    fn add_cable(&mut self, record: &LinkRecord, part_idx: Option<usize>) -> Result<()> {
        let src = PhysId::new(&record.src)?;
        let dest = PhysId::new(&record.dest)?;
        {
            let explicit = self.machine.explicit()?;
            for id in [&src, &dest] {
                if !explicit.nodes.contains_key(id) {
                    return Err(FabricError::NodeNotFound(id.to_string()));
                }
            }
        }

        let gbits = gbits_for(&record.speed, &record.width);
        let forward_id = self.machine.next_link_id();
        let reverse_id = self.machine.next_link_id();

        let forward = PhysicalLink {
            id: forward_id,
            src,
            src_port: record.src_port,
            dest,
            dest_port: record.dest_port,
            speed: record.speed.clone(),
            width: record.width.clone(),
            gbits,
            reverse_id,
            description: record.description.clone().unwrap_or_default(),
            partitions: part_idx.into_iter().collect(),
        };
        let reverse = PhysicalLink {
            id: reverse_id,
            src: dest,
            src_port: record.dest_port,
            dest: src,
            dest_port: record.src_port,
            reverse_id: forward_id,
            ..forward.clone()
        };

        let explicit = self.machine.explicit_mut()?;
        for link in [forward, reverse] {
            attach_link(explicit, link, part_idx);
        }
        Ok(())
    }

    /// Final pass: verify every edge has its reverse and hand the machine
    /// over.
    pub fn finish(self) -> Result<Machine> {
        check_reverse_edges(self.machine.explicit()?)?;
        check_reverse_links(self.machine.explicit()?)?;
        Ok(self.machine)
    }
}

fn partition_index(
    partitions: &mut Vec<Partition>,
    name: &str,
    subnet: &str,
    transport: Transport,
) -> usize {
    if let Some(p) = partitions.iter().position(|p| p.name == name) {
        return p;
    }
    let idx = partitions.len();
    partitions.push(Partition::new(idx, name, subnet, transport));
    idx
}

fn attach_link(explicit: &mut ExplicitGraph, link: PhysicalLink, part_idx: Option<usize>) {
    let (src, dest, id, gbits) = (link.src, link.dest, link.id, link.gbits);
    let node = explicit
        .nodes
        .get_mut(&src)
        .expect("endpoint interned before linking");
    node.physical_links.push(id);
    if let Some(p) = part_idx {
        node.partitions.insert(p);
    }
    let edge = node
        .edges
        .entry(dest)
        .or_insert_with(|| Edge::new(src, dest));
    edge.links.push(id);
    edge.total_gbits += gbits;
    if let Some(p) = part_idx {
        edge.partitions.insert(p);
    }
    if let Some(p) = part_idx {
        explicit
            .nodes
            .get_mut(&link.dest)
            .expect("endpoint interned before linking")
            .partitions
            .insert(p);
    }
    explicit.links.insert(id, link);
}

/// Every edge must have a reverse in the destination node's edge map.
pub fn check_reverse_edges(explicit: &ExplicitGraph) -> Result<()> {
    for node in explicit.nodes.values() {
        for edge in node.edges.values() {
            let dest = explicit
                .nodes
                .get(&edge.dest)
                .ok_or_else(|| FabricError::NodeNotFound(edge.dest.to_string()))?;
            if !dest.edges.contains_key(&node.id) {
                return Err(FabricError::MissingReverseEdge {
                    src: node.id.to_string(),
                    dest: edge.dest.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Every physical link must have a mate with reciprocal ids and mirrored
/// endpoints.
pub fn check_reverse_links(explicit: &ExplicitGraph) -> Result<()> {
    for link in explicit.links.values() {
        let mate = explicit
            .links
            .get(&link.reverse_id)
            .ok_or(FabricError::MissingReverseLink { id: link.id })?;
        if mate.reverse_id != link.id || mate.src != link.dest || mate.dest != link.src {
            return Err(FabricError::MissingReverseLink { id: link.id });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_toml(toml: &str) -> DiscoverySnapshot {
        toml::from_str(toml).expect("valid snapshot")
    }

    fn two_hosts_one_switch() -> DiscoverySnapshot {
        snapshot_toml(
            r#"
            subnet = "fe80:0000:0000:0000"
            partitions = ["batch"]

            [[nodes]]
            id = "sw-1"
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
            src = "sw-1"
            src_port = 1
            dest = "ca-1"
            dest_port = 1
            speed = "QDR"
            width = "4x"
            partition = "batch"

            [[links]]
            src = "sw-1"
            src_port = 2
            dest = "ca-2"
            dest_port = 1
            speed = "QDR"
            width = "4x"
            partition = "batch"
            "#,
        )
    }

    #[test]
    fn cables_become_reciprocal_link_pairs() {
        let mut builder = GraphBuilder::new("/tmp/topo");
        builder.ingest(&two_hosts_one_switch()).expect("ingest");
        let machine = builder.finish().expect("reverse checks pass");

        let explicit = machine.explicit().unwrap();
        assert_eq!(explicit.links.len(), 4);
        for link in explicit.links.values() {
            let mate = &explicit.links[&link.reverse_id];
            assert_eq!(mate.reverse_id, link.id);
            assert_eq!(mate.src, link.dest);
            assert_eq!(mate.dest, link.src);
        }
    }

    #[test]
    fn edges_accumulate_links_and_gbits() {
        let mut snapshot = two_hosts_one_switch();
        // Double cable between sw-1 and ca-1.
        snapshot.links.push(snapshot.links[0].clone());
        let mut builder = GraphBuilder::new("/tmp/topo");
        builder.ingest(&snapshot).expect("ingest");
        let machine = builder.finish().expect("valid");

        let explicit = machine.explicit().unwrap();
        let sw = explicit.node(&PhysId::new("sw-1").unwrap()).unwrap();
        let edge = &sw.edges[&PhysId::new("ca-1").unwrap()];
        assert_eq!(edge.links.len(), 2);
        assert!((edge.total_gbits - 64.0).abs() < 1e-3);

        let sum: f32 = edge
            .links
            .iter()
            .map(|id| explicit.links[id].gbits)
            .sum();
        assert!((edge.total_gbits - sum).abs() < 1e-3);
    }

    #[test]
    fn partition_bits_reach_links_edges_and_nodes() {
        let mut builder = GraphBuilder::new("/tmp/topo");
        builder.ingest(&two_hosts_one_switch()).expect("ingest");
        let machine = builder.finish().expect("valid");

        assert_eq!(machine.partitions.len(), 1);
        assert_eq!(machine.partitions[0].num_hosts, 2);
        let explicit = machine.explicit().unwrap();
        for node in explicit.nodes.values() {
            assert!(node.partitions.contains(0), "node {} untagged", node.id);
        }
        for link in explicit.links.values() {
            assert!(link.partitions.contains(0));
        }
    }

    #[test]
    fn link_to_unknown_node_is_structural() {
        let snapshot = snapshot_toml(
            r#"
            subnet = "fe80:0000:0000:0000"

            [[nodes]]
            id = "ca-1"
            kind = "CA"

            [[links]]
            src = "ca-1"
            src_port = 1
            dest = "ghost"
            dest_port = 1
            speed = "QDR"
            width = "4x"
            "#,
        );
        let mut builder = GraphBuilder::new("/tmp/topo");
        assert!(matches!(
            builder.ingest(&snapshot),
            Err(FabricError::NodeNotFound(_))
        ));
    }
}
