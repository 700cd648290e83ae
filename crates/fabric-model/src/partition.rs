// Numan Thabit 2025

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Ethernet,
    Infiniband,
}

impl Transport {
    pub fn encode(&self) -> &'static str {
        match self {
            Transport::Ethernet => "ETH",
            Transport::Infiniband => "IB",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "ETH" => Some(Transport::Ethernet),
            "IB" => Some(Transport::Infiniband),
            _ => None,
        }
    }
}

/// Abstract topology kinds. Only trees are fitted today; the other
/// variants are reserved by the file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    Tree,
    Torus,
    Grid,
}

impl TopologyKind {
    pub fn encode(&self) -> u32 {
        match self {
            TopologyKind::Tree => 1,
            TopologyKind::Torus => 2,
            TopologyKind::Grid => 3,
        }
    }

    pub fn decode(v: u32) -> Option<Self> {
        match v {
            1 => Some(TopologyKind::Tree),
            2 => Some(TopologyKind::Torus),
            3 => Some(TopologyKind::Grid),
            _ => None,
        }
    }
}

/// Recursive abstract topology fitted to a partition. For a tree,
/// `dims[l]` is the maximum down-degree at level `l` and `costs` is a
/// geometric series ending at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub kind: TopologyKind,
    pub dims: Vec<u32>,
    pub costs: Vec<u64>,
    pub sub: Option<Box<Topology>>,
}

impl Topology {
    pub fn tree(dims: Vec<u32>, costs: Vec<u64>) -> Self {
        Self {
            kind: TopologyKind::Tree,
            dims,
            costs,
            sub: None,
        }
    }

    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    /// Number of leaf slots in the completed tree, ghosts included.
    pub fn num_leaves(&self) -> u64 {
        self.dims.iter().map(|&d| d as u64).product()
    }
}

/// Per-host, per-partition placement in the completed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Leaf index in the completed (ghost-padded) tree.
    pub idx: u64,
    /// One coordinate per tree level, root first.
    pub coords: Vec<u32>,
}

/// Named subset of hosts forming a placement domain.
#[derive(Debug, Clone)]
pub struct Partition {
    pub idx: usize,
    pub name: String,
    pub subnet: String,
    pub transport: Transport,
    pub topology: Option<Topology>,
    pub num_hosts: usize,
}

impl Partition {
    pub fn new(idx: usize, name: &str, subnet: &str, transport: Transport) -> Self {
        Self {
            idx,
            name: name.to_string(),
            subnet: subnet.to_string(),
            transport,
            topology: None,
            num_hosts: 0,
        }
    }
}
