// Numan Thabit 2025
#![forbid(unsafe_code)]

pub mod builder;
pub mod edge;
pub mod ids;
pub mod link;
pub mod machine;
pub mod node;
pub mod partition;
pub mod query;
pub mod tree;
pub mod virtualize;

pub use builder::{DiscoverySnapshot, GraphBuilder, LinkRecord, NodeRecord};
pub use edge::Edge;
pub use ids::{PartitionSet, PhysId};
pub use link::PhysicalLink;
pub use machine::{ExplicitGraph, Machine, Restriction};
pub use node::{Node, NodeKind};
pub use partition::{Partition, Position, Topology, TopologyKind, Transport};
pub use query::{get_node_coords, get_topology, FlatTopology, PartitionChoice, TopologyFilter};
pub use tree::fit_partition;
pub use virtualize::{untangle, virtualize};

use thiserror::Error;

/// Errors surfaced by the machine model and its algorithms.
///
/// Structural and policy failures are separate variants so callers can match
/// on them; discovery-soft conditions are logged and never reach this enum.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("invalid machine state: {0}")]
    BadMachine(&'static str),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("node {0} is already in the restriction")]
    AlreadyInRestriction(String),
    #[error("no such entry: {0}")]
    NoSuchEntry(String),
    #[error("invalid discovery record: {0}")]
    InvalidRecord(String),
    #[error("physical id `{0}` does not fit in 20 bytes")]
    IdTooLong(String),
    #[error("edge {src} -> {dest} has no reverse edge")]
    MissingReverseEdge { src: String, dest: String },
    #[error("physical link {id} has no reverse mate")]
    MissingReverseLink { id: u64 },
    #[error("level mismatch at {node}: reached at level {seen} and {expected}, not a tree")]
    LevelMismatch {
        node: String,
        seen: i32,
        expected: i32,
    },
    #[error("node {0} was never reached while walking the tree")]
    NodeNotReached(String),
    #[error("partition has no host, nothing to fit")]
    EmptyPartition,
    #[error("partition index {idx} out of range ({nparts} partitions declared)")]
    PartitionOutOfRange { idx: usize, nparts: usize },
    #[error("no unique partition is shared by the requested nodes")]
    NoSharedPartition,
    #[error("cannot resolve a partition without a filter: {0}")]
    AmbiguousPartition(String),
}

pub type Result<T> = std::result::Result<T, FabricError>;
