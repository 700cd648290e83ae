// Numan Thabit 2025
use smallvec::SmallVec;

use crate::ids::{PartitionSet, PhysId};

/// A directed aggregate of physical links between two nodes. Owned by the
/// source node's edge map, keyed there by `dest`; the reverse edge is the
/// destination node's entry keyed by `src`.
#[derive(Debug, Clone, Default)]
pub struct Edge {
    pub src: PhysId,
    pub dest: PhysId,
    /// Sum of the gbits of every link carried, subedges included.
    pub total_gbits: f32,
    /// Ids of the carried physical links. For a virtual edge this is the
    /// concatenation over subedges, so that each link still shows up in
    /// exactly one top-level edge.
    pub links: SmallVec<[u64; 4]>,
    pub partitions: PartitionSet,
    /// Non-empty iff either endpoint is virtual; each subedge keeps its
    /// original non-virtual endpoints.
    pub subedges: Vec<Edge>,
}

impl Edge {
    pub fn new(src: PhysId, dest: PhysId) -> Self {
        Self {
            src,
            dest,
            ..Self::default()
        }
    }

    pub fn is_virtual(&self) -> bool {
        !self.subedges.is_empty()
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }
}
