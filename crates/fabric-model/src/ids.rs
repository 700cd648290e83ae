// Numan Thabit 2025
use std::fmt;

use fixedbitset::FixedBitSet;

use crate::FabricError;

/// Maximum stored length of a physical id, including the virtual prefix
/// layout `virtual%012u` (19 bytes).
pub const PHYS_ID_LEN: usize = 20;

/// Fixed-width physical identifier of a node (GUID text or generated
/// virtual id). Stored NUL-padded so it can be used as an ordered map key
/// with a stable byte-wise ordering.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysId([u8; PHYS_ID_LEN]);

impl PhysId {
    pub fn new(s: &str) -> Result<Self, FabricError> {
        if s.len() >= PHYS_ID_LEN {
            return Err(FabricError::IdTooLong(s.to_string()));
        }
        let mut bytes = [0u8; PHYS_ID_LEN];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }

    /// Generated id for a virtual node, from the machine's sequence counter.
    pub fn virtual_id(seq: u32) -> Self {
        let s = format!("virtual{seq:012}");
        debug_assert!(s.len() < PHYS_ID_LEN);
        let mut bytes = [0u8; PHYS_ID_LEN];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Self(bytes)
    }

    pub fn is_virtual(&self) -> bool {
        self.0.starts_with(b"virtual")
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(PHYS_ID_LEN);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }
}

impl fmt::Display for PhysId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for PhysId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysId({})", self.as_str())
    }
}

/// Partition-membership bitset. Grows on demand so records created before
/// all partitions are declared stay valid.
#[derive(Debug, Clone, Default)]
pub struct PartitionSet(FixedBitSet);

impl PartitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(idx: usize) -> Self {
        let mut set = Self::default();
        set.insert(idx);
        set
    }

    pub fn insert(&mut self, idx: usize) {
        if idx >= self.0.len() {
            self.0.grow(idx + 1);
        }
        self.0.insert(idx);
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx < self.0.len() && self.0.contains(idx)
    }

    pub fn union_with(&mut self, other: &PartitionSet) {
        if other.0.len() > self.0.len() {
            self.0.grow(other.0.len());
        }
        self.0.union_with(&other.0);
    }

    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0.count_ones(..) == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones(..)
    }
}

impl PartialEq for PartitionSet {
    fn eq(&self, other: &Self) -> bool {
        // Lengths may differ while contents match, compare set bits only.
        self.0.ones().eq(other.0.ones())
    }
}

impl Eq for PartitionSet {}

impl FromIterator<usize> for PartitionSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::default();
        for idx in iter {
            set.insert(idx);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phys_id_round_trips_and_orders() {
        let a = PhysId::new("0002:c903:0042:1a01").expect("fits");
        let b = PhysId::new("0002:c903:0042:1a02").expect("fits");
        assert_eq!(a.as_str(), "0002:c903:0042:1a01");
        assert!(a < b);
        assert!(!a.is_virtual());
    }

    #[test]
    fn virtual_ids_keep_the_fixed_layout() {
        let v = PhysId::virtual_id(7);
        assert_eq!(v.as_str(), "virtual000000000007");
        assert!(v.is_virtual());
    }

    #[test]
    fn phys_id_rejects_overlong_input() {
        assert!(PhysId::new("0123456789abcdef01234").is_err());
    }

    #[test]
    fn partition_sets_compare_by_content() {
        let mut a = PartitionSet::new();
        a.insert(1);
        let mut b = PartitionSet::new();
        b.insert(1);
        b.insert(60);
        assert_ne!(a, b);
        a.insert(60);
        assert_eq!(a, b);

        let mut grown = PartitionSet::new();
        grown.insert(120);
        let mut small = PartitionSet::new();
        small.union_with(&grown);
        assert!(small.contains(120));
    }
}
