//! FAT16 file allocation table entry

use super::constants::{
    CLUSTER_BAD, CLUSTER_FREE, CLUSTER_LAST_MAX, CLUSTER_LAST_MIN, CLUSTER_RESERVED_MIN,
};

/// Represents a 16-bit FAT entry pointing to the next cluster in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatEntry {
    /// Cluster number or sentinel (0 = free, >= 0xFFF8 = end of chain)
    pub cluster: u16,
}

impl FatEntry {
    /// Entry value of a free cluster
    pub const FREE: FatEntry = FatEntry {
        cluster: CLUSTER_FREE,
    };

    /// Entry value written when terminating a chain
    pub const END: FatEntry = FatEntry {
        cluster: CLUSTER_LAST_MAX,
    };

    /// Entry pointing at `cluster` as the next link
    pub fn next(cluster: u16) -> Self {
        FatEntry { cluster }
    }

    /// Decodes an entry from its on-disk little-endian bytes
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        FatEntry {
            cluster: u16::from_le_bytes(bytes),
        }
    }

    /// Encodes the entry for writing back
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.cluster.to_le_bytes()
    }

    /// Returns true if this entry marks the end of a cluster chain
    pub fn is_end_of_chain(&self) -> bool {
        self.cluster >= CLUSTER_LAST_MIN
    }

    /// Returns true if this cluster is unused/free
    pub fn is_free(&self) -> bool {
        self.cluster == CLUSTER_FREE
    }

    /// Returns true for the bad-cluster sentinel
    pub fn is_bad(&self) -> bool {
        self.cluster == CLUSTER_BAD
    }

    /// Returns true for the reserved sentinel range
    pub fn is_reserved(&self) -> bool {
        self.cluster >= CLUSTER_RESERVED_MIN && self.cluster < CLUSTER_BAD
    }

    /// Next cluster in the chain, or `None` for every sentinel and for the
    /// reserved cluster numbers 0 and 1 (which are never valid links).
    pub fn successor(&self) -> Option<u16> {
        if self.cluster >= 2 && self.cluster < CLUSTER_RESERVED_MIN {
            Some(self.cluster)
        } else {
            None
        }
    }
}
