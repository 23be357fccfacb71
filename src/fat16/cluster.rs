//! Cluster chain operations over the file allocation table

use super::boot_sector::Header;
#[cfg(feature = "write")]
use super::constants::CLUSTER_RESERVED_MIN;
use super::constants::FAT_ENTRY_SIZE;
use super::fat_entry::FatEntry;
use crate::{BlockDevice, FsError};
#[cfg(feature = "write")]
use alloc::vec::Vec;
#[cfg(feature = "write")]
use log::{debug, warn};

/// The FAT viewed as a table of chain links.
///
/// Callers deal in cluster numbers and `Option` successors; sentinel
/// encoding and entry addressing stay in here. Reads go to the first FAT
/// copy, writes are mirrored to every copy.
#[derive(Debug, Clone, Copy)]
pub struct ClusterTable {
    header: Header,
}

impl ClusterTable {
    pub fn new(header: Header) -> Self {
        Self { header }
    }

    /// Geometry the table operates over
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Offset of a cluster's entry within one FAT copy
    fn entry_offset(&self, cluster: u16) -> u64 {
        u64::from(cluster) * FAT_ENTRY_SIZE as u64
    }

    /// Reads a raw FAT entry from the first copy
    pub(crate) fn entry(&self, device: &dyn BlockDevice, cluster: u16) -> Result<FatEntry, FsError> {
        if u32::from(cluster) >= self.header.fat_entries() {
            return Err(FsError::Corrupted);
        }
        let mut raw = [0u8; FAT_ENTRY_SIZE];
        device.read(self.header.fat_offset + self.entry_offset(cluster), &mut raw)?;
        Ok(FatEntry::from_le_bytes(raw))
    }

    /// Writes a FAT entry through to every FAT copy
    #[cfg(feature = "write")]
    pub(crate) fn set_entry(
        &self,
        device: &mut dyn BlockDevice,
        cluster: u16,
        entry: FatEntry,
    ) -> Result<(), FsError> {
        if u32::from(cluster) >= self.header.fat_entries() {
            return Err(FsError::Corrupted);
        }
        let raw = entry.to_le_bytes();
        for copy in 0..self.header.fat_copies {
            let copy_offset =
                self.header.fat_offset + u64::from(copy) * u64::from(self.header.fat_size);
            device.write(copy_offset + self.entry_offset(cluster), &raw)?;
        }
        Ok(())
    }

    /// Successor of `cluster` in its chain.
    ///
    /// `None` covers every way a chain can end here: an end-of-chain
    /// sentinel, a free/bad/reserved entry, or a cluster number that is not
    /// a valid chain member in the first place.
    pub fn next(&self, device: &dyn BlockDevice, cluster: u16) -> Result<Option<u16>, FsError> {
        if cluster < 2 || u32::from(cluster) >= self.header.fat_entries() {
            return Ok(None);
        }
        Ok(self.entry(device, cluster)?.successor())
    }

    /// Claims `count` free clusters and links them into a fresh chain,
    /// returning its head.
    ///
    /// The scan walks the FAT once, from cluster 2 up to the first
    /// sentinel number. The chain is built tail-first: the first claimed
    /// slot is terminated, every later claim links to the previous one,
    /// so the most recently claimed cluster is the head. When `tail`
    /// names an existing chain end (cluster >= 2), the new chain is
    /// linked after it only once all `count` clusters are secured. On
    /// exhaustion or device failure every claimed slot is released again
    /// and no chain survives.
    #[cfg(feature = "write")]
    pub fn extend(
        &self,
        device: &mut dyn BlockDevice,
        tail: u16,
        count: u16,
    ) -> Result<u16, FsError> {
        if count == 0 {
            return Err(FsError::InvalidInput);
        }

        let mut claimed: Vec<u16> = Vec::with_capacity(usize::from(count));
        let mut head = 0u16;
        // Sentinel-range numbers can never be chain members, however many
        // entries the FAT carries.
        let scan_end = self
            .header
            .fat_entries()
            .min(u32::from(CLUSTER_RESERVED_MIN));
        for cluster in 2..scan_end {
            let cluster = cluster as u16;
            let entry = match self.entry(device, cluster) {
                Ok(entry) => entry,
                Err(err) => {
                    self.release(device, &claimed);
                    return Err(err);
                }
            };
            if !entry.is_free() {
                continue;
            }

            let link = if claimed.is_empty() {
                FatEntry::END
            } else {
                FatEntry::next(head)
            };
            if let Err(err) = self.set_entry(device, cluster, link) {
                self.release(device, &claimed);
                return Err(err);
            }
            head = cluster;
            claimed.push(cluster);
            if claimed.len() == usize::from(count) {
                break;
            }
        }

        if claimed.len() < usize::from(count) {
            warn!(
                "cluster allocation exhausted after {} of {}, rolling back",
                claimed.len(),
                count
            );
            self.release(device, &claimed);
            return Err(FsError::NoSpace);
        }

        if tail >= 2 {
            if let Err(err) = self.set_entry(device, tail, FatEntry::next(head)) {
                self.release(device, &claimed);
                return Err(err);
            }
        }
        debug!("extended chain after {} by {} clusters", tail, count);
        Ok(head)
    }

    /// Frees a chain starting at `start`.
    ///
    /// Each entry's successor is read before the entry is zeroed so the
    /// walk survives its own writes. Stops cleanly at an end-of-chain or
    /// already-free entry; a bad/reserved sentinel mid-chain fails with
    /// [`FsError::Corrupted`] after the entries before it were already
    /// freed (the walk is not atomic).
    #[cfg(feature = "write")]
    pub fn free(&self, device: &mut dyn BlockDevice, start: u16) -> Result<(), FsError> {
        if start < 2 {
            return Err(FsError::InvalidInput);
        }
        let mut cluster = start;
        loop {
            let entry = self.entry(device, cluster)?;
            if entry.is_free() {
                return Ok(());
            }
            if entry.is_bad() || entry.is_reserved() {
                return Err(FsError::Corrupted);
            }
            self.set_entry(device, cluster, FatEntry::FREE)?;
            match entry.successor() {
                Some(next) => cluster = next,
                None => return Ok(()),
            }
        }
    }

    /// Cuts a chain after `last`: frees every cluster beyond it and marks
    /// `last` as the chain end.
    ///
    /// Termination is written first so a failed tail free leaks clusters
    /// instead of leaving `last` pointing into freed space.
    #[cfg(feature = "write")]
    pub fn truncate(&self, device: &mut dyn BlockDevice, last: u16) -> Result<(), FsError> {
        if last < 2 {
            return Err(FsError::InvalidInput);
        }
        let next = match self.entry(device, last)?.successor() {
            Some(next) => next,
            None => return Ok(()),
        };
        self.set_entry(device, last, FatEntry::END)?;
        self.free(device, next)
    }

    /// Best-effort release of clusters claimed by a failed allocation
    #[cfg(feature = "write")]
    fn release(&self, device: &mut dyn BlockDevice, claimed: &[u16]) {
        for &cluster in claimed {
            if self.set_entry(device, cluster, FatEntry::FREE).is_err() {
                warn!("failed to release cluster {} during rollback", cluster);
            }
        }
    }
}
