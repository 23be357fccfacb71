//! Directory handles: iteration, lookup, entry creation and removal
//!
//! A handle is a cursor over the logical entries of one directory. The
//! root directory lives in a fixed table behind the FATs; every other
//! directory is an ordinary cluster chain, scanned one cluster region at
//! a time. Entry creation allocates slot runs through an occupancy bitmap
//! built per region, so the placement logic is independent of how the
//! region is chunked on the device.

use super::cluster::ClusterTable;
use super::dir_entry::{decode_entry, seek_entry, DirEntry, SeekOutcome};
use crate::{BlockDevice, FsError};

#[cfg(feature = "write")]
use super::constants::{ATTR_LFN, DIR_ENTRY_SIZE, LFN_SLOT_CHARS, SLOT_DELETED, SLOT_FREE};
#[cfg(feature = "write")]
use super::dir_entry::clip_name;
#[cfg(feature = "write")]
use crate::Visit;
#[cfg(feature = "write")]
use alloc::vec;
#[cfg(feature = "write")]
use alloc::vec::Vec;
#[cfg(feature = "write")]
use log::warn;

/// An open directory: the parent entry plus a cursor over its logical
/// entries.
///
/// A cluster field of 0 marks the fixed-location root directory; anything
/// else names the first cluster of a chained subdirectory.
pub struct Fat16Dir {
    /// Copy of the entry the directory was opened from
    entry: DirEntry,

    /// Logical index of the next entry to read
    cursor: u32,

    /// FAT accessor carrying the volume geometry
    table: ClusterTable,
}

impl Fat16Dir {
    /// Opens a handle over a decoded directory entry
    pub(crate) fn open(entry: DirEntry, table: ClusterTable) -> Result<Self, FsError> {
        if !entry.is_directory() {
            return Err(FsError::NotADirectory);
        }
        Ok(Fat16Dir {
            entry,
            cursor: 0,
            table,
        })
    }

    /// Directory entry the handle was opened from
    pub fn entry(&self) -> &DirEntry {
        &self.entry
    }

    /// Decodes the next logical entry and advances the cursor.
    ///
    /// `None` means the iteration is done; the cursor rewinds so the next
    /// read starts over from the first entry. A slot run that will not
    /// decode to a named entry ends the iteration the same way.
    pub fn read(&mut self, device: &dyn BlockDevice) -> Result<Option<DirEntry>, FsError> {
        let located = match self.locate(device, self.cursor)? {
            Some(located) => located,
            None => {
                self.cursor = 0;
                return Ok(None);
            }
        };
        match decode_entry(device, located.0, located.1)? {
            Some(entry) => {
                self.cursor += 1;
                Ok(Some(entry))
            }
            None => {
                self.cursor = 0;
                Ok(None)
            }
        }
    }

    /// Rewinds the cursor to the first entry
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Entry with the given name, compared byte for byte.
    ///
    /// The handle's own cursor is left alone.
    pub fn find(&self, device: &dyn BlockDevice, name: &str) -> Result<Option<DirEntry>, FsError> {
        let mut scan = Fat16Dir {
            entry: self.entry,
            cursor: 0,
            table: self.table,
        };
        while let Some(entry) = scan.read(device)? {
            if entry.name() == name {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Creates an empty file entry, or returns the existing entry when
    /// the name is already taken.
    ///
    /// Placement takes the first run of free slots long enough for the
    /// name's LFN slots plus the 8.3 slot. A subdirectory whose chain has
    /// no such run grows by one zero-filled cluster; the root table
    /// cannot grow.
    #[cfg(feature = "write")]
    pub fn create(
        &mut self,
        device: &mut dyn BlockDevice,
        name: &str,
        attributes: u8,
    ) -> Result<DirEntry, FsError> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidInput);
        }
        let long_name = clip_name(name);
        if let Some(existing) = self.find(device, &long_name)? {
            return Ok(existing);
        }

        let slots = long_name.encode_utf16().count().div_ceil(LFN_SLOT_CHARS) + 1;
        let offset = self.claim_slots(device, slots)?;

        let entry = DirEntry {
            long_name,
            attributes,
            cluster: 0,
            file_size: 0,
            entry_offset: offset,
        };
        entry.write_back(device)?;
        Ok(entry)
    }

    /// Deletes the named file: marks its slots deleted and frees its
    /// cluster chain.
    ///
    /// A file that never claimed a cluster has only its slots to mark.
    /// Directories are refused.
    #[cfg(feature = "write")]
    pub fn remove(&mut self, device: &mut dyn BlockDevice, name: &str) -> Result<(), FsError> {
        let entry = match self.find(device, name)? {
            Some(entry) => entry,
            None => return Err(FsError::NotFound),
        };
        if entry.is_directory() {
            return Err(FsError::IsADirectory);
        }

        // Mark every slot of the run, LFN slots first, the 8.3 slot last.
        let mut offset = entry.entry_offset;
        loop {
            let mut slot = [0u8; DIR_ENTRY_SIZE];
            device.read(offset, &mut slot)?;
            device.write(offset, &[SLOT_DELETED])?;
            if slot[0x0B] != ATTR_LFN {
                break;
            }
            offset += DIR_ENTRY_SIZE as u64;
        }

        if entry.cluster >= 2 {
            self.table.free(device, entry.cluster)?;
        }
        self.cursor = 0;
        Ok(())
    }

    /// Device offset and slot span of logical entry `index`, or `None`
    /// past the last entry.
    ///
    /// Subdirectory regions are scanned cluster by cluster, carrying the
    /// index across chain links. An entry whose slots would cross a
    /// cluster boundary is refused; the engine never creates one. A
    /// start cluster in the reserved range or a chain longer than the
    /// FAT can address is corruption.
    fn locate(&self, device: &dyn BlockDevice, index: u32) -> Result<Option<(u64, u32)>, FsError> {
        let header = *self.table.header();
        if self.entry.cluster == 0 {
            return match seek_entry(device, header.root_dir_offset, header.root_dir_len(), index)? {
                SeekOutcome::Found { offset, span } => Ok(Some((offset, span))),
                SeekOutcome::End(_) => Ok(None),
            };
        }

        if self.entry.cluster < 2 {
            return Err(FsError::Corrupted);
        }

        let mut cluster = self.entry.cluster;
        let mut index = index;
        let mut walked = 0u32;
        loop {
            walked += 1;
            if walked > header.fat_entries() {
                // Longer than the FAT can address: the chain loops.
                return Err(FsError::Corrupted);
            }
            let region = header.cluster_offset(cluster);
            match seek_entry(device, region, header.cluster_size, index)? {
                SeekOutcome::Found { offset, span } => {
                    if offset + u64::from(span) > region + u64::from(header.cluster_size) {
                        return Err(FsError::Corrupted);
                    }
                    return Ok(Some((offset, span)));
                }
                SeekOutcome::End(seen) => {
                    index -= seen;
                    cluster = match self.table.next(device, cluster)? {
                        Some(next) => next,
                        None => return Ok(None),
                    };
                }
            }
        }
    }

    /// Device offset of the first slot of a free run `run` slots long,
    /// growing a subdirectory chain by one cluster when no region has one
    #[cfg(feature = "write")]
    fn claim_slots(&self, device: &mut dyn BlockDevice, run: usize) -> Result<u64, FsError> {
        let header = *self.table.header();
        if self.entry.cluster == 0 {
            let bitmap = SlotBitmap::scan(device, header.root_dir_offset, header.root_dir_len())?;
            return match bitmap.find_free_run(run) {
                Some(slot) => Ok(header.root_dir_offset + (slot * DIR_ENTRY_SIZE) as u64),
                None => Err(FsError::NoSpace),
            };
        }

        if self.entry.cluster < 2 {
            return Err(FsError::Corrupted);
        }

        let mut cluster = self.entry.cluster;
        let mut walked = 0u32;
        loop {
            walked += 1;
            if walked > header.fat_entries() {
                return Err(FsError::Corrupted);
            }
            let region = header.cluster_offset(cluster);
            let bitmap = SlotBitmap::scan(device, region, header.cluster_size)?;
            if let Some(slot) = bitmap.find_free_run(run) {
                return Ok(region + (slot * DIR_ENTRY_SIZE) as u64);
            }
            cluster = match self.table.next(device, cluster)? {
                Some(next) => next,
                None => {
                    let fresh = self.table.extend(device, cluster, 1)?;
                    let region = header.cluster_offset(fresh);
                    if let Err(err) = zero_region(device, region, header.cluster_size) {
                        if self.table.truncate(device, cluster).is_err() {
                            warn!("failed to detach cluster {} after zero-fill failure", fresh);
                        }
                        return Err(err);
                    }
                    return Ok(region);
                }
            };
        }
    }
}

/// Fills a fresh directory cluster with never-written slot markers
#[cfg(feature = "write")]
fn zero_region(device: &mut dyn BlockDevice, offset: u64, len: u32) -> Result<(), FsError> {
    let zeros = vec![0u8; len as usize];
    device.write(offset, &zeros)
}

/// Slot occupancy of one directory region, one bit per 32-byte slot
#[cfg(feature = "write")]
struct SlotBitmap {
    bits: Vec<u64>,
    slots: usize,
}

#[cfg(feature = "write")]
impl SlotBitmap {
    /// Builds the bitmap by streaming the region's slots once
    fn scan(
        device: &dyn BlockDevice,
        region_offset: u64,
        region_len: u32,
    ) -> Result<Self, FsError> {
        let slots = region_len as usize / DIR_ENTRY_SIZE;
        let mut bits = vec![0u64; slots.div_ceil(64)];
        device.read_interval(
            region_offset,
            DIR_ENTRY_SIZE,
            region_len,
            &mut |slot, offset| {
                let lead = slot[0];
                if lead != SLOT_FREE && lead != SLOT_DELETED {
                    let index = ((offset - region_offset) / DIR_ENTRY_SIZE as u64) as usize;
                    bits[index / 64] |= 1 << (index % 64);
                }
                Visit::Continue
            },
        )?;
        Ok(SlotBitmap { bits, slots })
    }

    fn is_used(&self, index: usize) -> bool {
        self.bits[index / 64] & (1 << (index % 64)) != 0
    }

    /// Index of the first slot of a free run `run` slots long
    fn find_free_run(&self, run: usize) -> Option<usize> {
        let mut start = 0;
        let mut len = 0;
        for index in 0..self.slots {
            if self.is_used(index) {
                len = 0;
                start = index + 1;
            } else {
                len += 1;
                if len == run {
                    return Some(start);
                }
            }
        }
        None
    }
}
