//! FAT16 boot sector parsing and the derived volume geometry

use super::constants::DIR_ENTRY_SIZE;
use crate::{BlockDevice, FsError};
#[cfg(feature = "write")]
use alloc::vec;

/// Filesystem-type tag checked during validation
const FS_TYPE_TAG: &[u8; 8] = b"FAT16   ";

/// Legacy locations of the filesystem-type tag, relative to partition start
const FS_TYPE_OFFSETS: [u64; 2] = [0x36, 0x52];

/// BIOS Parameter Block fields the engine cares about.
///
/// Parsed from the first sector of a partition, or filled in by a caller to
/// format a fresh volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSector {
    /// Number of bytes per sector
    pub bytes_per_sector: u16,

    /// Number of sectors per cluster
    pub sectors_per_cluster: u8,

    /// Number of reserved sectors preceding the first FAT,
    /// including the boot sector itself
    pub reserved_sectors: u16,

    /// Number of FAT copies
    pub fat_copies: u8,

    /// Maximum number of root directory entries
    pub max_root_entries: u16,

    /// Size of each FAT copy in sectors
    pub sectors_per_fat: u16,

    /// Total number of sectors in the volume
    pub total_sectors: u32,
}

impl BootSector {
    /// Reads and validates the BPB at `partition_offset`.
    ///
    /// The 8-byte filesystem-type tag must read `"FAT16   "` at one of its
    /// two legacy locations; the geometry fields must be able to support the
    /// address derivations. Anything else is [`FsError::NotFat16`].
    pub fn parse(device: &dyn BlockDevice, partition_offset: u64) -> Result<Self, FsError> {
        let mut tag = [0u8; 8];
        let mut tagged = false;
        for tag_offset in FS_TYPE_OFFSETS {
            device.read(partition_offset + tag_offset, &mut tag)?;
            if &tag == FS_TYPE_TAG {
                tagged = true;
                break;
            }
        }
        if !tagged {
            return Err(FsError::NotFat16);
        }

        // One window covering 0x0B..0x24 relative to the partition start.
        let mut fields = [0u8; 25];
        device.read(partition_offset + 0x0B, &mut fields)?;

        let total_sectors_16 = u16::from_le_bytes([fields[0x08], fields[0x09]]);
        let total_sectors = if total_sectors_16 != 0 {
            u32::from(total_sectors_16)
        } else {
            u32::from_le_bytes([fields[0x15], fields[0x16], fields[0x17], fields[0x18]])
        };

        let boot = BootSector {
            bytes_per_sector: u16::from_le_bytes([fields[0x00], fields[0x01]]),
            sectors_per_cluster: fields[0x02],
            reserved_sectors: u16::from_le_bytes([fields[0x03], fields[0x04]]),
            fat_copies: fields[0x05],
            max_root_entries: u16::from_le_bytes([fields[0x06], fields[0x07]]),
            sectors_per_fat: u16::from_le_bytes([fields[0x0B], fields[0x0C]]),
            total_sectors,
        };
        boot.validate()?;
        Ok(boot)
    }

    /// Checks that the geometry can support the address derivations
    pub(crate) fn validate(&self) -> Result<(), FsError> {
        if !(512..=4096).contains(&self.bytes_per_sector)
            || !self.bytes_per_sector.is_power_of_two()
        {
            return Err(FsError::NotFat16);
        }
        if self.sectors_per_cluster == 0
            || self.sectors_per_cluster > 128
            || !self.sectors_per_cluster.is_power_of_two()
        {
            return Err(FsError::NotFat16);
        }
        if self.reserved_sectors == 0
            || self.fat_copies == 0
            || self.sectors_per_fat == 0
            || self.max_root_entries == 0
        {
            return Err(FsError::NotFat16);
        }
        Ok(())
    }

    /// Derives the byte-offset geometry used by every other component
    pub fn header(&self, partition_offset: u64) -> Header {
        let bytes_per_sector = u64::from(self.bytes_per_sector);
        let fat_offset = partition_offset + u64::from(self.reserved_sectors) * bytes_per_sector;
        let fat_size = u32::from(self.sectors_per_fat) * u32::from(self.bytes_per_sector);
        let root_dir_offset = fat_offset + u64::from(self.fat_copies) * u64::from(fat_size);
        Header {
            total_size: u64::from(self.total_sectors) * bytes_per_sector,
            sector_size: self.bytes_per_sector,
            cluster_size: u32::from(self.bytes_per_sector) * u32::from(self.sectors_per_cluster),
            fat_offset,
            fat_size,
            fat_copies: self.fat_copies,
            root_dir_offset,
            cluster_zero_offset: root_dir_offset
                + u64::from(self.max_root_entries) * DIR_ENTRY_SIZE as u64,
        }
    }

    /// Writes a boot sector carrying these fields at `partition_offset`.
    ///
    /// Sector counts below 65536 go into the legacy 16-bit total field,
    /// larger ones into the 32-bit field; `parse` accepts either.
    #[cfg(feature = "write")]
    pub(crate) fn write(
        &self,
        device: &mut dyn BlockDevice,
        partition_offset: u64,
    ) -> Result<(), FsError> {
        self.validate()?;

        let mut sector = vec![0u8; usize::from(self.bytes_per_sector)];
        sector[0x00..0x03].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        sector[0x03..0x0B].copy_from_slice(b"FAT16FS ");
        sector[0x0B..0x0D].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        sector[0x0D] = self.sectors_per_cluster;
        sector[0x0E..0x10].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        sector[0x10] = self.fat_copies;
        sector[0x11..0x13].copy_from_slice(&self.max_root_entries.to_le_bytes());
        if self.total_sectors < 0x1_0000 {
            sector[0x13..0x15].copy_from_slice(&(self.total_sectors as u16).to_le_bytes());
        } else {
            sector[0x20..0x24].copy_from_slice(&self.total_sectors.to_le_bytes());
        }
        // Fixed-disk media descriptor.
        sector[0x15] = 0xF8;
        sector[0x16..0x18].copy_from_slice(&self.sectors_per_fat.to_le_bytes());
        sector[0x24] = 0x80;
        sector[0x26] = 0x29;
        sector[0x27..0x2B].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        sector[0x2B..0x36].copy_from_slice(b"NO NAME    ");
        sector[0x36..0x3E].copy_from_slice(FS_TYPE_TAG);
        sector[510..512].copy_from_slice(&[0x55, 0xAA]);

        device.write(partition_offset, &sector)
    }
}

/// Byte-offset geometry of an opened volume.
///
/// All offsets are absolute device offsets; `cluster_zero_offset` is the
/// origin from which cluster N's data lives at
/// `cluster_zero_offset + (N - 2) * cluster_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total volume size in bytes
    pub total_size: u64,

    /// Size of a sector in bytes
    pub sector_size: u16,

    /// Size of a cluster in bytes
    pub cluster_size: u32,

    /// Offset of the first FAT copy
    pub fat_offset: u64,

    /// Size of one FAT copy in bytes
    pub fat_size: u32,

    /// Number of FAT copies
    pub fat_copies: u8,

    /// Offset of the fixed root directory region
    pub root_dir_offset: u64,

    /// Origin of cluster addressing (see type docs)
    pub cluster_zero_offset: u64,
}

impl Header {
    /// Byte offset of a data cluster; `cluster` must be >= 2
    pub fn cluster_offset(&self, cluster: u16) -> u64 {
        debug_assert!(cluster >= 2);
        self.cluster_zero_offset + u64::from(cluster - 2) * u64::from(self.cluster_size)
    }

    /// Number of entries a FAT copy can address, capped at the 16-bit
    /// cluster-number space
    pub fn fat_entries(&self) -> u32 {
        u32::min(self.fat_size / 2, 0x1_0000)
    }

    /// Length of the fixed root directory region in bytes
    pub fn root_dir_len(&self) -> u32 {
        (self.cluster_zero_offset - self.root_dir_offset) as u32
    }
}
