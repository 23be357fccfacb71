//! File handles with cluster-chain based I/O

use super::cluster::ClusterTable;
use super::dir_entry::DirEntry;
use crate::{BlockDevice, FsError, SeekFrom};
#[cfg(feature = "write")]
use log::warn;

/// An open file: a directory-entry copy plus a position cursor.
///
/// The handle carries no cache beyond `pos_cluster`, the resolved cluster
/// containing the position; every read and write goes straight to the
/// device.
pub struct Fat16File {
    /// Copy of the entry the file was opened from
    entry: DirEntry,

    /// Byte position for the next read or write
    pos: u32,

    /// Cluster holding `pos`, 0 when not resolved
    pos_cluster: u16,

    /// FAT accessor carrying the volume geometry
    table: ClusterTable,
}

impl Fat16File {
    /// Opens a handle over a decoded directory entry
    pub(crate) fn open(entry: DirEntry, table: ClusterTable) -> Result<Self, FsError> {
        if entry.is_directory() {
            return Err(FsError::IsADirectory);
        }
        Ok(Fat16File {
            entry,
            pos: 0,
            pos_cluster: 0,
            table,
        })
    }

    /// Directory entry as the handle currently sees it
    pub fn entry(&self) -> &DirEntry {
        &self.entry
    }

    /// Current byte position
    pub fn pos(&self) -> u32 {
        self.pos
    }

    /// Current file size in bytes
    pub fn size(&self) -> u32 {
        self.entry.file_size
    }

    /// Reads from the current position into `buf`, following the cluster
    /// chain across boundaries.
    ///
    /// The count is clamped to the bytes left before end-of-file and comes
    /// up short when the chain ends before the recorded size says it
    /// should; 0 means end-of-file. A device failure aborts the call with
    /// the handle state untouched.
    pub fn read(&mut self, device: &dyn BlockDevice, buf: &mut [u8]) -> Result<usize, FsError> {
        if buf.is_empty() || self.pos >= self.entry.file_size {
            return Ok(0);
        }
        let want = usize::min(buf.len(), (self.entry.file_size - self.pos) as usize);
        let cluster_size = self.table.header().cluster_size;

        let mut cluster = self.resolve(device)?;
        let mut pos = self.pos;
        let mut copied = 0usize;
        while copied < want {
            let within = pos % cluster_size;
            let take = usize::min(want - copied, (cluster_size - within) as usize);
            let offset = self.table.header().cluster_offset(cluster) + u64::from(within);
            device.read(offset, &mut buf[copied..copied + take])?;
            copied += take;
            pos += take as u32;
            if pos % cluster_size == 0 {
                match self.table.next(device, cluster)? {
                    Some(next) => cluster = next,
                    None => {
                        cluster = 0;
                        break;
                    }
                }
            }
        }
        self.pos = pos;
        self.pos_cluster = cluster;
        Ok(copied)
    }

    /// Writes `buf` at the current position, claiming clusters as the
    /// chain runs out; the first cluster of an empty file is claimed
    /// lazily here.
    ///
    /// Growth past the recorded size is persisted through the directory
    /// entry before returning. When that write-back fails the bytes stay
    /// on the device but the size does not advance, and the count covers
    /// only what the entry still records; a device failure mid-loop
    /// reports the bytes committed before it. An error return means
    /// nothing was committed.
    #[cfg(feature = "write")]
    pub fn write(&mut self, device: &mut dyn BlockDevice, buf: &[u8]) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = u32::try_from(buf.len()).map_err(|_| FsError::InvalidInput)?;
        let start = self.pos;
        if start.checked_add(len).is_none() {
            return Err(FsError::InvalidOffset);
        }
        let cluster_size = self.table.header().cluster_size;

        let mut cluster = self.resolve_for_write(device)?;
        let mut pos = start;
        let mut committed = 0usize;
        let mut failure = None;
        while committed < buf.len() {
            let within = pos % cluster_size;
            let take = usize::min(buf.len() - committed, (cluster_size - within) as usize);
            let offset = self.table.header().cluster_offset(cluster) + u64::from(within);
            if let Err(err) = device.write(offset, &buf[committed..committed + take]) {
                failure = Some(err);
                break;
            }
            committed += take;
            pos += take as u32;
            if pos % cluster_size == 0 {
                if committed == buf.len() {
                    cluster = 0;
                    break;
                }
                let step = match self.table.next(device, cluster) {
                    Ok(Some(next)) => Ok(next),
                    Ok(None) => self.table.extend(device, cluster, 1),
                    Err(err) => Err(err),
                };
                match step {
                    Ok(next) => cluster = next,
                    Err(err) => {
                        failure = Some(err);
                        cluster = 0;
                        break;
                    }
                }
            }
        }

        self.pos = start + committed as u32;
        self.pos_cluster = cluster;
        if self.pos > self.entry.file_size {
            let persisted = self.entry.file_size;
            self.entry.file_size = self.pos;
            if self.entry.write_back(device).is_err() {
                // Lost write: the bytes are on the device but the entry
                // still records the old size.
                warn!("entry write-back failed, keeping size {}", persisted);
                self.entry.file_size = persisted;
                self.pos = persisted;
                self.pos_cluster = 0;
                return Ok((persisted - start) as usize);
            }
        }
        match failure {
            Some(err) if committed == 0 => Err(err),
            _ => Ok(committed),
        }
    }

    /// Moves the position per `whence` semantics.
    ///
    /// A target past end-of-file grows the file first, so a successful
    /// seek always lands within the file. The resolved cluster is dropped
    /// either way and re-walked on the next access.
    pub fn seek(&mut self, device: &mut dyn BlockDevice, pos: SeekFrom) -> Result<u32, FsError> {
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self
                .pos
                .checked_add_signed(delta)
                .ok_or(FsError::InvalidOffset)?,
            SeekFrom::End(delta) => self
                .entry
                .file_size
                .checked_add_signed(delta)
                .ok_or(FsError::InvalidOffset)?,
        };
        if target > self.entry.file_size {
            #[cfg(feature = "write")]
            self.resize(device, target)?;
            #[cfg(not(feature = "write"))]
            {
                let _ = device;
                return Err(FsError::Unsupported);
            }
        }
        self.pos = target;
        self.pos_cluster = 0;
        Ok(target)
    }

    /// Grows the file by appending clusters or shrinks it by freeing the
    /// chain tail, then persists the directory entry.
    ///
    /// Shrinking persists the smaller size before trimming the chain, so
    /// a failure between the two leaks clusters instead of leaving the
    /// entry pointing at freed ones. The position is clamped to the new
    /// size.
    #[cfg(feature = "write")]
    pub fn resize(&mut self, device: &mut dyn BlockDevice, size: u32) -> Result<(), FsError> {
        let header = *self.table.header();
        let needed = size.div_ceil(header.cluster_size);

        let mut have = 0u32;
        let mut tail = 0u16;
        let mut keep_last = 0u16;
        if self.entry.cluster >= 2 {
            let mut cluster = self.entry.cluster;
            loop {
                have += 1;
                if have > header.fat_entries() {
                    // Longer than the FAT can address: the chain loops.
                    return Err(FsError::Corrupted);
                }
                if have == needed {
                    keep_last = cluster;
                }
                match self.table.next(device, cluster)? {
                    Some(next) => cluster = next,
                    None => {
                        tail = cluster;
                        break;
                    }
                }
            }
        }

        let old_size = self.entry.file_size;
        let old_cluster = self.entry.cluster;

        if needed > have {
            let count = u16::try_from(needed - have).map_err(|_| FsError::NoSpace)?;
            let head = self.table.extend(device, tail, count)?;
            if self.entry.cluster < 2 {
                self.entry.cluster = head;
            }
        }

        self.entry.file_size = size;
        if needed == 0 {
            self.entry.cluster = 0;
        }
        if let Err(err) = self.entry.write_back(device) {
            warn!("entry write-back failed during resize, keeping size {}", old_size);
            self.entry.file_size = old_size;
            self.entry.cluster = old_cluster;
            return Err(err);
        }

        if needed < have {
            if needed == 0 {
                self.table.free(device, old_cluster)?;
            } else {
                self.table.truncate(device, keep_last)?;
            }
        }

        if self.pos > size {
            self.pos = size;
        }
        self.pos_cluster = 0;
        Ok(())
    }

    /// Cluster containing the current position, walked from the entry's
    /// first cluster when no resolved cluster is cached
    fn resolve(&self, device: &dyn BlockDevice) -> Result<u16, FsError> {
        if self.pos_cluster >= 2 {
            return Ok(self.pos_cluster);
        }
        if self.entry.cluster < 2 {
            return Err(FsError::Corrupted);
        }
        let mut cluster = self.entry.cluster;
        for _ in 0..self.pos / self.table.header().cluster_size {
            cluster = self
                .table
                .next(device, cluster)?
                .ok_or(FsError::Corrupted)?;
        }
        Ok(cluster)
    }

    /// Like [`Fat16File::resolve`] but claims clusters instead of
    /// failing: the first cluster of an empty file, and successors
    /// missing where the position demands them
    #[cfg(feature = "write")]
    fn resolve_for_write(&mut self, device: &mut dyn BlockDevice) -> Result<u16, FsError> {
        if self.pos_cluster >= 2 {
            return Ok(self.pos_cluster);
        }
        let mut cluster = self.entry.cluster;
        if cluster < 2 {
            cluster = self.table.extend(device, 0, 1)?;
            self.entry.cluster = cluster;
        }
        for _ in 0..self.pos / self.table.header().cluster_size {
            cluster = match self.table.next(device, cluster)? {
                Some(next) => next,
                None => self.table.extend(device, cluster, 1)?,
            };
        }
        Ok(cluster)
    }
}

#[cfg(all(test, feature = "write"))]
mod tests {
    use super::*;
    use crate::fat16::boot_sector::BootSector;
    use crate::fat16::constants::{ATTR_ARCHIVE, ATTR_DIRECTORY};
    use crate::fat16::dir_entry::{clip_name, decode_entry, seek_entry, SeekOutcome};
    use crate::fat16::fat_entry::FatEntry;
    use crate::MemoryBlockDevice;

    fn small_boot() -> BootSector {
        BootSector {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_copies: 2,
            max_root_entries: 16,
            sectors_per_fat: 1,
            total_sectors: 64,
        }
    }

    /// Formatted device plus an empty file entry persisted in the root
    fn fixture(name: &str) -> (MemoryBlockDevice, ClusterTable, DirEntry) {
        let boot = small_boot();
        let mut device = MemoryBlockDevice::new(boot.total_sectors as usize * 512);
        boot.write(&mut device, 0).unwrap();
        let header = boot.header(0);
        let table = ClusterTable::new(header);
        table
            .set_entry(&mut device, 0, FatEntry { cluster: 0xFFF8 })
            .unwrap();
        table.set_entry(&mut device, 1, FatEntry::END).unwrap();

        let entry = DirEntry {
            long_name: clip_name(name),
            attributes: ATTR_ARCHIVE,
            cluster: 0,
            file_size: 0,
            entry_offset: header.root_dir_offset,
        };
        entry.write_back(&mut device).unwrap();
        (device, table, entry)
    }

    /// First root entry as it currently reads from the device
    fn persisted(device: &dyn BlockDevice, table: &ClusterTable) -> DirEntry {
        let header = table.header();
        let (offset, span) =
            match seek_entry(device, header.root_dir_offset, header.root_dir_len(), 0).unwrap() {
                SeekOutcome::Found { offset, span } => (offset, span),
                SeekOutcome::End(_) => panic!("entry not found"),
            };
        decode_entry(device, offset, span).unwrap().unwrap()
    }

    fn chain_len(device: &dyn BlockDevice, table: &ClusterTable, entry: &DirEntry) -> u32 {
        if entry.cluster < 2 {
            return 0;
        }
        let mut len = 1;
        let mut cluster = entry.cluster;
        while let Some(next) = table.next(device, cluster).unwrap() {
            len += 1;
            cluster = next;
        }
        len
    }

    /// Forwards to a memory device but rejects writes touching
    /// `deny_from..deny_to`
    struct FailingDevice {
        inner: MemoryBlockDevice,
        deny_from: u64,
        deny_to: u64,
    }

    impl BlockDevice for FailingDevice {
        fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), FsError> {
            self.inner.read(offset, buf)
        }

        fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FsError> {
            if offset < self.deny_to && offset + data.len() as u64 > self.deny_from {
                return Err(FsError::Io);
            }
            self.inner.write(offset, data)
        }
    }

    #[test]
    fn test_open_rejects_directory_entry() {
        let (_, table, mut entry) = fixture("subdir");
        entry.attributes = ATTR_DIRECTORY;
        assert!(matches!(
            Fat16File::open(entry, table),
            Err(FsError::IsADirectory)
        ));
    }

    #[test]
    fn test_read_of_empty_file_returns_zero() {
        let (device, table, entry) = fixture("a.txt");
        let mut file = Fat16File::open(entry, table).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&device, &mut buf), Ok(0));
    }

    #[test]
    fn test_zero_length_write_performs_no_allocation() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();
        assert_eq!(file.write(&mut device, &[]), Ok(0));
        assert_eq!(file.entry().cluster, 0);
        assert!(table.entry(&device, 2).unwrap().is_free());
    }

    #[test]
    fn test_write_read_roundtrip_across_cluster_boundaries() {
        // 0 bytes, 1 byte, exactly one cluster, one byte past a boundary.
        for n in [0usize, 1, 512, 513] {
            let (mut device, table, entry) = fixture("data.bin");
            let mut file = Fat16File::open(entry, table).unwrap();
            let data: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();

            assert_eq!(file.write(&mut device, &data), Ok(n));
            file.seek(&mut device, SeekFrom::Start(0)).unwrap();
            let mut out = vec![0u8; n];
            assert_eq!(file.read(&device, &mut out), Ok(n));
            assert_eq!(out, data);

            assert_eq!(
                chain_len(&device, &table, file.entry()),
                n.div_ceil(512) as u32
            );
            let stored = persisted(&device, &table);
            assert_eq!(stored.file_size, n as u32);
            assert_eq!(stored.cluster, file.entry().cluster);
        }
    }

    #[test]
    fn test_overwrite_within_file_keeps_size() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();
        let base: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        file.write(&mut device, &base).unwrap();

        file.seek(&mut device, SeekFrom::Start(100)).unwrap();
        assert_eq!(file.write(&mut device, &[0xAA; 50]), Ok(50));
        assert_eq!(file.size(), 600);
        assert_eq!(persisted(&device, &table).file_size, 600);

        file.seek(&mut device, SeekFrom::Start(0)).unwrap();
        let mut out = vec![0u8; 600];
        assert_eq!(file.read(&device, &mut out), Ok(600));
        assert_eq!(&out[..100], &base[..100]);
        assert_eq!(&out[100..150], &[0xAA; 50][..]);
        assert_eq!(&out[150..], &base[150..]);
    }

    #[test]
    fn test_read_clamps_to_remaining_bytes() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();
        file.write(&mut device, b"hello").unwrap();
        file.seek(&mut device, SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(file.read(&device, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        // Position now rests at end-of-file.
        assert_eq!(file.read(&device, &mut buf), Ok(0));
    }

    #[test]
    fn test_sequential_reads_advance_the_position() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();
        let data: Vec<u8> = (0..600).map(|i| (i * 7 % 256) as u8).collect();
        file.write(&mut device, &data).unwrap();
        file.seek(&mut device, SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 256];
        assert_eq!(file.read(&device, &mut buf), Ok(256));
        assert_eq!(&buf[..], &data[..256]);
        assert_eq!(file.read(&device, &mut buf), Ok(256));
        assert_eq!(&buf[..], &data[256..512]);
        assert_eq!(file.read(&device, &mut buf), Ok(88));
        assert_eq!(&buf[..88], &data[512..]);
        assert_eq!(file.read(&device, &mut buf), Ok(0));
    }

    #[test]
    fn test_seek_positions_and_bounds() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();
        file.write(&mut device, &[7u8; 100]).unwrap();

        assert_eq!(file.seek(&mut device, SeekFrom::Start(40)), Ok(40));
        assert_eq!(file.seek(&mut device, SeekFrom::Current(-10)), Ok(30));
        assert_eq!(file.seek(&mut device, SeekFrom::Current(10)), Ok(40));
        assert_eq!(file.seek(&mut device, SeekFrom::End(-100)), Ok(0));
        assert_eq!(file.seek(&mut device, SeekFrom::End(0)), Ok(100));
        assert_eq!(
            file.seek(&mut device, SeekFrom::Current(-101)),
            Err(FsError::InvalidOffset)
        );
        assert_eq!(
            file.seek(&mut device, SeekFrom::End(-101)),
            Err(FsError::InvalidOffset)
        );
        assert_eq!(file.pos(), 100);
    }

    #[test]
    fn test_seek_past_end_grows_the_file() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();

        assert_eq!(file.seek(&mut device, SeekFrom::Start(600)), Ok(600));
        assert_eq!(file.size(), 600);
        assert_eq!(chain_len(&device, &table, file.entry()), 2);
        assert_eq!(persisted(&device, &table).file_size, 600);

        // The gap holds whatever the device held before; only the byte
        // count is defined.
        file.seek(&mut device, SeekFrom::Start(0)).unwrap();
        let mut out = vec![0u8; 600];
        assert_eq!(file.read(&device, &mut out), Ok(600));

        // Writing after the gap appends normally.
        file.seek(&mut device, SeekFrom::End(0)).unwrap();
        assert_eq!(file.write(&mut device, b"tail"), Ok(4));
        assert_eq!(file.size(), 604);
    }

    #[test]
    fn test_resize_shrink_frees_the_tail() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();
        let data: Vec<u8> = (0..1200).map(|i| (i * 3 % 256) as u8).collect();
        file.write(&mut device, &data).unwrap();
        assert_eq!(chain_len(&device, &table, file.entry()), 3);

        file.resize(&mut device, 700).unwrap();
        assert_eq!(file.size(), 700);
        assert_eq!(file.pos(), 700);
        assert_eq!(chain_len(&device, &table, file.entry()), 2);
        assert_eq!(persisted(&device, &table).file_size, 700);
        // The trimmed cluster is free again.
        assert!(table.entry(&device, 4).unwrap().is_free());
    }

    #[test]
    fn test_resize_to_zero_releases_the_chain() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();
        file.write(&mut device, &[1u8; 600]).unwrap();

        file.resize(&mut device, 0).unwrap();
        assert_eq!(file.size(), 0);
        assert_eq!(file.entry().cluster, 0);
        assert!(table.entry(&device, 2).unwrap().is_free());
        assert!(table.entry(&device, 3).unwrap().is_free());
        let stored = persisted(&device, &table);
        assert_eq!(stored.file_size, 0);
        assert_eq!(stored.cluster, 0);

        // The handle stays usable; writing claims a fresh chain.
        assert_eq!(file.write(&mut device, b"x"), Ok(1));
        assert_eq!(persisted(&device, &table).file_size, 1);
    }

    #[test]
    fn test_resize_same_size_keeps_the_chain() {
        let (mut device, table, entry) = fixture("data.bin");
        let mut file = Fat16File::open(entry, table).unwrap();
        file.write(&mut device, &[2u8; 600]).unwrap();

        file.resize(&mut device, 600).unwrap();
        assert_eq!(file.size(), 600);
        assert_eq!(chain_len(&device, &table, file.entry()), 2);
    }

    #[test]
    fn test_write_back_failure_is_a_lost_write() {
        let (inner, table, entry) = fixture("data.bin");
        let header = *table.header();
        let mut device = FailingDevice {
            inner,
            deny_from: header.root_dir_offset,
            deny_to: header.cluster_zero_offset,
        };
        let mut file = Fat16File::open(entry, table).unwrap();

        // Data and FAT writes land, the entry update does not.
        assert_eq!(file.write(&mut device, &[9u8; 10]), Ok(0));
        assert_eq!(file.size(), 0);
        assert_eq!(file.pos(), 0);
        let mut raw = [0u8; 10];
        device.read(header.cluster_zero_offset, &mut raw).unwrap();
        assert_eq!(raw, [9u8; 10]);
        assert_eq!(persisted(&device, &table).file_size, 0);

        // Once the directory region accepts writes, the next attempt
        // lands and reuses the already-claimed cluster.
        device.deny_to = 0;
        assert_eq!(file.write(&mut device, &[9u8; 10]), Ok(10));
        let stored = persisted(&device, &table);
        assert_eq!(stored.file_size, 10);
        assert_eq!(stored.cluster, file.entry().cluster);
    }

    #[test]
    fn test_write_back_failure_reports_bytes_within_old_size() {
        let (mut inner, table, entry) = fixture("data.bin");
        let header = *table.header();
        let mut file = Fat16File::open(entry, table).unwrap();
        file.write(&mut inner, &[1u8; 10]).unwrap();

        let mut device = FailingDevice {
            inner,
            deny_from: header.root_dir_offset,
            deny_to: header.cluster_zero_offset,
        };
        file.seek(&mut device, SeekFrom::Start(5)).unwrap();
        assert_eq!(file.write(&mut device, &[2u8; 10]), Ok(5));
        assert_eq!(file.pos(), 10);
        assert_eq!(file.size(), 10);

        // All ten bytes hit the device even though only five count.
        let mut raw = [0u8; 15];
        device.read(header.cluster_zero_offset, &mut raw).unwrap();
        assert_eq!(&raw[..5], &[1u8; 5]);
        assert_eq!(&raw[5..], &[2u8; 10]);
    }

    #[test]
    fn test_mid_write_device_failure_reports_committed_bytes() {
        let (inner, table, entry) = fixture("data.bin");
        let header = *table.header();
        // The second data cluster rejects writes, the first takes them.
        let mut device = FailingDevice {
            inner,
            deny_from: header.cluster_offset(3),
            deny_to: header.cluster_offset(4),
        };
        let mut file = Fat16File::open(entry, table).unwrap();

        assert_eq!(file.write(&mut device, &[5u8; 600]), Ok(512));
        assert_eq!(file.pos(), 512);
        assert_eq!(file.size(), 512);
        assert_eq!(persisted(&device, &table).file_size, 512);
        // The cluster claimed for the failed tail stays linked.
        assert_eq!(chain_len(&device, &table, file.entry()), 2);
    }

    #[test]
    fn test_read_reports_short_count_on_early_chain_end() {
        let (mut device, table, mut entry) = fixture("data.bin");
        // The entry claims two clusters' worth but the chain holds one.
        table.set_entry(&mut device, 2, FatEntry::END).unwrap();
        entry.cluster = 2;
        entry.file_size = 1024;
        let mut file = Fat16File::open(entry, table).unwrap();

        let mut buf = vec![0u8; 1024];
        assert_eq!(file.read(&device, &mut buf), Ok(512));
        // The cursor now rests in the missing region and cannot resolve.
        assert_eq!(file.read(&device, &mut buf), Err(FsError::Corrupted));
    }
}
