//! FAT16 engine: volume lifecycle, path resolution and the descriptor
//! tables behind the public file and directory operations.
//!
//! [`Fat16`] owns the block device for the whole session. Callers address
//! open files and directories through [`FileFd`]/[`DirFd`] descriptors;
//! the handles themselves live in index-addressed tables inside the
//! engine, with freed descriptor slots recycled through a pool.

use alloc::boxed::Box;
use alloc::collections::BinaryHeap;
#[cfg(feature = "write")]
use alloc::vec;
use alloc::vec::Vec;
use arrayvec::ArrayString;
use log::{debug, info, trace};

pub mod boot_sector;
pub mod cluster;
pub mod constants;
pub mod dir;
pub mod dir_entry;
pub mod fat_entry;
pub mod file;

pub use boot_sector::{BootSector, Header};
pub use cluster::ClusterTable;
pub use dir::Fat16Dir;
pub use dir_entry::DirEntry;
pub use fat_entry::FatEntry;
pub use file::Fat16File;

#[cfg(feature = "write")]
use constants::ATTR_ARCHIVE;
use constants::ATTR_DIRECTORY;

use crate::{BlockDevice, FsError, SeekFrom};

/// Descriptor of an open file, issued and redeemed by [`Fat16`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFd(usize);

/// Descriptor of an open directory, issued and redeemed by [`Fat16`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirFd(usize);

/// FAT16 filesystem engine over one block device.
///
/// The device is owned exclusively for the session and handed back by
/// [`Fat16::close`]. All operations are synchronous direct I/O; nothing
/// is cached between calls.
pub struct Fat16<'a> {
    /// Underlying block device
    device: Box<dyn BlockDevice + 'a>,

    /// Volume geometry derived from the boot sector
    header: Header,

    /// FAT accessor shared with every handle
    table: ClusterTable,

    /// Open file handles, indexed by descriptor
    files: Vec<Option<Fat16File>>,

    /// Pool of reusable file descriptors
    free_file_fds: BinaryHeap<usize>,

    /// Open directory handles, indexed by descriptor
    dirs: Vec<Option<Fat16Dir>>,

    /// Pool of reusable directory descriptors
    free_dir_fds: BinaryHeap<usize>,
}

impl<'a> Fat16<'a> {
    /// Opens the FAT16 volume found at `partition_offset` on `device`
    pub fn open(device: Box<dyn BlockDevice + 'a>, partition_offset: u64) -> Result<Self, FsError> {
        let boot = BootSector::parse(device.as_ref(), partition_offset)?;
        let header = boot.header(partition_offset);
        info!(
            "opened FAT16 volume: {} bytes, cluster size {}, {} FAT copies",
            header.total_size, header.cluster_size, header.fat_copies
        );
        Ok(Fat16 {
            device,
            header,
            table: ClusterTable::new(header),
            files: Vec::new(),
            free_file_fds: BinaryHeap::new(),
            dirs: Vec::new(),
            free_dir_fds: BinaryHeap::new(),
        })
    }

    /// Writes a fresh FAT16 volume described by `layout` onto the device,
    /// then opens it.
    ///
    /// The boot sector, every FAT copy and the root directory region are
    /// initialized; the reserved FAT entries 0 and 1 hold the media
    /// descriptor and the end sentinel.
    #[cfg(feature = "write")]
    pub fn format(
        mut device: Box<dyn BlockDevice + 'a>,
        partition_offset: u64,
        layout: &BootSector,
    ) -> Result<Self, FsError> {
        layout.write(device.as_mut(), partition_offset)?;

        // FAT copies and the root table are contiguous; zero them in one
        // sector-sized sweep.
        let header = layout.header(partition_offset);
        let zeros = vec![0u8; usize::from(header.sector_size)];
        let mut offset = header.fat_offset;
        while offset < header.cluster_zero_offset {
            let take = usize::min(zeros.len(), (header.cluster_zero_offset - offset) as usize);
            device.write(offset, &zeros[..take])?;
            offset += take as u64;
        }

        let table = ClusterTable::new(header);
        // Entry 0 carries the media descriptor in its low byte.
        table.set_entry(device.as_mut(), 0, FatEntry { cluster: 0xFFF8 })?;
        table.set_entry(device.as_mut(), 1, FatEntry::END)?;

        info!("formatted FAT16 volume, {} sectors", layout.total_sectors);
        Self::open(device, partition_offset)
    }

    /// Consumes the filesystem and hands the device back.
    ///
    /// Any descriptors still open are simply dropped; no device I/O is
    /// pending at this point.
    pub fn close(self) -> Box<dyn BlockDevice + 'a> {
        info!("filesystem closed");
        self.device
    }

    /// Parsed volume geometry
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Pseudo-entry describing the fixed root directory.
    ///
    /// The root has no on-disk slot of its own: empty name, directory
    /// attribute, cluster 0, entry offset 0.
    pub fn root_dir_entry(&self) -> DirEntry {
        DirEntry {
            long_name: ArrayString::new(),
            attributes: ATTR_DIRECTORY,
            cluster: 0,
            file_size: 0,
            entry_offset: 0,
        }
    }

    /// Resolves a `/`-separated path to its directory entry.
    ///
    /// Empty components are skipped, so `"a//b"` equals `"a/b"` and a
    /// bare `"/"` resolves to the root pseudo-entry. An empty path is
    /// rejected. Every intermediate component must name a directory.
    pub fn find_entry(&self, path: &str) -> Result<DirEntry, FsError> {
        if path.is_empty() {
            return Err(FsError::InvalidInput);
        }
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        self.descend(&components)
    }

    /// Walks `components` from the root, requiring a directory at every
    /// step but the last
    fn descend(&self, components: &[&str]) -> Result<DirEntry, FsError> {
        let mut entry = self.root_dir_entry();
        for &component in components {
            trace!("resolving component {:?}", component);
            let dir = Fat16Dir::open(entry, self.table)?;
            entry = dir
                .find(self.device.as_ref(), component)?
                .ok_or(FsError::NotFound)?;
        }
        Ok(entry)
    }

    /// Splits a path into its parent directory entry and final component
    #[cfg(feature = "write")]
    fn split_parent<'p>(&self, path: &'p str) -> Result<(DirEntry, &'p str), FsError> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let (&name, parents) = components.split_last().ok_or(FsError::InvalidInput)?;
        let parent = self.descend(parents)?;
        Ok((parent, name))
    }

    /// Opens the file at `path` and returns its descriptor
    pub fn open_file(&mut self, path: &str) -> Result<FileFd, FsError> {
        let entry = self.find_entry(path)?;
        let file = Fat16File::open(entry, self.table)?;
        debug!("opened file {} ({} bytes)", path, file.size());

        let fd = if let Some(reused) = self.free_file_fds.pop() {
            self.files[reused] = Some(file);
            reused
        } else {
            self.files.push(Some(file));
            self.files.len() - 1
        };
        Ok(FileFd(fd))
    }

    /// Releases a file descriptor
    pub fn close_file(&mut self, fd: FileFd) -> Result<(), FsError> {
        let slot = self.files.get_mut(fd.0).ok_or(FsError::InvalidInput)?;
        if slot.take().is_none() {
            return Err(FsError::InvalidInput);
        }
        self.free_file_fds.push(fd.0);
        Ok(())
    }

    /// Reads from the file position into `buf`, returning the byte count.
    ///
    /// A short count means the cluster chain ended early; see
    /// [`Fat16File::read`].
    pub fn read_file(&mut self, fd: FileFd, buf: &mut [u8]) -> Result<usize, FsError> {
        let file = match self.files.get_mut(fd.0) {
            Some(Some(file)) => file,
            _ => return Err(FsError::InvalidInput),
        };
        file.read(self.device.as_ref(), buf)
    }

    /// Writes `buf` at the file position, returning the byte count.
    ///
    /// A short count is authoritative for what reached the device; see
    /// [`Fat16File::write`].
    #[cfg(feature = "write")]
    pub fn write_file(&mut self, fd: FileFd, buf: &[u8]) -> Result<usize, FsError> {
        let file = match self.files.get_mut(fd.0) {
            Some(Some(file)) => file,
            _ => return Err(FsError::InvalidInput),
        };
        file.write(self.device.as_mut(), buf)
    }

    /// Moves the file position, growing the file when the target lies
    /// past the end; returns the new position
    pub fn seek_file(&mut self, fd: FileFd, pos: SeekFrom) -> Result<u32, FsError> {
        let file = match self.files.get_mut(fd.0) {
            Some(Some(file)) => file,
            _ => return Err(FsError::InvalidInput),
        };
        file.seek(self.device.as_mut(), pos)
    }

    /// Truncates or extends the file to `size` bytes
    #[cfg(feature = "write")]
    pub fn resize_file(&mut self, fd: FileFd, size: u32) -> Result<(), FsError> {
        let file = match self.files.get_mut(fd.0) {
            Some(Some(file)) => file,
            _ => return Err(FsError::InvalidInput),
        };
        debug!("resizing file to {} bytes", size);
        file.resize(self.device.as_mut(), size)
    }

    /// Opens the directory at `path` and returns its descriptor
    pub fn open_dir(&mut self, path: &str) -> Result<DirFd, FsError> {
        let entry = self.find_entry(path)?;
        let dir = Fat16Dir::open(entry, self.table)?;
        debug!("opened directory {}", path);

        let fd = if let Some(reused) = self.free_dir_fds.pop() {
            self.dirs[reused] = Some(dir);
            reused
        } else {
            self.dirs.push(Some(dir));
            self.dirs.len() - 1
        };
        Ok(DirFd(fd))
    }

    /// Releases a directory descriptor
    pub fn close_dir(&mut self, fd: DirFd) -> Result<(), FsError> {
        let slot = self.dirs.get_mut(fd.0).ok_or(FsError::InvalidInput)?;
        if slot.take().is_none() {
            return Err(FsError::InvalidInput);
        }
        self.free_dir_fds.push(fd.0);
        Ok(())
    }

    /// Next entry of the directory, or `None` once the listing is done
    pub fn read_dir(&mut self, fd: DirFd) -> Result<Option<DirEntry>, FsError> {
        let dir = match self.dirs.get_mut(fd.0) {
            Some(Some(dir)) => dir,
            _ => return Err(FsError::InvalidInput),
        };
        dir.read(self.device.as_ref())
    }

    /// Rewinds the directory cursor to the first entry
    pub fn reset_dir(&mut self, fd: DirFd) -> Result<(), FsError> {
        let dir = match self.dirs.get_mut(fd.0) {
            Some(Some(dir)) => dir,
            _ => return Err(FsError::InvalidInput),
        };
        dir.reset();
        Ok(())
    }

    /// Creates an empty file at `path`, returning its entry.
    ///
    /// An existing entry with the same name is returned as is.
    #[cfg(feature = "write")]
    pub fn create_file(&mut self, path: &str) -> Result<DirEntry, FsError> {
        let (parent, name) = self.split_parent(path)?;
        let mut dir = Fat16Dir::open(parent, self.table)?;
        let entry = dir.create(self.device.as_mut(), name, ATTR_ARCHIVE)?;
        debug!("created file {}", path);
        Ok(entry)
    }

    /// Deletes the file at `path`: its directory slots are marked deleted
    /// and its cluster chain is freed
    #[cfg(feature = "write")]
    pub fn delete_file(&mut self, path: &str) -> Result<(), FsError> {
        let (parent, name) = self.split_parent(path)?;
        let mut dir = Fat16Dir::open(parent, self.table)?;
        dir.remove(self.device.as_mut(), name)?;
        debug!("deleted file {}", path);
        Ok(())
    }
}

#[cfg(all(test, feature = "write"))]
mod tests {
    use super::*;
    use crate::MemoryBlockDevice;

    /// Geometry of the reference format scenario
    fn scenario_layout() -> BootSector {
        BootSector {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_copies: 2,
            max_root_entries: 16,
            sectors_per_fat: 32,
            total_sectors: 128,
        }
    }

    fn fresh_fs() -> Fat16<'static> {
        let device = MemoryBlockDevice::new(128 * 512);
        Fat16::format(Box::new(device), 0, &scenario_layout()).unwrap()
    }

    /// Creates a subdirectory in the root through the slot allocator and
    /// backs it with a freshly claimed cluster
    fn plant_subdir(fs: &mut Fat16<'_>, name: &str) -> DirEntry {
        let cluster = fs.table.extend(fs.device.as_mut(), 0, 1).unwrap();
        let root = fs.root_dir_entry();
        let mut dir = Fat16Dir::open(root, fs.table).unwrap();
        let mut entry = dir.create(fs.device.as_mut(), name, ATTR_DIRECTORY).unwrap();
        entry.cluster = cluster;
        entry.write_back(fs.device.as_mut()).unwrap();
        entry
    }

    #[test]
    fn test_format_create_write_list_scenario() {
        let mut fs = fresh_fs();
        fs.create_file("/a.txt").unwrap();

        let fd = fs.open_file("/a.txt").unwrap();
        assert_eq!(fs.write_file(fd, &[0x5A; 600]).unwrap(), 600);
        fs.close_file(fd).unwrap();

        // 600 bytes in 512-byte clusters occupy exactly two clusters.
        let entry = fs.find_entry("/a.txt").unwrap();
        assert_eq!(entry.file_size, 600);
        assert_eq!(entry.cluster, 2);
        assert_eq!(fs.table.next(fs.device.as_ref(), 2), Ok(Some(3)));
        assert_eq!(fs.table.next(fs.device.as_ref(), 3), Ok(None));

        let dir = fs.open_dir("/").unwrap();
        let listed = fs.read_dir(dir).unwrap().unwrap();
        assert_eq!(listed.name(), "a.txt");
        assert_eq!(listed.file_size, 600);
        assert_eq!(fs.read_dir(dir).unwrap(), None);
        fs.close_dir(dir).unwrap();

        // Leading slash is optional in paths.
        let fd = fs.open_file("a.txt").unwrap();
        let mut back = [0u8; 600];
        assert_eq!(fs.read_file(fd, &mut back).unwrap(), 600);
        assert!(back.iter().all(|&b| b == 0x5A));
        fs.close_file(fd).unwrap();
    }

    #[test]
    fn test_format_then_reopen() {
        let fs = fresh_fs();
        let device = fs.close();

        let fs = Fat16::open(device, 0).unwrap();
        assert_eq!(fs.header().cluster_size, 512);
        assert_eq!(fs.header().root_dir_offset, 512 + 2 * 32 * 512);
    }

    #[test]
    fn test_open_rejects_unformatted_device() {
        let device = MemoryBlockDevice::new(4096);
        assert!(matches!(
            Fat16::open(Box::new(device), 0),
            Err(FsError::NotFat16)
        ));
    }

    #[test]
    fn test_close_returns_the_device() {
        let fs = fresh_fs();
        let device = fs.close();

        let mut signature = [0u8; 2];
        device.read(510, &mut signature).unwrap();
        assert_eq!(signature, [0x55, 0xAA]);
    }

    #[test]
    fn test_path_resolution_rules() {
        let mut fs = fresh_fs();
        fs.create_file("/a.txt").unwrap();

        assert_eq!(fs.find_entry(""), Err(FsError::InvalidInput));
        assert!(fs.find_entry("/").unwrap().is_directory());
        assert_eq!(fs.find_entry("//a.txt"), fs.find_entry("a.txt"));
        assert_eq!(fs.find_entry("/missing.txt"), Err(FsError::NotFound));
        // A file cannot serve as an intermediate component.
        assert_eq!(fs.find_entry("/a.txt/x"), Err(FsError::NotADirectory));
    }

    #[test]
    fn test_nested_path_operations() {
        let mut fs = fresh_fs();
        plant_subdir(&mut fs, "etc");

        fs.create_file("/etc/conf.txt").unwrap();
        let fd = fs.open_file("/etc/conf.txt").unwrap();
        assert_eq!(fs.write_file(fd, b"key=value").unwrap(), 9);
        fs.close_file(fd).unwrap();

        assert_eq!(fs.find_entry("/etc/conf.txt").unwrap().file_size, 9);

        let dir = fs.open_dir("/etc").unwrap();
        let listed = fs.read_dir(dir).unwrap().unwrap();
        assert_eq!(listed.name(), "conf.txt");
        fs.close_dir(dir).unwrap();

        fs.delete_file("/etc/conf.txt").unwrap();
        assert_eq!(fs.find_entry("/etc/conf.txt"), Err(FsError::NotFound));
    }

    #[test]
    fn test_descriptors_are_recycled_largest_first() {
        let mut fs = fresh_fs();
        for name in ["/a.txt", "/b.txt", "/c.txt"] {
            fs.create_file(name).unwrap();
        }
        let a = fs.open_file("/a.txt").unwrap();
        let b = fs.open_file("/b.txt").unwrap();
        let c = fs.open_file("/c.txt").unwrap();
        assert_eq!((a, b, c), (FileFd(0), FileFd(1), FileFd(2)));

        fs.close_file(a).unwrap();
        fs.close_file(c).unwrap();
        // The pool hands back the highest freed descriptor first.
        assert_eq!(fs.open_file("/a.txt").unwrap(), FileFd(2));
        assert_eq!(fs.open_file("/a.txt").unwrap(), FileFd(0));
        assert_eq!(fs.open_file("/b.txt").unwrap(), FileFd(3));
    }

    #[test]
    fn test_stale_descriptors_are_rejected() {
        let mut fs = fresh_fs();
        fs.create_file("/a.txt").unwrap();
        let fd = fs.open_file("/a.txt").unwrap();
        fs.close_file(fd).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(fs.read_file(fd, &mut buf), Err(FsError::InvalidInput));
        assert_eq!(fs.close_file(fd), Err(FsError::InvalidInput));
        assert_eq!(fs.read_dir(DirFd(9)), Err(FsError::InvalidInput));
        assert_eq!(
            fs.seek_file(FileFd(7), SeekFrom::Start(0)),
            Err(FsError::InvalidInput)
        );
    }

    #[test]
    fn test_entry_kind_is_enforced() {
        let mut fs = fresh_fs();
        fs.create_file("/a.txt").unwrap();

        assert_eq!(fs.open_file("/").err(), Some(FsError::IsADirectory));
        assert_eq!(fs.open_dir("/a.txt").err(), Some(FsError::NotADirectory));
    }

    #[test]
    fn test_root_cannot_be_deleted() {
        let mut fs = fresh_fs();
        assert_eq!(fs.delete_file("/"), Err(FsError::InvalidInput));
    }

    #[test]
    fn test_resize_through_descriptor() {
        let mut fs = fresh_fs();
        fs.create_file("/a.txt").unwrap();
        let fd = fs.open_file("/a.txt").unwrap();
        fs.write_file(fd, &[1u8; 700]).unwrap();

        fs.resize_file(fd, 100).unwrap();
        fs.close_file(fd).unwrap();

        assert_eq!(fs.find_entry("/a.txt").unwrap().file_size, 100);
        assert_eq!(fs.table.next(fs.device.as_ref(), 2), Ok(None));
        assert!(fs.table.entry(fs.device.as_ref(), 3).unwrap().is_free());
    }
}
