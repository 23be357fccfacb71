//! FAT16 filesystem engine over byte-addressed block devices.
//!
//! The crate parses the boot sector of a FAT16 volume, walks and extends
//! cluster chains through the file allocation table, and encodes/decodes
//! directory entries (including long-filename slots) to expose file and
//! directory handles with read/write/seek/resize/create/delete operations.
//! Every operation performs direct device I/O; there is no caching layer and
//! no background activity. Storage is reached exclusively through the
//! [`BlockDevice`] trait, so the engine runs against an SD card driver, a
//! disk image in memory, or anything else that can serve byte ranges.
//!
//! With the `write` cargo feature disabled (it is on by default) the crate
//! compiles as a read-only reader: the device trait loses its write operation
//! and all mutating methods are absent.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]

extern crate alloc;

use alloc::vec;
use core::fmt;

pub mod block;
pub mod fat16;

pub use block::memory::MemoryBlockDevice;
pub use fat16::boot_sector::{BootSector, Header};
pub use fat16::dir_entry::DirEntry;
pub use fat16::{DirFd, Fat16, FileFd};

/// Error type shared by all filesystem operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The underlying device reported a read or write failure.
    Io,
    /// An argument was rejected before any device I/O (bad descriptor,
    /// empty name, out-of-range input).
    InvalidInput,
    /// A seek target is not representable (negative or overflowing offset).
    InvalidOffset,
    /// Boot-sector validation failed; the device holds no FAT16 volume
    /// at the given offset.
    NotFat16,
    /// The on-disk structure contradicts itself: a cluster chain ends
    /// before the recorded file size, a directory slot cannot be decoded,
    /// or a bad/reserved sentinel shows up mid-chain.
    Corrupted,
    /// Path resolution found no entry with the requested name.
    NotFound,
    /// A directory operation was applied to a non-directory entry.
    NotADirectory,
    /// A file operation was applied to a directory entry.
    IsADirectory,
    /// No free clusters or directory slots are left.
    NoSpace,
    /// The operation requires write support, which is compiled out.
    Unsupported,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::Io => write!(f, "device I/O failure"),
            FsError::InvalidInput => write!(f, "invalid argument"),
            FsError::InvalidOffset => write!(f, "seek offset out of range"),
            FsError::NotFat16 => write!(f, "not a FAT16 filesystem"),
            FsError::Corrupted => write!(f, "inconsistent filesystem structure"),
            FsError::NotFound => write!(f, "no such file or directory"),
            FsError::NotADirectory => write!(f, "not a directory"),
            FsError::IsADirectory => write!(f, "is a directory"),
            FsError::NoSpace => write!(f, "no space left on volume"),
            FsError::Unsupported => write!(f, "write support not compiled in"),
        }
    }
}

/// Seek positions for file operations.
///
/// Positions are 32-bit because FAT16 file sizes are; relative offsets may
/// be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    End(i32),
}

/// Flow control returned by a [`BlockDevice::read_interval`] visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep streaming chunks.
    Continue,
    /// Stop the interval read early; `read_interval` still returns `Ok`.
    Stop,
}

/// A byte-addressed storage device.
///
/// Offsets are absolute device offsets; the engine adds the partition start
/// itself. Implementations must complete each call synchronously and report
/// failure through [`FsError::Io`] (or any other variant they see fit);
/// the engine never retries.
pub trait BlockDevice: Send + Sync {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), FsError>;

    /// Write all of `data` starting at `offset`.
    #[cfg(feature = "write")]
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FsError>;

    /// Stream `length` bytes starting at `offset` through `visitor` in
    /// windows of at most `chunk_size` bytes.
    ///
    /// The visitor receives each chunk together with its absolute device
    /// offset and may end the stream early by returning [`Visit::Stop`].
    /// The directory codec uses this to scan arbitrarily long directory
    /// regions without materializing them in memory. The default
    /// implementation reissues [`BlockDevice::read`] per window; devices
    /// with a native streaming mode can override it.
    fn read_interval(
        &self,
        offset: u64,
        chunk_size: usize,
        length: u32,
        visitor: &mut dyn FnMut(&[u8], u64) -> Visit,
    ) -> Result<(), FsError> {
        if chunk_size == 0 {
            return Err(FsError::InvalidInput);
        }
        let mut chunk = vec![0u8; chunk_size];
        let mut pos = offset;
        let end = offset + u64::from(length);
        while pos < end {
            let take = usize::min(chunk_size, (end - pos) as usize);
            self.read(pos, &mut chunk[..take])?;
            match visitor(&chunk[..take], pos) {
                Visit::Continue => {}
                Visit::Stop => break,
            }
            pos += take as u64;
        }
        Ok(())
    }
}
