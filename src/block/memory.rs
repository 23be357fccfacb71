//! In-memory block device implementation

use crate::{BlockDevice, FsError};
use alloc::vec;
use alloc::vec::Vec;
use core::result::Result;

/// Block device that stores data in memory.
///
/// Backs every test image and doubles as a scratch target for building or
/// inspecting FAT16 volume images on a host.
pub struct MemoryBlockDevice {
    /// Raw device contents
    data: Vec<u8>,
}

impl MemoryBlockDevice {
    /// Creates a zero-filled memory device of `len` bytes
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0; len],
        }
    }

    /// Wraps an existing image without copying it
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns total device size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-byte device
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the raw image contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the device and returns the raw image
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Validates that `[offset, offset + len)` lies inside the device
    fn validate_range(&self, offset: u64, len: usize) -> Result<usize, FsError> {
        let start = usize::try_from(offset).map_err(|_| FsError::Io)?;
        let end = start.checked_add(len).ok_or(FsError::Io)?;
        if end > self.data.len() {
            return Err(FsError::Io);
        }
        Ok(start)
    }
}

impl BlockDevice for MemoryBlockDevice {
    /// Reads a byte range into the buffer
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), FsError> {
        let start = self.validate_range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    /// Writes a byte range from the buffer
    #[cfg(feature = "write")]
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), FsError> {
        let start = self.validate_range(offset, data.len())?;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}
