//! Directory entries and the 32-byte slot codec
//!
//! A logical entry on disk is one trailing 8.3 slot, optionally preceded by
//! long-filename continuation slots. Decoding runs in two phases against the
//! device: a seek phase that locates a logical entry by index inside a
//! directory region, and a read phase that merges the located slots into a
//! [`DirEntry`]. Both stream 32-byte slots through
//! [`BlockDevice::read_interval`] so a directory region is never held in
//! memory at once.

use super::constants::{
    ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_HIDDEN, ATTR_LFN, ATTR_READ_ONLY, ATTR_SYSTEM, ATTR_VOLUME,
    DIR_ENTRY_SIZE, LFN_SEQ_MASK, LFN_SLOT_CHARS, MAX_LONG_NAME, SHORT_NAME_BASE, SHORT_NAME_EXT,
    SLOT_DELETED, SLOT_FREE,
};
#[cfg(feature = "write")]
use super::constants::LFN_SEQ_LAST;
use crate::{BlockDevice, FsError, Visit};
use arrayvec::ArrayString;

/// Byte positions of the 13 UTF-16 characters inside an LFN slot
const LFN_CHAR_OFFSETS: [usize; LFN_SLOT_CHARS] = [
    0x01, 0x03, 0x05, 0x07, 0x09, 0x0E, 0x10, 0x12, 0x14, 0x16, 0x18, 0x1C, 0x1E,
];

/// UTF-16 units the decoder keeps; whole LFN slots beyond this are dropped
const KEPT_UNITS: usize = MAX_LONG_NAME.div_ceil(LFN_SLOT_CHARS) * LFN_SLOT_CHARS;

/// A decoded directory entry.
///
/// Carries its own device offset so size and cluster updates can be written
/// back in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Long name, or the trimmed 8.3 name when no LFN slots exist.
    /// Names longer than the bound are truncated.
    pub long_name: ArrayString<MAX_LONG_NAME>,

    /// Attribute bitmask
    pub attributes: u8,

    /// First cluster of the entry's chain; 0 for a file with no data yet
    pub cluster: u16,

    /// File size in bytes
    pub file_size: u32,

    /// Device offset of the entry's first slot; 0 only for the synthesized
    /// root entry, which has no on-disk slot
    pub entry_offset: u64,
}

impl DirEntry {
    /// Entry name as a string slice
    pub fn name(&self) -> &str {
        &self.long_name
    }

    /// Returns true if the entry names a directory
    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    /// Returns true for the volume label pseudo-entry
    pub fn is_volume_label(&self) -> bool {
        self.attributes & ATTR_VOLUME != 0
    }

    /// Returns true if the read-only attribute is set
    pub fn is_read_only(&self) -> bool {
        self.attributes & ATTR_READ_ONLY != 0
    }

    /// Returns true if the hidden attribute is set
    pub fn is_hidden(&self) -> bool {
        self.attributes & ATTR_HIDDEN != 0
    }

    /// Returns true if the system attribute is set
    pub fn is_system(&self) -> bool {
        self.attributes & ATTR_SYSTEM != 0
    }

    /// Returns true if the archive attribute is set
    pub fn is_archive(&self) -> bool {
        self.attributes & ATTR_ARCHIVE != 0
    }
}

/// Clips a caller-supplied name to the engine's bound at a char boundary
#[cfg(feature = "write")]
pub(crate) fn clip_name(name: &str) -> ArrayString<MAX_LONG_NAME> {
    let mut clipped = ArrayString::new();
    for ch in name.chars() {
        if clipped.try_push(ch).is_err() {
            break;
        }
    }
    clipped
}

/// Strips the space padding off an 8.3 name component
fn trim_spaces(bytes: &[u8]) -> &[u8] {
    let mut len = bytes.len();
    while len > 0 && bytes[len - 1] == b' ' {
        len -= 1;
    }
    &bytes[..len]
}

/// Builds the visible name of a bare 8.3 slot (no LFN slots present)
fn name_from_short(slot: &[u8]) -> ArrayString<MAX_LONG_NAME> {
    let mut name = ArrayString::new();
    for &byte in trim_spaces(&slot[..SHORT_NAME_BASE]) {
        let _ = name.try_push(char::from(byte));
    }
    let ext = trim_spaces(&slot[SHORT_NAME_BASE..SHORT_NAME_BASE + SHORT_NAME_EXT]);
    if !ext.is_empty() {
        let _ = name.try_push('.');
        for &byte in ext {
            let _ = name.try_push(char::from(byte));
        }
    }
    name
}

/// Rotate-and-add checksum over the 11 bytes of a finished 8.3 name,
/// stored in every LFN slot to tie it to its 8.3 slot
#[cfg(feature = "write")]
fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &byte| sum.rotate_right(1).wrapping_add(byte))
}

/// Result of seeking a logical entry inside one directory region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeekOutcome {
    /// Device offset of the entry's first slot and the total byte span of
    /// its slots (LFN slots plus the trailing 8.3 slot)
    Found { offset: u64, span: u32 },
    /// Region exhausted after completing this many logical entries
    End(u32),
}

/// Locates logical entry `index` inside a directory region.
///
/// Free and deleted slots are skipped without counting; every other slot
/// run is counted at its 8.3 boundary. The count carried by
/// [`SeekOutcome::End`] lets a caller continue the same index across a
/// chain of regions.
pub(crate) fn seek_entry(
    device: &dyn BlockDevice,
    region_offset: u64,
    region_len: u32,
    index: u32,
) -> Result<SeekOutcome, FsError> {
    let mut seen = 0u32;
    let mut found: Option<SeekOutcome> = None;
    device.read_interval(
        region_offset,
        DIR_ENTRY_SIZE,
        region_len,
        &mut |slot, offset| {
            let lead = slot[0];
            if lead == SLOT_FREE || lead == SLOT_DELETED {
                return Visit::Continue;
            }
            let lfn = slot[0x0B] == ATTR_LFN;
            if seen == index {
                let span = if lfn {
                    (u32::from(lead & LFN_SEQ_MASK) + 1) * DIR_ENTRY_SIZE as u32
                } else {
                    DIR_ENTRY_SIZE as u32
                };
                found = Some(SeekOutcome::Found { offset, span });
                return Visit::Stop;
            }
            if !lfn {
                seen += 1;
            }
            Visit::Continue
        },
    )?;
    Ok(found.unwrap_or(SeekOutcome::End(seen)))
}

/// Decodes the logical entry whose slots span `[offset, offset + span)`.
///
/// LFN slots contribute UTF-16 characters at their ordinal's position;
/// the trailing 8.3 slot supplies attributes, cluster, size and, when no
/// LFN slots exist, the name itself. `None` means the slots did not decode
/// to a named entry.
pub(crate) fn decode_entry(
    device: &dyn BlockDevice,
    offset: u64,
    span: u32,
) -> Result<Option<DirEntry>, FsError> {
    let mut units = [0u16; KEPT_UNITS];
    let mut has_lfn = false;
    let mut fallback = ArrayString::<MAX_LONG_NAME>::new();
    let mut fields: Option<(u8, u16, u32)> = None;

    device.read_interval(offset, DIR_ENTRY_SIZE, span, &mut |slot, _| {
        let lead = slot[0];
        if lead == SLOT_FREE || lead == SLOT_DELETED {
            return Visit::Stop;
        }
        if slot[0x0B] == ATTR_LFN {
            let ordinal = usize::from(lead & LFN_SEQ_MASK);
            if ordinal >= 1 {
                let char_base = (ordinal - 1) * LFN_SLOT_CHARS;
                for (i, &pos) in LFN_CHAR_OFFSETS.iter().enumerate() {
                    if char_base + i >= KEPT_UNITS {
                        break;
                    }
                    units[char_base + i] = u16::from_le_bytes([slot[pos], slot[pos + 1]]);
                }
            }
            has_lfn = true;
            Visit::Continue
        } else {
            if !has_lfn {
                fallback = name_from_short(slot);
            }
            fields = Some((
                slot[0x0B],
                u16::from_le_bytes([slot[0x1A], slot[0x1B]]),
                u32::from_le_bytes([slot[0x1C], slot[0x1D], slot[0x1E], slot[0x1F]]),
            ));
            Visit::Stop
        }
    })?;

    let (attributes, cluster, file_size) = match fields {
        Some(fields) => fields,
        None => return Ok(None),
    };

    let long_name = if has_lfn {
        let mut name = ArrayString::new();
        let text = units
            .iter()
            .copied()
            .take_while(|&unit| unit != 0x0000 && unit != 0xFFFF);
        for ch in char::decode_utf16(text) {
            let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
            if name.try_push(ch).is_err() {
                break;
            }
        }
        name
    } else {
        fallback
    };

    if long_name.is_empty() {
        return Ok(None);
    }

    Ok(Some(DirEntry {
        long_name,
        attributes,
        cluster,
        file_size,
        entry_offset: offset,
    }))
}

#[cfg(feature = "write")]
impl DirEntry {
    /// Projects the long name onto the 11-byte 8.3 field.
    ///
    /// The characters before the last `.` become the base, the rest the
    /// extension (clipped to 3). A base longer than 8 keeps its first 6
    /// characters plus the entry's cluster low byte in hex. That keeps
    /// regenerated short names stable per cluster but two entries sharing
    /// the low byte can still collide; existing volumes already carry
    /// names built this way, so the scheme stays. Characters are
    /// projected verbatim, without uppercasing.
    fn short_name(&self) -> [u8; 11] {
        const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

        let mut short = [b' '; 11];
        let name = self.long_name.as_bytes();
        let (base, ext) = match name.iter().rposition(|&byte| byte == b'.') {
            Some(dot) => (&name[..dot], &name[dot + 1..]),
            None => (name, &name[name.len()..]),
        };

        if base.len() <= SHORT_NAME_BASE {
            short[..base.len()].copy_from_slice(base);
        } else {
            let low = (self.cluster & 0xFF) as u8;
            short[..6].copy_from_slice(&base[..6]);
            short[6] = HEX_DIGITS[usize::from(low >> 4)];
            short[7] = HEX_DIGITS[usize::from(low & 0x0F)];
        }
        let ext_len = usize::min(ext.len(), SHORT_NAME_EXT);
        short[SHORT_NAME_BASE..SHORT_NAME_BASE + ext_len].copy_from_slice(&ext[..ext_len]);
        short
    }

    /// Writes the entry at its recorded offset: the 8.3 slot first, then
    /// the LFN slots before it in descending ordinal order, each tagged
    /// with the checksum of the finished 8.3 name. The terminal-ordinal
    /// flag goes on the first slot written.
    pub(crate) fn write_back(&self, device: &mut dyn BlockDevice) -> Result<(), FsError> {
        if self.entry_offset == 0 {
            return Err(FsError::InvalidInput);
        }

        let short = self.short_name();
        let checksum = lfn_checksum(&short);

        let mut units = [0xFFFFu16; KEPT_UNITS];
        let mut name_units = 0;
        for (i, unit) in self.long_name.encode_utf16().enumerate() {
            units[i] = unit;
            name_units = i + 1;
        }
        if name_units < KEPT_UNITS {
            // NUL terminator, only when the name does not fill its slots.
            units[name_units] = 0x0000;
        }
        let lfn_count = name_units.div_ceil(LFN_SLOT_CHARS);

        let mut slot = [0u8; DIR_ENTRY_SIZE];
        slot[..11].copy_from_slice(&short);
        slot[0x0B] = self.attributes;
        slot[0x1A..0x1C].copy_from_slice(&self.cluster.to_le_bytes());
        slot[0x1C..0x20].copy_from_slice(&self.file_size.to_le_bytes());
        device.write(
            self.entry_offset + (lfn_count * DIR_ENTRY_SIZE) as u64,
            &slot,
        )?;

        let mut offset = self.entry_offset;
        for ordinal in (1..=lfn_count).rev() {
            let mut slot = [0xFFu8; DIR_ENTRY_SIZE];
            slot[0x00] = ordinal as u8;
            if ordinal == lfn_count {
                slot[0x00] |= LFN_SEQ_LAST;
            }
            slot[0x0B] = ATTR_LFN;
            slot[0x0C] = 0;
            slot[0x0D] = checksum;
            slot[0x1A] = 0;
            slot[0x1B] = 0;

            let char_base = (ordinal - 1) * LFN_SLOT_CHARS;
            for (i, &pos) in LFN_CHAR_OFFSETS.iter().enumerate() {
                slot[pos..pos + 2].copy_from_slice(&units[char_base + i].to_le_bytes());
            }
            device.write(offset, &slot)?;
            offset += DIR_ENTRY_SIZE as u64;
        }
        Ok(())
    }
}
