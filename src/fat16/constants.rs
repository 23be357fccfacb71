//! FAT16 on-disk constants

/// Size of a directory slot in bytes
pub const DIR_ENTRY_SIZE: usize = 32;

/// Size of a FAT entry in bytes (16-bit)
pub const FAT_ENTRY_SIZE: usize = 2;

/// Maximum bytes of a long filename kept by the engine
pub const MAX_LONG_NAME: usize = 31;

/// Characters carried per LFN slot
pub const LFN_SLOT_CHARS: usize = 13;

/// Length of the 8.3 base name
pub const SHORT_NAME_BASE: usize = 8;

/// Length of the 8.3 extension
pub const SHORT_NAME_EXT: usize = 3;

/// Free cluster sentinel
pub const CLUSTER_FREE: u16 = 0x0000;

/// First sentinel of the reserved range
pub const CLUSTER_RESERVED_MIN: u16 = 0xFFF0;

/// Last sentinel of the reserved range
pub const CLUSTER_RESERVED_MAX: u16 = 0xFFF6;

/// Bad-cluster sentinel
pub const CLUSTER_BAD: u16 = 0xFFF7;

/// First end-of-chain sentinel
pub const CLUSTER_LAST_MIN: u16 = 0xFFF8;

/// Last end-of-chain sentinel; the value written when terminating a chain
pub const CLUSTER_LAST_MAX: u16 = 0xFFFF;

/// Marker for deleted directory slots
pub const SLOT_DELETED: u8 = 0xE5;

/// Marker for never-written directory slots
pub const SLOT_FREE: u8 = 0x00;

/// Attribute byte value marking an LFN continuation slot
pub const ATTR_LFN: u8 = 0x0F;

/// Mask extracting the ordinal from an LFN slot's leading byte
pub const LFN_SEQ_MASK: u8 = 0x3F;

/// Ordinal flag on the terminal (first-written, logically last) LFN slot
pub const LFN_SEQ_LAST: u8 = 0x40;

/// File attribute: read-only
pub const ATTR_READ_ONLY: u8 = 0x01;

/// File attribute: hidden
pub const ATTR_HIDDEN: u8 = 0x02;

/// File attribute: system
pub const ATTR_SYSTEM: u8 = 0x04;

/// File attribute: volume label
pub const ATTR_VOLUME: u8 = 0x08;

/// File attribute: directory
pub const ATTR_DIRECTORY: u8 = 0x10;

/// File attribute: archive
pub const ATTR_ARCHIVE: u8 = 0x20;
