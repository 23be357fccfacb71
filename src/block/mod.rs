//! Block device implementations
//!
//! The device trait itself lives at the crate root; this module holds the
//! implementations shipped with the crate. Hardware-backed devices (SD card
//! over SPI and the like) are expected to live in the host project and
//! implement [`crate::BlockDevice`] there.

pub mod memory;
