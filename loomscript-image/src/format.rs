//! Magic numbers and version constants of the image format.

/// `LOOM`, little-endian.
pub const IMAGE_MAGIC: u32 = 0x4D4F4F4C;

/// Bumped whenever the layout of any section changes.
pub const IMAGE_FORMAT_VERSION: u16 = 2;

/// `LMDB`, little-endian. Leads standalone debug streams.
pub const DEBUG_MAGIC: u32 = 0x42444D4C;

/// Version of the debug section layout.
pub const DEBUG_FORMAT_VERSION: u16 = 1;
