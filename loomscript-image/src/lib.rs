//! The LoomScript binary module image format.
//!
//! An image is a single relocatable blob: a fixed-layout [`sections::Summary`]
//! up front, followed by the name, symbol, method, and resource tables, the
//! method code segment, and optional documentation and debug sections. The
//! summary records the offset and length of everything behind it, so readers
//! can seek straight to the section they care about.

pub mod binary;
pub mod format;
pub mod sections;
pub mod welder;
