//! Extent segments: the unit the engine sorts and reads.

use std::path::PathBuf;

/// A contiguous run of physical storage backing part of a file, as reported
/// by the kernel's extent map. Grounded on `segments.h`'s `struct segment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Backing file path this segment belongs to.
    pub file_name: PathBuf,
    /// Physical byte offset on the block device.
    pub physical_pos: u64,
    /// Logical byte offset within the file.
    pub file_offset: u64,
    /// Length in bytes.
    pub length: u64,
}

impl Segment {
    pub fn new(file_name: PathBuf, physical_pos: u64, file_offset: u64, length: u64) -> Self {
        Segment {
            file_name,
            physical_pos,
            file_offset,
            length,
        }
    }
}

/// Stable sort by ascending physical offset. Stability matters: segments
/// with equal physical offsets keep their enumeration order rather than
/// being reordered arbitrarily.
pub fn sort_segments(segments: &mut [Segment]) {
    segments.sort_by_key(|s| s.physical_pos);
}
