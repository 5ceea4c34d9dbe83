//! `FS_IOC_FIEMAP` binding.
//!
//! No crate in this stack wraps the extent-map ioctl (the `fiemap`/`btrfs2`
//! crates used by `the8472-platter-walk` aren't part of this dependency set),
//! so this is hand-rolled the way `segments.c`'s `enumerate_file_segments`
//! drives it directly: allocate a header sized for ~1000 extents, loop the
//! ioctl advancing `fm_start` past the last extent until the last-extent flag
//! is seen or the file's logical size is covered.

use crate::error::Error;
use std::io;
use std::os::unix::io::RawFd;

/// `_IOWR('f', 11, struct fiemap)` — Linux's `FS_IOC_FIEMAP`. The encoded
/// size covers only the fixed 32-byte `fiemap` header; the kernel reads the
/// actual extent-array capacity out of `fm_extent_count` at runtime, which is
/// why this constant stays valid regardless of how many extents we request.
const FS_IOC_FIEMAP: libc::c_ulong = 0xC020_660B;

const FIEMAP_EXTENT_LAST: u32 = 0x0001;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct FiemapHeader {
    fm_start: u64,
    fm_length: u64,
    fm_flags: u32,
    fm_mapped_extents: u32,
    fm_extent_count: u32,
    fm_reserved: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct FiemapExtent {
    fe_logical: u64,
    fe_physical: u64,
    fe_length: u64,
    fe_reserved64: [u64; 2],
    fe_flags: u32,
    fe_reserved: [u32; 3],
}

/// One extent as reported by the kernel.
#[derive(Debug, Clone, Copy)]
pub struct Extent {
    pub logical: u64,
    pub physical: u64,
    pub length: u64,
    pub last: bool,
}

/// Query every extent covering `[0, file_size)` of an already-open,
/// read-only file descriptor. Returns whatever was mapped even if the loop
/// terminates early due to a non-fatal ioctl failure: files with no
/// extent-map support end the enumeration silently with whatever partial
/// list was produced.
pub fn query_extents(fd: RawFd, file_size: u64, extent_buffer_elements: u32) -> Vec<Extent> {
    let mut result = Vec::new();
    let mut pos: u64 = 0;
    let mut last_extent_seen = false;

    let header_size = std::mem::size_of::<FiemapHeader>();
    let extent_size = std::mem::size_of::<FiemapExtent>();
    let buf_len = header_size + extent_size * extent_buffer_elements as usize;
    let mut buf = vec![0u8; buf_len];

    while pos < file_size && !last_extent_seen {
        let header = buf.as_mut_ptr() as *mut FiemapHeader;
        unsafe {
            (*header) = FiemapHeader {
                fm_start: pos,
                fm_length: u64::MAX,
                fm_flags: 0,
                fm_mapped_extents: 0,
                fm_extent_count: extent_buffer_elements,
                fm_reserved: 0,
            };
        }

        let ret = unsafe { libc::ioctl(fd, FS_IOC_FIEMAP, header) };
        if ret != 0 {
            let err = Error::Fiemap(last_os_error().to_string());
            tracing::warn!(%err, "FIEMAP query stopped early, returning partial extent list");
            break;
        }

        let mapped = unsafe { (*header).fm_mapped_extents };
        if mapped == 0 {
            break;
        }

        for idx in 0..mapped as usize {
            let extent_ptr = unsafe {
                buf.as_ptr().add(header_size + idx * extent_size) as *const FiemapExtent
            };
            let ext = unsafe { *extent_ptr };

            pos = ext.fe_logical + ext.fe_length;
            let last = ext.fe_flags & FIEMAP_EXTENT_LAST != 0;
            if last {
                last_extent_seen = true;
            }

            result.push(Extent {
                logical: ext.fe_logical,
                physical: ext.fe_physical,
                length: ext.fe_length,
                last,
            });
        }
    }

    result
}

/// Surface the underlying I/O error for the rare case a caller wants it
/// (most callers treat a failed/empty query as "no extent-map support" and
/// move on).
pub fn last_os_error() -> io::Error {
    io::Error::last_os_error()
}
