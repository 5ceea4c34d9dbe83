//! Thin wrappers around Linux-specific syscalls the resolver and engine need
//! raw access to (`getdents64`, `statfs`'s filesystem magic, FIEMAP).

pub mod dirent;

/// Filesystem-type magic number for FUSE mounts, as reported by `statfs(2)`.
/// Encrypting overlays in scope for this system are FUSE-backed.
pub const FUSE_SUPER_MAGIC: i64 = 0x65735546;

/// Returns the `statfs` filesystem-type magic number for `path`, or `None`
/// if the path cannot be statfs'd (treated as "not an overlay" by callers).
pub fn statfs_magic(path: &std::path::Path) -> Option<i64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut sfs: libc::statfs = unsafe { std::mem::zeroed() };
    let res = unsafe { libc::statfs(c_path.as_ptr(), &mut sfs) };
    if res != 0 {
        return None;
    }
    Some(sfs.f_type as i64)
}

/// `true` if `path` lives on a FUSE-family filesystem.
pub fn is_fuse_mount(path: &std::path::Path) -> bool {
    statfs_magic(path) == Some(FUSE_SUPER_MAGIC)
}
