//! Raw `getdents64(2)` directory scanning.
//!
//! The overlay resolver and `precache-dir` both need `d_ino` without
//! following symlinks and without the overhead of a full `stat` per entry,
//! exactly the shape `encfs_mapper.c` and `precache_dir.c` scan directories
//! with. `std::fs::read_dir` doesn't expose raw inode numbers cheaply enough
//! for the inode-trace walk, so this wraps the syscall directly, the way the
//! C original does via `syscall(SYS_getdents64, ...)`.

use std::ffi::{CStr, OsStr, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;

/// One directory entry as reported by the kernel, before any filtering.
#[derive(Debug, Clone)]
pub struct RawDirent {
    pub ino: u64,
    pub d_type: u8,
    pub name: OsString,
}

impl RawDirent {
    pub fn is_dot_or_dotdot(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    pub fn is_dir(&self) -> bool {
        self.d_type == libc::DT_DIR
    }
}

#[repr(C)]
struct LinuxDirent64Header {
    d_ino: u64,
    d_off: i64,
    d_reclen: u16,
    d_type: u8,
}

/// Scan an already-open directory fd and return every entry, including
/// `.`/`..`. Mirrors the `getdents64` loop shared by `encfs_mapper.c`'s
/// `find_inode_in_dir`/`do_refresh_mounts` and `precache_dir.c`'s
/// `derive_new_tasks`.
pub fn getdents64(fd: RawFd) -> io::Result<Vec<RawDirent>> {
    let mut buf = vec![0u8; 32 * 1024];
    let mut entries = Vec::new();

    loop {
        let nread = unsafe {
            libc::syscall(
                libc::SYS_getdents64,
                fd,
                buf.as_mut_ptr(),
                buf.len(),
            )
        };

        if nread < 0 {
            return Err(io::Error::last_os_error());
        }
        if nread == 0 {
            break;
        }

        let mut pos: usize = 0;
        let nread = nread as usize;
        while pos < nread {
            // Safety: the kernel guarantees each record fits within `nread`
            // bytes starting at `pos`, and `d_reclen` is the authoritative
            // stride to the next record.
            let header = unsafe {
                &*(buf.as_ptr().add(pos) as *const LinuxDirent64Header)
            };
            let name_ptr = unsafe {
                buf.as_ptr().add(pos + std::mem::size_of::<LinuxDirent64Header>())
            };
            let name = unsafe { CStr::from_ptr(name_ptr as *const libc::c_char) };
            let name = OsStr::from_bytes(name.to_bytes()).to_owned();

            entries.push(RawDirent {
                ino: header.d_ino,
                d_type: header.d_type,
                name,
            });

            pos += header.d_reclen as usize;
        }
    }

    Ok(entries)
}

/// Open `path` as a directory and scan it in one call.
pub fn scan_dir(path: &std::path::Path) -> io::Result<Vec<RawDirent>> {
    use std::os::unix::io::AsRawFd;

    let dir = std::fs::File::open(path)?;
    getdents64(dir.as_raw_fd())
}
