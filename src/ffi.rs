//! C ABI entry points for loading this crate as an `LD_PRELOAD` shim.
//!
//! Ground truth: `intercepted_functions.c` (real-function resolution via
//! `dlsym(RTLD_NEXT, ...)`, once per process) and `libprecache.c`'s exported
//! `open`/`openat`/`opendir`/`readdir`/`closedir`/`rewinddir` wrappers. Only
//! built for the `cdylib` target; the `rlib` consumers (the two standalone
//! binaries, tests) never link this module's symbols.
//!
//! `open`/`openat` are declared with a fixed `mode` parameter rather than as
//! Rust C-variadic functions (still unstable to *define*, only to declare).
//! On every ABI this crate targets, the vararg slot already has register or
//! stack space reserved by the caller regardless of whether `O_CREAT` was
//! set, so reading it unconditionally is sound; it's simply ignored when not
//! applicable.

use crate::config::Config;
use crate::interposer::{Interposer, ReaddirOutcome};
use crate::resolver::OverlayResolver;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::sync::OnceLock;

type OpenatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, c_int) -> c_int;
type OpendirFn = unsafe extern "C" fn(*const c_char) -> *mut c_void;
type ReaddirFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
type ClosedirFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type RewinddirFn = unsafe extern "C" fn(*mut c_void);

struct RealFns {
    openat: OpenatFn,
    opendir: OpendirFn,
    readdir: ReaddirFn,
    readdir64: ReaddirFn,
    closedir: ClosedirFn,
    rewinddir: RewinddirFn,
}

// Raw function pointers resolved from the next library in the load order;
// no interior mutability, safe to share across threads once initialized.
unsafe impl Send for RealFns {}
unsafe impl Sync for RealFns {}

static REAL: OnceLock<RealFns> = OnceLock::new();
static STATE: OnceLock<Interposer> = OnceLock::new();

fn real() -> &'static RealFns {
    REAL.get_or_init(|| unsafe {
        RealFns {
            openat: dlsym_as("openat"),
            opendir: dlsym_as("opendir"),
            readdir: dlsym_as("readdir"),
            readdir64: dlsym_as("readdir64"),
            closedir: dlsym_as("closedir"),
            rewinddir: dlsym_as("rewinddir"),
        }
    })
}

fn state() -> &'static Interposer {
    STATE.get_or_init(|| {
        let config = Config::from_env();
        let resolver = OverlayResolver::new(&config.overlay_daemon_name, config.mount_refresh_interval);
        unsafe { libc::atexit(cleanup_on_exit) };
        Interposer::new(resolver, config)
    })
}

/// Mirrors `libprecache.c`'s `__attribute__((destructor))` teardown: drop
/// the resolver's tables at process exit. Registered once, the first time
/// `state()` initializes.
extern "C" fn cleanup_on_exit() {
    if let Some(interposer) = STATE.get() {
        interposer.resolver().cleanup();
    }
}

unsafe fn dlsym_as<T: Copy>(name: &str) -> T {
    let cname = std::ffi::CString::new(name).unwrap();
    let ptr = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr());
    assert!(!ptr.is_null(), "dlsym could not resolve real {name}");
    std::mem::transmute_copy(&ptr)
}

unsafe fn cstr_to_path(ptr: *const c_char) -> std::path::PathBuf {
    std::path::PathBuf::from(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// # Safety
/// Must only be called by the dynamic loader as a replacement for `open(2)`.
/// Forwards to the real `openat`, as the original shim does, since
/// `open(path, ...)` and `openat(AT_FDCWD, path, ...)` are equivalent.
#[no_mangle]
pub unsafe extern "C" fn open(fname: *const c_char, oflag: c_int, mode: c_int) -> c_int {
    do_openat(libc::AT_FDCWD, fname, oflag, mode)
}

/// # Safety
/// Must only be called by the dynamic loader as a replacement for `openat(2)`.
#[no_mangle]
pub unsafe extern "C" fn openat(atfd: c_int, fname: *const c_char, oflag: c_int, mode: c_int) -> c_int {
    do_openat(atfd, fname, oflag, mode)
}

unsafe fn do_openat(atfd: c_int, fname: *const c_char, oflag: c_int, mode: c_int) -> c_int {
    let fd = (real().openat)(atfd, fname, oflag, mode);
    handle_openat(atfd, fname);
    fd
}

unsafe fn handle_openat(atfd: c_int, fname: *const c_char) {
    if fname.is_null() {
        return;
    }
    let path = CStr::from_ptr(fname).to_string_lossy();
    state().on_open(&path, atfd == libc::AT_FDCWD);
}

/// # Safety
/// Must only be called by the dynamic loader as a replacement for `opendir(3)`.
#[no_mangle]
pub unsafe extern "C" fn opendir(name: *const c_char) -> *mut c_void {
    let dirp = (real().opendir)(name);
    if !dirp.is_null() && !name.is_null() {
        state().on_opendir(dirp as usize, cstr_to_path(name));
    }
    dirp
}

/// # Safety
/// Must only be called by the dynamic loader as a replacement for `readdir(3)`.
#[no_mangle]
pub unsafe extern "C" fn readdir(dirp: *mut c_void) -> *mut c_void {
    match state().on_readdir(dirp as usize) {
        ReaddirOutcome::Entry(_) => (real().readdir)(dirp),
        ReaddirOutcome::Exhausted => std::ptr::null_mut(),
        ReaddirOutcome::Untracked => (real().readdir)(dirp),
    }
}

/// # Safety
/// Must only be called by the dynamic loader as a replacement for `readdir64(3)`.
#[no_mangle]
pub unsafe extern "C" fn readdir64(dirp: *mut c_void) -> *mut c_void {
    match state().on_readdir(dirp as usize) {
        ReaddirOutcome::Entry(_) => (real().readdir64)(dirp),
        ReaddirOutcome::Exhausted => std::ptr::null_mut(),
        ReaddirOutcome::Untracked => (real().readdir64)(dirp),
    }
}

/// # Safety
/// Must only be called by the dynamic loader as a replacement for `closedir(3)`.
#[no_mangle]
pub unsafe extern "C" fn closedir(dirp: *mut c_void) -> c_int {
    let res = (real().closedir)(dirp);
    state().on_closedir(dirp as usize);
    res
}

/// # Safety
/// Must only be called by the dynamic loader as a replacement for `rewinddir(3)`.
#[no_mangle]
pub unsafe extern "C" fn rewinddir(dirp: *mut c_void) {
    (real().rewinddir)(dirp);
    state().on_rewinddir(dirp as usize);
}
