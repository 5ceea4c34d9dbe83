//! precache - page-cache prefetcher for files living behind an
//! encrypting FUSE overlay.
//!
//! Enumerates a file's on-disk extents via `FIEMAP`, reorders them by
//! physical offset, and reads them back sequentially so the kernel's
//! readahead has an easy time warming the page cache. Paths that live on an
//! overlay filesystem are first translated to the ciphertext file backing
//! them, by cross-referencing the overlay and backing directory trees'
//! inode numbers (see `resolver`), since the overlay daemon exposes no API
//! for that mapping itself.
//!
//! `interposer` implements the directory-listing heuristic used when this
//! crate is loaded into a host process (e.g. via `LD_PRELOAD`) to decide
//! when a `readdir` loop is about to open every file it lists.

pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod interposer;
pub mod progress;
pub mod resolver;
pub mod sys;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::resolver::OverlayResolver;
}
