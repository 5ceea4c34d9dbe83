//! Error types for precache.

use std::path::PathBuf;

/// Errors surfaced across crate boundaries.
///
/// Most internal resolver/engine failures are swallowed per the silent-failure
/// contract (see `resolver` and `engine` modules) and never reach this type;
/// `Error` exists for the operations that are allowed to fail loudly: CLI
/// argument handling, config loading, and opening the raw device.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("mount detection failed: {0}")]
    MountDetection(String),

    #[error("extent query failed: {0}")]
    Fiemap(String),

    #[error("path not found: {0}")]
    PathNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
